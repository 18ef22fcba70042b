use sqlx::sqlite::SqliteRow;
use thiserror::Error;

use super::resource::Collection;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another instance of the application has locked the database
    #[error("Another instance of ldrmirror appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A write violated the schema: missing required column, unknown column,
    /// unknown resource, or a SQLite constraint
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error, mapping lock conditions and constraint
    /// violations to their dedicated variants.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation()
                || db_err.is_check_violation()
                || db_err.is_foreign_key_violation()
                || matches!(db_err.kind(), sqlx::error::ErrorKind::NotNullViolation)
            {
                return DatabaseError::Constraint(db_err.message().to_string());
            }
        }

        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Records
// ============================================================================

/// A row type bound to one storage collection.
///
/// `query` uses the collection to pick the table and the `FromRow` impl to
/// decode every column of it.
pub trait Record: for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin {
    const COLLECTION: Collection;
}

/// One remote feed the user follows.
///
/// `unread_count` is denormalized and recomputed from the item table after
/// every item sync and every read-state commit.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Subscription {
    pub id: i64,
    pub uri: Option<String>,
    pub title: Option<String>,
    pub icon_uri: Option<String>,
    pub icon: Option<Vec<u8>>,
    pub rate: i64,
    pub subscribers_count: i64,
    pub unread_count: i64,
    pub folder: Option<String>,
    pub modified_time: i64,
    pub item_sync_time: i64,
    pub disabled: bool,
    pub read_item_id: Option<i64>,
}

impl Subscription {
    /// A subscription whose server timestamp moved past the last item sync.
    pub fn is_dirty(&self) -> bool {
        self.modified_time != self.item_sync_time
    }
}

impl Record for Subscription {
    const COLLECTION: Collection = Collection::Subscription;
}

/// One article belonging to a subscription. Larger ids are newer.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Item {
    pub id: i64,
    pub subscription_id: i64,
    pub uri: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub author: Option<String>,
    pub unread: bool,
    pub created_time: i64,
    pub modified_time: i64,
}

impl Record for Item {
    const COLLECTION: Collection = Collection::Item;
}

/// What a pin row asks the remote service to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[repr(i32)]
pub enum PinAction {
    None = 0,
    Add = 1,
    Remove = 2,
}

impl From<PinAction> for i64 {
    fn from(action: PinAction) -> Self {
        action as i64
    }
}

impl From<PinAction> for super::values::Value {
    fn from(action: PinAction) -> Self {
        super::values::Value::Integer(action.into())
    }
}

/// A save/unsave action against an item permalink, queued for replication.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Pin {
    pub id: i64,
    pub uri: String,
    pub title: Option<String>,
    pub action: PinAction,
    pub created_time: i64,
    /// Set once the action has been replicated (or superseded by a newer one)
    pub synced_time: Option<i64>,
}

impl Record for Pin {
    const COLLECTION: Collection = Collection::Pin;
}
