use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

use super::resource::Resource;
use super::types::DatabaseError;

/// Current schema version, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 3;

/// Capacity of the change-notification channel. Slow observers that fall
/// further behind than this see `RecvError::Lagged` and should re-query.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Additive migration steps. Entry `n` upgrades a database from version `n`
/// to version `n + 1`; steps never drop tables or columns.
const MIGRATIONS: &[&[&str]] = &[
    // v1: subscriptions and items
    &[
        r#"
        CREATE TABLE IF NOT EXISTS subscription (
            id INTEGER PRIMARY KEY,
            uri TEXT,
            title TEXT,
            icon_uri TEXT,
            icon BLOB,
            rate INTEGER NOT NULL DEFAULT 0,
            subscribers_count INTEGER NOT NULL DEFAULT 0,
            unread_count INTEGER NOT NULL DEFAULT 0,
            folder TEXT,
            modified_time INTEGER NOT NULL DEFAULT 0,
            item_sync_time INTEGER NOT NULL DEFAULT 0
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS item (
            id INTEGER PRIMARY KEY,
            subscription_id INTEGER NOT NULL,
            uri TEXT,
            title TEXT,
            body TEXT,
            author TEXT,
            unread INTEGER NOT NULL DEFAULT 1,
            created_time INTEGER NOT NULL DEFAULT 0,
            modified_time INTEGER NOT NULL DEFAULT 0
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_subscription_rate ON subscription(rate)",
        "CREATE INDEX IF NOT EXISTS idx_subscription_subscribers_count ON subscription(subscribers_count)",
        "CREATE INDEX IF NOT EXISTS idx_subscription_unread_count ON subscription(unread_count)",
        "CREATE INDEX IF NOT EXISTS idx_subscription_folder ON subscription(folder)",
        "CREATE INDEX IF NOT EXISTS idx_subscription_modified_time ON subscription(modified_time)",
        "CREATE INDEX IF NOT EXISTS idx_subscription_item_sync_time ON subscription(item_sync_time)",
        "CREATE INDEX IF NOT EXISTS idx_item_subscription_id ON item(subscription_id)",
        "CREATE INDEX IF NOT EXISTS idx_item_unread ON item(unread)",
        "CREATE INDEX IF NOT EXISTS idx_item_created_time ON item(created_time)",
        "CREATE INDEX IF NOT EXISTS idx_item_modified_time ON item(modified_time)",
    ],
    // v2: per-subscription read position and the pin queue
    &[
        "ALTER TABLE subscription ADD COLUMN disabled INTEGER NOT NULL DEFAULT 0",
        "ALTER TABLE subscription ADD COLUMN read_item_id INTEGER",
        "CREATE INDEX IF NOT EXISTS idx_subscription_disabled ON subscription(disabled)",
        r#"
        CREATE TABLE IF NOT EXISTS pin (
            id INTEGER PRIMARY KEY,
            uri TEXT NOT NULL,
            title TEXT,
            action INTEGER NOT NULL DEFAULT 0,
            created_time INTEGER NOT NULL DEFAULT 0
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_pin_uri ON pin(uri)",
        "CREATE INDEX IF NOT EXISTS idx_pin_action ON pin(action)",
    ],
    // v3: unread counting by subscription and pin replication state
    &[
        "CREATE INDEX IF NOT EXISTS idx_item_unread_by_sub ON item(subscription_id, unread)",
        "ALTER TABLE pin ADD COLUMN synced_time INTEGER",
        "CREATE INDEX IF NOT EXISTS idx_pin_synced_time ON pin(synced_time)",
    ],
];

// ============================================================================
// Database
// ============================================================================

/// Handle to the local replica.
///
/// Cloning is cheap; all clones share the pool, the write gate and the
/// change-notification channel.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    /// Serializes writers so readers only ever see whole statements or
    /// whole transactions.
    pub(crate) write_gate: Arc<Mutex<()>>,
    pub(crate) changes: broadcast::Sender<Resource>,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process holds the
    /// database lock. Returns `DatabaseError::Migration` if the schema could
    /// not be brought to [`SCHEMA_VERSION`].
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Pre-create the file user-only so it never exists with umask permissions
        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() && db_path.parent().is_some_and(|p| p.exists()) {
                let _file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path)
                    .ok(); // If creation fails, SQLite will report the error at connect_with.
            }
        }

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to release
        // before returning SQLITE_BUSY. Every pooled connection inherits it.
        let mut options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .pragma("busy_timeout", "5000");
        // WAL lets readers proceed while a sync cycle writes. Not available
        // for in-memory databases.
        if path != ":memory:" {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let db = Self {
            pool,
            write_gate: Arc::new(Mutex::new(())),
            changes,
        };
        db.migrate().await?;
        Ok(db)
    }

    /// Bring the schema up to [`SCHEMA_VERSION`] in one transaction.
    ///
    /// Only the steps above the stored `user_version` run, so re-opening an
    /// up-to-date database is a no-op and older databases keep their rows.
    async fn migrate(&self) -> Result<(), DatabaseError> {
        let _guard = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let (current,): (i64,) = sqlx::query_as("PRAGMA user_version")
            .fetch_one(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        if current > SCHEMA_VERSION {
            return Err(DatabaseError::Migration(format!(
                "database schema version {} is newer than supported version {}",
                current, SCHEMA_VERSION
            )));
        }

        for (step, statements) in MIGRATIONS.iter().enumerate().skip(current as usize) {
            let target = step as i64 + 1;
            tracing::debug!(from = current, to = target, "Applying schema migration");
            for statement in statements.iter() {
                sqlx::query(statement)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| DatabaseError::Migration(format!("v{}: {}", target, e)))?;
            }
        }

        if current < SCHEMA_VERSION {
            // PRAGMA does not accept bound parameters
            sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
                .execute(&mut *tx)
                .await
                .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            tracing::info!(from = current, to = SCHEMA_VERSION, "Database schema upgraded");
        }

        tx.commit().await.map_err(|e| {
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked") {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;

        Ok(())
    }

    /// Schema version recorded in the database file.
    pub async fn schema_version(&self) -> Result<i64, DatabaseError> {
        let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(version)
    }

    /// Observe change notifications for every successful insert and update.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<Resource> {
        self.changes.subscribe()
    }

    pub(crate) fn notify_change(&self, resource: Resource) {
        tracing::trace!(resource = %resource, "Change notification");
        // No receivers is fine: nobody is observing right now.
        let _ = self.changes.send(resource);
    }
}
