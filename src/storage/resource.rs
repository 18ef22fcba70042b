//! URI-style addressing for the storage collections.
//!
//! A [`Resource`] is either a bare collection (`item`) or one row of it
//! (`item/42`). Queries and updates against a row resource implicitly AND
//! `id = <id>` with the caller's filter; change notifications are keyed by
//! the resource that was written.

use std::fmt;
use std::str::FromStr;

use super::types::DatabaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Subscription,
    Item,
    Pin,
}

const SUBSCRIPTION_COLUMNS: &[&str] = &[
    "id",
    "uri",
    "title",
    "icon_uri",
    "icon",
    "rate",
    "subscribers_count",
    "unread_count",
    "folder",
    "modified_time",
    "item_sync_time",
    "disabled",
    "read_item_id",
];

const ITEM_COLUMNS: &[&str] = &[
    "id",
    "subscription_id",
    "uri",
    "title",
    "body",
    "author",
    "unread",
    "created_time",
    "modified_time",
];

const PIN_COLUMNS: &[&str] = &["id", "uri", "title", "action", "created_time", "synced_time"];

impl Collection {
    /// Table backing the collection; also the path segment of its resource.
    pub fn table(self) -> &'static str {
        match self {
            Collection::Subscription => "subscription",
            Collection::Item => "item",
            Collection::Pin => "pin",
        }
    }

    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Collection::Subscription => SUBSCRIPTION_COLUMNS,
            Collection::Item => ITEM_COLUMNS,
            Collection::Pin => PIN_COLUMNS,
        }
    }

    /// Columns an insert must supply.
    pub fn required(self) -> &'static [&'static str] {
        match self {
            Collection::Subscription => &["id"],
            Collection::Item => &["id", "subscription_id"],
            Collection::Pin => &["uri", "action"],
        }
    }

    pub fn has_column(self, column: &str) -> bool {
        self.columns().contains(&column)
    }

    /// Reject a column name that is not part of this collection.
    pub(crate) fn check_column(self, column: &str) -> Result<(), DatabaseError> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(DatabaseError::Constraint(format!(
                "unknown column '{}' for {}",
                column,
                self.table()
            )))
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

impl FromStr for Collection {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscription" => Ok(Collection::Subscription),
            "item" => Ok(Collection::Item),
            "pin" => Ok(Collection::Pin),
            other => Err(DatabaseError::Constraint(format!(
                "unknown collection '{}'",
                other
            ))),
        }
    }
}

/// Address of a collection or of a single row in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resource {
    pub collection: Collection,
    pub id: Option<i64>,
}

impl Resource {
    pub fn collection(collection: Collection) -> Self {
        Self {
            collection,
            id: None,
        }
    }

    pub fn row(collection: Collection, id: i64) -> Self {
        Self {
            collection,
            id: Some(id),
        }
    }

    pub fn subscriptions() -> Self {
        Self::collection(Collection::Subscription)
    }

    pub fn subscription(id: i64) -> Self {
        Self::row(Collection::Subscription, id)
    }

    pub fn items() -> Self {
        Self::collection(Collection::Item)
    }

    pub fn item(id: i64) -> Self {
        Self::row(Collection::Item, id)
    }

    pub fn pins() -> Self {
        Self::collection(Collection::Pin)
    }

    /// The bare collection this resource belongs to.
    pub fn parent(&self) -> Self {
        Self::collection(self.collection)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{}/{}", self.collection, id),
            None => write!(f, "{}", self.collection),
        }
    }
}

impl FromStr for Resource {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_matches('/');
        match s.split_once('/') {
            None => Ok(Resource::collection(s.parse()?)),
            Some((collection, id)) => {
                let collection: Collection = collection.parse()?;
                let id = id.parse::<i64>().map_err(|_| {
                    DatabaseError::Constraint(format!("invalid row id in resource '{}'", s))
                })?;
                Ok(Resource::row(collection, id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_display() {
        assert_eq!(Resource::items().to_string(), "item");
        assert_eq!(Resource::subscription(12).to_string(), "subscription/12");
    }

    #[test]
    fn test_resource_parse() {
        assert_eq!("pin".parse::<Resource>().unwrap(), Resource::pins());
        assert_eq!("/item/42/".parse::<Resource>().unwrap(), Resource::item(42));
    }

    #[test]
    fn test_resource_parse_rejects_unknown_collection() {
        let err = "feeds/1".parse::<Resource>().unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[test]
    fn test_resource_parse_rejects_non_numeric_id() {
        assert!("item/abc".parse::<Resource>().is_err());
    }

    #[test]
    fn test_parent_drops_id() {
        assert_eq!(Resource::item(7).parent(), Resource::items());
    }

    #[test]
    fn test_required_columns_are_known() {
        for collection in [Collection::Subscription, Collection::Item, Collection::Pin] {
            for column in collection.required() {
                assert!(collection.has_column(column), "{} missing {}", collection, column);
            }
        }
    }
}
