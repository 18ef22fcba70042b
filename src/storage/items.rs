use super::resource::Resource;
use super::schema::Database;
use super::subscriptions::unread_items_of;
use super::types::{DatabaseError, Item};
use super::values::{Direction, Filter, Query, Values};

impl Database {
    // ========================================================================
    // Item Queries
    // ========================================================================

    fn subscription_items(subscription_id: i64, unread_only: bool) -> Filter {
        if unread_only {
            unread_items_of(subscription_id)
        } else {
            Filter::eq("subscription_id", subscription_id)
        }
    }

    /// Items of a subscription, newest first.
    pub async fn items_for_subscription(
        &self,
        subscription_id: i64,
        unread_only: bool,
    ) -> Result<Vec<Item>, DatabaseError> {
        self.query(
            Resource::items(),
            &Query::new()
                .filter(Self::subscription_items(subscription_id, unread_only))
                .order_by("id", Direction::Desc),
        )
        .await
    }

    /// Item ids of a subscription, newest first, without loading bodies.
    pub async fn item_ids(
        &self,
        subscription_id: i64,
        unread_only: bool,
    ) -> Result<Vec<i64>, DatabaseError> {
        self.query_scalar(
            Resource::items(),
            &Query::new()
                .select(&["id"])
                .filter(Self::subscription_items(subscription_id, unread_only))
                .order_by("id", Direction::Desc),
        )
        .await
    }

    /// Mark the given unread items of a subscription read.
    ///
    /// Ids from other subscriptions and items already read are left alone.
    /// Returns how many items changed.
    pub async fn mark_items_read(
        &self,
        subscription_id: i64,
        item_ids: &[i64],
    ) -> Result<u64, DatabaseError> {
        if item_ids.is_empty() {
            return Ok(0);
        }
        self.update(
            Resource::items(),
            Values::new().set("unread", false),
            &unread_items_of(subscription_id).and(Filter::any_of("id", item_ids.iter().copied())),
        )
        .await
    }
}
