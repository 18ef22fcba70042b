use serde::Deserialize;

use super::resource::Resource;
use super::schema::Database;
use super::types::{DatabaseError, Subscription};
use super::values::{Direction, Filter, Query, Values};

/// Sort orders offered for the subscription list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionSort {
    #[default]
    ModifiedDesc,
    ModifiedAsc,
    UnreadDesc,
    UnreadAsc,
    TitleAsc,
    RateDesc,
    SubscribersDesc,
    SubscribersAsc,
}

impl SubscriptionSort {
    fn column(self) -> (&'static str, Direction) {
        match self {
            SubscriptionSort::ModifiedDesc => ("modified_time", Direction::Desc),
            SubscriptionSort::ModifiedAsc => ("modified_time", Direction::Asc),
            SubscriptionSort::UnreadDesc => ("unread_count", Direction::Desc),
            SubscriptionSort::UnreadAsc => ("unread_count", Direction::Asc),
            SubscriptionSort::TitleAsc => ("title", Direction::Asc),
            SubscriptionSort::RateDesc => ("rate", Direction::Desc),
            SubscriptionSort::SubscribersDesc => ("subscribers_count", Direction::Desc),
            SubscriptionSort::SubscribersAsc => ("subscribers_count", Direction::Asc),
        }
    }

    fn query(self) -> Query {
        let (column, direction) = self.column();
        Query::new()
            .order_by(column, direction)
            .order_by("id", Direction::Asc)
    }
}

impl std::str::FromStr for SubscriptionSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "modified_desc" => Ok(Self::ModifiedDesc),
            "modified_asc" => Ok(Self::ModifiedAsc),
            "unread_desc" => Ok(Self::UnreadDesc),
            "unread_asc" => Ok(Self::UnreadAsc),
            "title_asc" => Ok(Self::TitleAsc),
            "rate_desc" => Ok(Self::RateDesc),
            "subscribers_desc" => Ok(Self::SubscribersDesc),
            "subscribers_asc" => Ok(Self::SubscribersAsc),
            other => Err(format!("unknown subscription sort '{}'", other)),
        }
    }
}

/// Filter for items of one subscription that are still unread.
pub(crate) fn unread_items_of(subscription_id: i64) -> Filter {
    Filter::eq("subscription_id", subscription_id).and(Filter::eq("unread", true))
}

impl Database {
    // ========================================================================
    // Subscription Queries
    // ========================================================================

    /// All subscriptions in the requested order.
    pub async fn subscriptions(
        &self,
        sort: SubscriptionSort,
    ) -> Result<Vec<Subscription>, DatabaseError> {
        self.query(Resource::subscriptions(), &sort.query()).await
    }

    /// Subscriptions whose `modified_time` differs from `item_sync_time`.
    pub async fn dirty_subscriptions(&self) -> Result<Vec<Subscription>, DatabaseError> {
        self.query(
            Resource::subscriptions(),
            &Query::new()
                .filter(Filter::new("modified_time <> item_sync_time", Vec::new()))
                .order_by("id", Direction::Asc),
        )
        .await
    }

    /// Distinct folder names, blank folders excluded.
    pub async fn folders(&self) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT folder FROM subscription \
             WHERE folder IS NOT NULL AND folder <> '' ORDER BY folder ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(rows)
    }

    /// Distinct ratings, highest first.
    pub async fn rates(&self) -> Result<Vec<i64>, DatabaseError> {
        let rows: Vec<i64> =
            sqlx::query_scalar("SELECT DISTINCT rate FROM subscription ORDER BY rate DESC")
                .fetch_all(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        Ok(rows)
    }

    pub async fn subscriptions_in_folder(
        &self,
        folder: &str,
        sort: SubscriptionSort,
    ) -> Result<Vec<Subscription>, DatabaseError> {
        self.query(
            Resource::subscriptions(),
            &sort.query().filter(Filter::eq("folder", folder)),
        )
        .await
    }

    pub async fn subscriptions_with_rate(
        &self,
        rate: i64,
        sort: SubscriptionSort,
    ) -> Result<Vec<Subscription>, DatabaseError> {
        self.query(
            Resource::subscriptions(),
            &sort.query().filter(Filter::eq("rate", rate)),
        )
        .await
    }

    /// Total unread items across every subscription.
    pub async fn count_unread(&self) -> Result<i64, DatabaseError> {
        self.count(Resource::items(), &Filter::eq("unread", true))
            .await
    }

    // ========================================================================
    // Unread Counters
    // ========================================================================

    /// Recompute `unread_count` from the item table in a single statement.
    ///
    /// When `item_sync_time` is given it is written in the same statement, so
    /// the counter and the sync high-water mark never disagree.
    pub async fn recount_unread(
        &self,
        subscription_id: i64,
        item_sync_time: Option<i64>,
    ) -> Result<i64, DatabaseError> {
        let unread: i64 = {
            let _guard = self.write_gate.lock().await;
            sqlx::query_scalar(
                r#"
                UPDATE subscription SET
                    unread_count = (
                        SELECT COUNT(*) FROM item
                        WHERE item.subscription_id = subscription.id AND item.unread = 1
                    ),
                    item_sync_time = COALESCE(?, item_sync_time)
                WHERE id = ?
                RETURNING unread_count
            "#,
            )
            .bind(item_sync_time)
            .bind(subscription_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .unwrap_or(0)
        };

        self.notify_change(Resource::subscription(subscription_id));
        Ok(unread)
    }

    /// Remember the item the user last viewed in a subscription.
    pub async fn save_read_item_id(
        &self,
        subscription_id: i64,
        item_id: i64,
    ) -> Result<(), DatabaseError> {
        self.update(
            Resource::subscription(subscription_id),
            Values::new().set("read_item_id", item_id),
            &Filter::all(),
        )
        .await?;
        Ok(())
    }

    // ========================================================================
    // Mark Read
    // ========================================================================

    /// Mark every item of one subscription read and zero its counter.
    pub async fn mark_subscription_read(&self, subscription_id: i64) -> Result<u64, DatabaseError> {
        let marked = self
            .update(
                Resource::items(),
                Values::new().set("unread", false),
                &unread_items_of(subscription_id),
            )
            .await?;
        self.recount_unread(subscription_id, None).await?;
        Ok(marked)
    }

    /// Mark every item read and zero every subscription counter, in one
    /// transaction.
    pub async fn mark_all_read(&self) -> Result<u64, DatabaseError> {
        let marked = {
            let _guard = self.write_gate.lock().await;
            let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
            let marked = sqlx::query("UPDATE item SET unread = 0 WHERE unread = 1")
                .execute(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?
                .rows_affected();
            sqlx::query("UPDATE subscription SET unread_count = 0 WHERE unread_count <> 0")
                .execute(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;
            tx.commit().await.map_err(DatabaseError::from_sqlx)?;
            marked
        };

        self.notify_change(Resource::items());
        self.notify_change(Resource::subscriptions());
        tracing::info!(marked, "Marked all items read");
        Ok(marked)
    }
}
