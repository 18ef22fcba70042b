//! Current-item cursor for reading one subscription.
//!
//! [`ReadPosition`] materializes the ordered id list of the view when it is
//! opened and walks that snapshot; changes made to the store afterwards are
//! only picked up by an explicit [`ReadPosition::reopen`]. Items shown while
//! browsing are collected in a touched set and written back in one update on
//! [`pause`](ReadPosition::pause) or [`finish`](ReadPosition::finish), so fast
//! next/next/next browsing costs no writes.

use std::collections::BTreeSet;

use crate::storage::{Database, DatabaseError, Item, Resource, Subscription};

/// Where a freshly opened view starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartAt {
    /// The newest item
    #[default]
    Newest,
    /// The item last viewed in this subscription
    LastRead,
}

/// Cursor over one subscription's items, newest first.
pub struct ReadPosition {
    db: Database,
    subscription_id: i64,
    unread_only: bool,
    ids: Vec<i64>,
    index: usize,
    current: Option<Item>,
    read_item_id: Option<i64>,
    touched: BTreeSet<i64>,
}

impl ReadPosition {
    /// Open a view on `subscription_id`.
    ///
    /// An unread-only view with nothing unread falls back to all items and
    /// stays in that mode.
    ///
    /// # Errors
    ///
    /// `DatabaseError::Constraint` if the subscription does not exist, or any
    /// query failure.
    pub async fn open(
        db: Database,
        subscription_id: i64,
        unread_only: bool,
        start: StartAt,
    ) -> Result<Self, DatabaseError> {
        let sub: Subscription = db.get(subscription_id).await?.ok_or_else(|| {
            DatabaseError::Constraint(format!(
                "no such resource {}",
                Resource::subscription(subscription_id)
            ))
        })?;

        let mut position = Self {
            db,
            subscription_id,
            unread_only,
            ids: Vec::new(),
            index: 0,
            current: None,
            read_item_id: sub.read_item_id,
            touched: BTreeSet::new(),
        };
        position.load_snapshot().await?;

        if start == StartAt::LastRead {
            if let Some(read_item_id) = sub.read_item_id {
                position.index = position.ids.iter().filter(|&&id| id > read_item_id).count();
            }
        }
        position.bind().await?;

        tracing::debug!(
            subscription_id,
            unread_only = position.unread_only,
            total = position.ids.len(),
            index = position.index,
            "Opened read position"
        );
        Ok(position)
    }

    async fn load_snapshot(&mut self) -> Result<(), DatabaseError> {
        self.ids = self
            .db
            .item_ids(self.subscription_id, self.unread_only)
            .await?;
        if self.ids.is_empty() && self.unread_only {
            self.ids = self.db.item_ids(self.subscription_id, false).await?;
            self.unread_only = false;
        }
        Ok(())
    }

    /// Load the item under the cursor. An unread item joins the touched set.
    async fn bind(&mut self) -> Result<(), DatabaseError> {
        self.index = clamp_index(self.index, self.ids.len());
        self.current = match self.ids.get(self.index) {
            Some(&id) => self.db.get::<Item>(id).await?,
            None => None,
        };
        if let Some(item) = &self.current {
            self.read_item_id = Some(item.id);
            if item.unread {
                self.touched.insert(item.id);
            }
        }
        Ok(())
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Move to an absolute position, clamped to the snapshot.
    pub async fn move_to(&mut self, index: usize) -> Result<(), DatabaseError> {
        self.index = index;
        self.bind().await
    }

    /// Step to the next (older) item. Returns `false` at the end.
    pub async fn next(&mut self) -> Result<bool, DatabaseError> {
        if self.index + 1 >= self.ids.len() {
            return Ok(false);
        }
        self.move_to(self.index + 1).await?;
        Ok(true)
    }

    /// Step to the previous (newer) item. Returns `false` at the start.
    pub async fn previous(&mut self) -> Result<bool, DatabaseError> {
        if self.index == 0 || self.ids.is_empty() {
            return Ok(false);
        }
        self.move_to(self.index - 1).await?;
        Ok(true)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn subscription_id(&self) -> i64 {
        self.subscription_id
    }

    pub fn is_unread_only(&self) -> bool {
        self.unread_only
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn total_count(&self) -> usize {
        self.ids.len()
    }

    pub fn current_item(&self) -> Option<&Item> {
        self.current.as_ref()
    }

    pub fn current_item_id(&self) -> Option<i64> {
        self.current.as_ref().map(|item| item.id)
    }

    /// Items viewed this session that are not yet committed as read.
    pub fn touched(&self) -> impl Iterator<Item = i64> + '_ {
        self.touched.iter().copied()
    }

    // ========================================================================
    // Commit
    // ========================================================================

    /// Write the session's read state back to storage.
    ///
    /// Always stores the last viewed item id. Touched items are marked read
    /// in one update; unless `finishing`, the current item is left unread and
    /// stays touched. When anything changed, the subscription's unread count
    /// is recomputed. Returns the number of items marked read.
    pub async fn commit(&mut self, finishing: bool) -> Result<u64, DatabaseError> {
        if let Some(read_item_id) = self.read_item_id {
            self.db
                .save_read_item_id(self.subscription_id, read_item_id)
                .await?;
        }

        let current = self.current_item_id();
        let ids: Vec<i64> = self
            .touched
            .iter()
            .copied()
            .filter(|&id| finishing || Some(id) != current)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let marked = self.db.mark_items_read(self.subscription_id, &ids).await?;
        if marked > 0 {
            self.db.recount_unread(self.subscription_id, None).await?;
        }
        for id in &ids {
            self.touched.remove(id);
        }

        tracing::debug!(
            subscription_id = self.subscription_id,
            marked,
            finishing,
            "Committed read state"
        );
        Ok(marked)
    }

    /// Commit while the view stays open; failures only leave counts stale.
    pub async fn pause(&mut self) {
        if let Err(e) = self.commit(false).await {
            tracing::warn!(subscription_id = self.subscription_id, error = %e, "Failed to commit read state");
        }
    }

    /// Commit including the current item and close the view.
    pub async fn finish(mut self) {
        if let Err(e) = self.commit(true).await {
            tracing::warn!(subscription_id = self.subscription_id, error = %e, "Failed to commit read state");
        }
    }

    /// Re-materialize the snapshot, keeping the cursor on the current item
    /// when it is still part of the view.
    pub async fn reopen(&mut self) -> Result<(), DatabaseError> {
        let current = self.current_item_id();
        self.load_snapshot().await?;
        if let Some(pos) = current.and_then(|id| self.ids.iter().position(|&other| other == id)) {
            self.index = pos;
        }
        self.bind().await
    }

    /// Mark every item of the subscription read locally, then reopen.
    pub async fn mark_all_read(&mut self) -> Result<u64, DatabaseError> {
        if let Some(read_item_id) = self.read_item_id {
            self.db
                .save_read_item_id(self.subscription_id, read_item_id)
                .await?;
        }
        let marked = self.db.mark_subscription_read(self.subscription_id).await?;
        self.touched.clear();
        self.reopen().await?;
        Ok(marked)
    }
}

fn clamp_index(index: usize, len: usize) -> usize {
    index.min(len.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Collection, Values};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    async fn seeded(items: &[(i64, bool)]) -> Database {
        let db = Database::open(":memory:").await.unwrap();
        db.insert(
            Collection::Subscription,
            Values::new().set("id", 1).set("title", "Feed"),
        )
        .await
        .unwrap();
        for &(id, unread) in items {
            db.insert(
                Collection::Item,
                Values::new()
                    .set("id", id)
                    .set("subscription_id", 1)
                    .set("unread", unread),
            )
            .await
            .unwrap();
        }
        db.recount_unread(1, None).await.unwrap();
        db
    }

    async fn unread_count(db: &Database) -> i64 {
        let sub: Subscription = db.get(1).await.unwrap().unwrap();
        sub.unread_count
    }

    #[tokio::test]
    async fn test_open_unread_only_newest_first() {
        let db = seeded(&[(1, false), (2, true), (3, true)]).await;
        let pos = ReadPosition::open(db, 1, true, StartAt::Newest).await.unwrap();

        assert!(pos.is_unread_only());
        assert_eq!(pos.total_count(), 2);
        assert_eq!(pos.current_item_id(), Some(3));
        assert_eq!(pos.touched().collect::<Vec<_>>(), vec![3]);
    }

    #[tokio::test]
    async fn test_open_falls_back_to_all_items() {
        let db = seeded(&[(1, false), (2, false), (3, false)]).await;
        let pos = ReadPosition::open(db, 1, true, StartAt::Newest).await.unwrap();

        assert!(!pos.is_unread_only());
        assert_eq!(pos.total_count(), 3);
        assert!(pos.touched().next().is_none());
    }

    #[tokio::test]
    async fn test_open_unknown_subscription() {
        let db = seeded(&[]).await;
        let result = ReadPosition::open(db, 99, true, StartAt::Newest).await;
        assert!(matches!(result, Err(DatabaseError::Constraint(_))));
    }

    #[tokio::test]
    async fn test_empty_subscription() {
        let db = seeded(&[]).await;
        let mut pos = ReadPosition::open(db, 1, true, StartAt::Newest).await.unwrap();
        assert_eq!(pos.total_count(), 0);
        assert_eq!(pos.current_item_id(), None);
        assert!(!pos.next().await.unwrap());
        assert!(!pos.previous().await.unwrap());
        assert_eq!(pos.commit(true).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_resume_at_last_read() {
        let db = seeded(&[(7, false), (8, false), (9, false), (10, false)]).await;
        db.save_read_item_id(1, 8).await.unwrap();

        let pos = ReadPosition::open(db, 1, false, StartAt::LastRead).await.unwrap();
        assert_eq!(pos.current_index(), 2);
        assert_eq!(pos.current_item_id(), Some(8));
    }

    #[tokio::test]
    async fn test_resume_past_end_clamps() {
        let db = seeded(&[(9, true), (10, true)]).await;
        db.save_read_item_id(1, 3).await.unwrap();

        let pos = ReadPosition::open(db, 1, true, StartAt::LastRead).await.unwrap();
        assert_eq!(pos.current_index(), 1);
        assert_eq!(pos.current_item_id(), Some(9));
    }

    #[tokio::test]
    async fn test_navigation_clamps() {
        let db = seeded(&[(1, true), (2, true), (3, true)]).await;
        let mut pos = ReadPosition::open(db, 1, true, StartAt::Newest).await.unwrap();

        assert!(!pos.previous().await.unwrap());
        assert!(pos.next().await.unwrap());
        assert!(pos.next().await.unwrap());
        assert!(!pos.next().await.unwrap());
        assert_eq!(pos.current_index(), 2);
        assert_eq!(pos.current_item_id(), Some(1));

        pos.move_to(50).await.unwrap();
        assert_eq!(pos.current_index(), 2);
    }

    #[tokio::test]
    async fn test_browsing_does_not_write() {
        let db = seeded(&[(1, true), (2, true), (3, true)]).await;
        let mut pos = ReadPosition::open(db.clone(), 1, true, StartAt::Newest).await.unwrap();
        pos.next().await.unwrap();
        pos.next().await.unwrap();

        assert_eq!(pos.touched().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(db.item_ids(1, true).await.unwrap().len(), 3);
        assert_eq!(unread_count(&db).await, 3);
    }

    #[tokio::test]
    async fn test_pause_keeps_current_item_unread() {
        let db = seeded(&[(1, true), (2, true), (3, true)]).await;
        let mut pos = ReadPosition::open(db.clone(), 1, true, StartAt::Newest).await.unwrap();
        pos.next().await.unwrap(); // current is 2

        assert_eq!(pos.commit(false).await.unwrap(), 1);
        assert_eq!(db.item_ids(1, true).await.unwrap(), vec![2, 1]);
        assert_eq!(unread_count(&db).await, 2);
        assert_eq!(pos.touched().collect::<Vec<_>>(), vec![2]);

        let sub: Subscription = db.get(1).await.unwrap().unwrap();
        assert_eq!(sub.read_item_id, Some(2));
    }

    #[tokio::test]
    async fn test_finish_includes_current_item() {
        let db = seeded(&[(1, true), (2, true), (3, true)]).await;
        let mut pos = ReadPosition::open(db.clone(), 1, true, StartAt::Newest).await.unwrap();
        pos.next().await.unwrap();

        pos.finish().await;
        assert_eq!(db.item_ids(1, true).await.unwrap(), vec![1]);
        assert_eq!(unread_count(&db).await, 1);
    }

    #[tokio::test]
    async fn test_commit_notifies_observers() {
        let db = seeded(&[(1, true)]).await;
        let mut pos = ReadPosition::open(db.clone(), 1, true, StartAt::Newest).await.unwrap();
        let mut changes = db.subscribe_changes();

        pos.commit(true).await.unwrap();

        let mut seen = Vec::new();
        while let Ok(resource) = changes.try_recv() {
            seen.push(resource);
        }
        assert!(seen.contains(&Resource::items()));
        assert!(seen.contains(&Resource::subscription(1)));
    }

    #[tokio::test]
    async fn test_reopen_keeps_current_item() {
        let db = seeded(&[(1, true), (2, true), (3, true)]).await;
        let mut pos = ReadPosition::open(db.clone(), 1, true, StartAt::Newest).await.unwrap();
        pos.next().await.unwrap();
        pos.pause().await; // item 3 read, 2 current

        pos.reopen().await.unwrap();
        assert_eq!(pos.total_count(), 2);
        assert_eq!(pos.current_item_id(), Some(2));
        assert_eq!(pos.current_index(), 0);
    }

    #[tokio::test]
    async fn test_mark_all_read_reopens_all_items() {
        let db = seeded(&[(1, true), (2, true), (3, false)]).await;
        let mut pos = ReadPosition::open(db.clone(), 1, true, StartAt::Newest).await.unwrap();

        assert_eq!(pos.mark_all_read().await.unwrap(), 2);
        assert!(!pos.is_unread_only());
        assert_eq!(pos.total_count(), 3);
        assert!(pos.touched().next().is_none());
        assert_eq!(unread_count(&db).await, 0);
    }

    #[tokio::test]
    async fn test_pause_tolerates_storage_failure() {
        let db = seeded(&[(1, true), (2, true)]).await;
        let mut pos = ReadPosition::open(db.clone(), 1, true, StartAt::Newest).await.unwrap();
        pos.next().await.unwrap();

        db.pool.close().await;
        pos.pause().await;
        assert!(pos.touched().next().is_some());
    }

    proptest! {
        #[test]
        fn prop_index_stays_in_bounds(index in 0usize..1000, len in 0usize..50) {
            let clamped = clamp_index(index, len);
            if len == 0 {
                prop_assert_eq!(clamped, 0);
            } else {
                prop_assert!(clamped < len);
                prop_assert!(clamped <= index);
            }
        }

        #[test]
        fn prop_navigation_stays_in_bounds(moves in proptest::collection::vec(any::<bool>(), 0..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let db = seeded(&[(1, true), (2, true), (3, true), (4, false)]).await;
                let mut pos = ReadPosition::open(db, 1, false, StartAt::Newest).await.unwrap();
                for forward in moves {
                    if forward {
                        pos.next().await.unwrap();
                    } else {
                        pos.previous().await.unwrap();
                    }
                    assert!(pos.current_index() < pos.total_count());
                    assert_eq!(
                        pos.current_item_id(),
                        Some(4 - pos.current_index() as i64)
                    );
                }
            });
        }
    }
}
