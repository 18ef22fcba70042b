use chrono::Utc;

use super::resource::{Collection, Resource};
use super::schema::Database;
use super::types::{DatabaseError, Pin, PinAction};
use super::values::{Direction, Filter, Query, Values};

impl Database {
    // ========================================================================
    // Pin State
    // ========================================================================

    /// Latest non-`NONE` action recorded for `uri`.
    async fn latest_pin_action(&self, uri: &str) -> Result<Option<PinAction>, DatabaseError> {
        let action: Option<PinAction> = sqlx::query_scalar(
            "SELECT action FROM pin WHERE uri = ? AND action <> 0 ORDER BY id DESC LIMIT 1",
        )
        .bind(uri)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(action)
    }

    /// Whether the latest authoritative action for `uri` is ADD.
    pub async fn is_pinned(&self, uri: &str) -> Result<bool, DatabaseError> {
        Ok(self.latest_pin_action(uri).await? == Some(PinAction::Add))
    }

    /// Record an explicit pin action for `uri`.
    pub async fn add_pin_action(
        &self,
        uri: &str,
        title: Option<&str>,
        action: PinAction,
    ) -> Result<i64, DatabaseError> {
        self.insert(
            Collection::Pin,
            Values::new()
                .set("uri", uri)
                .set("title", title)
                .set("action", action)
                .set("created_time", Utc::now().timestamp()),
        )
        .await
    }

    /// Flip the pin state of `uri` and return the new state.
    pub async fn toggle_pin(&self, uri: &str, title: Option<&str>) -> Result<bool, DatabaseError> {
        let pinned = self.is_pinned(uri).await?;
        let action = if pinned {
            PinAction::Remove
        } else {
            PinAction::Add
        };
        self.add_pin_action(uri, title, action).await?;
        tracing::debug!(uri, ?action, "Pin toggled");
        Ok(!pinned)
    }

    /// Currently pinned entries: the latest row of every uri whose latest
    /// action is ADD, newest first.
    pub async fn pins(&self) -> Result<Vec<Pin>, DatabaseError> {
        let pins = sqlx::query_as::<_, Pin>(
            r#"
            SELECT p.id, p.uri, p.title, p.action, p.created_time, p.synced_time
            FROM pin p
            WHERE p.action = 1
              AND p.id = (SELECT MAX(q.id) FROM pin q WHERE q.uri = p.uri AND q.action <> 0)
            ORDER BY p.id DESC
        "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(pins)
    }

    // ========================================================================
    // Replication Queue
    // ========================================================================

    /// Pin rows not yet replicated, oldest first.
    pub async fn pending_pins(&self) -> Result<Vec<Pin>, DatabaseError> {
        self.query(
            Resource::pins(),
            &Query::new()
                .filter(Filter::new("synced_time IS NULL AND action <> 0", Vec::new()))
                .order_by("id", Direction::Asc),
        )
        .await
    }

    /// Stamp one pin row as replicated.
    pub async fn mark_pin_synced(&self, pin_id: i64) -> Result<(), DatabaseError> {
        self.update(
            Resource::row(Collection::Pin, pin_id),
            Values::new().set("synced_time", Utc::now().timestamp()),
            &Filter::all(),
        )
        .await?;
        Ok(())
    }

    /// Retire unsynced rows for `uri` older than `latest_id`; only the latest
    /// action needs to reach the server.
    pub async fn supersede_pins(&self, uri: &str, latest_id: i64) -> Result<u64, DatabaseError> {
        self.update(
            Resource::pins(),
            Values::new().set("synced_time", Utc::now().timestamp()),
            &Filter::eq("uri", uri)
                .and(Filter::new("id < ?", vec![latest_id.into()]))
                .and(Filter::new("synced_time IS NULL", Vec::new())),
        )
        .await
    }
}
