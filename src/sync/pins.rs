use std::collections::HashMap;

use super::{SyncEngine, SyncError};
use crate::api::ReaderApi;
use crate::storage::{Pin, PinAction};

/// Outcome of one pass over the pin queue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Actions accepted by the server
    pub pushed: usize,
    /// Older actions retired because a newer one exists for the same uri
    pub superseded: usize,
    /// Actions the server refused or that failed in transit; left pending
    pub failed: usize,
}

impl<A: ReaderApi> SyncEngine<A> {
    /// Replicate queued pin actions to the server, oldest first.
    ///
    /// Only the newest action per uri is sent. Individual failures are
    /// logged and leave the row queued for the next pass.
    ///
    /// # Errors
    ///
    /// Login failures and local storage errors; remote pin errors never
    /// surface here.
    pub async fn drain_pins(&self) -> Result<DrainReport, SyncError> {
        let pending = self.database().pending_pins().await?;
        let mut report = DrainReport::default();
        if pending.is_empty() {
            return Ok(report);
        }

        self.ensure_session().await?;

        let mut latest: HashMap<&str, i64> = HashMap::new();
        for pin in &pending {
            latest.insert(pin.uri.as_str(), pin.id);
        }

        for pin in pending.iter().filter(|p| latest.get(p.uri.as_str()) == Some(&p.id)) {
            report.superseded += self.database().supersede_pins(&pin.uri, pin.id).await? as usize;

            match self.push_pin(pin).await {
                Ok(()) => {
                    self.database().mark_pin_synced(pin.id).await?;
                    report.pushed += 1;
                }
                Err(e) => {
                    tracing::warn!(uri = %pin.uri, action = ?pin.action, error = %e, "Pin replication failed");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            pushed = report.pushed,
            superseded = report.superseded,
            failed = report.failed,
            "Pin queue drained"
        );
        Ok(report)
    }

    async fn push_pin(&self, pin: &Pin) -> Result<(), crate::api::ApiError> {
        match pin.action {
            PinAction::Add => {
                let title = pin.title.as_deref().unwrap_or(&pin.uri);
                self.api().pin_add(&pin.uri, title).await
            }
            PinAction::Remove => self.api().pin_remove(&pin.uri).await,
            PinAction::None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use crate::sync::fake::{Call, FakeApi};
    use crate::sync::{Credentials, SyncOptions};
    use pretty_assertions::assert_eq;
    use secrecy::SecretString;
    use std::sync::Arc;

    async fn engine() -> (SyncEngine<FakeApi>, Arc<FakeApi>) {
        let db = Database::open(":memory:").await.unwrap();
        let api = Arc::new(FakeApi::new());
        let engine = SyncEngine::new(db, Arc::clone(&api), SyncOptions::default())
            .with_credentials(Credentials::new("alice", SecretString::from("pw".to_string())));
        (engine, api)
    }

    #[tokio::test]
    async fn test_drain_sends_latest_action_only() {
        let (engine, api) = engine().await;
        let db = engine.database();
        db.toggle_pin("https://e/1", Some("one")).await.unwrap(); // add
        db.toggle_pin("https://e/2", Some("two")).await.unwrap(); // add
        db.toggle_pin("https://e/1", Some("one")).await.unwrap(); // remove

        let report = engine.drain_pins().await.unwrap();
        assert_eq!(
            report,
            DrainReport {
                pushed: 2,
                superseded: 1,
                failed: 0
            }
        );
        let pin_calls: Vec<Call> = api
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::PinAdd(_) | Call::PinRemove(_)))
            .collect();
        assert_eq!(
            pin_calls,
            vec![
                Call::PinAdd("https://e/2".into()),
                Call::PinRemove("https://e/1".into())
            ]
        );
        assert!(db.pending_pins().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_pin_stays_pending() {
        let (engine, api) = engine().await;
        let db = engine.database();
        db.toggle_pin("https://e/1", None).await.unwrap();
        db.toggle_pin("https://e/2", None).await.unwrap();
        api.fail_pin("https://e/1");

        let report = engine.drain_pins().await.unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(report.failed, 1);

        let pending = db.pending_pins().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].uri, "https://e/1");

        api.heal_pin("https://e/1");
        let report = engine.drain_pins().await.unwrap();
        assert_eq!(report.pushed, 1);
        assert!(db.pending_pins().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_queue_skips_login() {
        let (engine, api) = engine().await;
        let report = engine.drain_pins().await.unwrap();
        assert_eq!(report, DrainReport::default());
        assert!(api.calls().is_empty());
    }
}
