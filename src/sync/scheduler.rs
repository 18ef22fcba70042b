use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::engine::{RunningGuard, SyncEngine};
use crate::api::ReaderApi;

/// Progress of background sync cycles, delivered to the foreground.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Started,
    /// The batch ran to completion (or was cancelled).
    ///
    /// Fields:
    /// - `inserted`: items added this cycle
    /// - `unread`: unread items across all subscriptions afterwards
    Finished { inserted: usize, unread: i64 },
    /// The cycle aborted, or a subscription failed; sent after `Finished`
    /// in the latter case.
    Failed(String),
}

struct Timer {
    handle: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

/// Runs sync cycles in the background, on demand or on a timer.
pub struct SyncScheduler<A: ReaderApi + 'static> {
    engine: Arc<SyncEngine<A>>,
    events: mpsc::Sender<SyncEvent>,
    timer: Mutex<Option<Timer>>,
}

impl<A: ReaderApi + 'static> SyncScheduler<A> {
    pub fn new(engine: Arc<SyncEngine<A>>, events: mpsc::Sender<SyncEvent>) -> Self {
        Self {
            engine,
            events,
            timer: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine<A>> {
        &self.engine
    }

    /// Start a cycle in the background.
    ///
    /// Returns `false` without doing anything if a cycle is already running.
    pub fn start_sync(&self) -> bool {
        let Some(guard) = self.engine.try_begin() else {
            tracing::debug!("Sync requested while a cycle is running");
            return false;
        };
        let engine = Arc::clone(&self.engine);
        let events = self.events.clone();
        tokio::spawn(async move {
            run_cycle(&engine, &events, &guard).await;
        });
        true
    }

    /// Run a cycle after `delay`, then every `interval`, replacing any
    /// previous timer. A zero interval runs once.
    ///
    /// Each timed cycle logs in, syncs, pushes queued pins, and logs out.
    pub fn start_timer(&self, delay: Duration, interval: Duration) {
        let engine = Arc::clone(&self.engine);
        let events = self.events.clone();
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stopped.changed() => return,
            }
            if interval.is_zero() {
                timed_cycle(&engine, &events).await;
                return;
            }
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stopped.changed() => return,
                }
                timed_cycle(&engine, &events).await;
                if *stopped.borrow() {
                    return;
                }
            }
        });

        // A cycle the old timer started runs to completion
        let previous = self.lock_timer().replace(Timer { handle, stop });
        if let Some(previous) = previous {
            let _ = previous.stop.send(true);
        }
        tracing::info!(
            delay_secs = delay.as_secs(),
            interval_secs = interval.as_secs(),
            "Sync timer started"
        );
    }

    /// Stop the recurring timer without waiting for it.
    ///
    /// A timed cycle already running stops at the next subscription
    /// boundary, then still pushes queued pins and logs out.
    pub fn cancel_timer(&self) {
        let _ = self.stop_timer();
    }

    /// Stop the timer and wait for a timed cycle in flight to wind down.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.stop_timer() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Sync timer task failed");
            }
        }
    }

    fn stop_timer(&self) -> Option<JoinHandle<()>> {
        let timer = self.lock_timer().take()?;
        let _ = timer.stop.send(true);
        if !timer.handle.is_finished() {
            self.engine.cancel_flag().cancel();
        }
        tracing::info!("Sync timer cancelled");
        Some(timer.handle)
    }

    pub fn is_timer_active(&self) -> bool {
        self.lock_timer()
            .as_ref()
            .is_some_and(|timer| !timer.handle.is_finished())
    }

    fn lock_timer(&self) -> std::sync::MutexGuard<'_, Option<Timer>> {
        self.timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<A: ReaderApi + 'static> Drop for SyncScheduler<A> {
    fn drop(&mut self) {
        let _ = self.stop_timer();
    }
}

async fn emit(events: &mpsc::Sender<SyncEvent>, event: SyncEvent) {
    if let Err(e) = events.send(event).await {
        tracing::debug!(error = %e, "Sync event dropped (receiver gone)");
    }
}

async fn run_cycle<A: ReaderApi>(
    engine: &SyncEngine<A>,
    events: &mpsc::Sender<SyncEvent>,
    guard: &RunningGuard,
) {
    emit(events, SyncEvent::Started).await;

    match engine.sync_reserved(guard).await {
        Ok(report) => {
            let unread = match engine.database().count_unread().await {
                Ok(unread) => unread,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to count unread items");
                    0
                }
            };
            emit(
                events,
                SyncEvent::Finished {
                    inserted: report.inserted,
                    unread,
                },
            )
            .await;
            if let Some(e) = report.first_error {
                emit(events, SyncEvent::Failed(e.to_string())).await;
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Sync cycle aborted");
            emit(events, SyncEvent::Failed(e.to_string())).await;
        }
    }
}

/// Cycle, pin push, and logout, all under one reservation.
async fn timed_cycle<A: ReaderApi>(engine: &SyncEngine<A>, events: &mpsc::Sender<SyncEvent>) {
    let Some(guard) = engine.try_begin() else {
        tracing::debug!("Timer tick skipped: a cycle is already running");
        return;
    };
    run_cycle(engine, events, &guard).await;

    if let Err(e) = engine.drain_pins().await {
        tracing::warn!(error = %e, "Pin replication skipped");
    }
    engine.logout().await;
    drop(guard);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use crate::sync::fake::{items, subscription, Call, FakeApi};
    use crate::sync::{Credentials, SyncOptions};
    use pretty_assertions::assert_eq;
    use secrecy::SecretString;

    async fn scheduler(
        options: SyncOptions,
    ) -> (SyncScheduler<FakeApi>, Arc<FakeApi>, mpsc::Receiver<SyncEvent>) {
        let db = Database::open(":memory:").await.unwrap();
        let api = Arc::new(FakeApi::new());
        let engine = SyncEngine::new(db, Arc::clone(&api), options)
            .with_credentials(Credentials::new("alice", SecretString::from("pw".to_string())));
        let (tx, rx) = mpsc::channel(16);
        (SyncScheduler::new(Arc::new(engine), tx), api, rx)
    }

    fn quick() -> SyncOptions {
        SyncOptions {
            settle_delay: Duration::ZERO,
            subscription_delay: Duration::ZERO,
            ..SyncOptions::default()
        }
    }

    #[tokio::test]
    async fn test_start_sync_reports_progress() {
        let (scheduler, api, mut rx) = scheduler(quick()).await;
        api.set_subscriptions(vec![subscription(1, 100)]);
        api.set_unread(1, items(&[3, 2, 1]));

        assert!(scheduler.start_sync());
        assert_eq!(rx.recv().await, Some(SyncEvent::Started));
        assert_eq!(
            rx.recv().await,
            Some(SyncEvent::Finished {
                inserted: 3,
                unread: 3
            })
        );
    }

    #[tokio::test]
    async fn test_start_sync_rejected_while_running() {
        let options = SyncOptions {
            settle_delay: Duration::from_millis(300),
            ..quick()
        };
        let (scheduler, _api, mut rx) = scheduler(options).await;

        assert!(scheduler.start_sync());
        assert!(!scheduler.start_sync());

        assert_eq!(rx.recv().await, Some(SyncEvent::Started));
        assert!(matches!(rx.recv().await, Some(SyncEvent::Finished { .. })));
        assert!(scheduler.start_sync());
    }

    #[tokio::test]
    async fn test_aborted_cycle_reports_failure() {
        let (scheduler, api, mut rx) = scheduler(quick()).await;
        api.reject_login();

        assert!(scheduler.start_sync());
        assert_eq!(rx.recv().await, Some(SyncEvent::Started));
        assert!(matches!(rx.recv().await, Some(SyncEvent::Failed(msg)) if msg.contains("alice")));
    }

    #[tokio::test]
    async fn test_timer_runs_and_logs_out() {
        let (scheduler, api, mut rx) = scheduler(quick()).await;
        api.set_subscriptions(vec![subscription(1, 100)]);

        scheduler.start_timer(Duration::from_millis(10), Duration::from_secs(3 * 3600));
        assert!(scheduler.is_timer_active());

        assert_eq!(rx.recv().await, Some(SyncEvent::Started));
        assert!(matches!(rx.recv().await, Some(SyncEvent::Finished { .. })));

        // The logout follows the cycle
        for _ in 0..200 {
            if api.calls().contains(&Call::Logout) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let calls = api.calls();
        assert_eq!(calls.first(), Some(&Call::Login));
        assert!(calls.contains(&Call::Logout));

        scheduler.cancel_timer();
        assert!(!scheduler.is_timer_active());
    }

    async fn wait_for_call(api: &FakeApi, call: Call) {
        for _ in 0..500 {
            if api.calls().contains(&call) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{:?} never happened", call);
    }

    #[tokio::test]
    async fn test_timed_cycle_holds_engine_until_logout() {
        let (scheduler, api, mut rx) = scheduler(quick()).await;
        api.slow_pins(Duration::from_millis(300));
        scheduler
            .engine()
            .database()
            .toggle_pin("https://example.com/a", None)
            .await
            .unwrap();

        scheduler.start_timer(Duration::ZERO, Duration::from_secs(3600));
        assert_eq!(rx.recv().await, Some(SyncEvent::Started));
        assert!(matches!(rx.recv().await, Some(SyncEvent::Finished { .. })));

        // Pin push and logout are still part of the timed cycle
        assert!(!scheduler.start_sync());
        assert!(scheduler.engine().is_running());

        wait_for_call(&api, Call::Logout).await;
        for _ in 0..100 {
            if !scheduler.engine().is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(api.calls().contains(&Call::PinAdd("https://example.com/a".into())));
        assert!(scheduler.start_sync());
        scheduler.cancel_timer();
    }

    #[tokio::test]
    async fn test_cancel_timer_lets_running_cycle_wind_down() {
        let options = SyncOptions {
            subscription_delay: Duration::from_secs(5),
            ..quick()
        };
        let (scheduler, api, mut rx) = scheduler(options).await;
        api.set_subscriptions(vec![
            subscription(1, 100),
            subscription(2, 100),
            subscription(3, 100),
        ]);
        api.set_unread(1, items(&[11, 10]));
        api.set_unread(2, items(&[20]));

        scheduler.start_timer(Duration::ZERO, Duration::from_secs(3600));
        wait_for_call(&api, Call::ListUnread(1)).await;
        scheduler.shutdown().await;

        // The first subscription completed, the rest were skipped, and the
        // session was still closed
        assert_eq!(rx.recv().await, Some(SyncEvent::Started));
        assert_eq!(
            rx.recv().await,
            Some(SyncEvent::Finished {
                inserted: 2,
                unread: 2
            })
        );
        assert_eq!(api.count_calls(|c| matches!(c, Call::ListUnread(_))), 1);
        assert_eq!(api.calls().last(), Some(&Call::Logout));
        assert!(!scheduler.engine().is_running());
        assert!(!scheduler.is_timer_active());

        let dirty = scheduler.engine().database().dirty_subscriptions().await.unwrap();
        assert_eq!(dirty.iter().map(|s| s.id).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_cancel_timer_before_first_tick() {
        let (scheduler, api, _rx) = scheduler(quick()).await;
        scheduler.start_timer(Duration::from_secs(3600), Duration::from_secs(3600));
        scheduler.cancel_timer();
        assert!(!scheduler.is_timer_active());
        assert!(api.calls().is_empty());
    }
}
