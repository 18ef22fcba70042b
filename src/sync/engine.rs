use secrecy::SecretString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{CancelFlag, SyncError};
use crate::api::{ItemRecord, ReaderApi, SubscriptionRecord};
use crate::config::Config;
use crate::storage::{Collection, Database, Filter, Resource, Subscription, Values};

/// Login for the reader service.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub login_id: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(login_id: impl Into<String>, password: SecretString) -> Self {
        Self {
            login_id: login_id.into(),
            password,
        }
    }
}

/// Tunables for one sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Only fetch unread items; never fall back to the full listing.
    pub unread_only: bool,
    /// Mark every seen subscription read on the server after the cycle.
    pub auto_touch_all: bool,
    /// Pause between the subscription list and the first item listing.
    pub settle_delay: Duration,
    /// Pause between two subscriptions' item listings.
    pub subscription_delay: Duration,
    pub subscription_page_size: u32,
    pub item_page_size: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            unread_only: true,
            auto_touch_all: false,
            settle_delay: Duration::from_millis(500),
            subscription_delay: Duration::from_millis(100),
            subscription_page_size: 100,
            item_page_size: 200,
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            unread_only: config.sync_unread_only,
            auto_touch_all: config.auto_touch_all,
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            subscription_delay: Duration::from_millis(config.subscription_delay_ms),
            ..Self::default()
        }
    }
}

/// Outcome of a sync cycle.
///
/// Per-subscription failures do not stop the batch; only the first one is
/// kept and surfaced here once the batch is over.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Items inserted across all subscriptions
    pub inserted: usize,
    /// Subscriptions present in the remote list
    pub subscriptions_seen: usize,
    pub first_error: Option<SyncError>,
    /// The cycle stopped early on request
    pub cancelled: bool,
}

impl SyncReport {
    /// Inserted count, or the first recorded error.
    pub fn into_result(self) -> Result<usize, SyncError> {
        match self.first_error {
            Some(e) => Err(e),
            None => Ok(self.inserted),
        }
    }
}

/// Reservation of the engine for one cycle; clears the running flag when
/// dropped, however the cycle ends.
pub(crate) struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Reconciles the local database with the remote reader service.
pub struct SyncEngine<A: ReaderApi> {
    db: Database,
    api: Arc<A>,
    options: SyncOptions,
    credentials: Option<Credentials>,
    running: Arc<AtomicBool>,
    cancel: CancelFlag,
}

impl<A: ReaderApi> SyncEngine<A> {
    pub fn new(db: Database, api: Arc<A>, options: SyncOptions) -> Self {
        Self {
            db,
            api,
            options,
            credentials: None,
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Handle for stopping the running cycle between subscriptions.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn try_begin(&self) -> Option<RunningGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard(Arc::clone(&self.running)))
    }

    // ========================================================================
    // Session
    // ========================================================================

    /// Log in unless a session is already open.
    pub async fn ensure_session(&self) -> Result<(), SyncError> {
        if self.api.is_logged_in() {
            return Ok(());
        }
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(SyncError::MissingCredentials)?;
        if self
            .api
            .login(&credentials.login_id, &credentials.password)
            .await?
        {
            Ok(())
        } else {
            Err(SyncError::LoginRejected(credentials.login_id.clone()))
        }
    }

    pub async fn logout(&self) {
        if let Err(e) = self.api.logout().await {
            tracing::debug!(error = %e, "Logout failed");
        }
    }

    // ========================================================================
    // Full Cycle
    // ========================================================================

    /// Run one full sync cycle.
    ///
    /// # Errors
    ///
    /// [`SyncError::AlreadyRunning`] if another cycle holds the engine. Login
    /// and subscription-list failures abort the cycle; per-subscription item
    /// failures are reported through [`SyncReport::first_error`] instead.
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        let guard = self.try_begin().ok_or(SyncError::AlreadyRunning)?;
        self.sync_reserved(&guard).await
    }

    /// Run a cycle on an engine already reserved with `try_begin`. The
    /// caller keeps the reservation for whatever follows the cycle.
    pub(crate) async fn sync_reserved(&self, _guard: &RunningGuard) -> Result<SyncReport, SyncError> {
        self.cancel.reset();

        self.ensure_session().await?;
        let seen = self.sync_subscriptions().await?;

        let mut report = SyncReport {
            subscriptions_seen: seen.len(),
            ..SyncReport::default()
        };

        // Let observers of the subscription list catch up first
        if !self.cancel.sleep(self.options.settle_delay).await {
            tracing::info!("Sync cancelled before item sync");
            report.cancelled = true;
            return Ok(report);
        }

        let dirty = self.db.dirty_subscriptions().await?;
        tracing::info!(dirty = dirty.len(), "Syncing items");

        for (index, sub) in dirty.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            match self.sync_items(sub).await {
                Ok(inserted) => report.inserted += inserted,
                Err(e) => {
                    tracing::warn!(subscription_id = sub.id, error = %e, "Item sync failed");
                    if report.first_error.is_none() {
                        report.first_error = Some(e);
                    }
                }
            }

            let more = index + 1 < dirty.len();
            if more && !self.cancel.sleep(self.options.subscription_delay).await {
                report.cancelled = true;
                break;
            }
        }

        if self.options.auto_touch_all && !report.cancelled {
            self.touch_all(&seen).await;
        }

        tracing::info!(
            inserted = report.inserted,
            subscriptions = report.subscriptions_seen,
            failed = report.first_error.is_some(),
            cancelled = report.cancelled,
            "Sync cycle finished"
        );
        Ok(report)
    }

    /// Sync the items of a single subscription on demand.
    pub async fn sync_items_for(&self, subscription_id: i64) -> Result<usize, SyncError> {
        let _guard = self.try_begin().ok_or(SyncError::AlreadyRunning)?;
        self.ensure_session().await?;

        match self.db.get::<Subscription>(subscription_id).await? {
            Some(sub) => self.sync_items(&sub).await,
            None => {
                tracing::debug!(subscription_id, "No such subscription to sync");
                Ok(0)
            }
        }
    }

    // ========================================================================
    // Subscription List
    // ========================================================================

    /// Page through the remote subscription list and upsert every record.
    ///
    /// Returns the ids seen, in listing order.
    pub async fn sync_subscriptions(&self) -> Result<Vec<i64>, SyncError> {
        let limit = self.options.subscription_page_size.max(1);
        let mut offset: u32 = 0;
        let mut seen = Vec::new();

        loop {
            let page = self
                .api
                .list_subscriptions(self.options.unread_only, offset, limit)
                .await?;
            let len = page.len();

            for record in &page {
                self.upsert_subscription(record).await?;
                seen.push(record.id);
            }

            tracing::debug!(offset, received = len, "Subscription page synced");
            if len < limit as usize {
                break;
            }
            offset = offset.saturating_add(len as u32);
        }

        tracing::info!(count = seen.len(), "Subscription list synced");
        Ok(seen)
    }

    async fn upsert_subscription(&self, record: &SubscriptionRecord) -> Result<(), SyncError> {
        let values = Values::new()
            .set("uri", record.uri.clone())
            .set("title", record.title.clone())
            .set("icon_uri", record.icon_uri.clone())
            .set("rate", record.rate)
            .set("subscribers_count", record.subscribers_count)
            .set("unread_count", record.unread_count)
            .set("folder", record.folder.clone())
            .set("modified_time", record.modified_time);

        let updated = self
            .db
            .update(Resource::subscription(record.id), values.clone(), &Filter::all())
            .await?;
        if updated > 0 {
            return Ok(());
        }

        let icon = self.fetch_icon(record).await;
        self.db
            .insert(
                Collection::Subscription,
                values.set("id", record.id).set("icon", icon),
            )
            .await?;
        tracing::debug!(subscription_id = record.id, "Subscription added");
        Ok(())
    }

    /// Download a subscription icon; failures leave the subscription iconless.
    async fn fetch_icon(&self, record: &SubscriptionRecord) -> Option<Vec<u8>> {
        let uri = record.icon_uri.as_deref()?;
        match self.api.fetch_binary(uri).await {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(subscription_id = record.id, icon = uri, error = %e, "Icon fetch failed");
                None
            }
        }
    }

    // ========================================================================
    // Items
    // ========================================================================

    /// Fetch new items for one subscription, then recompute its unread count
    /// and record the sync high-water mark in a single update.
    pub async fn sync_items(&self, sub: &Subscription) -> Result<usize, SyncError> {
        let unread = match self.api.list_unread_items(sub.id).await {
            Ok(records) => records,
            // The service reports "nothing unread" as a server error
            Err(e) if e.is_server_error() => {
                tracing::debug!(subscription_id = sub.id, error = %e, "No unread items");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let (mut inserted, _) = self.insert_items(sub.id, &unread, true).await?;

        if unread.is_empty() && !self.options.unread_only {
            inserted += self.sync_all_items(sub.id).await?;
        }

        let unread_count = self
            .db
            .recount_unread(sub.id, Some(sub.modified_time))
            .await?;
        tracing::debug!(
            subscription_id = sub.id,
            inserted,
            unread = unread_count,
            "Subscription items synced"
        );
        Ok(inserted)
    }

    /// Walk the full listing page by page. Items found this way are already
    /// read on the server and are stored read.
    async fn sync_all_items(&self, subscription_id: i64) -> Result<usize, SyncError> {
        let limit = self.options.item_page_size.max(1);
        let mut offset: u32 = 0;
        let mut inserted = 0;

        loop {
            let page = self
                .api
                .list_all_items(subscription_id, offset, limit)
                .await?;
            let (count, reached_known) = self
                .insert_items(subscription_id, &page.items, false)
                .await?;
            inserted += count;

            if reached_known || page.no_more || page.items.len() < limit as usize {
                break;
            }
            offset = offset.saturating_add(page.items.len() as u32);
        }

        Ok(inserted)
    }

    /// Insert records until the first id already stored locally.
    ///
    /// Returns the number inserted and whether a known id was reached.
    async fn insert_items(
        &self,
        subscription_id: i64,
        records: &[ItemRecord],
        unread: bool,
    ) -> Result<(usize, bool), SyncError> {
        let mut inserted = 0;
        for record in records {
            if self.db.exists(Resource::item(record.id)).await? {
                return Ok((inserted, true));
            }
            self.db
                .insert(
                    Collection::Item,
                    Values::new()
                        .set("id", record.id)
                        .set("subscription_id", subscription_id)
                        .set("uri", record.uri.clone())
                        .set("title", record.title.clone())
                        .set("body", record.body.clone())
                        .set("author", record.author.clone())
                        .set("unread", unread)
                        .set("created_time", record.created_time)
                        .set("modified_time", record.modified_time),
                )
                .await?;
            inserted += 1;
        }
        Ok((inserted, false))
    }

    // ========================================================================
    // Server-side Mark Read
    // ========================================================================

    async fn touch_all(&self, subscription_ids: &[i64]) {
        for &id in subscription_ids {
            if let Err(e) = self.api.touch_all(id).await {
                tracing::warn!(subscription_id = id, error = %e, "Touch all failed");
            }
        }
    }
}
