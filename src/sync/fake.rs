//! Scripted in-process reader service for engine tests.

use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::api::{ApiError, ItemPage, ItemRecord, ReaderApi, SubscriptionRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Login,
    Logout,
    ListSubscriptions { offset: u32, limit: u32 },
    ListUnread(i64),
    ListAll { subscription_id: i64, offset: u32, limit: u32 },
    TouchAll(i64),
    PinAdd(String),
    PinRemove(String),
    FetchBinary(String),
}

/// How a scripted item listing fails.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Failure {
    Transport,
    Parse,
}

impl Failure {
    fn error(self) -> ApiError {
        match self {
            Failure::Transport => ApiError::Timeout,
            Failure::Parse => ApiError::Parse("unexpected token".into()),
        }
    }
}

#[derive(Default)]
struct State {
    logged_in: bool,
    reject_login: bool,
    subscriptions: Vec<SubscriptionRecord>,
    unread: HashMap<i64, Vec<ItemRecord>>,
    all: HashMap<i64, Vec<ItemRecord>>,
    no_more_after: HashMap<i64, u32>,
    failing_items: HashMap<i64, Failure>,
    failing_pins: HashSet<String>,
    pin_latency: Duration,
    icons: HashMap<String, Vec<u8>>,
    calls: Vec<Call>,
}

#[derive(Default)]
pub(crate) struct FakeApi {
    state: Mutex<State>,
}

pub(crate) fn subscription(id: i64, modified_time: i64) -> SubscriptionRecord {
    SubscriptionRecord {
        id,
        title: Some(format!("Feed {}", id)),
        icon_uri: None,
        uri: Some(format!("https://feeds.example.com/{}", id)),
        folder: None,
        rate: 0,
        unread_count: 0,
        subscribers_count: 1,
        modified_time,
    }
}

pub(crate) fn item(id: i64) -> ItemRecord {
    ItemRecord {
        id,
        title: Some(format!("Item {}", id)),
        body: Some("<p>body</p>".into()),
        author: None,
        uri: Some(format!("https://feeds.example.com/items/{}", id)),
        created_time: id,
        modified_time: id,
    }
}

pub(crate) fn items(ids: &[i64]) -> Vec<ItemRecord> {
    ids.iter().copied().map(item).collect()
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn set_subscriptions(&self, subs: Vec<SubscriptionRecord>) {
        self.with(|s| s.subscriptions = subs);
    }

    pub fn set_unread(&self, subscription_id: i64, records: Vec<ItemRecord>) {
        self.with(|s| s.unread.insert(subscription_id, records));
    }

    pub fn set_all(&self, subscription_id: i64, records: Vec<ItemRecord>) {
        self.with(|s| s.all.insert(subscription_id, records));
    }

    /// Report `nomore` on any page starting at or after `offset`.
    pub fn set_no_more_after(&self, subscription_id: i64, offset: u32) {
        self.with(|s| s.no_more_after.insert(subscription_id, offset));
    }

    pub fn fail_items(&self, subscription_id: i64, failure: Failure) {
        self.with(|s| s.failing_items.insert(subscription_id, failure));
    }

    pub fn fail_pin(&self, uri: &str) {
        self.with(|s| s.failing_pins.insert(uri.to_string()));
    }

    pub fn heal_pin(&self, uri: &str) {
        self.with(|s| s.failing_pins.remove(uri));
    }

    /// Hold every pin push for `latency` before answering.
    pub fn slow_pins(&self, latency: Duration) {
        self.with(|s| s.pin_latency = latency);
    }

    pub fn reject_login(&self) {
        self.with(|s| s.reject_login = true);
    }

    pub fn set_icon(&self, uri: &str, bytes: Vec<u8>) {
        self.with(|s| s.icons.insert(uri.to_string(), bytes));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with(|s| s.calls.clone())
    }

    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.with(|s| s.calls.iter().filter(|c| pred(c)).count())
    }

    fn record(&self, call: Call) {
        self.with(|s| s.calls.push(call));
    }
}

#[async_trait]
impl ReaderApi for FakeApi {
    async fn login(&self, _login_id: &str, _password: &SecretString) -> Result<bool, ApiError> {
        self.record(Call::Login);
        Ok(self.with(|s| {
            s.logged_in = !s.reject_login;
            s.logged_in
        }))
    }

    async fn logout(&self) -> Result<(), ApiError> {
        self.record(Call::Logout);
        self.with(|s| s.logged_in = false);
        Ok(())
    }

    fn is_logged_in(&self) -> bool {
        self.with(|s| s.logged_in)
    }

    async fn list_subscriptions(
        &self,
        _unread_only: bool,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<SubscriptionRecord>, ApiError> {
        self.record(Call::ListSubscriptions { offset, limit });
        Ok(self.with(|s| {
            s.subscriptions
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect()
        }))
    }

    async fn list_unread_items(&self, subscription_id: i64) -> Result<Vec<ItemRecord>, ApiError> {
        self.record(Call::ListUnread(subscription_id));
        self.with(|s| {
            if let Some(failure) = s.failing_items.get(&subscription_id) {
                return Err(failure.error());
            }
            match s.unread.get(&subscription_id) {
                Some(records) if !records.is_empty() => Ok(records.clone()),
                // The service answers 500 when nothing is unread
                _ => Err(ApiError::Status(500)),
            }
        })
    }

    async fn list_all_items(
        &self,
        subscription_id: i64,
        offset: u32,
        limit: u32,
    ) -> Result<ItemPage, ApiError> {
        self.record(Call::ListAll {
            subscription_id,
            offset,
            limit,
        });
        self.with(|s| {
            if let Some(failure) = s.failing_items.get(&subscription_id) {
                return Err(failure.error());
            }
            let items: Vec<ItemRecord> = s
                .all
                .get(&subscription_id)
                .map(|all| {
                    all.iter()
                        .skip(offset as usize)
                        .take(limit as usize)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            let no_more = s
                .no_more_after
                .get(&subscription_id)
                .is_some_and(|after| offset >= *after);
            Ok(ItemPage { items, no_more })
        })
    }

    async fn touch_all(&self, subscription_id: i64) -> Result<(), ApiError> {
        self.record(Call::TouchAll(subscription_id));
        Ok(())
    }

    async fn pin_add(&self, uri: &str, _title: &str) -> Result<(), ApiError> {
        self.record(Call::PinAdd(uri.to_string()));
        self.pin_result(uri).await
    }

    async fn pin_remove(&self, uri: &str) -> Result<(), ApiError> {
        self.record(Call::PinRemove(uri.to_string()));
        self.pin_result(uri).await
    }

    async fn fetch_binary(&self, uri: &str) -> Result<Vec<u8>, ApiError> {
        self.record(Call::FetchBinary(uri.to_string()));
        self.with(|s| s.icons.get(uri).cloned().ok_or(ApiError::Status(404)))
    }
}

impl FakeApi {
    async fn pin_result(&self, uri: &str) -> Result<(), ApiError> {
        let latency = self.with(|s| s.pin_latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.with(|s| s.failing_pins.contains(uri)) {
            Err(ApiError::Status(503))
        } else {
            Ok(())
        }
    }
}
