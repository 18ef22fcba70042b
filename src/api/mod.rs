//! Remote reader service contract.
//!
//! [`ReaderApi`] is the seam the sync engine talks through; [`HttpReaderClient`]
//! is the JSON-over-HTTP implementation.

mod http;
mod types;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

pub use http::{HttpReaderClient, RetryPolicy};
pub use types::{ItemPage, ItemRecord, SubscriptionRecord};

/// Errors raised by reader API calls.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// HTTP response with a non-2xx status
    #[error("HTTP error: status {0}")]
    Status(u16),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Received fewer bytes than Content-Length announced
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Payload did not decode into the expected record shape
    #[error("Parse error: {0}")]
    Parse(String),
    /// Credentials or session rejected by the server
    #[error("Authentication failed: {0}")]
    Auth(String),
    /// A call that needs a session was made before `login`
    #[error("Not logged in")]
    NotLoggedIn,
    /// A URL handed to the client failed validation
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Network, timeout, and truncated-body failures.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ApiError::Network(_)
                | ApiError::Timeout
                | ApiError::Status(_)
                | ApiError::ResponseTooLarge
                | ApiError::IncompleteResponse { .. }
                | ApiError::InvalidUrl(_)
        )
    }

    /// The server answered with an error status.
    pub fn is_server_error(&self) -> bool {
        matches!(self, ApiError::Status(status) if *status >= 500)
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Auth(_) | ApiError::NotLoggedIn)
    }
}

/// Operations the sync engine needs from the remote service.
///
/// Item ids are assumed to grow with server insertion order: the engine stops
/// walking a listing at the first id it already has.
#[async_trait]
pub trait ReaderApi: Send + Sync {
    /// Start a session. `Ok(false)` means the credentials were rejected.
    async fn login(&self, login_id: &str, password: &SecretString) -> Result<bool, ApiError>;

    async fn logout(&self) -> Result<(), ApiError>;

    fn is_logged_in(&self) -> bool;

    /// One page of the subscription list. A page shorter than `limit` is the
    /// last one.
    async fn list_subscriptions(
        &self,
        unread_only: bool,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<SubscriptionRecord>, ApiError>;

    /// Unread items of a subscription, newest first.
    ///
    /// Servers answer with an error status when there is nothing unread;
    /// callers treat [`ApiError::is_server_error`] here as an empty list.
    async fn list_unread_items(&self, subscription_id: i64) -> Result<Vec<ItemRecord>, ApiError>;

    /// One page of every item of a subscription, newest first.
    async fn list_all_items(
        &self,
        subscription_id: i64,
        offset: u32,
        limit: u32,
    ) -> Result<ItemPage, ApiError>;

    /// Mark every item of the subscription read on the server.
    async fn touch_all(&self, subscription_id: i64) -> Result<(), ApiError>;

    async fn pin_add(&self, uri: &str, title: &str) -> Result<(), ApiError>;

    async fn pin_remove(&self, uri: &str) -> Result<(), ApiError>;

    /// Download a small binary resource such as a subscription icon.
    async fn fetch_binary(&self, uri: &str) -> Result<Vec<u8>, ApiError>;
}
