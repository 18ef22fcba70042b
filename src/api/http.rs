use async_trait::async_trait;
use futures::StreamExt;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, SET_COOKIE};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use super::types::{ItemPage, ItemRecord, SubscriptionRecord, UnreadEnvelope};
use super::{ApiError, ReaderApi};
use crate::util::{is_same_origin, validate_base_url, validate_url};

const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB
const MAX_ICON_SIZE: usize = 1024 * 1024; // 1MB

/// Cookie carrying the session key; its value is echoed back as `ApiKey`.
const SESSION_COOKIE: &str = "reader_sid";

/// Backoff for 429, 5xx, and truncated responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

/// Reader API client over HTTP with a cookie-based session.
pub struct HttpReaderClient {
    client: reqwest::Client,
    jar: Arc<Jar>,
    base: Url,
    timeout: Duration,
    retry: RetryPolicy,
    api_key: Mutex<Option<String>>,
}

impl HttpReaderClient {
    /// Build a client for the service rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// [`ApiError::InvalidUrl`] if the base URL is not http(s), or
    /// [`ApiError::Network`] if the TLS backend cannot be initialised.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base = validate_base_url(base_url).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .user_agent(concat!("ldrmirror/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            jar,
            base,
            timeout,
            retry: RetryPolicy::default(),
            api_key: Mutex::new(None),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path)
            .map_err(|e| ApiError::InvalidUrl(e.to_string()))
    }

    fn api_key(&self) -> Option<String> {
        self.api_key
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_api_key(&self, key: Option<String>) {
        *self
            .api_key
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = key;
    }

    /// Expire any session cookie left in the jar by an earlier login.
    fn clear_session_cookie(&self) {
        self.jar.add_cookie_str(
            &format!("{}=; Max-Age=0; Path=/", SESSION_COOKIE),
            &self.base,
        );
    }

    /// Send a request and return the response headers with the
    /// size-limited body.
    ///
    /// 429 and truncated bodies are retried with exponential backoff; 5xx
    /// only when `retry_server_errors` is set.
    async fn send<F>(
        &self,
        build: F,
        limit: usize,
        retry_server_errors: bool,
    ) -> Result<(HeaderMap, Vec<u8>), ApiError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut retry_count = 0;

        loop {
            let response = tokio::time::timeout(self.timeout, build().send())
                .await
                .map_err(|_| ApiError::Timeout)??;
            let status = response.status();

            let retryable = status == reqwest::StatusCode::TOO_MANY_REQUESTS
                || (retry_server_errors && status.is_server_error());
            if retryable {
                if retry_count >= self.retry.max_retries {
                    return Err(ApiError::Status(status.as_u16()));
                }
                let delay = self.retry.delay(retry_count);
                tracing::warn!(
                    url = %response.url(),
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Server busy or failing, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
            {
                return Err(ApiError::Auth(format!("server answered {}", status)));
            }

            if !status.is_success() {
                return Err(ApiError::Status(status.as_u16()));
            }

            let headers = response.headers().clone();
            match read_limited_bytes(response, limit).await {
                Ok(bytes) => return Ok((headers, bytes)),
                Err(ApiError::IncompleteResponse { expected, received }) => {
                    if retry_count >= self.retry.max_retries {
                        return Err(ApiError::IncompleteResponse { expected, received });
                    }
                    let delay = self.retry.delay(retry_count);
                    tracing::debug!(
                        expected,
                        received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// [`send`](Self::send) retrying server errors, body only.
    async fn send_with_retry<F>(&self, build: F, limit: usize) -> Result<Vec<u8>, ApiError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let (_, body) = self.send(build, limit, true).await?;
        Ok(body)
    }

    /// POST a form to an authenticated API endpoint.
    async fn post_api(
        &self,
        path: &str,
        params: &[(&str, String)],
        retry_server_errors: bool,
    ) -> Result<Vec<u8>, ApiError> {
        let api_key = self.api_key().ok_or(ApiError::NotLoggedIn)?;
        let url = self.endpoint(path)?;
        let mut form: Vec<(&str, String)> = Vec::with_capacity(params.len() + 1);
        form.push(("ApiKey", api_key));
        form.extend(params.iter().cloned());

        tracing::debug!(endpoint = path, "API request");
        let (_, body) = self
            .send(
                || self.client.post(url.clone()).form(&form),
                MAX_RESPONSE_SIZE,
                retry_server_errors,
            )
            .await?;
        Ok(body)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let bytes = self.post_api(path, params, true).await?;
        decode(path, &bytes)
    }
}

fn decode<T: DeserializeOwned>(path: &str, bytes: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(bytes).map_err(|e| ApiError::Parse(format!("{}: {}", path, e)))
}

/// Session key from the `Set-Cookie` headers of one response.
fn session_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next()?.split_once('='))
        .find(|(name, _)| name.trim() == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[async_trait]
impl ReaderApi for HttpReaderClient {
    async fn login(&self, login_id: &str, password: &SecretString) -> Result<bool, ApiError> {
        let url = self.endpoint("login")?;
        let form = [
            ("livedoor_id", login_id),
            ("password", password.expose_secret()),
        ];
        // Only a cookie issued by this response counts as a new session
        self.clear_session_cookie();
        self.set_api_key(None);
        let (headers, _) = self
            .send(
                || self.client.post(url.clone()).form(&form),
                MAX_RESPONSE_SIZE,
                true,
            )
            .await?;

        match session_from_headers(&headers) {
            Some(key) => {
                self.set_api_key(Some(key));
                tracing::info!(login_id, "Logged in");
                Ok(true)
            }
            None => {
                tracing::warn!(login_id, "Login rejected: no session issued");
                Ok(false)
            }
        }
    }

    async fn logout(&self) -> Result<(), ApiError> {
        // The local session is dropped even if the server call fails.
        let had_session = self.api_key().is_some();
        self.set_api_key(None);
        self.clear_session_cookie();
        if !had_session {
            return Ok(());
        }
        let url = self.endpoint("logout")?;
        self.send_with_retry(|| self.client.get(url.clone()), MAX_RESPONSE_SIZE)
            .await?;
        tracing::debug!("Logged out");
        Ok(())
    }

    fn is_logged_in(&self) -> bool {
        self.api_key().is_some()
    }

    async fn list_subscriptions(
        &self,
        unread_only: bool,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<SubscriptionRecord>, ApiError> {
        self.post_json(
            "api/subs",
            &[
                ("unread", if unread_only { "1" } else { "0" }.to_string()),
                ("offset", offset.to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn list_unread_items(&self, subscription_id: i64) -> Result<Vec<ItemRecord>, ApiError> {
        // "Nothing unread" comes back as a server error; retrying it only
        // delays the empty answer.
        let bytes = self
            .post_api(
                "api/unread",
                &[("subscribe_id", subscription_id.to_string())],
                false,
            )
            .await?;
        let envelope: UnreadEnvelope = decode("api/unread", &bytes)?;
        Ok(envelope.items)
    }

    async fn list_all_items(
        &self,
        subscription_id: i64,
        offset: u32,
        limit: u32,
    ) -> Result<ItemPage, ApiError> {
        self.post_json(
            "api/all",
            &[
                ("subscribe_id", subscription_id.to_string()),
                ("offset", offset.to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn touch_all(&self, subscription_id: i64) -> Result<(), ApiError> {
        self.post_api("api/touch_all", &[("subscribe_id", subscription_id.to_string())], true)
            .await?;
        Ok(())
    }

    async fn pin_add(&self, uri: &str, title: &str) -> Result<(), ApiError> {
        self.post_api(
            "api/pin/add",
            &[("link", uri.to_string()), ("title", title.to_string())],
            true,
        )
        .await?;
        Ok(())
    }

    async fn pin_remove(&self, uri: &str) -> Result<(), ApiError> {
        self.post_api("api/pin/remove", &[("link", uri.to_string())], true)
            .await?;
        Ok(())
    }

    async fn fetch_binary(&self, uri: &str) -> Result<Vec<u8>, ApiError> {
        let url = Url::parse(uri).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        // Resources served by the reader service itself are trusted; anything
        // else must pass the public-address checks.
        let url = if is_same_origin(&url, &self.base) {
            url
        } else {
            validate_url(uri).map_err(|e| ApiError::InvalidUrl(e.to_string()))?
        };
        self.send_with_retry(|| self.client.get(url.clone()), MAX_ICON_SIZE)
            .await
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, ApiError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(ApiError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ApiError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(ApiError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
