//! Request dispatcher shared by every upstream client.
//!
//! Requests are grouped by origin (scheme + host + port). Each origin gets
//! its own semaphore so a slow upstream only ever occupies its own permits.
//! A 429 answer is retried after a delay taken from the response headers,
//! up to a fixed retry budget. Every other status goes back to the caller
//! untouched.

mod transport;

pub use transport::ReqwestTransport;

use crate::config::DispatcherConfig;
use crate::error::DispatchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;

/// Header carrying the epoch second at which the rate-limit window resets.
const RESET_HEADER: &str = "x-ratelimit-reset";

/// Header carrying the number of seconds to wait.
const RETRY_AFTER_HEADER: &str = "retry-after";

/// HTTP status for "Too Many Requests".
const TOO_MANY_REQUESTS: u16 = 429;

/// HTTP method supported by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// An outbound request, independent of the HTTP client in use.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    /// Creates a GET request.
    pub fn get(url: &str) -> Result<Self, DispatchError> {
        Ok(Self {
            method: Method::Get,
            url: parse_url(url)?,
            headers: Vec::new(),
            body: None,
        })
    }

    /// Creates a POST request with a JSON body.
    pub fn post_json(url: &str, body: serde_json::Value) -> Result<Self, DispatchError> {
        Ok(Self {
            method: Method::Post,
            url: parse_url(url)?,
            headers: Vec::new(),
            body: Some(body),
        })
    }

    /// Appends a query parameter.
    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.url.query_pairs_mut().append_pair(key, value);
        self
    }

    /// Adds a header.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Adds an `Authorization: Bearer` header.
    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }
}

fn parse_url(url: &str) -> Result<Url, DispatchError> {
    Url::parse(url).map_err(|e| DispatchError::InvalidUrl(format!("{url}: {e}")))
}

/// A fully read response.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Builder-style header setter.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Executes a single request without any retry logic.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, DispatchError>;
}

/// Source of time for retry delays.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by tokio timers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Per-origin concurrency-limited, rate-limit-aware request sender.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    config: DispatcherConfig,
    origins: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            transport,
            clock,
            config,
            origins: Mutex::new(HashMap::new()),
        }
    }

    /// Sends a request, waiting for a free slot on its origin and retrying
    /// rate-limited answers.
    ///
    /// Returns `RateLimitExhausted` once `max_retries` retries were also
    /// answered with 429. Non-429 responses, including errors, are returned
    /// as they are.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, DispatchError> {
        let origin = origin_key(&request.url)?;
        let gate = self.gate_for(&origin);
        let mut retries = 0u32;

        loop {
            let response = {
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|e| DispatchError::Transport(e.to_string()))?;
                debug!(%origin, url = %request.url, attempt = retries + 1, "dispatching request");
                self.transport.execute(&request).await?
            };

            if response.status != TOO_MANY_REQUESTS {
                return Ok(response);
            }

            if retries >= self.config.max_retries {
                warn!(%origin, attempts = retries + 1, "rate limit retries exhausted");
                return Err(DispatchError::RateLimitExhausted {
                    origin,
                    attempts: retries + 1,
                });
            }

            let delay = retry_delay(
                &response,
                self.clock.now(),
                self.config.default_retry_after(),
            );
            retries += 1;
            warn!(%origin, retry = retries, delay_ms = delay.as_millis() as u64, "rate limited, backing off");
            self.clock.sleep(delay).await;
        }
    }

    fn gate_for(&self, origin: &str) -> Arc<Semaphore> {
        let mut origins = match self.origins.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        origins
            .entry(origin.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.per_origin_concurrency.max(1))))
            .clone()
    }
}

/// Returns the queue key (scheme + host + port) for a URL.
pub fn origin_key(url: &Url) -> Result<String, DispatchError> {
    let origin = url.origin();
    if !origin.is_tuple() {
        return Err(DispatchError::InvalidUrl(format!("{url} has no origin")));
    }
    Ok(origin.ascii_serialization())
}

/// Computes how long to wait before retrying a 429.
///
/// A reset timestamp wins (never shorter than `floor`), then a
/// retry-after value (seconds or an HTTP date), then `floor` itself.
pub fn retry_delay(response: &HttpResponse, now: DateTime<Utc>, floor: Duration) -> Duration {
    if let Some(reset) = response
        .header(RESET_HEADER)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    {
        let until_reset = (reset - now).to_std().unwrap_or(Duration::ZERO);
        return until_reset.max(floor);
    }

    if let Some(value) = response.header(RETRY_AFTER_HEADER) {
        let value = value.trim();
        if let Ok(secs) = value.parse::<u64>() {
            return Duration::from_secs(secs);
        }
        if let Ok(date) = DateTime::parse_from_rfc2822(value) {
            return (date.with_timezone(&Utc) - now)
                .to_std()
                .unwrap_or(Duration::ZERO);
        }
    }

    floor
}
