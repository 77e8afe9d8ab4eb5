//! Simulator HTTP client.
//!
//! Async client using `reqwest`. Reads are cached for a short TTL and fall
//! back to the last good value when the simulator is unreachable.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Deserialize;
use sureroute_protocol::{ConditionsUpdate, NetworkConditions};

/// How long a fetched value is served before the simulator is asked again.
pub const DEFAULT_TTL: Duration = Duration::from_millis(500);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors from the simulator client.
#[derive(Debug, thiserror::Error)]
pub enum NetsimError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("simulator error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no simulator configured")]
    Disabled,
}

#[derive(Deserialize)]
struct UpdateResponse {
    conditions: NetworkConditions,
}

#[derive(Deserialize)]
struct DownResponse {
    down: bool,
}

struct Cached {
    value: NetworkConditions,
    /// Last fetch attempt, successful or not.
    fetched_at: Option<Instant>,
    refreshing: bool,
}

impl Cached {
    fn new() -> Self {
        Self {
            value: NetworkConditions::default(),
            fetched_at: None,
            refreshing: false,
        }
    }
}

/// Clears `refreshing` when the fetching caller finishes or is dropped.
struct RefreshGuard<'a> {
    cache: &'a Mutex<Cached>,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        let mut cache = lock(self.cache);
        cache.refreshing = false;
        cache.fetched_at = Some(Instant::now());
    }
}

fn lock(cache: &Mutex<Cached>) -> MutexGuard<'_, Cached> {
    cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Client for the simulator's `/conditions` endpoints.
pub struct ConditionsClient {
    http: reqwest::Client,
    base_url: Option<String>,
    ttl: Duration,
    cache: Mutex<Cached>,
}

impl ConditionsClient {
    /// Creates a client for the simulator at `base_url`.
    ///
    /// With `None` the client is disabled and always reports an ideal link.
    pub fn new(base_url: Option<String>, ttl: Duration) -> Result<Self, NetsimError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());
        match &base_url {
            Some(url) => tracing::info!(url = %url, ttl_ms = ttl.as_millis() as u64, "link simulator enabled"),
            None => tracing::info!("no link simulator configured, assuming ideal link"),
        }
        Ok(Self {
            http,
            base_url,
            ttl,
            cache: Mutex::new(Cached::new()),
        })
    }

    /// A client that never contacts a simulator.
    pub fn disabled() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: None,
            ttl: DEFAULT_TTL,
            cache: Mutex::new(Cached::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    /// Current link conditions.
    ///
    /// Never fails: a fetch error keeps serving the last good value (the
    /// ideal link if nothing was ever fetched). Only one caller at a time
    /// refreshes; the others get the cached value without waiting.
    /// Failed attempts count towards the TTL like successful ones.
    pub async fn conditions(&self) -> NetworkConditions {
        let Some(base) = &self.base_url else {
            return NetworkConditions::default();
        };

        {
            let mut cache = lock(&self.cache);
            let fresh = cache.fetched_at.is_some_and(|at| at.elapsed() < self.ttl);
            if fresh || cache.refreshing {
                return cache.value;
            }
            cache.refreshing = true;
        }
        let _refresh = RefreshGuard { cache: &self.cache };

        match self.fetch(base).await {
            Ok(value) => {
                let mut cache = lock(&self.cache);
                cache.value = value;
                value
            }
            Err(e) => {
                tracing::debug!(error = %e, "conditions fetch failed, keeping last value");
                let cache = lock(&self.cache);
                cache.value
            }
        }
    }

    /// Posts a partial update and caches the simulator's resulting state.
    pub async fn update_conditions(
        &self,
        patch: &ConditionsUpdate,
    ) -> Result<NetworkConditions, NetsimError> {
        let base = self.base_url.as_deref().ok_or(NetsimError::Disabled)?;
        let resp = self
            .http
            .post(format!("{base}/conditions"))
            .json(patch)
            .send()
            .await?;
        let body = check_status(resp).await?;
        let parsed: UpdateResponse = serde_json::from_slice(&body)?;
        let value = parsed.conditions.sanitized();
        self.store(value);
        Ok(value)
    }

    /// Forces the simulated link down (`true`) or back up.
    pub async fn set_down(&self, down: bool) -> Result<NetworkConditions, NetsimError> {
        let base = self.base_url.as_deref().ok_or(NetsimError::Disabled)?;
        let state = if down { "on" } else { "off" };
        let resp = self
            .http
            .post(format!("{base}/down/{state}"))
            .send()
            .await?;
        let body = check_status(resp).await?;
        let parsed: DownResponse = serde_json::from_slice(&body)?;

        let mut cache = lock(&self.cache);
        cache.value.down = parsed.down;
        cache.fetched_at = Some(Instant::now());
        tracing::info!(down = parsed.down, "simulated link state changed");
        Ok(cache.value)
    }

    async fn fetch(&self, base: &str) -> Result<NetworkConditions, NetsimError> {
        let resp = self.http.get(format!("{base}/conditions")).send().await?;
        let body = check_status(resp).await?;
        let value: NetworkConditions = serde_json::from_slice(&body)?;
        Ok(value.sanitized())
    }

    fn store(&self, value: NetworkConditions) {
        let mut cache = lock(&self.cache);
        cache.value = value;
        cache.fetched_at = Some(Instant::now());
    }
}

async fn check_status(resp: reqwest::Response) -> Result<Vec<u8>, NetsimError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(NetsimError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.bytes().await?.to_vec())
}
