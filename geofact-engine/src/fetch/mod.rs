//! Tiered outbound fetch: direct → proxied escalation with retry, content
//! caching, and usage/cost accounting
//!
//! One logical fetch walks up to two tiers. The direct tier is a plain HTTP
//! request. The proxied tier goes through a rendering/anti-bot proxy and
//! costs API credits, so it is only consulted when the direct tier fails
//! with an escalation-class error (timeout, connect/DNS, 403, 429, 5xx),
//! or first, for sources known to always require it.
//!
//! Before any network attempt the content cache is consulted, keyed by a
//! sha256 of the URL; a hit short-circuits all network activity at zero
//! cost. Every terminal outcome is logged to `fetch_usage_log` for the cost
//! dashboards.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use geofact_common::config::FetchConfig;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use thiserror::Error;

const USER_AGENT: &str = concat!("GeoFact-Fetcher/", env!("CARGO_PKG_VERSION"));

/// Escalation policy for one logical fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Direct tier only, no caching of the proxied path
    Disabled,
    /// Direct first, escalate to the proxy on failure classes
    #[default]
    Fallback,
    /// Proxy first (sources that always require rendering)
    Primary,
}

/// Which tier satisfied the fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    Direct,
    Proxied,
    Cache,
}

impl FetchSource {
    fn as_str(&self) -> &'static str {
        match self {
            FetchSource::Direct => "direct",
            FetchSource::Proxied => "proxied",
            FetchSource::Cache => "cache",
        }
    }
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub mode: FetchMode,
    /// Ask the proxy tier for JS rendering
    pub render: bool,
    /// Content-cache TTL override in hours
    pub ttl_hours: Option<i64>,
}

/// Successful fetch result
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub data: Value,
    pub source: FetchSource,
    pub latency_ms: u64,
    /// Proxy API credits consumed (0 for direct and cache)
    pub cost_units: u32,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP status {0}")]
    Status(u16),

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("response decode failed: {0}")]
    Decode(String),

    #[error("proxy tier not configured (missing API key)")]
    ProxyNotConfigured,
}

impl FetchError {
    /// Failure classes that justify escalating from direct to proxied
    pub fn escalates(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Connect(_) => true,
            FetchError::Status(s) => *s == 403 || *s == 429 || (500..=599).contains(s),
            _ => false,
        }
    }
}

/// Wait before retry attempt `n` (1-based): min(2^n, cap) seconds
pub fn backoff_delay(attempt: u32, cap_secs: u64) -> Duration {
    let secs = 2u64.saturating_pow(attempt).min(cap_secs);
    Duration::from_secs(secs)
}

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Executes one logical outbound fetch with the tiered escalation policy
pub struct TieredFetcher {
    client: Client,
    proxy_client: Client,
    pool: SqlitePool,
    config: FetchConfig,
    limiter: Option<DirectRateLimiter>,
}

impl TieredFetcher {
    /// # Panics
    /// Panics if the HTTP clients cannot be built, which does not happen
    /// with a valid TLS stack.
    pub fn new(pool: SqlitePool, config: FetchConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.direct_timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");

        // Rendered fetches are slow; the proxy tier gets its own budget
        let proxy_client = Client::builder()
            .timeout(Duration::from_secs(config.proxy_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build proxy HTTP client");

        let limiter = NonZeroU32::new(config.rate_limit_per_sec)
            .map(|n| RateLimiter::direct(Quota::per_second(n)));

        Self {
            client,
            proxy_client,
            pool,
            config,
            limiter,
        }
    }

    /// Fetch a JSON document with the configured escalation policy
    pub async fn fetch_json(&self, url: &str, options: &FetchOptions) -> Result<FetchOutcome, FetchError> {
        let started = Instant::now();
        let url_hash = hash_url(url);
        let ttl_hours = options.ttl_hours.unwrap_or(self.config.cache_ttl_hours);

        // Cache short-circuits all network activity
        if options.mode != FetchMode::Disabled {
            if let Some(data) = self.check_cache(&url_hash).await {
                let latency_ms = started.elapsed().as_millis() as u64;
                tracing::debug!("Fetch cache hit: {}", truncate(url));
                self.log_usage(url, FetchSource::Cache, 200, latency_ms, 0, true, None)
                    .await;
                return Ok(FetchOutcome {
                    data,
                    source: FetchSource::Cache,
                    latency_ms,
                    cost_units: 0,
                });
            }
        }

        let mut last_error: Option<FetchError> = None;

        if options.mode != FetchMode::Primary {
            match self.run_tier(url, FetchSource::Direct, options).await {
                Ok(data) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    if options.mode != FetchMode::Disabled {
                        self.store_in_cache(url, &url_hash, &data, ttl_hours, 0).await;
                    }
                    self.log_usage(url, FetchSource::Direct, 200, latency_ms, 0, false, None)
                        .await;
                    return Ok(FetchOutcome {
                        data,
                        source: FetchSource::Direct,
                        latency_ms,
                        cost_units: 0,
                    });
                }
                Err(e) => {
                    let escalate = options.mode == FetchMode::Fallback && e.escalates();
                    if !escalate {
                        let latency_ms = started.elapsed().as_millis() as u64;
                        self.log_failure(url, FetchSource::Direct, latency_ms, &e).await;
                        return Err(e);
                    }
                    tracing::debug!("Direct tier failed ({}), escalating to proxy: {}", e, truncate(url));
                    last_error = Some(e);
                }
            }
        }

        // Proxied tier (Primary mode, or Fallback after escalation)
        match self.run_tier(url, FetchSource::Proxied, options).await {
            Ok(data) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                self.store_in_cache(url, &url_hash, &data, ttl_hours, 1).await;
                self.log_usage(url, FetchSource::Proxied, 200, latency_ms, 1, false, None)
                    .await;
                Ok(FetchOutcome {
                    data,
                    source: FetchSource::Proxied,
                    latency_ms,
                    cost_units: 1,
                })
            }
            Err(e) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                self.log_failure(url, FetchSource::Proxied, latency_ms, &e).await;
                // The error from the final tier attempted wins
                Err(match e {
                    FetchError::ProxyNotConfigured => last_error.unwrap_or(e),
                    other => other,
                })
            }
        }
    }

    /// Retry loop within a single tier
    async fn run_tier(
        &self,
        url: &str,
        tier: FetchSource,
        options: &FetchOptions,
    ) -> Result<Value, FetchError> {
        let mut last_error = FetchError::Transport("no attempts made".to_string());

        for attempt in 1..=self.config.retries.max(1) {
            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }

            let result = match tier {
                FetchSource::Direct => self.attempt_direct(url).await,
                FetchSource::Proxied => self.attempt_proxied(url, options.render).await,
                FetchSource::Cache => unreachable!("cache is not a network tier"),
            };

            match result {
                Ok(data) => return Ok(data),
                Err(FetchError::ProxyNotConfigured) => return Err(FetchError::ProxyNotConfigured),
                Err(e) => {
                    tracing::warn!(
                        "{} attempt {}/{} failed: {} ({})",
                        tier.as_str(),
                        attempt,
                        self.config.retries,
                        e,
                        truncate(url)
                    );
                    last_error = e;
                    if attempt < self.config.retries {
                        tokio::time::sleep(backoff_delay(attempt, self.config.backoff_cap_secs)).await;
                    }
                }
            }
        }

        Err(last_error)
    }

    async fn attempt_direct(&self, url: &str) -> Result<Value, FetchError> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json, application/geo+json")
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }

    async fn attempt_proxied(&self, url: &str, render: bool) -> Result<Value, FetchError> {
        let api_key = self
            .config
            .proxy_api_key
            .as_deref()
            .ok_or(FetchError::ProxyNotConfigured)?;

        let mut query: Vec<(&str, &str)> = vec![
            ("api_key", api_key),
            ("url", url),
            ("country_code", "us"),
        ];
        if render {
            query.push(("render", "true"));
        }

        let response = self
            .proxy_client
            .get(&self.config.proxy_base_url)
            .query(&query)
            .header("Accept", "application/json, application/geo+json")
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }

    async fn check_cache(&self, url_hash: &str) -> Option<Value> {
        let row = sqlx::query(
            "SELECT response_body, expires_at FROM fetch_cache WHERE url_hash = ?1",
        )
        .bind(url_hash)
        .fetch_optional(&self.pool)
        .await
        .ok()??;

        let expires_at: String = row.get("expires_at");
        let expires = DateTime::parse_from_rfc3339(&expires_at).ok()?;
        if expires < Utc::now() {
            return None;
        }

        let body: String = row.get("response_body");
        serde_json::from_str(&body).ok()
    }

    async fn store_in_cache(&self, url: &str, url_hash: &str, data: &Value, ttl_hours: i64, cost_units: u32) {
        let now = Utc::now();
        let expires = now + ChronoDuration::hours(ttl_hours.max(0));
        let result = sqlx::query(
            r#"
            INSERT OR REPLACE INTO fetch_cache
                (url_hash, url, response_body, cost_units, fetched_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(url_hash)
        .bind(url)
        .bind(data.to_string())
        .bind(cost_units as i64)
        .bind(now.to_rfc3339())
        .bind(expires.to_rfc3339())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!("Failed to store fetch cache entry: {}", e);
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn log_usage(
        &self,
        url: &str,
        tier: FetchSource,
        status: u16,
        latency_ms: u64,
        cost_units: u32,
        cache_hit: bool,
        error: Option<&str>,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO fetch_usage_log
                (url, tier, status, latency_ms, cost_units, cache_hit, error_message, logged_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(url)
        .bind(tier.as_str())
        .bind(status as i64)
        .bind(latency_ms as i64)
        .bind(cost_units as i64)
        .bind(cache_hit as i64)
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!("Failed to log fetch usage: {}", e);
        }
    }

    async fn log_failure(&self, url: &str, tier: FetchSource, latency_ms: u64, error: &FetchError) {
        let status = match error {
            FetchError::Status(s) => *s,
            _ => 0,
        };
        self.log_usage(url, tier, status, latency_ms, 0, false, Some(&error.to_string()))
            .await;
    }
}

fn classify_transport(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_connect() {
        FetchError::Connect(e.to_string())
    } else {
        FetchError::Transport(e.to_string())
    }
}

/// Stable cache key: sha256 of the full request URL
pub fn hash_url(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Trim a URL for log lines without splitting a multibyte character
fn truncate(url: &str) -> &str {
    let mut end = url.len().min(80);
    while !url.is_char_boundary(end) {
        end -= 1;
    }
    &url[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;

    fn test_config() -> FetchConfig {
        FetchConfig {
            retries: 2,
            rate_limit_per_sec: 0,
            ..FetchConfig::default()
        }
    }

    #[test]
    fn test_backoff_caps() {
        assert_eq!(backoff_delay(1, 30), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, 30), Duration::from_secs(4));
        assert_eq!(backoff_delay(3, 30), Duration::from_secs(8));
        assert_eq!(backoff_delay(10, 30), Duration::from_secs(30));
    }

    #[test]
    fn test_escalation_classes() {
        assert!(FetchError::Timeout.escalates());
        assert!(FetchError::Connect("dns".into()).escalates());
        assert!(FetchError::Status(403).escalates());
        assert!(FetchError::Status(429).escalates());
        assert!(FetchError::Status(503).escalates());
        assert!(!FetchError::Status(404).escalates());
        assert!(!FetchError::Decode("bad json".into()).escalates());
    }

    #[test]
    fn test_url_hash_stable() {
        let a = hash_url("https://example.com/a?x=1");
        let b = hash_url("https://example.com/a?x=1");
        let c = hash_url("https://example.com/a?x=2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let short = "https://example.com/a";
        assert_eq!(truncate(short), short);

        // A two-byte character straddling the 80-byte cut must not panic
        let long = format!("{}\u{e9}trange-rue", "a".repeat(79));
        let cut = truncate(&long);
        assert_eq!(cut.len(), 79);
        assert!(long.starts_with(cut));
    }

    #[tokio::test]
    async fn test_cache_hit_short_circuits_network() {
        let pool = init_memory_pool().await.unwrap();
        let fetcher = TieredFetcher::new(pool, test_config());

        // Host does not resolve, so any network attempt would fail
        let url = "https://boundary.invalid/query?f=json";
        let payload = serde_json::json!({"features": []});
        fetcher
            .store_in_cache(url, &hash_url(url), &payload, 24, 0)
            .await;

        let outcome = fetcher
            .fetch_json(url, &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.source, FetchSource::Cache);
        assert_eq!(outcome.cost_units, 0);
        assert_eq!(outcome.data, payload);
    }

    #[tokio::test]
    async fn test_expired_cache_entry_is_a_miss() {
        let pool = init_memory_pool().await.unwrap();
        let fetcher = TieredFetcher::new(pool, test_config());

        let url = "https://boundary.invalid/query?f=json";
        let payload = serde_json::json!({"features": []});
        // TTL of zero hours expires immediately
        fetcher
            .store_in_cache(url, &hash_url(url), &payload, 0, 0)
            .await;

        assert!(fetcher.check_cache(&hash_url(url)).await.is_none());
    }

    #[tokio::test]
    async fn test_usage_logged_on_cache_hit() {
        let pool = init_memory_pool().await.unwrap();
        let fetcher = TieredFetcher::new(pool.clone(), test_config());

        let url = "https://boundary.invalid/query?f=json";
        fetcher
            .store_in_cache(url, &hash_url(url), &serde_json::json!({}), 24, 0)
            .await;
        fetcher.fetch_json(url, &FetchOptions::default()).await.unwrap();

        let row = sqlx::query("SELECT tier, cache_hit, cost_units FROM fetch_usage_log")
            .fetch_one(&pool)
            .await
            .unwrap();
        use sqlx::Row;
        assert_eq!(row.get::<String, _>("tier"), "cache");
        assert_eq!(row.get::<i64, _>("cache_hit"), 1);
        assert_eq!(row.get::<i64, _>("cost_units"), 0);
    }

    #[tokio::test]
    async fn test_proxy_unconfigured_primary_mode_errors() {
        let pool = init_memory_pool().await.unwrap();
        let fetcher = TieredFetcher::new(pool, test_config());

        let options = FetchOptions {
            mode: FetchMode::Primary,
            ..Default::default()
        };
        let err = fetcher
            .fetch_json("https://boundary.invalid/query", &options)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::ProxyNotConfigured));
    }
}
