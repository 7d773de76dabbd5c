use std::fmt::{Debug, Display};
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::errors::{PipelineError, PipelineResult};

/// Upstream fetch behavior: deadlines, retry schedule, traffic shaping
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub primary_timeout: Duration,
    pub ping_timeout: Duration,
    /// Deadline for every round-trip to the internal store
    pub store_timeout: Duration,
    pub max_attempts: u32,
    pub base_retry_delay: Duration,
    pub retry_multiplier: f64,
    pub max_retry_delay: Duration,
    /// Fractional jitter applied to each retry delay (0.2 = ±20%)
    pub retry_jitter: f64,
    pub rotate_headers: bool,
    /// Replaces the built-in user agent pool when non-empty
    pub user_agents: Vec<String>,
    /// Random pause before each outbound call, in milliseconds
    pub pre_request_jitter_ms: (u64, u64),
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            primary_timeout: Duration::from_secs(20),
            ping_timeout: Duration::from_secs(5),
            store_timeout: Duration::from_secs(15),
            max_attempts: 5,
            base_retry_delay: Duration::from_millis(2000),
            retry_multiplier: 1.5,
            max_retry_delay: Duration::from_millis(15000),
            retry_jitter: 0.2,
            rotate_headers: true,
            user_agents: Vec::new(),
            pre_request_jitter_ms: (200, 800),
        }
    }
}

/// Per-source circuit breaker thresholds
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in CLOSED before opening
    pub failure_threshold: u32,
    /// Successes in HALF_OPEN before closing
    pub half_open_success_threshold: u32,
    /// Time since the last failure before an OPEN circuit lets a trial request through
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            half_open_success_threshold: 3,
            cooldown: Duration::from_millis(60000),
        }
    }
}

/// Adaptive outbound rate limiter bounds
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub window: Duration,
    pub initial_rate: f64,
    pub min_rate: f64,
    pub max_rate: f64,
    /// Batches whose failure ratio exceeds this slow the limiter down
    pub failure_ratio_threshold: f64,
    pub decrease_factor: f64,
    pub increase_factor: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            initial_rate: 10.0,
            min_rate: 1.0,
            max_rate: 50.0,
            failure_ratio_threshold: 0.10,
            decrease_factor: 0.8,
            increase_factor: 1.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub eviction_batch: usize,
    pub status_ttl: Duration,
    pub health_ttl: Duration,
    pub comparison_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            eviction_batch: 100,
            status_ttl: Duration::from_secs(30),
            health_ttl: Duration::from_secs(60),
            comparison_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub existence_chunk_size: usize,
    pub insert_batch_size: usize,
    pub update_batch_size: usize,
    pub inter_batch_delay: Duration,
    pub dead_letter_cap: usize,
    pub retention_days: i64,
    /// Cap on error details returned to callers
    pub error_sample_size: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            existence_chunk_size: 100,
            insert_batch_size: 50,
            update_batch_size: 25,
            inter_batch_delay: Duration::from_millis(100),
            dead_letter_cap: 10,
            retention_days: 30,
            error_sample_size: 10,
        }
    }
}

/// Change detection tuning
#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Base percent change that raises an alert
    pub threshold: f64,
    pub min_threshold: f64,
    pub max_threshold: f64,
    /// Multiplier for categories whose prices swing more (beverages, alcohol)
    pub volatile_category_factor: f64,
    /// Multiplier for staple categories (household, cleaning)
    pub staple_category_factor: f64,
    /// Consecutive price pairs examined per product
    pub max_pairs_per_product: usize,
    /// Price changes within 24h above which a low alert becomes medium
    pub volatility_change_count: usize,
    pub high_value_price: f64,
    pub high_value_min_change: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            threshold: 15.0,
            min_threshold: 5.0,
            max_threshold: 30.0,
            volatile_category_factor: 0.8,
            staple_category_factor: 1.2,
            max_pairs_per_product: 3,
            volatility_change_count: 3,
            high_value_price: 1000.0,
            high_value_min_change: 10.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub requests_per_minute: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3000".to_string(),
            requests_per_minute: 60,
        }
    }
}

/// Every recognized pipeline option, with explicit defaults
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Name of the upstream source; keys breaker state and provenance
    pub source_name: String,
    /// Upstream base URL. Required for `scrape` and `health`.
    pub source_base_url: Option<String>,
    /// Path template for a category listing, `{category}` is substituted
    pub category_path_template: String,
    pub categories: Vec<String>,
    /// Categories processed concurrently per batch
    pub category_batch_size: usize,
    pub inter_category_batch_delay: Duration,
    pub fetch: FetchConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limiter: RateLimiterConfig,
    pub cache: CacheConfig,
    pub persistence: PersistenceConfig,
    pub alerts: AlertConfig,
    pub server: ServerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_name: "catalog".to_string(),
            source_base_url: None,
            category_path_template: "/category/{category}".to_string(),
            categories: vec![
                "beverages".to_string(),
                "groceries".to_string(),
                "household".to_string(),
                "cleaning".to_string(),
                "personal-care".to_string(),
                "snacks".to_string(),
            ],
            category_batch_size: 3,
            inter_category_batch_delay: Duration::from_millis(1000),
            fetch: FetchConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limiter: RateLimiterConfig::default(),
            cache: CacheConfig::default(),
            persistence: PersistenceConfig::default(),
            alerts: AlertConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables, keeping defaults for
    /// anything missing or out of range.
    pub fn from_env() -> PipelineConfig {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup. Every rejected value
    /// is logged and replaced by its default.
    pub fn from_lookup<F>(lookup: F) -> PipelineConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = PipelineConfig::default();
        let env = EnvReader { lookup: &lookup };

        if let Some(name) = lookup("PRICEWATCH_SOURCE_NAME") {
            if !name.trim().is_empty() {
                config.source_name = name.trim().to_string();
            }
        }

        if let Some(url) = lookup("PRICEWATCH_SOURCE_BASE_URL") {
            match url::Url::parse(&url) {
                Ok(_) => config.source_base_url = Some(url),
                Err(e) => {
                    tracing::warn!("Invalid PRICEWATCH_SOURCE_BASE_URL '{}': {}", url, e);
                }
            }
        }

        if let Some(template) = lookup("PRICEWATCH_CATEGORY_PATH") {
            if template.contains("{category}") {
                config.category_path_template = template;
            } else {
                tracing::warn!(
                    "PRICEWATCH_CATEGORY_PATH must contain {{category}}, using default: {}",
                    config.category_path_template
                );
            }
        }

        if let Some(categories) = lookup("PRICEWATCH_CATEGORIES") {
            let mut parsed = Vec::new();
            for category in categories.split(',').map(str::trim).filter(|c| !c.is_empty()) {
                match validate_category(category) {
                    Ok(()) => parsed.push(category.to_string()),
                    Err(e) => tracing::warn!("Skipping category from PRICEWATCH_CATEGORIES: {}", e),
                }
            }
            if parsed.is_empty() {
                tracing::warn!(
                    "PRICEWATCH_CATEGORIES has no valid entries, using default: {:?}",
                    config.categories
                );
            } else {
                config.categories = parsed;
            }
        }

        env.set("PRICEWATCH_CATEGORY_BATCH_SIZE", 1..=10, &mut config.category_batch_size);
        env.set("PRICEWATCH_ALERT_THRESHOLD", 1.0..=100.0, &mut config.alerts.threshold);

        let mut fetch_timeout_ms = config.fetch.primary_timeout.as_millis() as u64;
        if env.set("PRICEWATCH_FETCH_TIMEOUT_MS", 1000..=120000, &mut fetch_timeout_ms) {
            config.fetch.primary_timeout = Duration::from_millis(fetch_timeout_ms);
        }
        let mut ping_timeout_ms = config.fetch.ping_timeout.as_millis() as u64;
        if env.set("PRICEWATCH_PING_TIMEOUT_MS", 500..=30000, &mut ping_timeout_ms) {
            config.fetch.ping_timeout = Duration::from_millis(ping_timeout_ms);
        }
        env.set("PRICEWATCH_MAX_ATTEMPTS", 1..=10, &mut config.fetch.max_attempts);

        if let Some(enabled) = lookup("PRICEWATCH_ROTATE_HEADERS") {
            config.fetch.rotate_headers = enabled.to_lowercase() == "true" || enabled == "1";
        }

        if let Some(agents) = lookup("PRICEWATCH_USER_AGENTS") {
            config.fetch.user_agents = agents
                .split('|')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect();
        }

        env.set(
            "PRICEWATCH_INSERT_BATCH_SIZE",
            1..=500,
            &mut config.persistence.insert_batch_size,
        );
        env.set(
            "PRICEWATCH_UPDATE_BATCH_SIZE",
            1..=500,
            &mut config.persistence.update_batch_size,
        );
        env.set("PRICEWATCH_RETENTION_DAYS", 1..=365, &mut config.persistence.retention_days);

        if let Some(addr) = lookup("PRICEWATCH_BIND_ADDRESS") {
            config.server.bind_address = addr;
        }

        env.set(
            "PRICEWATCH_REQUESTS_PER_MINUTE",
            1..=u32::MAX,
            &mut config.server.requests_per_minute,
        );

        config
    }

    /// Absolute URL of a category listing on the upstream source
    pub fn category_url(&self, category: &str) -> Option<String> {
        let base = self.source_base_url.as_ref()?;
        let path = self.category_path_template.replace("{category}", category);
        url::Url::parse(base)
            .and_then(|b| b.join(&path))
            .map(|u| u.to_string())
            .ok()
    }
}

/// Validate a category name
///
/// Categories must be:
/// - Non-empty and max 64 characters
/// - Contain only alphanumeric, hyphens or underscores
pub fn validate_category(category: &str) -> PipelineResult<()> {
    if category.is_empty() || category.len() > 64 {
        return Err(PipelineError::Validation(format!(
            "Invalid category length: '{}' (must be 1-64 characters)",
            category
        )));
    }

    if !category
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(PipelineError::Validation(format!(
            "Invalid category format: '{}' (only alphanumeric, -, _ allowed)",
            category
        )));
    }

    Ok(())
}

struct EnvReader<'a, F> {
    lookup: &'a F,
}

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Overwrite `target` when `key` parses and falls inside `range`.
    /// Returns whether it was overwritten.
    fn set<T>(&self, key: &str, range: RangeInclusive<T>, target: &mut T) -> bool
    where
        T: FromStr + PartialOrd + Debug,
        T::Err: Display,
    {
        let Some(raw) = (self.lookup)(key) else {
            return false;
        };
        match raw.trim().parse::<T>() {
            Ok(value) if range.contains(&value) => {
                *target = value;
                true
            }
            Ok(value) => {
                tracing::warn!(
                    "Invalid {} value: {:?} (must be between {:?} and {:?}), using default: {:?}",
                    key,
                    value,
                    range.start(),
                    range.end(),
                    target
                );
                false
            }
            Err(e) => {
                tracing::warn!("Failed to parse {} '{}': {}, using default: {:?}", key, raw, e, target);
                false
            }
        }
    }
}
