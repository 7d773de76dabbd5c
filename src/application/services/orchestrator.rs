//! Pipeline Orchestrator
//!
//! Entry point for every inbound action. Sequences categories through
//! fetch, extraction, matching and persistence in bounded concurrent
//! batches, and assembles the data half of the response envelope.

use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::persistence_coordinator::BatchPersistenceCoordinator;
use super::with_deadline;
use crate::config::{validate_category, PipelineConfig};
use crate::domain::entities::change_alert::{ChangeAlert, Severity};
use crate::domain::entities::price_comparison::PriceComparison;
use crate::domain::entities::provider_price::ProviderPriceRecord;
use crate::domain::errors::{PipelineError, PipelineResult};
use crate::domain::repositories::catalog_store::CatalogStore;
use crate::domain::services::change_detection;
use crate::domain::services::circuit_breaker::CircuitBreakerRegistry;
use crate::domain::services::extraction::ExtractionEngine;
use crate::domain::services::matching::{match_product, CatalogIndex};
use crate::domain::services::price_comparison::{build_comparisons, ComparisonSummary};
use crate::domain::services::rate_limiter::AdaptiveRateLimiter;
use crate::domain::services::response_cache::ResponseCache;
use crate::infrastructure::fetch_gateway::FetchGateway;

const STATUS_CACHE_KEY: &str = "status";
const HEALTH_CACHE_KEY: &str = "health";
const ALL_CATEGORIES: &str = "all";

/// Alerts echoed back in the `alerts` response
const ALERT_SAMPLE_SIZE: usize = 50;
/// Savings opportunities echoed back in the `compare` response
const OPPORTUNITY_SAMPLE_SIZE: usize = 20;

/// Inbound action selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Scrape,
    Compare,
    Alerts,
    Status,
    Health,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Scrape => "scrape",
            Action::Compare => "compare",
            Action::Alerts => "alerts",
            Action::Status => "status",
            Action::Health => "health",
        }
    }
}

impl FromStr for Action {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "scrape" => Ok(Action::Scrape),
            "compare" => Ok(Action::Compare),
            "alerts" => Ok(Action::Alerts),
            "status" => Ok(Action::Status),
            "health" => Ok(Action::Health),
            other => Err(PipelineError::Validation(format!(
                "Unknown action '{}' (expected scrape, compare, alerts, status or health)",
                other
            ))),
        }
    }
}

/// Per-category scrape result
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryReport {
    pub category: String,
    pub success: bool,
    pub fetch_attempts: u32,
    pub extracted: usize,
    pub extraction_errors: usize,
    pub matched: usize,
    pub attempted_saves: usize,
    pub saved: usize,
    pub failed_saves: usize,
    pub dead_lettered: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip)]
    pub failure: Option<PipelineError>,
    pub errors: Vec<String>,
}

impl CategoryReport {
    fn new(category: &str) -> Self {
        Self {
            category: category.to_string(),
            ..Default::default()
        }
    }

    fn fail(mut self, error: PipelineError) -> Self {
        self.success = false;
        self.error_code = Some(error.code().to_string());
        self.errors.push(error.to_string());
        self.failure = Some(error);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeTotals {
    pub categories_attempted: usize,
    pub categories_succeeded: usize,
    pub extracted: usize,
    pub matched: usize,
    pub attempted_saves: usize,
    pub saved: usize,
    pub dead_lettered: usize,
    pub error_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeReport {
    pub totals: ScrapeTotals,
    pub categories: Vec<CategoryReport>,
    /// Capped sample across all categories
    pub errors: Vec<String>,
    pub outbound_rate: f64,
}

pub struct PipelineOrchestrator {
    config: PipelineConfig,
    gateway: Arc<FetchGateway>,
    store: Arc<dyn CatalogStore>,
    extractor: ExtractionEngine,
    persistence: BatchPersistenceCoordinator,
    cache: ResponseCache,
}

impl PipelineOrchestrator {
    /// Build the orchestrator with its own limiter, breaker registry and gateway
    pub fn new(config: PipelineConfig, store: Arc<dyn CatalogStore>) -> PipelineResult<Self> {
        let limiter = Arc::new(AdaptiveRateLimiter::new(config.rate_limiter.clone()));
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone()));
        let gateway = FetchGateway::new(config.fetch.clone(), limiter, breakers)?;
        Ok(Self::with_gateway(config, Arc::new(gateway), store))
    }

    pub fn with_gateway(
        config: PipelineConfig,
        gateway: Arc<FetchGateway>,
        store: Arc<dyn CatalogStore>,
    ) -> Self {
        let persistence = BatchPersistenceCoordinator::new(
            store.clone(),
            config.persistence.clone(),
            config.fetch.store_timeout,
        );
        Self {
            cache: ResponseCache::new(config.cache.clone()),
            extractor: ExtractionEngine::default(),
            gateway,
            store,
            persistence,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<FetchGateway> {
        &self.gateway
    }

    /// Run one action. `category` narrows scrape/compare/alerts to one
    /// configured category.
    pub async fn handle(&self, action: Action, category: Option<&str>) -> PipelineResult<Value> {
        let category = self.resolve_category(category)?;
        debug!(action = action.as_str(), category = ?category, "Handling action");

        match action {
            Action::Scrape => {
                let categories = match &category {
                    Some(c) => vec![c.clone()],
                    None => self.config.categories.clone(),
                };
                let report = self.scrape(categories).await?;
                Ok(json!(report))
            }
            Action::Compare => self.compare(category.as_deref()).await,
            Action::Alerts => self.alerts(category.as_deref()).await,
            Action::Status => self.status().await,
            Action::Health => self.health().await,
        }
    }

    fn resolve_category(&self, category: Option<&str>) -> PipelineResult<Option<String>> {
        let category = match category.map(str::trim).filter(|c| !c.is_empty()) {
            Some(c) => c,
            None => return Ok(None),
        };
        validate_category(category)?;

        if !self.config.categories.iter().any(|known| known == category) {
            return Err(PipelineError::Validation(format!(
                "Unknown category '{}'",
                category
            )));
        }
        Ok(Some(category.to_string()))
    }

    /// Fetch, extract, match and persist every category, in batches
    pub async fn scrape(&self, categories: Vec<String>) -> PipelineResult<ScrapeReport> {
        if self.config.source_base_url.is_none() {
            return Err(PipelineError::Configuration(
                "PRICEWATCH_SOURCE_BASE_URL is not set".to_string(),
            ));
        }

        let catalog = with_deadline(
            "catalog load",
            self.config.fetch.store_timeout,
            self.store.list_active_products(),
        )
        .await?;
        let index = CatalogIndex::new(catalog);
        info!(
            categories = categories.len(),
            catalog_size = index.len(),
            "Starting scrape"
        );

        let batch_size = self.config.category_batch_size.max(1);
        let batches: Vec<&[String]> = categories.chunks(batch_size).collect();
        let batch_count = batches.len();
        let mut reports = Vec::with_capacity(categories.len());

        for (batch_index, batch) in batches.into_iter().enumerate() {
            let results = join_all(batch.iter().map(|c| self.scrape_category(c, &index))).await;

            let failures = results.iter().filter(|r| !r.success).count();
            let rate = self
                .gateway
                .limiter()
                .record_batch(failures, results.len())
                .await;
            info!(
                batch = batch_index,
                categories = results.len(),
                failures,
                outbound_rate = rate,
                "Category batch settled"
            );
            reports.extend(results);

            if batch_index + 1 < batch_count {
                tokio::time::sleep(self.config.inter_category_batch_delay).await;
            }
        }

        self.cache.invalidate(STATUS_CACHE_KEY).await;
        self.cache.invalidate(&compare_cache_key(None)).await;
        for category in &categories {
            self.cache.invalidate(&compare_cache_key(Some(category))).await;
        }

        // Nothing got through: surface the first failure so the caller can
        // tell a dead upstream from a partial run
        if !reports.is_empty() && reports.iter().all(|r| !r.success) {
            if let Some(failure) = reports.iter().find_map(|r| r.failure.clone()) {
                error!(error = %failure, "Every category failed");
                return Err(failure);
            }
        }

        let report = self.summarize(reports).await;
        info!(
            saved = report.totals.saved,
            extracted = report.totals.extracted,
            errors = report.totals.error_count,
            "Scrape finished"
        );
        Ok(report)
    }

    async fn scrape_category(&self, category: &str, index: &CatalogIndex) -> CategoryReport {
        let report = CategoryReport::new(category);
        let source = self.config.source_name.as_str();

        let url = match self.config.category_url(category) {
            Some(url) => url,
            None => {
                return report.fail(PipelineError::Configuration(format!(
                    "cannot build URL for category '{}'",
                    category
                )))
            }
        };

        let response = match self.gateway.fetch(&url, source).await {
            Ok(response) => response,
            Err(e) => {
                warn!(category = %category, source = %source, error = %e, "Category fetch failed");
                return report.fail(e);
            }
        };

        let mut report = report;
        report.success = true;
        report.fetch_attempts = response.attempts;

        let extraction = self
            .extractor
            .extract(&response.body, category, &response.url);
        report.extracted = extraction.products.len();
        report.extraction_errors = extraction.errors.len();
        report.errors.extend(extraction.errors);

        let records: Vec<ProviderPriceRecord> = extraction
            .products
            .iter()
            .map(|product| {
                let matched = match_product(product, index);
                if matched.is_some() {
                    report.matched += 1;
                }
                ProviderPriceRecord::from_external(product, source, matched.as_ref())
            })
            .collect();

        if !records.is_empty() {
            let outcome = self.persistence.persist(records).await;
            report.attempted_saves = outcome.attempted;
            report.saved = outcome.saved_count;
            report.failed_saves = outcome.failed();
            report.dead_lettered = outcome.dead_lettered;
            report.errors.extend(outcome.errors);
        }

        debug!(
            category = %category,
            extracted = report.extracted,
            matched = report.matched,
            saved = report.saved,
            "Category processed"
        );
        report
    }

    async fn summarize(&self, mut reports: Vec<CategoryReport>) -> ScrapeReport {
        let sample = self.config.persistence.error_sample_size;
        let mut totals = ScrapeTotals {
            categories_attempted: reports.len(),
            ..Default::default()
        };
        let mut errors = Vec::new();

        for report in &mut reports {
            if report.success {
                totals.categories_succeeded += 1;
            }
            totals.extracted += report.extracted;
            totals.matched += report.matched;
            totals.attempted_saves += report.attempted_saves;
            totals.saved += report.saved;
            totals.dead_lettered += report.dead_lettered;
            totals.error_count += report.errors.len();

            for e in &report.errors {
                if errors.len() < sample {
                    errors.push(format!("{}: {}", report.category, e));
                }
            }
            report.errors.truncate(sample);
        }

        ScrapeReport {
            totals,
            categories: reports,
            errors,
            outbound_rate: self.gateway.limiter().current_rate().await,
        }
    }

    /// Compare matched provider prices with catalog prices, persist the
    /// comparisons and prune expired ones
    pub async fn compare(&self, category: Option<&str>) -> PipelineResult<Value> {
        let cache_key = compare_cache_key(category);
        if let Some(cached) = self.cache.get(&cache_key).await {
            return Ok(cached);
        }

        let deadline = self.config.fetch.store_timeout;
        let records: Vec<ProviderPriceRecord> = with_deadline(
            "provider price read",
            deadline,
            self.store.matched_provider_prices(),
        )
        .await?
        .into_iter()
        .filter(|r| category.map_or(true, |c| r.category == c))
        .collect();

        let mut ids: Vec<i64> = records.iter().filter_map(|r| r.product_id).collect();
        ids.sort_unstable();
        ids.dedup();
        let products = with_deadline(
            "product read",
            deadline,
            self.store.products_by_ids(&ids),
        )
        .await?;

        let (comparisons, dropped) = build_comparisons(&records, &products);
        if dropped > 0 {
            warn!(dropped, "Dropped comparisons for unknown products");
        }

        let mut errors = Vec::new();
        let persisted = match with_deadline(
            "comparison insert",
            deadline,
            self.store.insert_price_comparisons(&comparisons),
        )
        .await
        {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "Failed to persist comparisons");
                errors.push(format!("persist comparisons: {}", e));
                0
            }
        };

        let pruned = self.prune_comparisons(&mut errors).await;
        let summary = ComparisonSummary::from_comparisons(&comparisons);
        let opportunities = top_opportunities(&comparisons);

        let data = json!({
            "category": category.unwrap_or(ALL_CATEGORIES),
            "summary": summary,
            "attempted": comparisons.len(),
            "persisted": persisted,
            "dropped": dropped,
            "pruned": pruned,
            "opportunities": opportunities,
            "errors": errors,
        });

        if errors.is_empty() {
            self.cache
                .put(cache_key, data.clone(), self.config.cache.comparison_ttl)
                .await;
        }
        Ok(data)
    }

    async fn prune_comparisons(&self, errors: &mut Vec<String>) -> u64 {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.persistence.retention_days);
        match with_deadline(
            "comparison prune",
            self.config.fetch.store_timeout,
            self.store.delete_price_comparisons_older_than(cutoff),
        )
        .await
        {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Failed to prune comparisons");
                errors.push(format!("prune comparisons: {}", e));
                0
            }
        }
    }

    /// Detect price changes over the retention window and persist the alerts
    pub async fn alerts(&self, category: Option<&str>) -> PipelineResult<Value> {
        let deadline = self.config.fetch.store_timeout;
        let cutoff = Utc::now() - chrono::Duration::days(self.config.persistence.retention_days);

        let active: Vec<_> = with_deadline(
            "active product read",
            deadline,
            self.store.list_active_products(),
        )
        .await?
        .into_iter()
        .filter(|p| category.map_or(true, |c| p.category == c))
        .collect();
        let valid_ids: HashSet<i64> = active.iter().map(|p| p.id).collect();

        let history: Vec<_> = with_deadline(
            "price history read",
            deadline,
            self.store.price_history_since(cutoff),
        )
        .await?
        .into_iter()
        .filter(|p| valid_ids.contains(&p.product_id))
        .collect();

        let generated = change_detection::detect(&history, &active, &self.config.alerts);
        let total = generated.len();
        let alerts: Vec<ChangeAlert> = generated
            .into_iter()
            .filter(|a| valid_ids.contains(&a.product_id))
            .collect();
        let dropped = total - alerts.len();

        let mut errors = Vec::new();
        let (persisted, already_stored) = match with_deadline(
            "alert insert",
            deadline,
            self.store.insert_change_alerts(&alerts),
        )
        .await
        {
            Ok(n) => (n, (alerts.len() as u64).saturating_sub(n)),
            Err(e) => {
                error!(error = %e, "Failed to persist alerts");
                errors.push(format!("persist alerts: {}", e));
                (0, 0)
            }
        };

        let pruned = match with_deadline(
            "alert prune",
            deadline,
            self.store.delete_processed_alerts_older_than(cutoff),
        )
        .await
        {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Failed to prune alerts");
                errors.push(format!("prune alerts: {}", e));
                0
            }
        };

        info!(
            generated = alerts.len(),
            persisted,
            already_stored,
            products = active.len(),
            "Alert detection finished"
        );

        let count = |severity: Severity| alerts.iter().filter(|a| a.severity == severity).count();
        Ok(json!({
            "category": category.unwrap_or(ALL_CATEGORIES),
            "generated": alerts.len(),
            "persisted": persisted,
            "alreadyStored": already_stored,
            "dropped": dropped,
            "pruned": pruned,
            "bySeverity": {
                "critical": count(Severity::Critical),
                "high": count(Severity::High),
                "medium": count(Severity::Medium),
                "low": count(Severity::Low),
            },
            "alerts": alerts.iter().take(ALERT_SAMPLE_SIZE).collect::<Vec<_>>(),
            "errors": errors,
        }))
    }

    /// Breaker, limiter, gateway and cache state
    pub async fn status(&self) -> PipelineResult<Value> {
        if let Some(cached) = self.cache.get(STATUS_CACHE_KEY).await {
            return Ok(cached);
        }

        let dead_letters = match with_deadline(
            "dead letter count",
            self.config.fetch.store_timeout,
            self.store.count_pending_dead_letters(),
        )
        .await
        {
            Ok(n) => json!(n),
            Err(e) => {
                warn!(error = %e, "Failed to count dead letters");
                Value::Null
            }
        };

        let purged = self.cache.purge_expired().await;
        if purged > 0 {
            debug!(purged, "Purged expired cache entries");
        }
        let cache_stats = self.cache.stats().await;
        let data = json!({
            "source": self.config.source_name,
            "circuitBreakers": self.gateway.breakers().snapshots().await,
            "rateLimiter": self.gateway.limiter().snapshot().await,
            "gateway": self.gateway.stats(),
            "cache": {
                "entries": cache_stats.entries,
                "hits": cache_stats.hits,
                "misses": cache_stats.misses,
                "evictions": cache_stats.evictions,
                "hitRate": cache_stats.hit_rate(),
            },
            "pendingDeadLetters": dead_letters,
            "generatedAt": Utc::now(),
        });

        self.cache
            .put(STATUS_CACHE_KEY, data.clone(), self.config.cache.status_ttl)
            .await;
        Ok(data)
    }

    /// Ping the upstream and the store. Unhealthy is reported in the
    /// data, not as an error.
    pub async fn health(&self) -> PipelineResult<Value> {
        let base_url = self.config.source_base_url.clone().ok_or_else(|| {
            PipelineError::Configuration("PRICEWATCH_SOURCE_BASE_URL is not set".to_string())
        })?;

        if let Some(cached) = self.cache.get(HEALTH_CACHE_KEY).await {
            return Ok(cached);
        }

        let ping = self.gateway.ping(&base_url).await;
        let store = with_deadline(
            "store ping",
            self.config.fetch.store_timeout,
            self.store.ping(),
        )
        .await;
        let healthy = ping.reachable && store.is_ok();

        if !healthy {
            warn!(
                upstream = ping.reachable,
                store = store.is_ok(),
                "Health check failed"
            );
        }

        let data = json!({
            "healthy": healthy,
            "upstream": ping,
            "store": {
                "reachable": store.is_ok(),
                "error": store.err().map(|e| e.to_string()),
            },
            "checkedAt": Utc::now(),
        });

        self.cache
            .put(HEALTH_CACHE_KEY, data.clone(), self.config.cache.health_ttl)
            .await;
        Ok(data)
    }
}

fn compare_cache_key(category: Option<&str>) -> String {
    format!("compare:{}", category.unwrap_or(ALL_CATEGORIES))
}

fn top_opportunities(comparisons: &[PriceComparison]) -> Vec<&PriceComparison> {
    let mut opportunities: Vec<&PriceComparison> = comparisons
        .iter()
        .filter(|c| c.is_savings_opportunity)
        .collect();
    opportunities.sort_by(|a, b| b.percent_diff.total_cmp(&a.percent_diff));
    opportunities.truncate(OPPORTUNITY_SAMPLE_SIZE);
    opportunities
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::test_support::{
        internal_product, provider_record, MemoryCatalogStore,
    };
    use crate::domain::entities::provider_price::PricePoint;
    use chrono::Duration;

    fn orchestrator(store: Arc<MemoryCatalogStore>) -> PipelineOrchestrator {
        PipelineOrchestrator::new(PipelineConfig::default(), store).unwrap()
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("scrape".parse::<Action>().unwrap(), Action::Scrape);
        assert_eq!(" Health ".parse::<Action>().unwrap(), Action::Health);

        let err = "delete".parse::<Action>().unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(!err.retryable());
    }

    #[tokio::test]
    async fn test_unknown_category_is_rejected() {
        let orch = orchestrator(Arc::new(MemoryCatalogStore::default()));
        let err = orch.handle(Action::Compare, Some("weapons")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_scrape_and_health_require_base_url() {
        let orch = orchestrator(Arc::new(MemoryCatalogStore::default()));

        let err = orch.handle(Action::Scrape, None).await.unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
        let err = orch.handle(Action::Health, None).await.unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[tokio::test]
    async fn test_compare_persists_and_drops_unknown_products() {
        let store = Arc::new(MemoryCatalogStore::with_products(vec![internal_product(
            1, "A", "Agua", 10.0,
        )]));
        {
            let mut prices = store.prices.lock().unwrap();
            prices.insert("X".to_string(), provider_record("X", Some(1), 8.0));
            prices.insert("Y".to_string(), provider_record("Y", Some(99), 3.0));
            prices.insert("Z".to_string(), provider_record("Z", None, 3.0));
        }

        let orch = orchestrator(store.clone());
        let data = orch.handle(Action::Compare, None).await.unwrap();

        assert_eq!(data["attempted"], 1);
        assert_eq!(data["persisted"], 1);
        assert_eq!(data["dropped"], 1);
        assert_eq!(data["summary"]["switchProvider"], 1);
        assert_eq!(data["opportunities"][0]["recommendation"], "switch_provider");
        assert_eq!(store.comparisons.lock().unwrap().len(), 1);

        // Served from cache, nothing inserted twice
        orch.handle(Action::Compare, None).await.unwrap();
        assert_eq!(store.comparisons.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_alerts_detects_and_persists() {
        let mut staple = internal_product(1, "A", "Arroz", 5.0);
        staple.category = "groceries".to_string();
        let store = Arc::new(MemoryCatalogStore::with_products(vec![
            staple,
            internal_product(2, "B", "Suco", 4.0),
        ]));
        let now = Utc::now();
        store.history.lock().unwrap().extend([
            PricePoint { product_id: 1, price: 100.0, observed_at: now - Duration::hours(3) },
            PricePoint { product_id: 1, price: 130.0, observed_at: now - Duration::hours(1) },
            PricePoint { product_id: 42, price: 1.0, observed_at: now - Duration::hours(2) },
        ]);

        let orch = orchestrator(store.clone());
        let data = orch.handle(Action::Alerts, None).await.unwrap();

        // 100 -> 130 on product 1, product 2 has no history
        assert_eq!(data["generated"], 2);
        assert_eq!(data["bySeverity"]["high"], 1);
        assert_eq!(data["bySeverity"]["low"], 1);
        assert_eq!(data["alerts"][0]["changeType"], "increase");

        let stored = store.alerts.lock().unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|a| a.product_id == 1 || a.product_id == 2));
    }

    #[tokio::test]
    async fn test_repeated_alert_runs_store_each_event_once() {
        let store = Arc::new(MemoryCatalogStore::with_products(vec![
            internal_product(1, "A", "Agua", 2.0),
            internal_product(2, "B", "Suco", 4.0),
        ]));
        let now = Utc::now();
        store.history.lock().unwrap().extend([
            PricePoint { product_id: 1, price: 2.0, observed_at: now - Duration::hours(5) },
            PricePoint { product_id: 1, price: 3.0, observed_at: now - Duration::hours(1) },
        ]);
        let orch = orchestrator(store.clone());

        let first = orch.handle(Action::Alerts, None).await.unwrap();
        assert_eq!(first["persisted"], 2);
        assert_eq!(first["alreadyStored"], 0);

        for _ in 0..2 {
            let again = orch.handle(Action::Alerts, None).await.unwrap();
            assert_eq!(again["generated"], 2);
            assert_eq!(again["persisted"], 0);
            assert_eq!(again["alreadyStored"], 2);
        }
        assert_eq!(store.alerts.lock().unwrap().len(), 2);

        // A new observation is a new event
        store.history.lock().unwrap().push(PricePoint {
            product_id: 1,
            price: 4.5,
            observed_at: now,
        });
        let next = orch.handle(Action::Alerts, None).await.unwrap();
        assert_eq!(next["persisted"], 1);
        assert_eq!(store.alerts.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_alerts_category_filter() {
        let mut other = internal_product(2, "B", "Sabao", 4.0);
        other.category = "cleaning".to_string();
        let store = Arc::new(MemoryCatalogStore::with_products(vec![
            internal_product(1, "A", "Agua", 2.0),
            other,
        ]));

        let orch = orchestrator(store);
        let data = orch.handle(Action::Alerts, Some("cleaning")).await.unwrap();
        assert_eq!(data["generated"], 1);
        assert_eq!(data["alerts"][0]["productId"], 2);
    }

    #[tokio::test]
    async fn test_status_is_cached() {
        let store = Arc::new(MemoryCatalogStore::default());
        let orch = orchestrator(store);

        let first = orch.handle(Action::Status, None).await.unwrap();
        assert_eq!(first["source"], "catalog");
        assert_eq!(first["pendingDeadLetters"], 0);
        assert_eq!(first["rateLimiter"]["currentRate"], 10.0);

        let second = orch.handle(Action::Status, None).await.unwrap();
        assert_eq!(first["generatedAt"], second["generatedAt"]);
    }

    #[tokio::test]
    async fn test_status_reports_only_live_cache_entries() {
        let orch = orchestrator(Arc::new(MemoryCatalogStore::default()));
        orch.cache
            .put("compare:all", json!({}), std::time::Duration::from_millis(10))
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let data = orch.handle(Action::Status, None).await.unwrap();
        assert_eq!(data["cache"]["entries"], 0);
    }

    #[test]
    fn test_top_opportunities_sorted() {
        let comparisons = vec![
            PriceComparison::new(1, 10.0, 9.0, "catalog", 90.0),
            PriceComparison::new(2, 10.0, 5.0, "catalog", 90.0),
            PriceComparison::new(3, 10.0, 11.0, "catalog", 90.0),
        ];
        let top = top_opportunities(&comparisons);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].product_id, 2);
    }
}
