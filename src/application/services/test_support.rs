//! In-memory catalog store for service tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::domain::entities::change_alert::ChangeAlert;
use crate::domain::entities::price_comparison::PriceComparison;
use crate::domain::entities::product::InternalProduct;
use crate::domain::entities::provider_price::{
    DeadLetter, ExistingPrice, PricePoint, ProviderPriceRecord,
};
use crate::domain::errors::PipelineError;
use crate::domain::repositories::catalog_store::{CatalogStore, StoreResult};

#[derive(Default)]
pub struct MemoryCatalogStore {
    pub products: Mutex<Vec<InternalProduct>>,
    pub prices: Mutex<HashMap<String, ProviderPriceRecord>>,
    pub history: Mutex<Vec<PricePoint>>,
    pub comparisons: Mutex<Vec<PriceComparison>>,
    pub alerts: Mutex<Vec<ChangeAlert>>,
    pub dead_letters: Mutex<Vec<DeadLetter>>,
    /// Any write touching one of these SKUs fails
    pub failing_skus: Mutex<HashSet<String>>,
    pub fail_existence_checks: Mutex<bool>,
    /// Artificial latency on every call
    pub latency: Mutex<Option<Duration>>,
    pub insert_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
    pub existence_calls: AtomicUsize,
}

impl MemoryCatalogStore {
    pub fn with_products(products: Vec<InternalProduct>) -> Self {
        let store = Self::default();
        *store.products.lock().unwrap() = products;
        store
    }

    pub fn fail_sku(&self, sku: &str) {
        self.failing_skus.lock().unwrap().insert(sku.to_string());
    }

    fn fails(&self, sku: &str) -> bool {
        self.failing_skus.lock().unwrap().contains(sku)
    }

    async fn pause(&self) {
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

pub fn internal_product(id: i64, sku: &str, name: &str, price: f64) -> InternalProduct {
    InternalProduct {
        id,
        sku: sku.to_string(),
        barcode: None,
        name: name.to_string(),
        brand: None,
        category: "beverages".to_string(),
        unit_price: price,
        active: true,
    }
}

pub fn provider_record(sku: &str, product_id: Option<i64>, price: f64) -> ProviderPriceRecord {
    ProviderPriceRecord {
        sku: sku.to_string(),
        product_id,
        name: format!("Listing {}", sku),
        brand: None,
        category: "beverages".to_string(),
        unit_price: price,
        promo_price: None,
        stock: None,
        min_stock: None,
        barcode: None,
        source: "catalog".to_string(),
        source_url: "https://shop.example.com/category/beverages".to_string(),
        content_hash: format!("{}-{}", sku, price),
        confidence_score: 80,
        match_strategy: product_id.map(|_| "sku_exact".to_string()),
        match_confidence: product_id.map(|_| 95),
        observed_at: Utc::now(),
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn list_active_products(&self) -> StoreResult<Vec<InternalProduct>> {
        self.pause().await;
        Ok(self
            .products
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.active)
            .cloned()
            .collect())
    }

    async fn products_by_ids(&self, ids: &[i64]) -> StoreResult<Vec<InternalProduct>> {
        self.pause().await;
        Ok(self
            .products
            .lock()
            .unwrap()
            .iter()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect())
    }

    async fn existing_provider_prices(
        &self,
        skus: &[String],
    ) -> StoreResult<HashMap<String, ExistingPrice>> {
        self.pause().await;
        self.existence_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_existence_checks.lock().unwrap() {
            return Err(PipelineError::Persistence("existence check failed".to_string()));
        }
        let prices = self.prices.lock().unwrap();
        Ok(skus
            .iter()
            .filter_map(|sku| prices.get(sku))
            .map(|r| {
                (
                    r.sku.clone(),
                    ExistingPrice {
                        sku: r.sku.clone(),
                        unit_price: r.unit_price,
                        content_hash: r.content_hash.clone(),
                    },
                )
            })
            .collect())
    }

    async fn insert_provider_prices(&self, records: &[ProviderPriceRecord]) -> StoreResult<u64> {
        self.pause().await;
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if records.iter().any(|r| self.fails(&r.sku)) {
            return Err(PipelineError::Persistence("insert rejected".to_string()));
        }
        let mut prices = self.prices.lock().unwrap();
        for record in records {
            let stale = prices
                .get(&record.sku)
                .is_some_and(|current| current.observed_at > record.observed_at);
            if !stale {
                prices.insert(record.sku.clone(), record.clone());
            }
        }
        Ok(records.len() as u64)
    }

    async fn update_provider_price(&self, record: &ProviderPriceRecord) -> StoreResult<()> {
        self.pause().await;
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.fails(&record.sku) {
            return Err(PipelineError::Persistence("update rejected".to_string()));
        }
        let mut prices = self.prices.lock().unwrap();
        match prices.get_mut(&record.sku) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(PipelineError::Persistence(format!(
                "unknown sku {}",
                record.sku
            ))),
        }
    }

    async fn matched_provider_prices(&self) -> StoreResult<Vec<ProviderPriceRecord>> {
        self.pause().await;
        Ok(self
            .prices
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.product_id.is_some())
            .cloned()
            .collect())
    }

    async fn append_price_history(&self, points: &[PricePoint]) -> StoreResult<u64> {
        self.pause().await;
        self.history.lock().unwrap().extend_from_slice(points);
        Ok(points.len() as u64)
    }

    async fn price_history_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<PricePoint>> {
        self.pause().await;
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.observed_at >= since)
            .cloned()
            .collect())
    }

    async fn insert_price_comparisons(&self, comparisons: &[PriceComparison]) -> StoreResult<u64> {
        self.pause().await;
        self.comparisons.lock().unwrap().extend_from_slice(comparisons);
        Ok(comparisons.len() as u64)
    }

    async fn insert_change_alerts(&self, alerts: &[ChangeAlert]) -> StoreResult<u64> {
        self.pause().await;
        let mut stored = self.alerts.lock().unwrap();
        let mut inserted = 0;
        for alert in alerts {
            let key = alert.dedup_key();
            if !stored.iter().any(|a| a.dedup_key() == key) {
                stored.push(alert.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn delete_price_comparisons_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut comparisons = self.comparisons.lock().unwrap();
        let before = comparisons.len();
        comparisons.retain(|c| c.compared_at >= cutoff);
        Ok((before - comparisons.len()) as u64)
    }

    async fn delete_processed_alerts_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut alerts = self.alerts.lock().unwrap();
        let before = alerts.len();
        alerts.retain(|a| !(a.processed && a.raised_at < cutoff));
        Ok((before - alerts.len()) as u64)
    }

    async fn insert_dead_letters(&self, letters: &[DeadLetter]) -> StoreResult<u64> {
        self.dead_letters.lock().unwrap().extend_from_slice(letters);
        Ok(letters.len() as u64)
    }

    async fn count_pending_dead_letters(&self) -> StoreResult<u64> {
        Ok(self
            .dead_letters
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.status == DeadLetter::PENDING)
            .count() as u64)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.pause().await;
        Ok(())
    }
}
