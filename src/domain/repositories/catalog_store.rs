//! Catalog Store Trait
//!
//! This module defines the `CatalogStore` trait, the only way the pipeline
//! talks to the internal catalog. The SQLite implementation lives in
//! `persistence`; tests substitute in-memory doubles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::domain::entities::change_alert::ChangeAlert;
use crate::domain::entities::price_comparison::PriceComparison;
use crate::domain::entities::product::InternalProduct;
use crate::domain::entities::provider_price::{
    DeadLetter, ExistingPrice, PricePoint, ProviderPriceRecord,
};
use crate::domain::errors::PipelineError;

pub type StoreResult<T> = Result<T, PipelineError>;

/// Read/write operations against the internal catalog
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// All internal products currently marked active
    async fn list_active_products(&self) -> StoreResult<Vec<InternalProduct>>;

    /// Internal products with the given ids (missing ids are simply absent)
    async fn products_by_ids(&self, ids: &[i64]) -> StoreResult<Vec<InternalProduct>>;

    /// Existing provider prices for a chunk of SKUs, keyed by SKU
    async fn existing_provider_prices(
        &self,
        skus: &[String],
    ) -> StoreResult<HashMap<String, ExistingPrice>>;

    /// Insert a batch of new provider price records in one operation.
    ///
    /// A SKU that appeared since the existence check is overwritten when the
    /// incoming observation is at least as recent, never rejected.
    async fn insert_provider_prices(&self, records: &[ProviderPriceRecord]) -> StoreResult<u64>;

    /// Overwrite the stored provider price for `record.sku`
    async fn update_provider_price(&self, record: &ProviderPriceRecord) -> StoreResult<()>;

    /// Provider prices that are tied to an internal product
    async fn matched_provider_prices(&self) -> StoreResult<Vec<ProviderPriceRecord>>;

    async fn append_price_history(&self, points: &[PricePoint]) -> StoreResult<u64>;

    async fn price_history_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<PricePoint>>;

    async fn insert_price_comparisons(&self, comparisons: &[PriceComparison]) -> StoreResult<u64>;

    /// Store alerts whose [`ChangeAlert::dedup_key`] is not stored yet.
    /// Returns how many were new.
    async fn insert_change_alerts(&self, alerts: &[ChangeAlert]) -> StoreResult<u64>;

    async fn delete_price_comparisons_older_than(&self, cutoff: DateTime<Utc>)
        -> StoreResult<u64>;

    /// Only alerts already marked processed are pruned
    async fn delete_processed_alerts_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    async fn insert_dead_letters(&self, letters: &[DeadLetter]) -> StoreResult<u64>;

    async fn count_pending_dead_letters(&self) -> StoreResult<u64>;

    /// Cheap round-trip used by health checks
    async fn ping(&self) -> StoreResult<()>;
}
