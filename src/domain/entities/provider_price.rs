use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::match_result::MatchResult;
use super::product::ExternalProduct;

/// Latest observed provider price for one SKU, as stored in `provider_prices`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderPriceRecord {
    pub sku: String,
    pub product_id: Option<i64>,
    pub name: String,
    pub brand: Option<String>,
    pub category: String,
    pub unit_price: f64,
    pub promo_price: Option<f64>,
    pub stock: Option<i64>,
    pub min_stock: Option<i64>,
    pub barcode: Option<String>,
    pub source: String,
    pub source_url: String,
    pub content_hash: String,
    pub confidence_score: u8,
    pub match_strategy: Option<String>,
    pub match_confidence: Option<u8>,
    pub observed_at: DateTime<Utc>,
}

impl ProviderPriceRecord {
    pub fn from_external(
        product: &ExternalProduct,
        source: &str,
        matched: Option<&MatchResult>,
    ) -> Self {
        ProviderPriceRecord {
            sku: product.source_key.clone(),
            product_id: matched.map(|m| m.internal.id),
            name: product.name.clone(),
            brand: product.brand.clone(),
            category: product.category.clone(),
            unit_price: product.unit_price,
            promo_price: product.promo_price,
            stock: product.stock,
            min_stock: product.min_stock,
            barcode: product.barcode.clone(),
            source: source.to_string(),
            source_url: product.source_url.clone(),
            content_hash: product.content_hash.clone(),
            confidence_score: product.confidence_score,
            match_strategy: matched.map(|m| m.strategy.as_str().to_string()),
            match_confidence: matched.map(|m| m.confidence),
            observed_at: product.observed_at,
        }
    }
}

/// What the store already holds for a SKU, enough to decide insert vs update.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingPrice {
    pub sku: String,
    pub unit_price: f64,
    pub content_hash: String,
}

/// One historical provider price for an internal product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub product_id: i64,
    pub price: f64,
    pub observed_at: DateTime<Utc>,
}

/// Item that failed normal processing, kept for manual triage only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub sku: Option<String>,
    pub payload: serde_json::Value,
    pub error: String,
    pub retry_count: u32,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl DeadLetter {
    pub const PENDING: &'static str = "pending";

    pub fn pending(record: &ProviderPriceRecord, error: impl Into<String>) -> Self {
        DeadLetter {
            sku: Some(record.sku.clone()).filter(|s| !s.trim().is_empty()),
            payload: serde_json::to_value(record).unwrap_or(serde_json::Value::Null),
            error: error.into(),
            retry_count: 0,
            status: Self::PENDING.to_string(),
            created_at: Utc::now(),
        }
    }
}
