//! Database Models
//!
//! Row shapes for the catalog tables and their conversion into domain entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::entities::provider_price::{ExistingPrice, PricePoint, ProviderPriceRecord};

/// Provider price row in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProviderPriceRow {
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
    pub confidence_score: i64,
    pub match_strategy: Option<String>,
    pub match_confidence: Option<i64>,
    pub observed_at: DateTime<Utc>,
}

fn to_score(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

impl From<ProviderPriceRow> for ProviderPriceRecord {
    fn from(row: ProviderPriceRow) -> Self {
        ProviderPriceRecord {
            sku: row.sku,
            product_id: row.product_id,
            name: row.name,
            brand: row.brand,
            category: row.category,
            unit_price: row.unit_price,
            promo_price: row.promo_price,
            stock: row.stock,
            min_stock: row.min_stock,
            barcode: row.barcode,
            source: row.source,
            source_url: row.source_url,
            content_hash: row.content_hash,
            confidence_score: to_score(row.confidence_score),
            match_strategy: row.match_strategy,
            match_confidence: row.match_confidence.map(to_score),
            observed_at: row.observed_at,
        }
    }
}

/// Just enough of a provider price row to choose insert vs update
#[derive(Debug, Clone, FromRow)]
pub struct ExistingPriceRow {
    pub sku: String,
    pub unit_price: f64,
    pub content_hash: String,
}

impl From<ExistingPriceRow> for ExistingPrice {
    fn from(row: ExistingPriceRow) -> Self {
        ExistingPrice {
            sku: row.sku,
            unit_price: row.unit_price,
            content_hash: row.content_hash,
        }
    }
}

/// Price history row in database
#[derive(Debug, Clone, FromRow)]
pub struct PriceHistoryRow {
    pub product_id: i64,
    pub price: f64,
    pub observed_at: DateTime<Utc>,
}

impl From<PriceHistoryRow> for PricePoint {
    fn from(row: PriceHistoryRow) -> Self {
        PricePoint {
            product_id: row.product_id,
            price: row.price,
            observed_at: row.observed_at,
        }
    }
}

/// Create internal product input
#[derive(Debug, Clone)]
pub struct CreateProduct {
    pub sku: String,
    pub barcode: Option<String>,
    pub name: String,
    pub brand: Option<String>,
    pub category: String,
    pub unit_price: f64,
    pub active: bool,
}
