use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Which extraction strategy produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Product cards annotated with data attributes / itemprops
    Structured,
    /// Embedded JSON-LD `Product` documents
    Alternate,
    /// Free-text name/price proximity scan
    Generic,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Structured => write!(f, "structured"),
            StrategyKind::Alternate => write!(f, "alternate"),
            StrategyKind::Generic => write!(f, "generic"),
        }
    }
}

/// Provenance of an extracted record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionMeta {
    pub strategy: StrategyKind,
    /// True when the SKU was not present in the markup and had to be generated
    pub sku_synthesized: bool,
    /// Raw price text as found in the markup
    pub raw_price: String,
}

/// A product listing observed on the external catalog source.
///
/// Built once by the extraction engine and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalProduct {
    pub source_key: String,
    pub name: String,
    pub brand: Option<String>,
    pub category: String,
    pub unit_price: f64,
    pub promo_price: Option<f64>,
    pub stock: Option<i64>,
    pub min_stock: Option<i64>,
    pub barcode: Option<String>,
    pub source_url: String,
    pub observed_at: DateTime<Utc>,
    pub content_hash: String,
    /// Heuristic extraction quality [0, 100]
    pub confidence_score: u8,
    pub extraction_meta: ExtractionMeta,
}

impl ExternalProduct {
    /// The key used for persistence. Empty when no SKU could be resolved.
    pub fn sku(&self) -> &str {
        &self.source_key
    }

    pub fn has_resolvable_sku(&self) -> bool {
        !self.source_key.trim().is_empty()
    }
}

/// Hash over the fields whose change is economically meaningful.
pub fn content_hash(name: &str, price: f64, stock: Option<i64>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b"|");
    hasher.update(format!("{:.2}", price).as_bytes());
    hasher.update(b"|");
    if let Some(stock) = stock {
        hasher.update(stock.to_string().as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// A record held by the internal catalog. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct InternalProduct {
    pub id: i64,
    pub sku: String,
    pub barcode: Option<String>,
    pub name: String,
    pub brand: Option<String>,
    pub category: String,
    pub unit_price: f64,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        let a = content_hash("Coca Cola 500ml", 4.99, Some(10));
        let b = content_hash("Coca Cola 500ml", 4.99, Some(10));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_content_hash_changes_with_price_and_stock() {
        let base = content_hash("Coca Cola 500ml", 4.99, Some(10));
        assert_ne!(base, content_hash("Coca Cola 500ml", 5.49, Some(10)));
        assert_ne!(base, content_hash("Coca Cola 500ml", 4.99, Some(3)));
        assert_ne!(base, content_hash("Coca Cola 500ml", 4.99, None));
    }
}
