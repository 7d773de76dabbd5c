use serde::{Deserialize, Serialize};

use super::product::{ExternalProduct, InternalProduct};

/// How an external record was tied to an internal product, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    SkuExact,
    BarcodeExact,
    NameSimilarity,
    FuzzyMatching,
}

impl MatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::SkuExact => "sku_exact",
            MatchStrategy::BarcodeExact => "barcode_exact",
            MatchStrategy::NameSimilarity => "name_similarity",
            MatchStrategy::FuzzyMatching => "fuzzy_matching",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sku_exact" => Some(MatchStrategy::SkuExact),
            "barcode_exact" => Some(MatchStrategy::BarcodeExact),
            "name_similarity" => Some(MatchStrategy::NameSimilarity),
            "fuzzy_matching" => Some(MatchStrategy::FuzzyMatching),
            _ => None,
        }
    }
}

impl std::fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one reconciliation attempt. Consumed once, never persisted.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub external: ExternalProduct,
    pub internal: InternalProduct,
    pub strategy: MatchStrategy,
    /// [0, 100]
    pub confidence: u8,
}
