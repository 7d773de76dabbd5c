use serde::Serialize;
use std::collections::HashMap;

use crate::domain::entities::price_comparison::{PriceComparison, Recommendation};
use crate::domain::entities::product::InternalProduct;
use crate::domain::entities::provider_price::ProviderPriceRecord;

/// Comparisons for matched provider prices, plus how many records were dropped
/// because they point at a product the catalog no longer has.
pub fn build_comparisons(
    records: &[ProviderPriceRecord],
    products: &[InternalProduct],
) -> (Vec<PriceComparison>, usize) {
    let by_id: HashMap<i64, &InternalProduct> = products.iter().map(|p| (p.id, p)).collect();
    let mut dropped = 0;

    let comparisons = records
        .iter()
        .filter_map(|record| {
            let product = record.product_id.and_then(|id| by_id.get(&id));
            match product {
                Some(product) => Some(PriceComparison::new(
                    product.id,
                    product.unit_price,
                    record.unit_price,
                    record.source.clone(),
                    record.match_confidence.unwrap_or(0) as f64,
                )),
                None => {
                    dropped += 1;
                    None
                }
            }
        })
        .collect();

    (comparisons, dropped)
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonSummary {
    pub total: usize,
    pub savings_opportunities: usize,
    /// Sum of positive per-unit differences
    pub potential_savings: f64,
    pub switch_provider: usize,
    pub negotiate: usize,
    pub keep_current: usize,
    pub average_confidence: f64,
}

impl ComparisonSummary {
    pub fn from_comparisons(comparisons: &[PriceComparison]) -> Self {
        let mut summary = ComparisonSummary {
            total: comparisons.len(),
            ..Default::default()
        };

        for c in comparisons {
            if c.is_savings_opportunity {
                summary.savings_opportunities += 1;
            }
            if c.absolute_diff > 0.0 {
                summary.potential_savings += c.absolute_diff;
            }
            match c.recommendation {
                Recommendation::SwitchProvider => summary.switch_provider += 1,
                Recommendation::Negotiate => summary.negotiate += 1,
                Recommendation::KeepCurrent => summary.keep_current += 1,
            }
        }

        if !comparisons.is_empty() {
            summary.average_confidence = comparisons.iter().map(|c| c.confidence as f64).sum::<f64>()
                / comparisons.len() as f64;
        }
        summary.potential_savings = (summary.potential_savings * 100.0).round() / 100.0;
        summary
    }
}
