use std::collections::HashMap;

use crate::domain::entities::match_result::{MatchResult, MatchStrategy};
use crate::domain::entities::product::{ExternalProduct, InternalProduct};
use crate::domain::services::text::{normalize_name, normalized_similarity};

pub const SKU_EXACT_CONFIDENCE: u8 = 95;
pub const BARCODE_EXACT_CONFIDENCE: u8 = 90;
/// Fuzzy matches must score strictly above this
pub const FUZZY_ACCEPT_SCORE: u8 = 40;
/// Matches at or below this are discarded
pub const MIN_MATCH_CONFIDENCE: u8 = 20;
pub const FUZZY_SCAN_LIMIT: usize = 100;

const BARCODE_BOOST: u8 = 10;
const BRAND_BOOST: u8 = 15;
const PRICE_BOOST: u8 = 10;
const PRICE_PROXIMITY: f64 = 0.10;

/// Lookup tables over the internal catalog, built once per run
#[derive(Debug, Default)]
pub struct CatalogIndex {
    products: Vec<InternalProduct>,
    normalized_names: Vec<String>,
    by_sku: HashMap<String, usize>,
    by_barcode: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
}

impl CatalogIndex {
    pub fn new(products: Vec<InternalProduct>) -> Self {
        let mut index = CatalogIndex {
            normalized_names: products.iter().map(|p| normalize_name(&p.name)).collect(),
            ..Default::default()
        };

        for (i, product) in products.iter().enumerate() {
            let sku = product.sku.trim();
            if !sku.is_empty() {
                index.by_sku.entry(sku.to_string()).or_insert(i);
            }
            if let Some(barcode) = product.barcode.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
                index.by_barcode.entry(barcode.to_string()).or_insert(i);
            }
            if !index.normalized_names[i].is_empty() {
                index.by_name.entry(index.normalized_names[i].clone()).or_insert(i);
            }
        }
        index.products = products;
        index
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn contains_id(&self, id: i64) -> bool {
        self.products.iter().any(|p| p.id == id)
    }

    pub fn products(&self) -> &[InternalProduct] {
        &self.products
    }
}

/// Reconcile one external listing against the internal catalog.
///
/// Strategies are tried in priority order and the first hit wins, so an
/// exact SKU match always beats a name or fuzzy candidate.
pub fn match_product(external: &ExternalProduct, index: &CatalogIndex) -> Option<MatchResult> {
    let (position, strategy, base) = find_candidate(external, index)?;
    if base <= MIN_MATCH_CONFIDENCE {
        return None;
    }

    let internal = &index.products[position];
    let confidence = boost_confidence(base, external, internal);

    Some(MatchResult {
        external: external.clone(),
        internal: internal.clone(),
        strategy,
        confidence,
    })
}

fn find_candidate(
    external: &ExternalProduct,
    index: &CatalogIndex,
) -> Option<(usize, MatchStrategy, u8)> {
    let sku = external.sku().trim();
    if !sku.is_empty() {
        if let Some(&i) = index.by_sku.get(sku) {
            return Some((i, MatchStrategy::SkuExact, SKU_EXACT_CONFIDENCE));
        }
    }

    if let Some(barcode) = external.barcode.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
        if let Some(&i) = index.by_barcode.get(barcode) {
            return Some((i, MatchStrategy::BarcodeExact, BARCODE_EXACT_CONFIDENCE));
        }
    }

    let name = normalize_name(&external.name);
    if name.is_empty() {
        return None;
    }
    if let Some(&i) = index.by_name.get(&name) {
        let score = normalized_similarity(&name, &index.normalized_names[i]);
        return Some((i, MatchStrategy::NameSimilarity, score));
    }

    index
        .normalized_names
        .iter()
        .take(FUZZY_SCAN_LIMIT)
        .enumerate()
        .map(|(i, candidate)| (i, normalized_similarity(&name, candidate)))
        .filter(|(_, score)| *score > FUZZY_ACCEPT_SCORE)
        // first best wins on ties
        .fold(None, |best: Option<(usize, u8)>, (i, score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((i, score)),
        })
        .map(|(i, score)| (i, MatchStrategy::FuzzyMatching, score))
}

fn boost_confidence(base: u8, external: &ExternalProduct, internal: &InternalProduct) -> u8 {
    let mut confidence = base as u32;

    let has_barcode = |b: &Option<String>| b.as_deref().is_some_and(|b| !b.trim().is_empty());
    if has_barcode(&external.barcode) && has_barcode(&internal.barcode) {
        confidence += BARCODE_BOOST as u32;
    }

    if let (Some(a), Some(b)) = (external.brand.as_deref(), internal.brand.as_deref()) {
        let (a, b) = (normalize_name(a), normalize_name(b));
        if !a.is_empty() && a == b {
            confidence += BRAND_BOOST as u32;
        }
    }

    if internal.unit_price > 0.0
        && ((external.unit_price - internal.unit_price).abs() / internal.unit_price) < PRICE_PROXIMITY
    {
        confidence += PRICE_BOOST as u32;
    }

    confidence.min(100) as u8
}
