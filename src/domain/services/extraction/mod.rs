//! Extraction engine
//!
//! Turns raw catalog markup into validated [`ExternalProduct`] records by
//! running an ordered list of candidate strategies. A strategy that finds
//! enough candidates makes the weaker ones unnecessary.

pub mod strategies;

pub use strategies::{
    CandidateStrategy, GenericPatternStrategy, JsonLdStrategy, RawCandidate, StrategyOutput,
    StructuredCardStrategy,
};

use chrono::Utc;
use rand::Rng;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::domain::entities::product::{
    content_hash, ExternalProduct, ExtractionMeta, StrategyKind,
};
use crate::domain::services::text::{clean_text, normalize_name};

/// Once a strategy yields more candidates than this, later strategies are skipped
pub const GOOD_ENOUGH_CANDIDATES: usize = 10;
pub const MIN_NAME_LEN: usize = 3;
pub const MAX_PRICE: f64 = 100_000.0;

const SKU_NAME_PREFIX_LEN: usize = 20;

/// Result of extracting one page
#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub products: Vec<ExternalProduct>,
    /// Candidates that were found but rejected, plus unreadable fragments
    pub errors: Vec<String>,
    pub strategies_used: Vec<StrategyKind>,
    pub candidates_seen: usize,
}

impl ExtractionReport {
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

pub struct ExtractionEngine {
    strategies: Vec<Box<dyn CandidateStrategy>>,
    good_enough: usize,
}

impl Default for ExtractionEngine {
    fn default() -> Self {
        Self::new(vec![
            Box::new(StructuredCardStrategy::default()),
            Box::new(JsonLdStrategy::default()),
            Box::new(GenericPatternStrategy),
        ])
    }
}

impl ExtractionEngine {
    /// Strategies must be ordered strongest first.
    pub fn new(strategies: Vec<Box<dyn CandidateStrategy>>) -> Self {
        Self {
            strategies,
            good_enough: GOOD_ENOUGH_CANDIDATES,
        }
    }

    /// Extract products from one page. Never fails: malformed candidates are
    /// skipped and reported in [`ExtractionReport::errors`].
    pub fn extract(&self, markup: &str, category: &str, page_url: &str) -> ExtractionReport {
        let mut report = ExtractionReport::default();
        let mut seen = SeenProducts::default();

        for strategy in &self.strategies {
            let kind = strategy.kind();
            let output = strategy.find_candidates(markup);
            let found = output.candidates.len();

            report.strategies_used.push(kind);
            report.candidates_seen += found;
            report
                .errors
                .extend(output.errors.into_iter().map(|e| format!("{}: {}", kind, e)));

            for candidate in output.candidates {
                match build_product(candidate, kind, category, page_url) {
                    Ok(product) => {
                        // Stronger strategies run first, so the first sighting wins
                        if seen.admit(&product) {
                            report.products.push(product);
                        }
                    }
                    Err(e) => report.errors.push(format!("{}: {}", kind, e)),
                }
            }

            debug!(strategy = %kind, candidates = found, category = %category, "Strategy finished");
            if found > self.good_enough {
                break;
            }
        }

        if report.products.is_empty() {
            warn!(category = %category, errors = report.errors.len(), "No products extracted");
            report
                .errors
                .push(format!("no product candidates found for category '{}'", category));
        }
        report
    }
}

/// Listings already emitted for a page. Products with a real SKU are unique
/// per SKU; those without one are unique per normalized name.
#[derive(Default)]
struct SeenProducts {
    skus: HashSet<String>,
    names: HashSet<String>,
}

impl SeenProducts {
    fn admit(&mut self, product: &ExternalProduct) -> bool {
        let name = normalize_name(&product.name);
        let duplicate = if product.extraction_meta.sku_synthesized {
            self.names.contains(&name)
        } else {
            self.skus.contains(&product.source_key)
        };
        if duplicate {
            return false;
        }
        if !product.extraction_meta.sku_synthesized {
            self.skus.insert(product.source_key.clone());
        }
        self.names.insert(name);
        true
    }
}

/// Validate one candidate and turn it into a product
fn build_product(
    candidate: RawCandidate,
    strategy: StrategyKind,
    category: &str,
    page_url: &str,
) -> Result<ExternalProduct, String> {
    let name = clean_text(&candidate.name);
    if name.chars().count() < MIN_NAME_LEN {
        return Err(format!("name '{}' shorter than {} characters", name, MIN_NAME_LEN));
    }

    let price = parse_price(&candidate.price_text)
        .ok_or_else(|| format!("unparseable price '{}' for '{}'", candidate.price_text, name))?;
    if !(price > 0.0 && price < MAX_PRICE) {
        return Err(format!("price {} out of range for '{}'", price, name));
    }

    let promo_price = candidate
        .promo_price_text
        .as_deref()
        .and_then(parse_price)
        .filter(|p| *p > 0.0 && *p < price);

    let given_sku = candidate
        .sku
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let sku_synthesized = given_sku.is_none();
    let source_key = given_sku
        .clone()
        .or_else(|| synthesize_sku(category, &name))
        .unwrap_or_default();

    let barcode = candidate
        .barcode
        .map(|b| b.chars().filter(|c| c.is_ascii_digit()).collect::<String>())
        .filter(|b| !b.is_empty());

    let confidence_score = confidence_score(
        &name,
        Some(price),
        given_sku.is_some(),
        barcode.is_some(),
        candidate.stock.is_some(),
    );

    let source_url = candidate
        .url
        .as_deref()
        .and_then(|href| resolve_url(page_url, href))
        .unwrap_or_else(|| page_url.to_string());

    Ok(ExternalProduct {
        source_key,
        content_hash: content_hash(&name, price, candidate.stock),
        name,
        brand: candidate.brand.map(|b| clean_text(&b)).filter(|b| !b.is_empty()),
        category: category.to_string(),
        unit_price: price,
        promo_price,
        stock: candidate.stock,
        min_stock: None,
        barcode,
        source_url,
        observed_at: Utc::now(),
        confidence_score,
        extraction_meta: ExtractionMeta {
            strategy,
            sku_synthesized,
            raw_price: candidate.price_text,
        },
    })
}

fn resolve_url(page_url: &str, href: &str) -> Option<String> {
    match url::Url::parse(href) {
        Ok(absolute) => Some(absolute.to_string()),
        Err(_) => url::Url::parse(page_url)
            .ok()?
            .join(href)
            .ok()
            .map(|u| u.to_string()),
    }
}

/// Parse a price written with either `1.234,56` or `1,234.56` conventions.
///
/// The right-most separator is decimal when followed by one or two digits;
/// otherwise separators are treated as thousands grouping.
pub fn parse_price(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == ',');
    if cleaned.is_empty() {
        return None;
    }

    let normalized = match cleaned.rfind(|c| c == '.' || c == ',') {
        Some(pos) => {
            let decimals = cleaned.len() - pos - 1;
            let (int_part, frac_part) = cleaned.split_at(pos);
            let int_digits: String = int_part.chars().filter(|c| c.is_ascii_digit()).collect();
            if decimals <= 2 {
                format!("{}.{}", int_digits, &frac_part[1..])
            } else {
                format!("{}{}", int_digits, &frac_part[1..])
            }
        }
        None => cleaned.to_string(),
    };

    normalized.parse::<f64>().ok().filter(|p| p.is_finite())
}

/// Build a SKU for a listing that carried none: category prefix, truncated
/// normalized name and a random suffix. `None` when the name has nothing
/// usable left after normalization.
pub fn synthesize_sku(category: &str, name: &str) -> Option<String> {
    let slug: String = normalize_name(name)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .take(SKU_NAME_PREFIX_LEN)
        .collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        return None;
    }

    let prefix: String = normalize_name(category)
        .chars()
        .filter(|c| c.is_alphanumeric())
        .take(3)
        .collect::<String>()
        .to_uppercase();
    let prefix = if prefix.is_empty() { "GEN".to_string() } else { prefix };

    let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    Some(format!("{}-{}-{:06x}", prefix, slug, suffix))
}

/// Heuristic extraction quality in [0, 100]
pub fn confidence_score(
    name: &str,
    price: Option<f64>,
    has_sku: bool,
    has_barcode: bool,
    has_stock: bool,
) -> u8 {
    let name_len = name.chars().count();
    let mut score: i32 = 50;

    if name_len > 5 {
        score += 10;
    }
    if let Some(price) = price {
        if price > 0.0 {
            score += 15;
        }
        if !(1.0..=MAX_PRICE).contains(&price) {
            score -= 20;
        }
    }
    if has_sku {
        score += 10;
    }
    if has_barcode {
        score += 5;
    }
    if has_stock {
        score += 5;
    }
    if name_len > 200 {
        score -= 10;
    }

    score.clamp(0, 100) as u8
}
