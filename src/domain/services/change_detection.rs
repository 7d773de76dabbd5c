//! Price change detection and alert prioritization

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::config::AlertConfig;
use crate::domain::entities::change_alert::{ChangeAlert, Severity};
use crate::domain::entities::product::InternalProduct;
use crate::domain::entities::provider_price::PricePoint;

const VOLATILE_CATEGORY_KEYWORDS: &[&str] = &[
    "beverage", "drink", "alcohol", "beer", "wine", "spirit", "bebida",
];
const STAPLE_CATEGORY_KEYWORDS: &[&str] = &["household", "cleaning", "limpeza"];

const SECONDS_PER_HOUR: i64 = 3600;

/// Percent change needed to alert for a category, clamped to the configured bounds
pub fn adaptive_threshold(category: Option<&str>, config: &AlertConfig) -> f64 {
    let category = category.unwrap_or_default().to_lowercase();
    let mut threshold = config.threshold;

    if VOLATILE_CATEGORY_KEYWORDS.iter().any(|k| category.contains(k)) {
        threshold *= config.volatile_category_factor;
    } else if STAPLE_CATEGORY_KEYWORDS.iter().any(|k| category.contains(k)) {
        threshold *= config.staple_category_factor;
    }

    threshold.clamp(config.min_threshold, config.max_threshold)
}

pub fn percent_change(old: f64, new: f64) -> Option<f64> {
    if old <= 0.0 {
        None
    } else {
        Some((new - old) / old * 100.0)
    }
}

/// Detect price changes worth alerting on.
pub fn detect(
    history: &[PricePoint],
    active_products: &[InternalProduct],
    config: &AlertConfig,
) -> Vec<ChangeAlert> {
    detect_at(history, active_products, config, Utc::now())
}

/// [`detect`] against an explicit clock, used for the 24h volatility window
pub fn detect_at(
    history: &[PricePoint],
    active_products: &[InternalProduct],
    config: &AlertConfig,
    now: DateTime<Utc>,
) -> Vec<ChangeAlert> {
    let categories: HashMap<i64, &str> = active_products
        .iter()
        .map(|p| (p.id, p.category.as_str()))
        .collect();

    let mut by_product: BTreeMap<i64, Vec<&PricePoint>> = BTreeMap::new();
    for point in history {
        by_product.entry(point.product_id).or_default().push(point);
    }
    for points in by_product.values_mut() {
        points.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));
    }

    let mut alerts = Vec::new();
    for (&product_id, points) in &by_product {
        let threshold = adaptive_threshold(categories.get(&product_id).copied(), config);

        for pair in points.windows(2).take(config.max_pairs_per_product) {
            let (newer, older) = (pair[0], pair[1]);
            let Some(pct) = percent_change(older.price, newer.price) else {
                continue;
            };
            if pct.abs() >= threshold {
                alerts.push(ChangeAlert::price_change(
                    product_id,
                    older.price,
                    newer.price,
                    pct,
                    newer.observed_at,
                ));
            }
        }
    }

    for product in active_products {
        if !by_product.contains_key(&product.id) {
            alerts.push(ChangeAlert::new_product(product.id, now));
        }
    }

    let raw = alerts.len();
    let mut alerts = cluster(alerts);

    let window_start = now - Duration::hours(24);
    for alert in &mut alerts {
        let recent_changes = by_product
            .get(&alert.product_id)
            .map(|points| changes_since(points, window_start))
            .unwrap_or(0);
        escalate(alert, recent_changes, config);
    }

    alerts.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then(a.product_id.cmp(&b.product_id))
            .then(b.raised_at.cmp(&a.raised_at))
    });

    debug!(raw, kept = alerts.len(), "Change detection finished");
    alerts
}

/// Keep only the most severe alert per product and hour. On equal severity
/// the most recent alert wins.
pub fn cluster(alerts: Vec<ChangeAlert>) -> Vec<ChangeAlert> {
    let mut clusters: HashMap<(i64, i64), ChangeAlert> = HashMap::new();

    for alert in alerts {
        let bucket = alert.raised_at.timestamp().div_euclid(SECONDS_PER_HOUR);
        let key = (alert.product_id, bucket);
        match clusters.get(&key) {
            Some(kept)
                if kept.severity > alert.severity
                    || (kept.severity == alert.severity && kept.raised_at >= alert.raised_at) => {}
            _ => {
                clusters.insert(key, alert);
            }
        }
    }

    clusters.into_values().collect()
}

/// Consecutive price points that differ, with the newer one inside the window
fn changes_since(points_desc: &[&PricePoint], window_start: DateTime<Utc>) -> usize {
    points_desc
        .windows(2)
        .filter(|pair| pair[0].observed_at >= window_start && pair[0].price != pair[1].price)
        .count()
}

fn escalate(alert: &mut ChangeAlert, recent_changes: usize, config: &AlertConfig) {
    if let (Some(new_value), Some(pct)) = (alert.new_value, alert.percent_change) {
        if new_value > config.high_value_price && pct.abs() > config.high_value_min_change {
            match alert.severity {
                Severity::Medium => alert.escalate_to(Severity::High),
                Severity::Low => alert.escalate_to(Severity::Medium),
                _ => {}
            }
        }
    }

    if recent_changes > config.volatility_change_count && alert.severity == Severity::Low {
        alert.escalate_to(Severity::Medium);
    }
}
