use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What to do about a provider price relative to the current catalog price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    /// Provider is cheaper by at least 15%
    SwitchProvider,
    /// Provider is cheaper by at least 5%
    Negotiate,
    KeepCurrent,
}

impl Recommendation {
    pub fn from_percent_diff(percent_diff: f64) -> Self {
        match percent_diff {
            p if p >= 15.0 => Recommendation::SwitchProvider,
            p if p >= 5.0 => Recommendation::Negotiate,
            _ => Recommendation::KeepCurrent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::SwitchProvider => "switch_provider",
            Recommendation::Negotiate => "negotiate",
            Recommendation::KeepCurrent => "keep_current",
        }
    }
}

/// Current catalog price against the provider's observed price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceComparison {
    pub product_id: i64,
    pub current_price: f64,
    pub provider_price: f64,
    /// current - provider
    pub absolute_diff: f64,
    /// absolute_diff / current * 100
    pub percent_diff: f64,
    pub source: String,
    pub compared_at: DateTime<Utc>,
    pub is_savings_opportunity: bool,
    pub recommendation: Recommendation,
    /// [0, 100]
    pub confidence: u8,
}

impl PriceComparison {
    pub fn new(
        product_id: i64,
        current_price: f64,
        provider_price: f64,
        source: impl Into<String>,
        confidence: f64,
    ) -> Self {
        let absolute_diff = current_price - provider_price;
        let percent_diff = if current_price > 0.0 {
            absolute_diff / current_price * 100.0
        } else {
            0.0
        };
        let recommendation = Recommendation::from_percent_diff(percent_diff);

        PriceComparison {
            product_id,
            current_price,
            provider_price,
            absolute_diff,
            percent_diff,
            source: source.into(),
            compared_at: Utc::now(),
            is_savings_opportunity: percent_diff >= 5.0,
            recommendation,
            confidence: confidence.round().clamp(0.0, 100.0) as u8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cheaper_provider_is_savings_opportunity() {
        let c = PriceComparison::new(1, 10.0, 8.0, "catalog", 95.0);
        assert!((c.absolute_diff - 2.0).abs() < 1e-9);
        assert!((c.percent_diff - 20.0).abs() < 1e-9);
        assert!(c.is_savings_opportunity);
        assert_eq!(c.recommendation, Recommendation::SwitchProvider);
    }

    #[test]
    fn test_more_expensive_provider_keeps_current() {
        let c = PriceComparison::new(1, 10.0, 11.0, "catalog", 90.0);
        assert!(c.percent_diff < 0.0);
        assert!(!c.is_savings_opportunity);
        assert_eq!(c.recommendation, Recommendation::KeepCurrent);
    }

    #[test]
    fn test_zero_current_price_does_not_divide() {
        let c = PriceComparison::new(1, 0.0, 5.0, "catalog", 50.0);
        assert_eq!(c.percent_diff, 0.0);
    }

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(PriceComparison::new(1, 10.0, 9.0, "s", 140.0).confidence, 100);
        assert_eq!(PriceComparison::new(1, 10.0, 9.0, "s", -3.0).confidence, 0);
    }
}
