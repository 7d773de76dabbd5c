use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Increase,
    Decrease,
    NewProduct,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Increase => "increase",
            ChangeType::Decrease => "decrease",
            ChangeType::NewProduct => "new_product",
        }
    }
}

/// Alert severity, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Severity of an absolute percent change
    pub fn from_percent_change(percent: f64) -> Self {
        match percent.abs() {
            p if p >= 50.0 => Severity::Critical,
            p if p >= 25.0 => Severity::High,
            p if p >= 10.0 => Severity::Medium,
            _ => Severity::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An economically significant change worth surfacing to an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeAlert {
    pub product_id: i64,
    pub change_type: ChangeType,
    pub previous_value: Option<f64>,
    pub new_value: Option<f64>,
    pub percent_change: Option<f64>,
    pub severity: Severity,
    pub message: String,
    pub recommended_action: String,
    pub raised_at: DateTime<Utc>,
    pub processed: bool,
}

impl ChangeAlert {
    pub fn price_change(
        product_id: i64,
        previous: f64,
        new: f64,
        percent_change: f64,
        raised_at: DateTime<Utc>,
    ) -> Self {
        let change_type = if new >= previous {
            ChangeType::Increase
        } else {
            ChangeType::Decrease
        };
        let severity = Severity::from_percent_change(percent_change);
        let mut alert = ChangeAlert {
            product_id,
            change_type,
            previous_value: Some(previous),
            new_value: Some(new),
            percent_change: Some(percent_change),
            severity,
            message: format!(
                "Price {} {:.1}% ({:.2} -> {:.2})",
                if change_type == ChangeType::Increase { "rose" } else { "fell" },
                percent_change.abs(),
                previous,
                new
            ),
            recommended_action: String::new(),
            raised_at,
            processed: false,
        };
        alert.recommended_action = recommended_action(change_type, severity).to_string();
        alert
    }

    pub fn new_product(product_id: i64, raised_at: DateTime<Utc>) -> Self {
        ChangeAlert {
            product_id,
            change_type: ChangeType::NewProduct,
            previous_value: None,
            new_value: None,
            percent_change: None,
            severity: Severity::Low,
            message: "Product has no recorded provider price history".to_string(),
            recommended_action: recommended_action(ChangeType::NewProduct, Severity::Low)
                .to_string(),
            raised_at,
            processed: false,
        }
    }

    /// Identity of the underlying event, stable across detection runs.
    ///
    /// A price change is identified by the observation that triggered it. A
    /// missing price history is one open condition per product, however
    /// often it is re-detected.
    pub fn dedup_key(&self) -> String {
        match self.change_type {
            ChangeType::NewProduct => format!("{}:{}", self.product_id, self.change_type.as_str()),
            _ => format!(
                "{}:{}:{}",
                self.product_id,
                self.change_type.as_str(),
                self.raised_at.timestamp()
            ),
        }
    }

    /// Raise severity, refreshing the recommended action to match.
    pub fn escalate_to(&mut self, severity: Severity) {
        if severity > self.severity {
            self.severity = severity;
            self.recommended_action = recommended_action(self.change_type, severity).to_string();
        }
    }
}

fn recommended_action(change_type: ChangeType, severity: Severity) -> &'static str {
    match (change_type, severity) {
        (ChangeType::NewProduct, _) => "Review provider listing and confirm catalog mapping",
        (ChangeType::Increase, Severity::Critical | Severity::High) => {
            "Review pricing immediately and consider alternative providers"
        }
        (ChangeType::Increase, _) => "Monitor provider price trend",
        (ChangeType::Decrease, Severity::Critical | Severity::High) => {
            "Evaluate bulk purchase while the price is low"
        }
        (ChangeType::Decrease, _) => "Consider adjusting purchase timing",
    }
}
