pub mod change_alert;
pub mod match_result;
pub mod price_comparison;
pub mod product;
pub mod provider_price;
