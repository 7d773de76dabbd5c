pub mod change_detection;
pub mod circuit_breaker;
pub mod extraction;
pub mod matching;
pub mod price_comparison;
pub mod rate_limiter;
pub mod response_cache;
pub mod text;
