//! Pricewatch Library
//!
//! Ingests product listings from an external catalog source, reconciles them
//! against the internal catalog and raises price-change alerts.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod rate_limit;
