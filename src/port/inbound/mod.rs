//! Inbound (driving) ports consumed by inbound adapters.
//!
//! - [`market`]: Quotes, trade and settlement submission, job tracking and
//!   chain health

pub mod market;
