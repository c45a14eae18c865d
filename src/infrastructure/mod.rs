//! Infrastructure layer.
//!
//! Provides technical concerns that support the application without containing
//! business logic: configuration, wiring and process lifetime.
//!
//! # Submodules
//!
//! - [`bootstrap`] - Settings and adapter construction from configuration
//! - [`config`] - Configuration loading and validation
//! - [`health`] - Start-up health reporting
//! - `runtime` - Composition root and shutdown handling (requires `evm`)

pub mod bootstrap;
pub mod config;
pub mod health;
#[cfg(feature = "evm")]
pub mod runtime;
