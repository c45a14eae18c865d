//! Infrastructure configuration modules.

pub mod chain;
pub mod logging;
pub mod queue;
pub mod reconnection;
pub mod settings;
pub mod store;

pub use settings::Config;
