//! Notification adapters.
//!
//! Implements the `port::Notifier` trait for in-process subscribers. The
//! tracing-backed `LogNotifier` lives next to the port.

pub mod channel;

pub use channel::ChannelNotifier;

#[cfg(test)]
mod tests;
