//! SQLite persistence adapter.
//!
//! Provides a SQLite-backed [`RowStore`](crate::port::outbound::store::RowStore)
//! using Diesel ORM.

pub mod database;
pub mod store;

pub use store::SqliteRowStore;
