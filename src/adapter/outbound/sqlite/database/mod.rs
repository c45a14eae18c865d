//! Diesel plumbing for the row store: pooling and migrations, the `rows`
//! table schema and its record type.

pub mod connection;
pub mod model;
pub mod schema;
