//! Key-custody adapters.

pub mod remote;

pub use remote::RemoteSigner;
