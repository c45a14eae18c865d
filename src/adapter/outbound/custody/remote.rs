//! Signer backed by an external custody service.
//!
//! `POST {url}/sign` with the unsigned transaction as JSON; the service
//! answers `{ "raw": "0x...", "hash": "0x..." }`. Key material never enters
//! this process.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::domain::id::TxHash;
use crate::error::{Error, Result, TransactionError};
use crate::port::outbound::signer::{SignedTransaction, TransactionSigner, UnsignedTransaction};

#[derive(Deserialize)]
struct SignResponse {
    raw: String,
    hash: String,
}

/// HTTP client for the custody service.
#[derive(Debug)]
pub struct RemoteSigner {
    client: Client,
    endpoint: String,
    address: String,
}

impl RemoteSigner {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: &str, address: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/sign", url.trim_end_matches('/')),
            address: address.into(),
        })
    }
}

#[async_trait]
impl TransactionSigner for RemoteSigner {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction> {
        debug!(nonce = tx.nonce, to = %tx.to, "Requesting signature");
        let response = self
            .client
            .post(&self.endpoint)
            .json(tx)
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransactionError::Signing(format!("{status}: {body}")).into());
        }
        let body: SignResponse = response.error_for_status()?.json().await?;
        if !body.raw.starts_with("0x") {
            return Err(Error::Parse(format!("signed transaction is not hex: {}", body.raw)));
        }

        Ok(SignedTransaction {
            raw: body.raw,
            hash: TxHash::new(body.hash),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_strips_trailing_slash() {
        let signer = RemoteSigner::new("http://custody:8080/", "0xabc", Duration::from_secs(1)).unwrap();
        assert_eq!(signer.endpoint, "http://custody:8080/sign");
        assert_eq!(signer.address(), "0xabc");
    }
}
