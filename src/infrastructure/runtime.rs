//! Long-running application wiring.
//!
//! [`App::build`] connects every adapter named by the configuration;
//! [`App::run`] spawns the event stream and the queue dispatcher and drives
//! the indexer on the calling task until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use super::bootstrap::{
    build_notifier_registry, build_store, indexer_settings, queue_settings, state_settings,
};
use crate::adapter::outbound::custody::RemoteSigner;
use crate::adapter::outbound::evm::{EvmGateway, EvmLogSource, JsonRpcClient, WsEventStream};
use crate::adapter::outbound::notifier::ChannelNotifier;
use crate::application::indexer::ChainIndexer;
use crate::application::orchestrator::MarketOrchestrator;
use crate::application::queue::ContractCallQueue;
use crate::application::state::MarketStateStore;
use crate::domain::backoff::Backoff;
use crate::error::{ConfigError, Result};
use crate::infrastructure::config::settings::Config;
use crate::port::outbound::ledger::EventSource;

/// Every long-running service for one chain, constructed but not started.
pub struct App {
    indexer: ChainIndexer,
    queue: ContractCallQueue,
    stream: Option<Arc<WsEventStream>>,
    reconnect: Backoff,
    orchestrator: Arc<MarketOrchestrator>,
    events: ChannelNotifier,
}

impl App {
    /// Build from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no signer is configured or an adapter cannot be
    /// constructed.
    #[allow(clippy::result_large_err)]
    pub fn build(config: &Config) -> Result<Self> {
        let chain = &config.chain;
        let chain_id = chain.chain_id();
        let signer_url = config
            .signer
            .url
            .as_deref()
            .ok_or(ConfigError::MissingField { field: "signer.url" })?;
        let signer_address = config
            .signer
            .address
            .clone()
            .ok_or(ConfigError::MissingField {
                field: "signer.address",
            })?;

        let store = build_store(config)?;
        let events = ChannelNotifier::default();
        let notifiers = Arc::new(build_notifier_registry(&events));

        let rpc = Arc::new(JsonRpcClient::new(
            chain.rpc_url.clone(),
            chain.api_token.clone(),
            Duration::from_millis(chain.rpc_timeout_ms),
        )?);
        let poll: Arc<dyn EventSource> = Arc::new(EvmLogSource::new(
            Arc::clone(&rpc),
            chain_id,
            chain.contract_address.clone(),
        ));
        let stream = chain.stream_url.as_ref().map(|url| {
            Arc::new(WsEventStream::new(
                url.clone(),
                chain_id,
                chain.contract_address.clone(),
                chain.retention_blocks(),
            ))
        });
        let gateway = Arc::new(EvmGateway::new(
            rpc,
            chain.contract_address.clone(),
            chain.gas_limit,
        ));
        let signer = Arc::new(RemoteSigner::new(
            signer_url,
            signer_address,
            Duration::from_millis(config.signer.timeout_ms),
        )?);

        let state = Arc::new(MarketStateStore::new(
            Arc::clone(&store),
            Arc::clone(&notifiers),
            state_settings(config),
        ));
        let indexer = ChainIndexer::new(
            indexer_settings(config),
            Arc::clone(&state),
            poll,
            stream.clone().map(|s| s as Arc<dyn EventSource>),
            Arc::clone(&notifiers),
        );
        let queue = ContractCallQueue::new(queue_settings(config), gateway, signer, store, notifiers);
        let orchestrator = Arc::new(MarketOrchestrator::new(
            state,
            queue.clone(),
            vec![indexer.status_handle()],
        ));

        info!(
            %chain_id,
            contract = %chain.contract_address,
            streaming = stream.is_some(),
            "Application built"
        );
        Ok(Self {
            indexer,
            queue,
            stream,
            reconnect: config.reconnection.backoff(),
            orchestrator,
            events,
        })
    }

    /// Inbound facade; stays valid while the app runs.
    #[must_use]
    pub fn orchestrator(&self) -> Arc<MarketOrchestrator> {
        Arc::clone(&self.orchestrator)
    }

    /// In-process event channels.
    #[must_use]
    pub fn events(&self) -> &ChannelNotifier {
        &self.events
    }

    /// Run until `shutdown` is set or the indexer halts.
    ///
    /// # Errors
    ///
    /// Returns the indexer's fatal error, or a store error from job recovery.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let requeued = self.queue.recover().await?;
        info!(requeued, "Starting services");

        let stream_task = self
            .stream
            .as_ref()
            .map(|stream| stream.spawn(self.reconnect.clone(), shutdown.clone()));
        let queue_task = tokio::spawn(self.queue.clone().run(shutdown.clone()));

        let result = self.indexer.run(shutdown).await;
        if let Err(e) = &result {
            error!(error = %e, "Indexer stopped, shutting down");
            queue_task.abort();
            if let Some(task) = &stream_task {
                task.abort();
            }
        }

        let _ = queue_task.await;
        if let Some(task) = stream_task {
            let _ = task.await;
        }
        result
    }
}

/// Build and run until Ctrl+C.
///
/// # Errors
///
/// See [`App::build`] and [`App::run`].
pub async fn run_until_ctrl_c(config: &Config) -> Result<()> {
    let app = App::build(config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut app_handle = tokio::spawn(app.run(shutdown_rx));

    tokio::select! {
        result = &mut app_handle => {
            return result.map_err(|e| crate::error::Error::Connection(e.to_string()))?;
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received (Ctrl+C)");
            let _ = shutdown_tx.send(true);
        }
    }

    app_handle
        .await
        .map_err(|e| crate::error::Error::Connection(e.to_string()))?
}
