//! EVM adapters wired through the ledger ports, without a node.

#![cfg(feature = "evm")]

use std::sync::Arc;
use std::time::Duration;

use marketsync::adapter::outbound::evm::{EvmGateway, EvmLogSource, JsonRpcClient, WsEventStream};
use marketsync::domain::{ChainId, ContractCall, MarketId};
use marketsync::port::outbound::ledger::{EventSource, TransactionGateway};

const CONTRACT: &str = "0x00000000000000000000000000000000000000cc";
const MARKET: &str = "0x00000000000000000000000000000000000000000000000000000000000000aa";

fn rpc() -> Arc<JsonRpcClient> {
    Arc::new(JsonRpcClient::new("http://127.0.0.1:8545", None, Duration::from_secs(1)).unwrap())
}

#[test]
fn poll_and_stream_sources_share_one_port() {
    let chain_id = ChainId::new(31337);
    let sources: Vec<Arc<dyn EventSource>> = vec![
        Arc::new(EvmLogSource::new(rpc(), chain_id, CONTRACT)),
        Arc::new(WsEventStream::new("ws://127.0.0.1:8546", chain_id, CONTRACT, 64)),
    ];

    let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
    assert_eq!(names, vec!["poll", "stream"]);

    assert!(sources[0].stream_health().is_none());
    let health = sources[1].stream_health().unwrap();
    assert!(!health.connected);
    assert!(!health.is_fresh(Duration::from_secs(60)));
}

#[tokio::test]
async fn unconnected_stream_refuses_to_serve() {
    let stream: Arc<dyn EventSource> =
        Arc::new(WsEventStream::new("ws://127.0.0.1:8546", ChainId::new(1), CONTRACT, 64));
    assert!(stream.head().await.is_err());
}

#[test]
fn gateway_encodes_calls_for_the_contract() {
    let gateway: Arc<dyn TransactionGateway> = Arc::new(EvmGateway::new(rpc(), CONTRACT, 250_000));
    let call = gateway
        .encode_call(&MarketId::new(MARKET), &ContractCall::Settle { outcome: 1 })
        .unwrap();

    assert_eq!(call.to, CONTRACT);
    assert_eq!(call.gas_limit, 250_000);
    assert!(call.data.starts_with("0x"));
    assert!(gateway
        .encode_call(&MarketId::new("not-hex"), &ContractCall::Settle { outcome: 0 })
        .is_err());
}
