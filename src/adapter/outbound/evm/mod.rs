//! EVM ledger adapters: JSON-RPC polling, websocket streaming and
//! transaction submission for the market contract.

pub mod abi;
pub mod gateway;
pub mod rpc;
pub mod source;
pub mod stream;

pub use gateway::EvmGateway;
pub use rpc::JsonRpcClient;
pub use source::EvmLogSource;
pub use stream::WsEventStream;
