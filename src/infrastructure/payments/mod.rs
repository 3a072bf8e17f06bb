//! Payment collaborator adapters

pub mod memory;
pub mod rpc;

pub use memory::{InMemoryPaymentGateway, WalletOp};
pub use rpc::RpcPaymentGateway;
