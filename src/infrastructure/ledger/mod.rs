//! Session ledger adapters

pub mod memory;

pub use memory::InMemorySessionLedger;
