//! Infrastructure layer - adapters for the domain ports

pub mod appointments;
pub mod ledger;
pub mod payments;
#[cfg(feature = "postgres")]
pub mod persistence;
pub mod transport;
