//! Media transport adapters - credential minting and the loopback SDK

pub mod credentials;
pub mod loopback;

pub use credentials::HmacCredentialIssuer;
pub use loopback::LoopbackTransport;
