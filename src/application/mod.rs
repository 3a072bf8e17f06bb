//! Application layer - use-case services
//!
//! This layer orchestrates domain objects and collaborator ports:
//! - call signaling between the two parties
//! - media session control for one client connection
//! - no-show detection with compensating refunds
//! - background settlement with bounded retries

pub mod media;
pub mod no_show;
pub mod settlement;
pub mod signaling;
