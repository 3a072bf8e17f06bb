//! Sageline - call orchestration for a wellness expert marketplace
//!
//! This is a Domain-Driven Design (DDD) implementation of the real-time
//! call/session subsystem: call signaling between users and experts,
//! presence tracking, media session control, and no-show detection with
//! automatic refunds.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;
