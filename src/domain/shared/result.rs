//! Shared result alias

pub use crate::domain::shared::error::Result;
