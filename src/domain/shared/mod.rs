//! Shared kernel - value objects and errors used by all contexts

pub mod error;
pub mod result;
pub mod value_objects;
