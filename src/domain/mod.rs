//! Domain layer - entities, value objects, and ports

pub mod appointment;
pub mod call;
pub mod identity;
pub mod notification;
pub mod payment;
pub mod presence;
pub mod shared;
pub mod transport;
