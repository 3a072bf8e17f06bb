//! PostgreSQL persistence adapters

pub mod appointment_repository;
pub mod call_ledger;
pub mod database;

pub use appointment_repository::PgAppointmentRepository;
pub use call_ledger::PgSessionLedger;
pub use database::{create_pool, run_migrations, DatabaseConfig};
