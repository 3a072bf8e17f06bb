//! Call bounded context - requests, sessions, and the ledger port

pub mod ledger;
pub mod request;
pub mod session;

pub use ledger::SessionLedger;
pub use request::{CallRequest, RequestStatus};
pub use session::{CallSession, SessionCredentials, SessionStatus};
