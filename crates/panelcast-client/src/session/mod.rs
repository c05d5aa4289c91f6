//! Panel session state machine.
//!
//! Each endpoint keeps one [`SessionTable`] holding at most one live
//! negotiation per `remote:panel` key. Opening a key that is already live
//! silently replaces the old session. Remote candidates that arrive before
//! a session can use them are buffered per key and replayed on creation.

mod table;
mod types;

#[cfg(test)]
mod tests;

pub use table::{CandidateRoute, Session, SessionTable};
pub use types::{CloseReason, NegotiationRole, SessionInfo, SessionKey, SessionState};
