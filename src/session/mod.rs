//! Session state: tokens, recovery from auth failures, form snapshots and
//! pre-flight session checks.

pub mod guard;
pub mod recovery;
pub mod scope;
pub mod snapshot;
pub mod token_store;

pub use recovery::{RecoveryOptions, SessionRecovery};
pub use scope::{MemoryScope, Scope, SessionDatabase};
pub use snapshot::FormSnapshots;
pub use token_store::TokenStore;
