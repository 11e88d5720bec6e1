//! Registry error types

use crate::session::SessionId;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Registry was cascade-closed; no new sessions are accepted
    #[error("registry closed")]
    Closed,
    /// A member with this ID already exists
    #[error("session {0} already registered")]
    DuplicateSession(SessionId),
}
