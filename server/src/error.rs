use thiserror::Error;

/// Recoverable failures surfaced to the transport layer.
///
/// Internal invariant violations (a card missing from a hand, an exhausted
/// deck) are not represented here: they indicate a broken invariant elsewhere
/// and panic instead of being silently tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// No session or player matched the supplied identifier. The transport
    /// should redirect the caller to a start-over flow.
    #[error("session or player not found")]
    NotFound,
    /// The action is not valid in the session's current state, e.g. playing
    /// a card while still in the lobby.
    #[error("action not valid in the session's current state")]
    InvalidState,
}
