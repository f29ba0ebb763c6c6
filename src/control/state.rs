//! Session lifecycle states.

/// Session negotiation state.
///
/// The handshake is symmetric: either side may initiate a reset. The two
/// `AwaitingResetComplete*` states record who asked for the reset currently
/// in progress, because the reply obligations differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Lower transport not ready; all inbound traffic is ignored.
    Disconnected,
    /// The remote sent `ResetRequest`; we answered with `ResetComplete` and
    /// are waiting for theirs.
    AwaitingResetCompleteRemoteInitiated,
    /// We sent `ResetRequest` and are waiting for the remote's
    /// `ResetComplete`.
    AwaitingResetCompleteLocalInitiated,
    /// Negotiation finished; objects may flow.
    SessionOpen,
}

impl SessionState {
    /// Whether objects may currently flow.
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::SessionOpen)
    }
}
