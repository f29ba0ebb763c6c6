//! The session state machine.
//!
//! Drives the three-way reset handshake and version/chunk-size negotiation.
//! Inbound dictionaries arrive as [`InboundMessage`] values; each call
//! returns the list of [`ControlEffect`]s the caller must apply, in order.
//! The machine itself never touches the lower transport, the send queues, or
//! the event listeners, which keeps every transition table entry directly
//! testable.

use bytes::Bytes;

use crate::protocol::{Capabilities, InboundMessage, SessionParams, UnsupportedReason};

use super::state::SessionState;

/// An action the caller must perform after a state-machine step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEffect {
    /// Queue a `ResetRequest` control message.
    SendResetRequest,
    /// Queue a `ResetComplete` control message with local capabilities.
    SendResetComplete,
    /// Queue an `UnsupportedError` control message.
    SendUnsupportedError(UnsupportedReason),
    /// The session opened: notify listeners.
    Connected,
    /// The session closed: notify listeners and flush reassembly state.
    Disconnected,
    /// A chunk arrived inside an open session: hand it to the reassembler.
    DeliverChunk(Bytes),
    /// The remote rejected our capabilities during a remote-initiated
    /// handshake. Unrecoverable by this side; surface to the host.
    RemoteUnsupported,
}

/// Session state machine with negotiated parameters.
#[derive(Debug)]
pub struct SessionControl {
    state: SessionState,
    params: SessionParams,
    local: Capabilities,
}

impl SessionControl {
    /// Create a machine in `Disconnected` advertising `local` capabilities.
    pub fn new(local: Capabilities) -> Self {
        Self {
            state: SessionState::Disconnected,
            params: SessionParams::default(),
            local,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Negotiated session parameters (all zero outside `SessionOpen`).
    pub fn params(&self) -> SessionParams {
        self.params
    }

    /// Whether the session is open.
    pub fn is_session_open(&self) -> bool {
        self.state.is_open()
    }

    /// Local capabilities advertised in every `ResetComplete`.
    pub fn local_capabilities(&self) -> Capabilities {
        self.local
    }

    /// The lower transport became ready: start local-initiated negotiation.
    pub fn handle_ready(&mut self) -> Vec<ControlEffect> {
        let mut effects = Vec::new();
        self.transition(
            SessionState::AwaitingResetCompleteLocalInitiated,
            &mut effects,
        );
        effects
    }

    /// The lower transport was lost: drop any session immediately.
    pub fn handle_transport_down(&mut self) -> Vec<ControlEffect> {
        let mut effects = Vec::new();
        self.transition(SessionState::Disconnected, &mut effects);
        effects
    }

    /// Dispatch one inbound message through the (state, key) table.
    pub fn handle_message(&mut self, message: InboundMessage) -> Vec<ControlEffect> {
        let mut effects = Vec::new();
        match self.state {
            SessionState::Disconnected => {
                tracing::debug!(?message, "ignoring message while disconnected");
            }

            SessionState::AwaitingResetCompleteRemoteInitiated => match message {
                InboundMessage::ResetRequest => {
                    // Re-enter: resets parameters and resends ResetComplete.
                    self.transition(
                        SessionState::AwaitingResetCompleteRemoteInitiated,
                        &mut effects,
                    );
                }
                InboundMessage::ResetComplete(payload) => {
                    match self.validate_reset_complete(&payload) {
                        Ok(params) => {
                            self.params = params;
                            self.transition(SessionState::SessionOpen, &mut effects);
                        }
                        Err(reason) => {
                            // The remote initiated this reset, so it already
                            // validated our capabilities; a reject here means
                            // a confused peer. Drop the message.
                            tracing::warn!(
                                ?reason,
                                "rejecting ResetComplete during remote-initiated handshake"
                            );
                        }
                    }
                }
                InboundMessage::Chunk(_) => {
                    self.transition(
                        SessionState::AwaitingResetCompleteLocalInitiated,
                        &mut effects,
                    );
                }
                InboundMessage::UnsupportedError => {
                    tracing::error!("remote peer does not support our protocol");
                    effects.push(ControlEffect::RemoteUnsupported);
                }
            },

            SessionState::AwaitingResetCompleteLocalInitiated => match message {
                InboundMessage::ResetRequest => {
                    // Our ResetRequest is already out; the remote's answer
                    // obligations are unchanged.
                }
                InboundMessage::ResetComplete(payload) => {
                    match self.validate_reset_complete(&payload) {
                        Ok(params) => {
                            self.params = params;
                            effects.push(ControlEffect::SendResetComplete);
                            self.transition(SessionState::SessionOpen, &mut effects);
                        }
                        Err(reason) => {
                            effects.push(ControlEffect::SendUnsupportedError(reason));
                        }
                    }
                }
                InboundMessage::Chunk(_) | InboundMessage::UnsupportedError => {}
            },

            SessionState::SessionOpen => match message {
                InboundMessage::ResetRequest => {
                    self.transition(
                        SessionState::AwaitingResetCompleteRemoteInitiated,
                        &mut effects,
                    );
                }
                InboundMessage::ResetComplete(_) => {}
                InboundMessage::Chunk(payload) => {
                    effects.push(ControlEffect::DeliverChunk(payload));
                }
                InboundMessage::UnsupportedError => {
                    self.transition(
                        SessionState::AwaitingResetCompleteLocalInitiated,
                        &mut effects,
                    );
                }
            },
        }
        effects
    }

    /// The receiver detected a protocol violation: renegotiate.
    pub fn handle_protocol_violation(&mut self) -> Vec<ControlEffect> {
        let mut effects = Vec::new();
        self.transition(
            SessionState::AwaitingResetCompleteLocalInitiated,
            &mut effects,
        );
        effects
    }

    /// A control message exhausted its send attempts: give up on the session
    /// until the lower transport signals ready again.
    pub fn force_disconnected(&mut self) -> Vec<ControlEffect> {
        let mut effects = Vec::new();
        self.transition(SessionState::Disconnected, &mut effects);
        effects
    }

    /// A control message exhausted its send attempts: restart negotiation.
    ///
    /// Unlike an ordinary entry into the local-initiated state, a forced
    /// restart always re-issues the `ResetRequest`, since the one previously
    /// sent (if any) is the message that just failed.
    pub fn force_renegotiate(&mut self) -> Vec<ControlEffect> {
        let mut effects = Vec::new();
        if self.state == SessionState::SessionOpen {
            effects.push(ControlEffect::Disconnected);
        }
        self.state = SessionState::AwaitingResetCompleteLocalInitiated;
        self.params.reset();
        effects.push(ControlEffect::SendResetRequest);
        effects
    }

    fn validate_reset_complete(
        &self,
        payload: &[u8],
    ) -> Result<SessionParams, UnsupportedReason> {
        let remote = Capabilities::decode(payload)
            .ok_or(UnsupportedReason::MalformedResetComplete)?;
        self.local
            .negotiate(&remote)
            .ok_or(UnsupportedReason::UnsupportedVersion)
    }

    /// Move to `next`, collecting exit and entry actions.
    fn transition(&mut self, next: SessionState, effects: &mut Vec<ControlEffect>) {
        let prev = self.state;
        if prev == SessionState::SessionOpen && next != SessionState::SessionOpen {
            effects.push(ControlEffect::Disconnected);
        }
        self.state = next;
        match next {
            SessionState::Disconnected => {
                self.params.reset();
            }
            SessionState::AwaitingResetCompleteRemoteInitiated => {
                self.params.reset();
                effects.push(ControlEffect::SendResetComplete);
            }
            SessionState::AwaitingResetCompleteLocalInitiated => {
                if prev != SessionState::AwaitingResetCompleteLocalInitiated {
                    effects.push(ControlEffect::SendResetRequest);
                }
                self.params.reset();
            }
            SessionState::SessionOpen => {
                effects.push(ControlEffect::Connected);
            }
        }
        tracing::debug!(?prev, ?next, "session state transition");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RI: SessionState = SessionState::AwaitingResetCompleteRemoteInitiated;
    const LI: SessionState = SessionState::AwaitingResetCompleteLocalInitiated;

    fn machine_in(state: SessionState) -> SessionControl {
        let mut control = SessionControl::new(Capabilities::default());
        match state {
            SessionState::Disconnected => {}
            SessionState::AwaitingResetCompleteLocalInitiated => {
                control.handle_ready();
            }
            SessionState::AwaitingResetCompleteRemoteInitiated => {
                control.handle_ready();
                // Receiving a ResetRequest flips us to the remote-initiated
                // wait once the session is open; shortcut via SessionOpen.
                control.handle_message(valid_reset_complete());
                control.handle_message(InboundMessage::ResetRequest);
            }
            SessionState::SessionOpen => {
                control.handle_ready();
                control.handle_message(valid_reset_complete());
            }
        }
        assert_eq!(control.state(), state);
        control
    }

    fn valid_reset_complete() -> InboundMessage {
        InboundMessage::ResetComplete(Bytes::copy_from_slice(
            &Capabilities::default().encode(),
        ))
    }

    fn mismatched_reset_complete() -> InboundMessage {
        let remote = Capabilities {
            min_version: 2,
            max_version: 3,
            ..Capabilities::default()
        };
        InboundMessage::ResetComplete(Bytes::copy_from_slice(&remote.encode()))
    }

    fn dummy_chunk() -> InboundMessage {
        InboundMessage::Chunk(Bytes::from_static(&[0x01, 0x00, 0x00, 0x80, 0x00]))
    }

    #[test]
    fn test_initial_state_is_disconnected() {
        let control = SessionControl::new(Capabilities::default());
        assert_eq!(control.state(), SessionState::Disconnected);
        assert_eq!(control.params(), SessionParams::default());
    }

    #[test]
    fn test_ready_starts_local_negotiation() {
        let mut control = SessionControl::new(Capabilities::default());
        let effects = control.handle_ready();
        assert_eq!(control.state(), LI);
        assert_eq!(effects, vec![ControlEffect::SendResetRequest]);
    }

    #[test]
    fn test_disconnected_ignores_all_messages() {
        for message in [
            InboundMessage::ResetRequest,
            valid_reset_complete(),
            dummy_chunk(),
            InboundMessage::UnsupportedError,
        ] {
            let mut control = machine_in(SessionState::Disconnected);
            let effects = control.handle_message(message);
            assert!(effects.is_empty());
            assert_eq!(control.state(), SessionState::Disconnected);
        }
    }

    #[test]
    fn test_local_initiated_accepts_reset_complete() {
        let mut control = machine_in(LI);
        let effects = control.handle_message(valid_reset_complete());

        assert_eq!(control.state(), SessionState::SessionOpen);
        assert_eq!(
            effects,
            vec![
                ControlEffect::SendResetComplete,
                ControlEffect::Connected,
            ]
        );
        assert_eq!(control.params().version, 1);
        assert_eq!(control.params().tx_chunk_size, 1000);
        assert_eq!(control.params().rx_chunk_size, 1000);
    }

    #[test]
    fn test_local_initiated_rejects_version_mismatch() {
        let mut control = machine_in(LI);
        let effects = control.handle_message(mismatched_reset_complete());

        assert_eq!(control.state(), LI);
        assert_eq!(
            effects,
            vec![ControlEffect::SendUnsupportedError(
                UnsupportedReason::UnsupportedVersion
            )]
        );
        assert!(!control.params().is_negotiated());
    }

    #[test]
    fn test_local_initiated_rejects_malformed_reset_complete() {
        let mut control = machine_in(LI);
        let effects = control.handle_message(InboundMessage::ResetComplete(
            Bytes::from_static(&[1, 1, 0]),
        ));

        assert_eq!(control.state(), LI);
        assert_eq!(
            effects,
            vec![ControlEffect::SendUnsupportedError(
                UnsupportedReason::MalformedResetComplete
            )]
        );
    }

    #[test]
    fn test_local_initiated_repeated_reset_request_is_idempotent() {
        let mut control = machine_in(LI);
        let effects = control.handle_message(InboundMessage::ResetRequest);
        // No extra ResetRequest goes out.
        assert!(effects.is_empty());
        assert_eq!(control.state(), LI);
    }

    #[test]
    fn test_local_initiated_ignores_chunk_and_unsupported() {
        let mut control = machine_in(LI);
        assert!(control.handle_message(dummy_chunk()).is_empty());
        assert!(control
            .handle_message(InboundMessage::UnsupportedError)
            .is_empty());
        assert_eq!(control.state(), LI);
    }

    #[test]
    fn test_remote_initiated_reset_request_resends_complete() {
        let mut control = machine_in(RI);
        let effects = control.handle_message(InboundMessage::ResetRequest);
        assert_eq!(control.state(), RI);
        assert_eq!(effects, vec![ControlEffect::SendResetComplete]);
    }

    #[test]
    fn test_remote_initiated_accepts_reset_complete() {
        let mut control = machine_in(RI);
        let effects = control.handle_message(valid_reset_complete());
        assert_eq!(control.state(), SessionState::SessionOpen);
        // No ResetComplete reply: ours already went out when we entered the
        // remote-initiated wait.
        assert_eq!(effects, vec![ControlEffect::Connected]);
    }

    #[test]
    fn test_remote_initiated_ignores_invalid_reset_complete() {
        let mut control = machine_in(RI);
        let effects = control.handle_message(mismatched_reset_complete());
        assert!(effects.is_empty());
        assert_eq!(control.state(), RI);
    }

    #[test]
    fn test_remote_initiated_chunk_forces_local_reset() {
        let mut control = machine_in(RI);
        let effects = control.handle_message(dummy_chunk());
        assert_eq!(control.state(), LI);
        assert_eq!(effects, vec![ControlEffect::SendResetRequest]);
    }

    #[test]
    fn test_remote_initiated_unsupported_error_is_fatal() {
        let mut control = machine_in(RI);
        let effects = control.handle_message(InboundMessage::UnsupportedError);
        assert_eq!(effects, vec![ControlEffect::RemoteUnsupported]);
    }

    #[test]
    fn test_session_open_reset_request_reopens_negotiation() {
        let mut control = machine_in(SessionState::SessionOpen);
        let effects = control.handle_message(InboundMessage::ResetRequest);

        assert_eq!(control.state(), RI);
        assert_eq!(
            effects,
            vec![
                ControlEffect::Disconnected,
                ControlEffect::SendResetComplete,
            ]
        );
        assert!(!control.params().is_negotiated());
    }

    #[test]
    fn test_session_open_ignores_reset_complete() {
        let mut control = machine_in(SessionState::SessionOpen);
        let effects = control.handle_message(valid_reset_complete());
        assert!(effects.is_empty());
        assert_eq!(control.state(), SessionState::SessionOpen);
    }

    #[test]
    fn test_session_open_hands_chunk_to_receiver() {
        let mut control = machine_in(SessionState::SessionOpen);
        let payload = Bytes::from_static(&[0x02, 0x00, 0x00, 0x80, b'1', 0x00]);
        let effects = control.handle_message(InboundMessage::Chunk(payload.clone()));
        assert_eq!(effects, vec![ControlEffect::DeliverChunk(payload)]);
    }

    #[test]
    fn test_session_open_unsupported_error_renegotiates() {
        let mut control = machine_in(SessionState::SessionOpen);
        let effects = control.handle_message(InboundMessage::UnsupportedError);

        assert_eq!(control.state(), LI);
        assert_eq!(
            effects,
            vec![
                ControlEffect::Disconnected,
                ControlEffect::SendResetRequest,
            ]
        );
    }

    #[test]
    fn test_protocol_violation_renegotiates_from_open() {
        let mut control = machine_in(SessionState::SessionOpen);
        let effects = control.handle_protocol_violation();

        assert_eq!(control.state(), LI);
        assert_eq!(
            effects,
            vec![
                ControlEffect::Disconnected,
                ControlEffect::SendResetRequest,
            ]
        );
        assert!(!control.params().is_negotiated());
    }

    #[test]
    fn test_transport_down_from_open_emits_disconnected() {
        let mut control = machine_in(SessionState::SessionOpen);
        let effects = control.handle_transport_down();

        assert_eq!(control.state(), SessionState::Disconnected);
        assert_eq!(effects, vec![ControlEffect::Disconnected]);
        assert!(!control.params().is_negotiated());
    }

    #[test]
    fn test_transport_down_mid_handshake_is_quiet() {
        let mut control = machine_in(LI);
        let effects = control.handle_transport_down();
        assert_eq!(control.state(), SessionState::Disconnected);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_force_disconnected_drops_open_session() {
        let mut control = machine_in(SessionState::SessionOpen);
        let effects = control.force_disconnected();
        assert_eq!(control.state(), SessionState::Disconnected);
        assert_eq!(effects, vec![ControlEffect::Disconnected]);
    }

    #[test]
    fn test_force_renegotiate_always_resends_reset_request() {
        // Even from the local-initiated state itself, a forced restart must
        // put a fresh ResetRequest on the wire.
        let mut control = machine_in(LI);
        let effects = control.force_renegotiate();
        assert_eq!(control.state(), LI);
        assert_eq!(effects, vec![ControlEffect::SendResetRequest]);
    }

    #[test]
    fn test_params_are_zero_outside_session_open() {
        let mut control = machine_in(SessionState::SessionOpen);
        assert!(control.params().is_negotiated());

        control.handle_message(InboundMessage::ResetRequest);
        assert_eq!(control.params(), SessionParams::default());
    }
}
