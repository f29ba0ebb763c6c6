//! The transport facade and its builder.
//!
//! [`PostMessageTransport`] owns the session state machine, the outbound
//! queues, the reassembly buffer, and the listener registry, and wires them
//! to a [`LowerTransport`] and a [`RetryScheduler`]. The host glue feeds the
//! lower transport's callbacks into the `handle_*` entry points; application
//! code uses [`post_message`](PostMessageTransport::post_message) and
//! [`on`](PostMessageTransport::on)/[`off`](PostMessageTransport::off).
//!
//! All state lives on one execution context. Each entry point runs to
//! completion, queueing any listener notifications and dispatching them
//! before it returns, so handlers always observe a consistent transport.

use std::collections::VecDeque;

use serde::Serialize;
use serde_json::Value;

use crate::codec::ObjectCodec;
use crate::control::{ControlEffect, SessionControl, SessionState};
use crate::error::{PostwireError, Result};
use crate::events::{EventKind, Events, ListenerId, TransportEvent};
use crate::protocol::{
    AppMessage, Capabilities, InboundMessage, Reassembler, SessionParams,
};
use crate::sender::{
    InFlightKind, OutboundObject, RetryPolicy, SendAction, Sender, TOO_MANY_FAILURES,
};
use crate::transport::{LowerTransport, RetryScheduler, SendFailure};

/// What to do when a control message exhausts its send attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlFailurePolicy {
    /// Drop the session and wait for the lower transport to signal ready
    /// again before negotiating.
    #[default]
    Disconnect,
    /// Immediately restart local-initiated negotiation.
    Renegotiate,
}

/// Configuration for a transport instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportConfig {
    /// Retry pacing for failing send units.
    pub retry: RetryPolicy,
    /// Recovery behavior after a control message is abandoned.
    pub control_failure_policy: ControlFailurePolicy,
    /// Capabilities advertised during negotiation.
    pub capabilities: Capabilities,
}

/// Handle returned by [`PostMessageTransport::on`], consumed by
/// [`PostMessageTransport::off`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerHandle {
    /// A listener on one of the transport's own events.
    Transport {
        /// Which event list.
        kind: EventKind,
        /// Registry id.
        id: ListenerId,
    },
    /// A listener forwarded to the lower transport.
    Native {
        /// The lower transport's event name.
        event: String,
        /// Passthrough id.
        id: ListenerId,
    },
}

/// Builder for configuring and creating a transport.
pub struct TransportBuilder<L, S> {
    lower: L,
    scheduler: S,
    config: TransportConfig,
}

impl<L: LowerTransport, S: RetryScheduler> TransportBuilder<L, S> {
    /// Start a builder around a lower transport and retry scheduler.
    pub fn new(lower: L, scheduler: S) -> Self {
        Self {
            lower,
            scheduler,
            config: TransportConfig::default(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the retry pacing.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the control-failure recovery policy.
    pub fn control_failure_policy(mut self, policy: ControlFailurePolicy) -> Self {
        self.config.control_failure_policy = policy;
        self
    }

    /// Override the advertised capabilities.
    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.config.capabilities = capabilities;
        self
    }

    /// Build the transport.
    pub fn build(self) -> PostMessageTransport<L, S> {
        PostMessageTransport {
            control: SessionControl::new(self.config.capabilities),
            sender: Sender::new(),
            reassembler: Reassembler::new(),
            events: Events::new(),
            pending_events: VecDeque::new(),
            lower: self.lower,
            scheduler: self.scheduler,
            config: self.config,
            next_native_id: 0,
        }
    }
}

/// A reliable, chunked, JSON-object channel over an unreliable key/value
/// transport.
pub struct PostMessageTransport<L, S> {
    control: SessionControl,
    sender: Sender,
    reassembler: Reassembler,
    events: Events,
    pending_events: VecDeque<TransportEvent>,
    lower: L,
    scheduler: S,
    config: TransportConfig,
    next_native_id: ListenerId,
}

impl<L: LowerTransport, S: RetryScheduler> PostMessageTransport<L, S> {
    /// Create a transport with default configuration.
    pub fn new(lower: L, scheduler: S) -> Self {
        TransportBuilder::new(lower, scheduler).build()
    }

    /// Start a builder.
    pub fn builder(lower: L, scheduler: S) -> TransportBuilder<L, S> {
        TransportBuilder::new(lower, scheduler)
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.control.state()
    }

    /// Negotiated session parameters (all zero outside an open session).
    pub fn session(&self) -> SessionParams {
        self.control.params()
    }

    /// Whether the session is open.
    pub fn is_session_open(&self) -> bool {
        self.control.is_session_open()
    }

    /// A cloneable handle to the listener registry.
    ///
    /// Handlers may use it to add or remove listeners from inside a
    /// dispatch.
    pub fn events(&self) -> Events {
        self.events.clone()
    }

    /// Queue a JSON-serializable object for transmission.
    ///
    /// Serialization failures and oversized objects surface here,
    /// synchronously. Transport failures surface later through the `error`
    /// event, carrying a snapshot of the object.
    pub fn post_message<T: Serialize>(&mut self, obj: &T) -> Result<()> {
        let value = serde_json::to_value(obj)?;
        let object = OutboundObject::new(value)?;
        self.sender.enqueue_object(object);
        self.pump();
        self.flush_events();
        Ok(())
    }

    /// Register an event handler.
    ///
    /// `message`, `connected`, `disconnected`, and `error` are handled by
    /// the transport; any other name is forwarded unchanged to the lower
    /// transport's native listener registry and delivered as
    /// [`TransportEvent::Native`].
    pub fn on(
        &mut self,
        event: &str,
        mut handler: impl FnMut(&TransportEvent) + 'static,
    ) -> ListenerHandle {
        match EventKind::from_name(event) {
            Some(kind) => ListenerHandle::Transport {
                kind,
                id: self.events.on(kind, handler),
            },
            None => {
                let id = self.next_native_id;
                self.next_native_id += 1;
                let name = event.to_string();
                let forwarded = name.clone();
                self.lower.add_native_listener(
                    event,
                    id,
                    Box::new(move |detail| {
                        handler(&TransportEvent::Native {
                            name: forwarded.clone(),
                            detail: detail.clone(),
                        })
                    }),
                );
                ListenerHandle::Native { event: name, id }
            }
        }
    }

    /// Remove a previously registered handler.
    pub fn off(&mut self, handle: &ListenerHandle) {
        match handle {
            ListenerHandle::Transport { kind, id } => {
                self.events.off(*kind, *id);
            }
            ListenerHandle::Native { event, id } => {
                self.lower.remove_native_listener(event, *id);
            }
        }
    }

    /// Whether the raw app-message API is available. Always `false`: the
    /// chunked object channel owns the key space.
    pub fn supports_send_app_message(&self) -> bool {
        false
    }

    /// The raw app-message API, exposed as permanently unavailable so
    /// callers can feature-detect its absence.
    pub fn send_app_message(&mut self, _message: AppMessage) -> Result<()> {
        Err(PostwireError::SendAppMessageUnavailable)
    }

    /// The lower transport became ready.
    pub fn handle_ready(&mut self) {
        let effects = self.control.handle_ready();
        self.apply_effects(effects);
        self.pump();
        self.flush_events();
    }

    /// The lower transport was lost.
    ///
    /// The in-flight unit is forgotten (its completion will never arrive),
    /// queued handshake dictionaries are dropped, and queued objects are
    /// kept for the next session.
    pub fn handle_transport_down(&mut self) {
        self.scheduler.cancel();
        self.sender.abort_in_flight();
        self.sender.clear_control_queue();
        let effects = self.control.handle_transport_down();
        self.apply_effects(effects);
        self.pump();
        self.flush_events();
    }

    /// An inbound key/value dictionary arrived.
    pub fn handle_app_message(&mut self, message: &AppMessage) {
        let Some(inbound) = InboundMessage::parse(message) else {
            tracing::debug!("ignoring app message with no recognized key");
            return;
        };
        let effects = self.control.handle_message(inbound);
        self.apply_effects(effects);
        self.pump();
        self.flush_events();
    }

    /// The outstanding send completed.
    pub fn handle_send_result(&mut self, result: std::result::Result<(), SendFailure>) {
        let session = self.control.params();
        let action = self.sender.handle_send_result(
            result,
            &session,
            &mut self.lower,
            &mut self.scheduler,
            &self.config.retry,
        );
        self.apply_send_action(action);
        self.flush_events();
    }

    /// The retry timer fired.
    pub fn handle_retry_timer(&mut self) {
        let session = self.control.params();
        let action = self.sender.handle_retry_timer(
            &session,
            &mut self.lower,
            &mut self.scheduler,
            &self.config.retry,
        );
        self.apply_send_action(action);
        self.flush_events();
    }

    fn apply_effects(&mut self, effects: Vec<ControlEffect>) {
        for effect in effects {
            match effect {
                ControlEffect::SendResetRequest => {
                    self.sender.enqueue_control(AppMessage::reset_request());
                }
                ControlEffect::SendResetComplete => {
                    self.sender.enqueue_control(AppMessage::reset_complete(
                        &self.control.local_capabilities(),
                    ));
                }
                ControlEffect::SendUnsupportedError(reason) => {
                    self.sender
                        .enqueue_control(AppMessage::unsupported_error(reason));
                }
                ControlEffect::Connected => {
                    self.events.set_connected(true);
                    self.pending_events.push_back(TransportEvent::Connected);
                    // An object parked on the retry timer (it failed while
                    // no session was open) may go out now. Parked control
                    // messages keep their own pace.
                    if self.sender.is_retry_pending()
                        && self.sender.in_flight_kind() == Some(InFlightKind::Object)
                    {
                        self.scheduler.cancel();
                        let session = self.control.params();
                        let action = self.sender.handle_retry_timer(
                            &session,
                            &mut self.lower,
                            &mut self.scheduler,
                            &self.config.retry,
                        );
                        self.apply_send_action(action);
                    }
                }
                ControlEffect::Disconnected => {
                    self.events.set_connected(false);
                    self.reassembler.clear();
                    self.pending_events.push_back(TransportEvent::Disconnected);
                }
                ControlEffect::DeliverChunk(bytes) => {
                    self.deliver_chunk(&bytes);
                }
                ControlEffect::RemoteUnsupported => {
                    tracing::error!("remote peer rejected our protocol capabilities");
                    self.pending_events.push_back(TransportEvent::Error {
                        data: Value::Null,
                        reason: "Remote peer does not support the local protocol".to_string(),
                    });
                }
            }
        }
    }

    fn deliver_chunk(&mut self, bytes: &[u8]) {
        match self.reassembler.push(bytes) {
            Ok(Some(payload)) => match ObjectCodec::decode(&payload) {
                Ok(data) => {
                    self.pending_events
                        .push_back(TransportEvent::Message { data });
                }
                Err(error) => {
                    tracing::warn!(%error, "dropping undecodable message payload");
                }
            },
            Ok(None) => {}
            Err(violation) => {
                tracing::warn!(%violation, "chunk violated protocol, renegotiating");
                let effects = self.control.handle_protocol_violation();
                self.apply_effects(effects);
            }
        }
    }

    fn apply_send_action(&mut self, action: SendAction) {
        match action {
            SendAction::Continue => {}
            SendAction::ControlAbandoned => {
                let effects = match self.config.control_failure_policy {
                    ControlFailurePolicy::Disconnect => self.control.force_disconnected(),
                    ControlFailurePolicy::Renegotiate => self.control.force_renegotiate(),
                };
                self.apply_effects(effects);
                self.pump();
            }
            SendAction::ObjectAbandoned(object) => {
                self.pending_events.push_back(TransportEvent::Error {
                    data: object.data,
                    reason: TOO_MANY_FAILURES.to_string(),
                });
                self.pump();
            }
        }
    }

    fn pump(&mut self) {
        let session = self.control.params();
        let action = self.sender.pump(
            &session,
            &mut self.lower,
            &mut self.scheduler,
            &self.config.retry,
        );
        self.apply_send_action(action);
    }

    fn flush_events(&mut self) {
        while let Some(event) = self.pending_events.pop_front() {
            self.events.dispatch(&event);
        }
    }
}
