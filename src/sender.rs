//! Outbound queues, chunking, and retry.
//!
//! Two FIFO queues feed the lower transport: control messages (handshake
//! dictionaries) strictly outrank object messages. At most one unit - a
//! control dictionary or a single object chunk - is in flight at any time,
//! and a unit that fails is retried in place with a fixed backoff before the
//! whole message is abandoned.
//!
//! A control message may preempt an object between chunks, never inside
//! one. The preempted object stays at the head of its queue and restarts
//! from offset zero when re-selected; the receiver resynchronizes on the
//! chunk's first-flag.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;

use crate::codec::ObjectCodec;
use crate::error::Result;
use crate::protocol::{AppMessage, ChunkHeader, SessionParams};
use crate::transport::{LowerTransport, RetryScheduler, SendFailure};

/// Synthetic failure reason used when a chunk is due while no session is
/// open.
pub const SESSION_NOT_OPEN: &str = "Session not open";

/// Reason reported when an object exhausts its send attempts.
pub const TOO_MANY_FAILURES: &str = "Too many failed transfer attempts";

/// Retry pacing for a failing send unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed delay between attempts.
    pub delay: Duration,
    /// Total attempts per unit (first try included) before giving up.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(1000),
            max_attempts: 4,
        }
    }
}

/// A queued outbound object.
///
/// `data` is a snapshot taken at queue time; the caller mutating its own
/// value afterwards has no effect on what is sent or reported.
#[derive(Debug, Clone)]
pub struct OutboundObject {
    /// The queued JSON value.
    pub data: Value,
    /// Its serialized JSON text.
    pub json: String,
    /// The wire payload: UTF-8 JSON text plus NUL terminator.
    pub bytes: Bytes,
}

impl OutboundObject {
    /// Snapshot and frame a JSON value for transmission.
    pub fn new(data: Value) -> Result<Self> {
        let json = serde_json::to_string(&data)?;
        let bytes = ObjectCodec::frame(&json)?;
        Ok(Self { data, json, bytes })
    }
}

/// What kind of unit currently occupies the transmit slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InFlightKind {
    /// A control dictionary.
    Control,
    /// One chunk of the head object.
    Object,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlightPhase {
    /// Submitted to the lower transport, completion pending.
    AwaitingResult,
    /// Failed; the retry timer is armed.
    RetryWait,
}

#[derive(Debug)]
struct InFlight {
    kind: InFlightKind,
    phase: InFlightPhase,
    failures: u32,
    /// Byte offset of the current chunk (objects only).
    offset: usize,
    /// Payload size of the current chunk (objects only).
    chunk_len: usize,
}

impl InFlight {
    fn control() -> Self {
        Self {
            kind: InFlightKind::Control,
            phase: InFlightPhase::AwaitingResult,
            failures: 0,
            offset: 0,
            chunk_len: 0,
        }
    }

    fn object() -> Self {
        Self {
            kind: InFlightKind::Object,
            ..Self::control()
        }
    }
}

/// Follow-up the caller must perform after a sender step.
#[must_use]
#[derive(Debug)]
pub enum SendAction {
    /// Nothing further to do.
    Continue,
    /// A control message exhausted its attempts and was dropped; apply the
    /// configured failure policy, then pump again.
    ControlAbandoned,
    /// An object exhausted its attempts and was dropped; emit an `error`
    /// event carrying its snapshot, then pump again.
    ObjectAbandoned(OutboundObject),
}

/// Dual-priority outbound queue with chunking and bounded retry.
#[derive(Debug, Default)]
pub struct Sender {
    control_queue: VecDeque<AppMessage>,
    object_queue: VecDeque<OutboundObject>,
    in_flight: Option<InFlight>,
}

impl Sender {
    /// Create an idle sender.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a control dictionary (strictly outranks objects).
    pub fn enqueue_control(&mut self, message: AppMessage) {
        self.control_queue.push_back(message);
    }

    /// Queue an object for transmission.
    pub fn enqueue_object(&mut self, object: OutboundObject) {
        self.object_queue.push_back(object);
    }

    /// Kind of the unit occupying the transmit slot, if any.
    ///
    /// The slot stays occupied while a failed unit waits for its retry
    /// timer; it only frees when the unit completes or is abandoned.
    pub fn in_flight_kind(&self) -> Option<InFlightKind> {
        self.in_flight.as_ref().map(|flight| flight.kind)
    }

    /// Whether the current unit is waiting on the retry timer.
    pub fn is_retry_pending(&self) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|flight| flight.phase == InFlightPhase::RetryWait)
    }

    /// Queued control messages.
    pub fn control_backlog(&self) -> usize {
        self.control_queue.len()
    }

    /// Queued objects.
    pub fn object_backlog(&self) -> usize {
        self.object_queue.len()
    }

    /// Forget the in-flight unit without completing it.
    ///
    /// Used when the lower transport goes away and no completion callback
    /// will ever arrive. The unit's message stays queued.
    pub fn abort_in_flight(&mut self) {
        self.in_flight = None;
    }

    /// Drop all queued control messages.
    ///
    /// Handshake dictionaries are meaningless across a transport
    /// reconnect; the state machine re-creates whatever the new connection
    /// needs. Queued objects are kept.
    pub fn clear_control_queue(&mut self) {
        self.control_queue.clear();
    }

    /// The send loop: if the transmit slot is free, pick the next unit and
    /// hand it to the lower transport.
    pub fn pump<L: LowerTransport, S: RetryScheduler>(
        &mut self,
        session: &SessionParams,
        lower: &mut L,
        scheduler: &mut S,
        retry: &RetryPolicy,
    ) -> SendAction {
        if let Some(flight) = &self.in_flight {
            // A parked object (failed chunk waiting on its retry timer) may
            // be preempted by control traffic; a unit actually outstanding
            // with the transport may not.
            let preemptable = flight.kind == InFlightKind::Object
                && flight.phase == InFlightPhase::RetryWait
                && !self.control_queue.is_empty();
            if !preemptable {
                return SendAction::Continue;
            }
            self.in_flight = None;
        }
        if let Some(message) = self.control_queue.front() {
            self.in_flight = Some(InFlight::control());
            lower.send_app_message(message.clone());
            return SendAction::Continue;
        }
        if self.object_queue.is_empty() {
            return SendAction::Continue;
        }
        self.in_flight = Some(InFlight::object());
        self.emit_chunk(session, lower, scheduler, retry)
    }

    /// Completion callback for the outstanding send.
    pub fn handle_send_result<L: LowerTransport, S: RetryScheduler>(
        &mut self,
        result: std::result::Result<(), SendFailure>,
        session: &SessionParams,
        lower: &mut L,
        scheduler: &mut S,
        retry: &RetryPolicy,
    ) -> SendAction {
        let Some(flight) = self.in_flight.as_mut() else {
            tracing::warn!("send completion with nothing in flight");
            return SendAction::Continue;
        };
        if flight.phase != InFlightPhase::AwaitingResult {
            tracing::warn!("send completion while waiting on the retry timer");
            return SendAction::Continue;
        }

        match result {
            Ok(()) => match flight.kind {
                InFlightKind::Control => {
                    self.control_queue.pop_front();
                    self.in_flight = None;
                    self.pump(session, lower, scheduler, retry)
                }
                InFlightKind::Object => {
                    flight.offset += flight.chunk_len;
                    let sent_all = self
                        .object_queue
                        .front()
                        .is_none_or(|object| flight.offset >= object.bytes.len());
                    if sent_all {
                        self.object_queue.pop_front();
                        self.in_flight = None;
                        self.pump(session, lower, scheduler, retry)
                    } else {
                        self.emit_chunk(session, lower, scheduler, retry)
                    }
                }
            },
            Err(failure) => {
                tracing::debug!(reason = %failure, "app message send failed");
                self.fail_in_flight(scheduler, retry)
            }
        }
    }

    /// The retry timer fired: resend the current unit.
    ///
    /// A control message is resent as-is; an object retries the same chunk
    /// (same offset), re-checking preemption and session state first.
    pub fn handle_retry_timer<L: LowerTransport, S: RetryScheduler>(
        &mut self,
        session: &SessionParams,
        lower: &mut L,
        scheduler: &mut S,
        retry: &RetryPolicy,
    ) -> SendAction {
        let Some(flight) = self.in_flight.as_mut() else {
            return SendAction::Continue;
        };
        if flight.phase != InFlightPhase::RetryWait {
            return SendAction::Continue;
        }
        flight.phase = InFlightPhase::AwaitingResult;
        match flight.kind {
            InFlightKind::Control => match self.control_queue.front() {
                Some(message) => {
                    lower.send_app_message(message.clone());
                    SendAction::Continue
                }
                None => {
                    self.in_flight = None;
                    self.pump(session, lower, scheduler, retry)
                }
            },
            InFlightKind::Object => self.emit_chunk(session, lower, scheduler, retry),
        }
    }

    /// Emit the next chunk of the head object.
    fn emit_chunk<L: LowerTransport, S: RetryScheduler>(
        &mut self,
        session: &SessionParams,
        lower: &mut L,
        scheduler: &mut S,
        retry: &RetryPolicy,
    ) -> SendAction {
        // A control message outranks the object between chunks; the object
        // stays queued and restarts from offset zero when re-selected.
        if !self.control_queue.is_empty() {
            self.in_flight = None;
            return self.pump(session, lower, scheduler, retry);
        }
        if !session.is_negotiated() {
            if let Some(flight) = self.in_flight.as_mut() {
                flight.offset = 0;
            }
            tracing::debug!(reason = SESSION_NOT_OPEN, "failing pending object chunk");
            return self.fail_in_flight(scheduler, retry);
        }

        let Some(flight) = self.in_flight.as_mut() else {
            return SendAction::Continue;
        };
        let Some(object) = self.object_queue.front() else {
            self.in_flight = None;
            return SendAction::Continue;
        };

        let remaining = object.bytes.len() - flight.offset;
        let chunk_len = remaining.min(session.tx_chunk_size as usize);
        flight.chunk_len = chunk_len;
        flight.phase = InFlightPhase::AwaitingResult;

        let header = if flight.offset == 0 {
            ChunkHeader::first(object.bytes.len() as u32)
        } else {
            ChunkHeader::continuation(flight.offset as u32)
        };
        let payload = object.bytes.slice(flight.offset..flight.offset + chunk_len);
        lower.send_app_message(AppMessage::chunk(header, payload));
        SendAction::Continue
    }

    /// Count a failure against the current unit; retry or abandon.
    fn fail_in_flight<S: RetryScheduler>(
        &mut self,
        scheduler: &mut S,
        retry: &RetryPolicy,
    ) -> SendAction {
        let Some(flight) = self.in_flight.as_mut() else {
            return SendAction::Continue;
        };
        flight.failures += 1;
        if flight.failures < retry.max_attempts {
            flight.phase = InFlightPhase::RetryWait;
            scheduler.schedule(retry.delay);
            return SendAction::Continue;
        }

        let kind = flight.kind;
        self.in_flight = None;
        match kind {
            InFlightKind::Control => {
                tracing::warn!("control message abandoned after repeated send failures");
                self.control_queue.pop_front();
                SendAction::ControlAbandoned
            }
            InFlightKind::Object => match self.object_queue.pop_front() {
                Some(object) => {
                    tracing::warn!("object abandoned after repeated send failures");
                    SendAction::ObjectAbandoned(object)
                }
                None => SendAction::Continue,
            },
        }
    }
}
