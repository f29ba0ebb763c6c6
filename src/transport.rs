//! Seams to the outside world: the lower transport and the retry timer.
//!
//! The core is written sans-I/O against these two traits so every behavior
//! is deterministic under test. The host glue implements them, delivers the
//! lower transport's callbacks back into the core's `handle_*` entry points,
//! and fires the retry timer when the scheduled delay elapses. The
//! [`driver`](crate::driver) module provides a tokio-based host.

use std::time::Duration;

use crate::events::ListenerId;
use crate::protocol::AppMessage;

/// A handler for a lower-transport-native event (listener passthrough).
pub type NativeHandler = Box<dyn FnMut(&serde_json::Value)>;

/// The unreliable, small-MTU key/value channel the core sits on top of.
///
/// The contract mirrors the device channel it abstracts:
/// - [`send_app_message`](LowerTransport::send_app_message) is best-effort;
///   exactly one completion (success or failure) is reported back per send,
///   through [`handle_send_result`]. The core never has more than one send
///   outstanding.
/// - Event names the core does not recognize are forwarded to the
///   transport's own listener registry unchanged.
///
/// [`handle_send_result`]: crate::PostMessageTransport::handle_send_result
pub trait LowerTransport {
    /// Hand a key/value dictionary to the transport for delivery.
    fn send_app_message(&mut self, message: AppMessage);

    /// Register a listener for a transport-native event name.
    fn add_native_listener(&mut self, event: &str, id: ListenerId, handler: NativeHandler);

    /// Remove a previously registered native listener.
    fn remove_native_listener(&mut self, event: &str, id: ListenerId);
}

/// The injected retry-timer capability.
///
/// At most one timer is armed at a time; scheduling replaces any pending
/// deadline. When the delay elapses the host calls
/// [`handle_retry_timer`](crate::PostMessageTransport::handle_retry_timer).
pub trait RetryScheduler {
    /// Arm the retry timer to fire after `delay`.
    fn schedule(&mut self, delay: Duration);

    /// Disarm any pending timer.
    fn cancel(&mut self);
}

/// Why a lower-transport send failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFailure {
    /// Transport-provided (or synthetic) failure reason.
    pub reason: String,
}

impl SendFailure {
    /// Create a failure with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for SendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}
