//! Tokio host for the transport core.
//!
//! The core itself is sans-I/O; this module supplies the event loop that a
//! real deployment runs it on. Host glue forwards the lower transport's
//! callbacks as [`DriverEvent`]s on an mpsc channel, and the driver turns
//! them into core entry-point calls. The retry timer is a
//! `tokio::time::sleep_until` armed from the core's [`RetryScheduler`]
//! callbacks.
//!
//! The core is single-threaded (listener callbacks are plain `FnMut`
//! closures), so [`TransportDriver::run`] must be awaited on the task that
//! owns the driver - a current-thread runtime or a `LocalSet`.
//!
//! # Example
//!
//! ```ignore
//! use postwire::driver::{DriverEvent, TransportDriver};
//!
//! let (mut driver, handle) = TransportDriver::new(lower, Default::default());
//! driver.transport().on("message", |event| println!("{:?}", event));
//!
//! // Host glue feeds transport callbacks:
//! handle.send(DriverEvent::Ready).unwrap();
//!
//! driver.run().await;
//! ```

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::postmessage::{PostMessageTransport, TransportBuilder, TransportConfig};
use crate::protocol::AppMessage;
use crate::transport::{LowerTransport, RetryScheduler, SendFailure};

/// An input for the driver loop.
#[derive(Debug)]
pub enum DriverEvent {
    /// The lower transport became ready.
    Ready,
    /// The lower transport was lost.
    TransportDown,
    /// An inbound key/value dictionary.
    AppMessage(AppMessage),
    /// Completion of the outstanding send.
    SendResult(Result<(), SendFailure>),
    /// Queue an object for transmission.
    Post(Value),
}

/// A [`RetryScheduler`] that records a deadline for the driver loop to
/// sleep on.
#[derive(Clone, Default)]
pub struct RetryDeadline {
    deadline: Rc<Cell<Option<Instant>>>,
}

impl RetryDeadline {
    /// The armed deadline, if any.
    pub fn get(&self) -> Option<Instant> {
        self.deadline.get()
    }

    /// Disarm without firing.
    pub fn clear(&self) {
        self.deadline.set(None);
    }
}

impl RetryScheduler for RetryDeadline {
    fn schedule(&mut self, delay: Duration) {
        self.deadline.set(Some(Instant::now() + delay));
    }

    fn cancel(&mut self) {
        self.deadline.set(None);
    }
}

/// Runs a [`PostMessageTransport`] on a tokio event loop.
pub struct TransportDriver<L> {
    transport: PostMessageTransport<L, RetryDeadline>,
    deadline: RetryDeadline,
    rx: mpsc::UnboundedReceiver<DriverEvent>,
}

impl<L: LowerTransport> TransportDriver<L> {
    /// Create a driver and the sender half of its event channel.
    pub fn new(lower: L, config: TransportConfig) -> (Self, mpsc::UnboundedSender<DriverEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let deadline = RetryDeadline::default();
        let transport = TransportBuilder::new(lower, deadline.clone())
            .config(config)
            .build();
        (
            Self {
                transport,
                deadline,
                rx,
            },
            tx,
        )
    }

    /// The transport, for registering listeners or posting directly.
    pub fn transport(&mut self) -> &mut PostMessageTransport<L, RetryDeadline> {
        &mut self.transport
    }

    /// Process driver events until every sender half is dropped.
    pub async fn run(&mut self) {
        loop {
            let deadline = self.deadline.get();
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(DriverEvent::Ready) => self.transport.handle_ready(),
                    Some(DriverEvent::TransportDown) => self.transport.handle_transport_down(),
                    Some(DriverEvent::AppMessage(message)) => {
                        self.transport.handle_app_message(&message)
                    }
                    Some(DriverEvent::SendResult(result)) => {
                        self.transport.handle_send_result(result)
                    }
                    Some(DriverEvent::Post(value)) => {
                        if let Err(error) = self.transport.post_message(&value) {
                            tracing::warn!(%error, "failed to queue posted object");
                        }
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    self.deadline.clear();
                    self.transport.handle_retry_timer();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ListenerId;
    use crate::protocol::{keys, Capabilities};
    use crate::transport::NativeHandler;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default, Clone)]
    struct FakeLower {
        sent: Rc<RefCell<Vec<AppMessage>>>,
    }

    impl LowerTransport for FakeLower {
        fn send_app_message(&mut self, message: AppMessage) {
            self.sent.borrow_mut().push(message);
        }

        fn add_native_listener(&mut self, _event: &str, _id: ListenerId, _handler: NativeHandler) {}

        fn remove_native_listener(&mut self, _event: &str, _id: ListenerId) {}
    }

    #[tokio::test]
    async fn test_driver_runs_handshake_to_completion() {
        let lower = FakeLower::default();
        let (mut driver, tx) = TransportDriver::new(lower.clone(), TransportConfig::default());

        tx.send(DriverEvent::Ready).unwrap();
        tx.send(DriverEvent::SendResult(Ok(()))).unwrap();
        tx.send(DriverEvent::AppMessage(AppMessage::reset_complete(
            &Capabilities::default(),
        )))
        .unwrap();
        tx.send(DriverEvent::SendResult(Ok(()))).unwrap();
        tx.send(DriverEvent::Post(serde_json::json!({"a": 1})))
            .unwrap();
        drop(tx);

        driver.run().await;

        assert!(driver.transport().is_session_open());
        let sent = lower.sent.borrow();
        // ResetRequest, ResetComplete, then the object chunk.
        assert!(sent[0].get(keys::RESET_REQUEST).is_some());
        assert!(sent[1].get(keys::RESET_COMPLETE).is_some());
        assert!(sent[2].get(keys::CHUNK).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_fires_retry_timer() {
        let lower = FakeLower::default();
        let (mut driver, tx) = TransportDriver::new(lower.clone(), TransportConfig::default());

        tx.send(DriverEvent::Ready).unwrap();
        tx.send(DriverEvent::SendResult(Err(SendFailure::new("busy"))))
            .unwrap();

        // With time paused, the runtime auto-advances to the armed deadline,
        // so the retry goes out; the outer timeout then ends the loop.
        let _ = tokio::time::timeout(Duration::from_secs(5), driver.run()).await;

        let sent = lower.sent.borrow();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].get(keys::RESET_REQUEST).is_some());
        assert!(sent[1].get(keys::RESET_REQUEST).is_some());
    }
}
