//! # postwire
//!
//! A reliable, chunked, JSON-object messaging channel layered on top of an
//! unreliable, small-MTU key/value "app message" transport between two
//! peers (a host runtime and a remote device).
//!
//! ## Architecture
//!
//! - **Control plane**: a three-way reset handshake negotiates a protocol
//!   version and per-direction chunk sizes before any objects flow
//! - **Data plane**: objects are serialized to UTF-8 JSON with a NUL
//!   terminator, fragmented into sized chunks, sent strictly one unit at a
//!   time with bounded retry, and reassembled on the far side
//!
//! Control messages (handshake dictionaries) always outrank object chunks;
//! either side can force renegotiation at any time and the channel
//! converges back to an open session.
//!
//! The core is sans-I/O: it is driven entirely through `handle_*` entry
//! points and talks to the outside world through the [`LowerTransport`] and
//! [`RetryScheduler`] traits, which keeps every protocol behavior
//! deterministic under test. The [`driver`] module supplies a tokio event
//! loop for real deployments.
//!
//! ## Example
//!
//! ```ignore
//! use postwire::PostMessageTransport;
//!
//! let mut transport = PostMessageTransport::new(lower, scheduler);
//! transport.on("message", |event| println!("got {:?}", event));
//! transport.on("connected", |_| println!("session open"));
//!
//! // Host glue:
//! transport.handle_ready();
//! // ... feed inbound dictionaries and send completions ...
//!
//! transport.post_message(&serde_json::json!({ "cmd": "ping" }))?;
//! ```

pub mod codec;
pub mod control;
pub mod driver;
pub mod error;
pub mod events;
pub mod protocol;
pub mod sender;
pub mod transport;

mod postmessage;

pub use error::{PostwireError, Result};
pub use events::{EventKind, Events, ListenerId, TransportEvent};
pub use postmessage::{
    ControlFailurePolicy, ListenerHandle, PostMessageTransport, TransportBuilder, TransportConfig,
};
pub use transport::{LowerTransport, NativeHandler, RetryScheduler, SendFailure};
