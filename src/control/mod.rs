//! Control plane - session states and the reset/negotiation state machine.
//!
//! A session is negotiated with a three-way reset handshake over the same
//! key/value channel that carries object chunks:
//!
//! 1. One side sends `ResetRequest`
//! 2. The other side answers `ResetComplete` with its capabilities
//! 3. The initiator answers with its own `ResetComplete`
//!
//! Both sides may initiate; protocol violations and unexpected messages
//! drive the machine back into a renegotiating state rather than tearing
//! anything down.

mod machine;
mod state;

pub use machine::{ControlEffect, SessionControl};
pub use state::SessionState;
