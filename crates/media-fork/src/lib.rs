//! Media Fork Manager — the RTP-facing fan-out between the telephony leg
//! and its consumers (spec.md §4.2, component C2).
//!
//! Audio arrives on one producer (the RTP receive callback) and is pushed
//! into a bounded [`ring_buffer::RingBuffer`]; any number of consumers
//! (primarily the AI session server) drain it independently through a
//! [`ring_buffer::ConsumerCursor`]. [`fork_manager::ForkManager`] owns the
//! buffer, tracks each consumer's `available` flag, and publishes the
//! `primary_available`/`fallback_active` signal C3 reads when deciding
//! whether to route audio to the AI pipeline or play a pre-recorded
//! fallback message.

pub mod error;
pub mod fork_manager;
pub mod ring_buffer;

pub mod prelude {
    pub use crate::error::{ForkError, ForkResult};
    pub use crate::fork_manager::{Consumer, ForkManager, DEFAULT_T_DEGRADE};
    pub use crate::ring_buffer::{ConsumerCursor, Entry, RingBuffer, DEFAULT_RING_BUFFER_MS};
}
