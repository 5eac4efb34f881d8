//! # Message Protocol
//!
//! Turns messages into sequences of DATA packets and back.
//!
//! ## Components
//! - **Fragment**: chunking, the 16-bit sequence counter and strict in-order
//!   reassembly for ordered streams
//! - **Retransmit**: acknowledgement bookkeeping and a reorder buffer for
//!   transports that drop, duplicate or reorder frames
//!
//! Both halves are pure state machines; the channels in [`crate::service`]
//! drive them with real I/O.

pub mod fragment;
pub mod retransmit;

pub use fragment::{Reassembler, SequenceCounter};
pub use retransmit::{PendingSend, Placement, ReorderBuffer};
