//! This module exports a minimal message-passing API, which is encapsulated
//! by a `Communicator` trait. Implementors only need to write tagged `send`
//! and `recv` operations for a given transport layer. Two are included: an
//! in-process group over channels, for running several workers as threads,
//! and a pure-Rust TCP transport. The trait then provides default
//! implementations for broadcast, reduce, and reduce-all operations.
//!

mod backoff;
pub mod comm;
pub mod local;
pub mod mailbox;
pub mod tcp;
pub mod util;
