//! `keymutexd`: a single-process keyed mutex daemon.
//!
//! Many clients may want to recompute the same expensive value at once
//! (the classic cache-miss thundering herd). This daemon elects exactly
//! one of them to do the work while the rest block, then releases the
//! rest once the elected client reports it is done. It holds no values
//! and no durable state; it is a pure in-memory election and notification
//! service over a stream socket.
//!
//! The wire protocol and the event loop that drives it are the entire
//! surface of this crate; see [`listener`] for the event loop and
//! [`protocol`] for the per-state transitions.

pub mod config;
pub mod connection;
pub mod error;
pub mod key;
pub mod listener;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod table;
