//! The logging adapter: one structured line per state-visible event,
//! carrying a stable per-slot identifier and, when applicable, the key's
//! lowercase-hex encoding.

use mio::Token;
use tracing::{debug, info};

use crate::key::Key;

/// A new connection was accepted into `slot`.
pub fn connected(slot: Token) {
    info!(slot = slot.0, event = "connected");
}

/// `slot` was freed (peer close, read/write error, or protocol violation).
pub fn closed(slot: Token) {
    debug!(slot = slot.0, event = "closed");
}

/// `slot` was granted ownership of `key`.
pub fn owner(slot: Token, key: Key) {
    info!(slot = slot.0, key = %key, event = "owner");
}

/// `slot` enrolled as a waiter on `key` because an owner already exists.
pub fn notowner(slot: Token, key: Key) {
    info!(slot = slot.0, key = %key, event = "notowner");
}

/// `slot` (the owner of `key`) released it, by `R` or by disconnect.
pub fn release(slot: Token, key: Key) {
    info!(slot = slot.0, key = %key, event = "release");
}

/// `slot` was notified that `key`'s owner released.
pub fn notify(slot: Token, key: Key) {
    info!(slot = slot.0, key = %key, event = "notify");
}
