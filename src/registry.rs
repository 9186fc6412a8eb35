//! The election registry: answers "is there an owner for key K?" and
//! enumerates K's waiters.
//!
//! This implementation fuses the mapping with the connection table by
//! linear scan: `O(N)` per decision, no secondary index to keep
//! consistent on every transition. Fine at the scale this daemon targets
//! (tens of clients); a hash-map-backed registry is a drop-in replacement
//! behind this same two-function contract if a deployment ever outgrows
//! linear scan.

use mio::Token;

use crate::connection::ConnState;
use crate::key::Key;
use crate::table::ConnectionTable;

/// True iff some slot in `table` holds `OWNER` for `key` right now.
pub fn owner_exists(table: &ConnectionTable, key: Key) -> bool {
    table
        .iter_active()
        .any(|(_, record)| record.state() == ConnState::Owner && record.key() == key)
}

/// Every slot in `table` currently in `WAITER` for `key`.
///
/// Returned in ascending slot-index order; callers should not rely on
/// this being fair or FIFO across keys, just deterministic for a given
/// table state.
pub fn waiters_of(table: &ConnectionTable, key: Key) -> Vec<Token> {
    table
        .iter_active()
        .filter(|(_, record)| record.state() == ConnState::Waiter && record.key() == key)
        .map(|(token, _)| token)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionRecord, Transport};
    use mio::net::UnixStream;
    use std::os::unix::net::UnixStream as StdUnixStream;

    fn record_in(state: ConnState, key: Key) -> ConnectionRecord {
        let (a, _b) = StdUnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        ConnectionRecord::new_for_test(Transport::Unix(UnixStream::from_std(a)), state, key)
    }

    #[test]
    fn no_owner_initially() {
        let table = ConnectionTable::new(4);
        assert!(!owner_exists(&table, Key::new([1; 16])));
        assert!(waiters_of(&table, Key::new([1; 16])).is_empty());
    }

    #[test]
    fn owner_and_waiters_are_scoped_per_key() {
        let mut table = ConnectionTable::new(4);
        let key_a = Key::new([0xaa; 16]);
        let key_b = Key::new([0xbb; 16]);

        let owner_slot = table
            .allocate(record_in(ConnState::Owner, key_a))
            .unwrap();
        let waiter_slot = table
            .allocate(record_in(ConnState::Waiter, key_a))
            .unwrap();
        let _unrelated = table
            .allocate(record_in(ConnState::Owner, key_b))
            .unwrap();

        assert!(owner_exists(&table, key_a));
        assert!(owner_exists(&table, key_b));
        assert_eq!(waiters_of(&table, key_a), vec![waiter_slot]);
        assert!(waiters_of(&table, key_b).is_empty());
        let _ = owner_slot;
    }
}
