//! The protocol handler: per-state parsing of inbound bytes, state
//! transitions, and waiter notification.
//!
//! `mio` registers sockets edge-triggered, so a single readiness
//! indication only promises that *some* new data arrived, not that a
//! single `read` drains it. A client that pipelines a release byte and
//! its next key in one write (or several keys back to back) can land
//! all of it in the kernel buffer before the event loop wakes up once.
//! [`on_readable`] therefore keeps re-dispatching to the (possibly newly
//! transitioned) state handler for as long as a handler actually
//! consumes bytes, and only stops once one reports `WouldBlock` — the
//! standard "read until `EAGAIN`" discipline for edge-triggered sockets.

use std::io::ErrorKind;

use mio::Token;

use crate::connection::ConnState;
use crate::key::Key;
use crate::logging;
use crate::registry;
use crate::table::ConnectionTable;

/// What the event loop should do with `token`'s poll registration after a
/// dispatch returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The slot is still open; its registration is unchanged.
    Keep,
    /// The slot was freed; deregistration already happened inside [`close`].
    Closed,
}

/// The outcome of one state handler's attempt to read from the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// A read succeeded and may have left more already-buffered data
    /// behind (possibly for a different state, after a transition); try
    /// dispatching again before giving the socket back to `mio`.
    Progressed,
    /// `read` returned `WouldBlock`: nothing more to do until the next
    /// readiness event.
    Blocked,
    /// The slot was freed.
    Closed,
}

/// Dispatches a readable event on `token`, draining every complete
/// protocol unit (keys, release bytes) currently buffered for it.
pub fn on_readable(table: &mut ConnectionTable, token: Token) -> Disposition {
    loop {
        let state = match table.get(token) {
            Some(record) => record.state(),
            None => return Disposition::Closed,
        };

        let step = match state {
            ConnState::KeyRead => handle_keyread(table, token),
            ConnState::Owner => handle_owner(table, token),
            ConnState::Waiter => handle_waiter(table, token),
        };

        match step {
            Step::Progressed => continue,
            Step::Blocked => return Disposition::Keep,
            Step::Closed => return Disposition::Closed,
        }
    }
}

fn handle_keyread(table: &mut ConnectionTable, token: Token) -> Step {
    let record = table.get_mut(token).expect("caller checked token is active");

    match record.fill_key() {
        Ok(0) => {
            close(table, token);
            return Step::Closed;
        }
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::WouldBlock => return Step::Blocked,
        Err(_) => {
            close(table, token);
            return Step::Closed;
        }
    }

    let record = table.get(token).expect("slot wasn't freed above");
    if !record.key_complete() {
        return Step::Progressed;
    }
    let key = record.key();

    if registry::owner_exists(table, key) {
        table.get_mut(token).unwrap().become_waiter();
        logging::notowner(token, key);
        Step::Progressed
    } else {
        if table.get_mut(token).unwrap().write_byte(b'O').is_err() {
            close(table, token);
            return Step::Closed;
        }
        table.get_mut(token).unwrap().become_owner();
        logging::owner(token, key);
        Step::Progressed
    }
}

fn handle_owner(table: &mut ConnectionTable, token: Token) -> Step {
    let key = table.get(token).expect("caller checked token is active").key();
    let byte = table.get_mut(token).unwrap().read_byte();

    match byte {
        Ok(Some(b'R')) => {
            table.get_mut(token).unwrap().reset_for_keyread();
            logging::release(token, key);
            notify_waiters(table, key);
            Step::Progressed
        }
        // Any other byte is a protocol violation; EOF is a plain
        // disconnect. Both are treated the same as a clean release so a
        // misbehaving owner can't strand its waiters.
        Ok(Some(_)) | Ok(None) => {
            close(table, token);
            logging::release(token, key);
            notify_waiters(table, key);
            Step::Closed
        }
        Err(e) if e.kind() == ErrorKind::WouldBlock => Step::Blocked,
        Err(_) => {
            close(table, token);
            logging::release(token, key);
            notify_waiters(table, key);
            Step::Closed
        }
    }
}

fn handle_waiter(table: &mut ConnectionTable, token: Token) -> Step {
    // A waiter never speaks; any byte it actually sends, or an EOF, means
    // the peer went away or misbehaved. Read once to tell that apart from
    // the case where this dispatch is just a drain continuation with
    // nothing left for this slot (handled by `Blocked`, which leaves the
    // connection waiting as normal).
    let record = table.get_mut(token).expect("caller checked token is active");
    match record.read_byte() {
        Ok(_) => {
            close(table, token);
            Step::Closed
        }
        Err(e) if e.kind() == ErrorKind::WouldBlock => Step::Blocked,
        Err(_) => {
            close(table, token);
            Step::Closed
        }
    }
}

/// Releases every connection waiting on `key`: writes one `R` byte and
/// returns it to `KeyRead`, or frees it on write failure.
fn notify_waiters(table: &mut ConnectionTable, key: Key) {
    for waiter in registry::waiters_of(table, key) {
        let record = match table.get_mut(waiter) {
            Some(record) => record,
            None => continue,
        };

        match record.write_byte(b'R') {
            Ok(()) => {
                table.get_mut(waiter).unwrap().reset_for_keyread();
                logging::notify(waiter, key);
            }
            Err(_) => close(table, waiter),
        }
    }
}

fn close(table: &mut ConnectionTable, token: Token) {
    table.free(token);
    logging::closed(token);
}
