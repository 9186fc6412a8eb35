//! Per-slot connection state: the key buffer, the state machine, and the
//! underlying transport for one client.

use std::io::{self, Read, Write};

use mio::event::Source;
use mio::net::{TcpStream, UnixStream};
use mio::{Interest, Registry, Token};

use crate::key::{Key, KEY_SIZE};

/// The underlying stream handle for a slot, generalized over the two
/// endpoint kinds the daemon can be configured with. Everything above
/// this layer — the connection table, protocol handler, event loop — is
/// written once against this type.
#[derive(Debug)]
pub enum Transport {
    /// A TCP stream accepted from a TCP listener.
    Tcp(TcpStream),
    /// A Unix domain stream accepted from a Unix listener.
    Unix(UnixStream),
}

impl Transport {
    /// Disables Nagle-style coalescing on TCP streams. A no-op for Unix
    /// sockets, which have no such coalescing to disable.
    pub fn set_nodelay(&self) -> io::Result<()> {
        match self {
            Transport::Tcp(stream) => stream.set_nodelay(true),
            Transport::Unix(_) => Ok(()),
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(stream) => stream.read(buf),
            Transport::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(stream) => stream.write(buf),
            Transport::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Tcp(stream) => stream.flush(),
            Transport::Unix(stream) => stream.flush(),
        }
    }
}

impl Source for Transport {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            Transport::Tcp(stream) => stream.register(registry, token, interests),
            Transport::Unix(stream) => stream.register(registry, token, interests),
        }
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            Transport::Tcp(stream) => stream.reregister(registry, token, interests),
            Transport::Unix(stream) => stream.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Transport::Tcp(stream) => stream.deregister(registry),
            Transport::Unix(stream) => stream.deregister(registry),
        }
    }
}

/// The three states a live slot can be in. The free state is represented
/// at the table layer by the absence of a [`ConnectionRecord`] — a slot
/// with no record open has no transport, so this enum doesn't need a
/// variant for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Reading a 16-byte key; `key_offset` bytes of it have arrived so far.
    KeyRead,
    /// Holds the lock for `key`; may release it or disconnect.
    Owner,
    /// Blocked on `key`'s current owner releasing.
    Waiter,
}

/// One active (non-`FREE`) connection record.
#[derive(Debug)]
pub struct ConnectionRecord {
    transport: Transport,
    state: ConnState,
    key: [u8; KEY_SIZE],
    key_offset: usize,
}

impl ConnectionRecord {
    /// A freshly accepted connection always starts in `KeyRead` with a
    /// zero offset.
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            state: ConnState::KeyRead,
            key: [0; KEY_SIZE],
            key_offset: 0,
        }
    }

    /// Reads up to `KEY_SIZE - key_offset` bytes into the key buffer.
    /// Returns the number of bytes read, like [`Read::read`]; `Ok(0)` means
    /// the peer closed the connection.
    pub fn fill_key(&mut self) -> io::Result<usize> {
        debug_assert_eq!(self.state, ConnState::KeyRead);
        let n = self.transport.read(&mut self.key[self.key_offset..KEY_SIZE])?;
        self.key_offset += n;
        Ok(n)
    }

    /// Whether the key buffer has received all 16 bytes.
    pub fn key_complete(&self) -> bool {
        self.key_offset == KEY_SIZE
    }

    /// The key accumulated so far (only meaningful once [`Self::key_complete`]).
    pub fn key(&self) -> Key {
        Key::new(self.key)
    }

    /// Resets to `KeyRead` with a zero offset, for connection reuse after
    /// a release or a notification.
    pub fn reset_for_keyread(&mut self) {
        self.state = ConnState::KeyRead;
        self.key_offset = 0;
        self.key = [0; KEY_SIZE];
    }

    /// Transitions to `OWNER` for the key just completed.
    pub fn become_owner(&mut self) {
        self.state = ConnState::Owner;
    }

    /// Transitions to `WAITER` for the key just completed.
    pub fn become_waiter(&mut self) {
        self.state = ConnState::Waiter;
    }

    /// Current state.
    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Writes a single reply byte (`O` or `R`). A short write is treated
    /// by the caller as failure, the same as a disconnect.
    pub fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        let n = self.transport.write(&[byte])?;
        if n != 1 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short write"));
        }
        self.transport.flush()
    }

    /// Reads exactly one byte, for the `OWNER` release-byte check.
    /// `Ok(None)` means the peer closed the connection (EOF).
    pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.transport.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    /// Test-only constructor that starts a record directly in a given
    /// state with a given key, skipping the byte-by-byte `fill_key` path.
    #[cfg(test)]
    pub(crate) fn new_for_test(transport: Transport, state: ConnState, key: Key) -> Self {
        Self {
            transport,
            state,
            key: key.into_bytes(),
            key_offset: KEY_SIZE,
        }
    }
}
