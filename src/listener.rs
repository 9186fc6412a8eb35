//! The event multiplexer and the listening endpoint abstraction it
//! accepts connections from.

use std::fs;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use mio::net::{TcpListener, UnixListener};
use mio::{Events, Interest, Poll, Registry, Token};
use tracing::debug;

use crate::config::{Config, ResolvedEndpoint};
use crate::connection::{ConnectionRecord, Transport};
use crate::error::DaemonError;
use crate::logging;
use crate::protocol;
use crate::table::ConnectionTable;

/// Reserved token for the listening socket; real connections are keyed by
/// their table slot index, which never reaches `usize::MAX` in practice.
const LISTENER_TOKEN: Token = Token(usize::MAX);

/// The bound, listening stream endpoint, generalized over TCP and Unix
/// domain sockets.
pub enum Endpoint {
    /// A TCP listener bound on all interfaces.
    Tcp(TcpListener),
    /// A Unix domain socket listener bound at a filesystem path.
    Unix(UnixListener),
}

impl Endpoint {
    /// Binds `resolved`, applying `SO_REUSEADDR` for TCP, and stale-file
    /// removal for Unix sockets when `force_unlink` is set.
    pub fn bind(resolved: &ResolvedEndpoint, force_unlink: bool) -> Result<Self, DaemonError> {
        match resolved {
            ResolvedEndpoint::Tcp(addr) => Self::bind_tcp(*addr),
            ResolvedEndpoint::Unix(path) => Self::bind_unix(path, force_unlink),
        }
    }

    fn bind_tcp(addr: SocketAddr) -> Result<Self, DaemonError> {
        let domain = if addr.is_ipv6() {
            socket2::Domain::IPV6
        } else {
            socket2::Domain::IPV4
        };

        let to_bind_err = |source: io::Error| DaemonError::Bind {
            endpoint: addr.to_string(),
            source,
        };

        let socket = socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))
            .map_err(to_bind_err)?;
        socket.set_reuse_address(true).map_err(to_bind_err)?;
        socket.set_nonblocking(true).map_err(to_bind_err)?;
        socket.bind(&addr.into()).map_err(to_bind_err)?;
        socket.listen(1024).map_err(to_bind_err)?;

        let std_listener: std::net::TcpListener = socket.into();
        Ok(Endpoint::Tcp(TcpListener::from_std(std_listener)))
    }

    fn bind_unix(path: &PathBuf, force_unlink: bool) -> Result<Self, DaemonError> {
        if force_unlink && path.exists() {
            fs::remove_file(path).map_err(|source| DaemonError::Unlink {
                path: path.clone(),
                source,
            })?;
        }

        let listener = UnixListener::bind(path).map_err(|source| DaemonError::Bind {
            endpoint: path.display().to_string(),
            source,
        })?;
        Ok(Endpoint::Unix(listener))
    }

    fn register(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Endpoint::Tcp(l) => registry.register(l, LISTENER_TOKEN, Interest::READABLE),
            Endpoint::Unix(l) => registry.register(l, LISTENER_TOKEN, Interest::READABLE),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Endpoint::Tcp(l) => registry.deregister(l),
            Endpoint::Unix(l) => registry.deregister(l),
        }
    }

    fn accept(&self) -> io::Result<Transport> {
        match self {
            Endpoint::Tcp(l) => l.accept().map(|(stream, _)| Transport::Tcp(stream)),
            Endpoint::Unix(l) => l.accept().map(|(stream, _)| Transport::Unix(stream)),
        }
    }

    /// The bound TCP address, if this endpoint is TCP. Useful for tests
    /// that bind an ephemeral port (`endpoint = "0"`) and need to learn
    /// which one the kernel picked.
    pub fn tcp_local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Endpoint::Tcp(l) => l.local_addr(),
            Endpoint::Unix(_) => Err(io::Error::new(
                ErrorKind::InvalidInput,
                "endpoint is a Unix socket, not TCP",
            )),
        }
    }
}

/// The single-threaded cooperative event loop. One `EventLoop` owns the
/// listening endpoint, the connection table, and the `mio::Poll`
/// instance that multiplexes both.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    endpoint: Endpoint,
    listener_registered: bool,
    table: ConnectionTable,
    poll_interval: Duration,
}

impl EventLoop {
    /// Binds the configured endpoint and prepares the event loop. Does not
    /// start serving; call [`EventLoop::run`] for that.
    pub fn new(config: &Config) -> Result<Self, DaemonError> {
        if config.max_connections == 0 {
            return Err(DaemonError::EmptyTable);
        }

        let resolved = ResolvedEndpoint::resolve(&config.endpoint);
        let mut endpoint = Endpoint::bind(&resolved, config.force_unlink)?;

        let poll = Poll::new().map_err(DaemonError::Poll)?;
        endpoint
            .register(poll.registry())
            .map_err(|source| DaemonError::Bind {
                endpoint: config.endpoint.clone(),
                source,
            })?;

        Ok(Self {
            poll,
            events: Events::with_capacity(1024),
            endpoint,
            listener_registered: true,
            table: ConnectionTable::new(config.max_connections),
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
        })
    }

    /// The bound TCP address, if configured for TCP. See
    /// [`Endpoint::tcp_local_addr`].
    pub fn tcp_local_addr(&self) -> io::Result<SocketAddr> {
        self.endpoint.tcp_local_addr()
    }

    /// Runs the event loop forever. Does not return under normal
    /// operation.
    pub fn run(&mut self) -> ! {
        loop {
            self.run_once();
        }
    }

    /// Runs a single iteration: one readiness wait, followed by draining
    /// the listener (if ready) and dispatching every ready connection.
    /// Exposed separately from [`Self::run`] so tests can drive the loop
    /// deterministically instead of blocking forever.
    pub fn run_once(&mut self) {
        match self.poll.poll(&mut self.events, Some(self.poll_interval)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => return,
            Err(e) => {
                // The readiness wait is the only syscall in this loop that
                // isn't expected to fail under normal operation; treat it
                // like any other transient hiccup and let the next
                // iteration retry rather than taking the whole daemon down.
                debug!(error = %e, "poll error");
                return;
            }
        }

        let mut listener_ready = false;
        let mut ready = Vec::new();
        for event in self.events.iter() {
            if event.token() == LISTENER_TOKEN {
                listener_ready = true;
            } else {
                ready.push(event.token());
            }
        }

        if listener_ready {
            self.accept_all();
        }

        for token in ready {
            protocol::on_readable(&mut self.table, token);
        }

        if !self.listener_registered && !self.table.is_full() {
            if self.endpoint.register(self.poll.registry()).is_ok() {
                self.listener_registered = true;
            }
        }
    }

    /// Drains the listener: accepts connections until `accept` would
    /// block or the table is full.
    fn accept_all(&mut self) {
        loop {
            if self.table.is_full() {
                let _ = self.endpoint.deregister(self.poll.registry());
                self.listener_registered = false;
                return;
            }

            let transport = match self.endpoint.accept() {
                Ok(transport) => transport,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    debug!(error = %e, "accept error");
                    return;
                }
            };

            if let Err(e) = transport.set_nodelay() {
                debug!(error = %e, "set_nodelay failed");
            }

            let mut record = ConnectionRecord::new(transport);
            let registry = self.poll.registry();
            let token_slot = self.table.allocate_with(|token| {
                let _ = record.transport_mut().register(registry, token, Interest::READABLE);
                record
            });

            if let Ok(token) = token_slot {
                logging::connected(token);
            }
        }
    }
}
