//! The readiness loop: one thread accepts connections, reads request bytes
//! into the slot pool and hands complete requests off for dispatch.

use std::io::{self, Read};
use std::net::{self as sys, SocketAddr, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::error::{FrameError, PoolError, PoolResult};
use crate::framer::{self, Frame};
use crate::pool::Pool;

const LISTENER: Token = Token(0);
const SHUTDOWN: Token = Token(usize::MAX);

/// How soon an accept burst cut short by a resource error is retried.
const ACCEPT_RETRY: Duration = Duration::from_millis(100);

/// Slot `i` is watched under token `i + 1`.
fn slot_token(index: usize) -> Token {
    Token(index + 1)
}

/// The bound, non-blocking listening socket.
pub struct Listener {
    inner: sys::TcpListener,
}

impl Listener {
    /// Binds `addr` and switches the socket to non-blocking mode.
    ///
    /// # Errors
    /// - Returns `PoolError::Bind` if the address cannot be bound
    pub fn bind<A: ToSocketAddrs>(addr: A) -> PoolResult<Self> {
        let inner = sys::TcpListener::bind(addr).map_err(PoolError::Bind)?;
        inner.set_nonblocking(true).map_err(PoolError::Bind)?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Accepts one pending connection, already in non-blocking mode.
    ///
    /// `WouldBlock` means nothing is pending.
    pub fn accept(&self) -> io::Result<(sys::TcpStream, SocketAddr)> {
        let (stream, peer) = self.inner.accept()?;
        stream.set_nonblocking(true)?;
        Ok((stream, peer))
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

/// A client that is still sending its request.
pub struct Connection {
    stream: sys::TcpStream,
    peer: SocketAddr,
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

/// Why a connection left the pool for dispatch.
#[derive(Debug)]
pub enum Outcome {
    /// The request line of a complete frame.
    Request(String),
    /// The buffer filled up before the frame completed.
    Oversized(FrameError),
}

/// A connection leaving the loop, in blocking mode, with what it asked for.
///
/// Dropping the stream closes the connection.
#[derive(Debug)]
pub struct Handoff {
    pub stream: sys::TcpStream,
    pub peer: SocketAddr,
    pub outcome: Outcome,
}

/// Stops a running [`EventLoop`] from another thread.
#[derive(Clone)]
pub struct Shutdown {
    waker: Arc<Waker>,
    requested: Arc<AtomicBool>,
}

impl Shutdown {
    /// Asks the loop to return after the current iteration.
    pub fn trigger(&self) -> io::Result<()> {
        self.requested.store(true, Ordering::Release);
        self.waker.wake()
    }

    fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// Multiplexes the listener and every pooled connection on one thread.
pub struct EventLoop {
    poll: Poll,
    listener: Listener,
    pool: Pool<Connection>,
    shutdown: Shutdown,
    /// Connections may still be queued on the listener without a new edge.
    accept_backlog: bool,
}

impl EventLoop {
    /// Creates the poll instance and starts watching the listener.
    ///
    /// # Errors
    /// - Returns `PoolError::Init` if the poll instance or waker cannot be created
    /// - Returns `PoolError::Registration` if the listener cannot be watched
    pub fn new(listener: Listener, max_connections: usize, buffer_capacity: usize) -> PoolResult<Self> {
        let poll = Poll::new().map_err(PoolError::Init)?;
        poll.registry()
            .register(&mut SourceFd(&listener.as_raw_fd()), LISTENER, Interest::READABLE)
            .map_err(PoolError::Registration)?;
        let waker = Waker::new(poll.registry(), SHUTDOWN).map_err(PoolError::Init)?;

        Ok(Self {
            poll,
            listener,
            pool: Pool::new(max_connections, buffer_capacity),
            shutdown: Shutdown {
                waker: Arc::new(waker),
                requested: Arc::new(AtomicBool::new(false)),
            },
            accept_backlog: false,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Runs until shut down or until waiting for readiness fails.
    ///
    /// Per iteration the listener is serviced first, then ready connections
    /// in ascending slot order. Readiness is edge-triggered, so each ready
    /// source is drained until it would block.
    ///
    /// # Errors
    /// - Returns `PoolError::Polling` if the wait fails with anything but `Interrupted`
    pub fn run<F>(&mut self, mut hand_off: F) -> PoolResult<()>
    where
        F: FnMut(Handoff),
    {
        let mut events = Events::with_capacity(1024);
        let mut ready = Vec::with_capacity(1024);

        log::info!("listening on {}", self.local_addr()?);

        loop {
            let timeout = if self.accept_backlog { Some(ACCEPT_RETRY) } else { None };
            if let Err(err) = self.poll.poll(&mut events, timeout) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("Polling error: {}", err);
                return Err(PoolError::Polling(err));
            }

            let mut listener_ready = self.accept_backlog;
            for event in events.iter() {
                match event.token() {
                    LISTENER => listener_ready = true,
                    SHUTDOWN => {
                        if self.shutdown.is_requested() {
                            log::info!("shutting down with {} open connection(s)", self.pool.len());
                            return Ok(());
                        }
                    }
                    Token(token) => ready.push(token - 1),
                }
            }

            if listener_ready {
                self.accept_pending();
            }

            ready.sort_unstable();
            for index in ready.drain(..) {
                self.service(index, &mut hand_off);
            }
        }
    }

    /// Accepts until the listener would block.
    ///
    /// Errors tied to one connection skip it. Any other error (descriptor
    /// exhaustion, say) leaves connections queued with no further edge to
    /// announce them, so the burst is retried after [`ACCEPT_RETRY`].
    fn accept_pending(&mut self) {
        self.accept_backlog = false;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if is_per_connection(&err) => {
                    log::debug!("accept skipped a connection: {}", err);
                    continue;
                }
                Err(err) => {
                    log::warn!("accept failed, retrying in {:?}: {}", ACCEPT_RETRY, err);
                    self.accept_backlog = true;
                    return;
                }
            }
        }
    }

    fn admit(&mut self, stream: sys::TcpStream, peer: SocketAddr) {
        let fd = stream.as_raw_fd();
        let index = match self.pool.insert(Connection { stream, peer }) {
            Ok(index) => index,
            Err(_) => {
                log::warn!("too many clients, dropping connection from {}", peer);
                return;
            }
        };

        if let Err(err) = self
            .poll
            .registry()
            .register(&mut SourceFd(&fd), slot_token(index), Interest::READABLE)
        {
            log::warn!("cannot watch connection from {}: {}", peer, err);
            self.pool.remove(index);
            return;
        }

        log::debug!(
            "accepted {} into slot {} ({} open, high water {:?})",
            peer,
            index,
            self.pool.len(),
            self.pool.high_water()
        );
    }

    /// Drains one ready connection.
    fn service<F>(&mut self, index: usize, hand_off: &mut F)
    where
        F: FnMut(Handoff),
    {
        loop {
            let slot = match self.pool.get_mut(index) {
                Some(slot) => slot,
                None => return,
            };

            match slot.fill() {
                Ok(0) => {
                    self.release(index, "closed by peer");
                    return;
                }
                Ok(_) => match framer::inspect(slot.filled(), slot.capacity()) {
                    Ok(Frame::Incomplete) => continue,
                    Ok(Frame::Complete(line)) => {
                        self.complete(index, Outcome::Request(line), hand_off);
                        return;
                    }
                    Err(err) => {
                        self.complete(index, Outcome::Oversized(err), hand_off);
                        return;
                    }
                },
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::warn!("read error on slot {}: {}", index, err);
                    self.release(index, "read error");
                    return;
                }
            }
        }
    }

    /// Frees the slot and stops watching its descriptor.
    fn take(&mut self, index: usize) -> Option<Connection> {
        let conn = self.pool.remove(index)?;
        if let Err(err) = self
            .poll
            .registry()
            .deregister(&mut SourceFd(&conn.stream.as_raw_fd()))
        {
            log::warn!("cannot unwatch slot {}: {}", index, err);
        }
        Some(conn)
    }

    fn release(&mut self, index: usize, reason: &str) {
        if let Some(conn) = self.take(index) {
            log::debug!("{} {}, slot {} freed", conn.peer, reason, index);
        }
    }

    fn complete<F>(&mut self, index: usize, outcome: Outcome, hand_off: &mut F)
    where
        F: FnMut(Handoff),
    {
        let Connection { stream, peer } = match self.take(index) {
            Some(conn) => conn,
            None => return,
        };

        if let Err(err) = stream.set_nonblocking(false) {
            log::warn!("cannot switch {} to blocking mode: {}", peer, err);
            return;
        }

        hand_off(Handoff { stream, peer, outcome });
    }
}

/// Accept errors that concern only the connection being accepted.
fn is_per_connection(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
    )
}
