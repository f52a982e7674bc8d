use std::io::{self, Read};
use std::net::{self as sys, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::error::PoolResult;
use crate::executor::WorkerPool;
use crate::net::{EventLoop, Handoff, Listener, Outcome, Shutdown};

/// How long an oversized request's leftovers are drained before closing.
const LINGER: Duration = Duration::from_secs(1);

/// Upper bound on leftover bytes drained before giving up.
const LINGER_LIMIT: usize = 64 * 1024;

/// The HTTP server: a readiness loop feeding a dispatcher.
///
/// # Example
/// ```no_run
/// use pollhttpd::{Server, ServerConfig};
///
/// let config = ServerConfig { port: 3000, ..ServerConfig::default() };
/// Server::bind(config)?.run()?;
/// # Ok::<(), pollhttpd::PoolError>(())
/// ```
pub struct Server {
    event_loop: EventLoop,
    dispatcher: Arc<Dispatcher>,
    workers: Option<WorkerPool>,
}

impl Server {
    /// Validates `config` and binds the listening socket.
    ///
    /// # Errors
    /// - Returns `PoolError::Config` for unusable limits
    /// - Returns `PoolError::Bind` if the address cannot be bound
    pub fn bind(config: ServerConfig) -> PoolResult<Self> {
        config.validate()?;

        let listener = Listener::bind(config.address())?;
        let event_loop = EventLoop::new(listener, config.max_connections, config.buffer_capacity)?;

        // zero workers keeps dispatch, child processes included, on the loop thread
        let workers = match config.max_workers {
            0 => None,
            n => Some(WorkerPool::new(n, config.worker_keep_alive())),
        };

        log::debug!(
            "serving {} with {} slot(s) of {} bytes, {} dispatch worker(s)",
            config.root.display(),
            config.max_connections,
            config.buffer_capacity,
            config.max_workers
        );

        Ok(Self {
            event_loop,
            dispatcher: Arc::new(Dispatcher::new(&config)),
            workers,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.event_loop.local_addr()
    }

    /// A handle that stops [`run`](Server::run) from another thread.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.event_loop.shutdown_handle()
    }

    /// Serves until shut down or until the readiness wait fails.
    pub fn run(self) -> PoolResult<()> {
        let Server {
            mut event_loop,
            dispatcher,
            workers,
        } = self;

        event_loop.run(|handoff| match &workers {
            Some(pool) => {
                let dispatcher = dispatcher.clone();
                pool.execute(move || respond(&dispatcher, handoff));
            }
            None => respond(&dispatcher, handoff),
        })
    }
}

/// Writes the single response for a handed-off connection, then closes it.
fn respond(dispatcher: &Dispatcher, handoff: Handoff) {
    let Handoff {
        mut stream,
        peer,
        outcome,
    } = handoff;

    match outcome {
        Outcome::Request(line) => match dispatcher.dispatch(&line, &mut stream) {
            Ok(status) => log::info!("{} \"{}\" {}", peer, line, status.code()),
            Err(err) => log::warn!("{} \"{}\" write failed: {}", peer, line, err),
        },
        Outcome::Oversized(err) => {
            log::warn!("{}: {}", peer, err);
            match dispatcher.reject_oversized(&mut stream) {
                Ok(_) => linger_close(&mut stream, peer),
                Err(err) => log::warn!("{} write failed: {}", peer, err),
            }
        }
    }
}

/// Half-closes the connection, then reads off whatever the client is still
/// sending.
///
/// Dropping a socket with unread input makes the kernel reset the connection,
/// and a reset can discard the response before the client reads it.
fn linger_close(stream: &mut sys::TcpStream, peer: SocketAddr) {
    if let Err(err) = stream.shutdown(sys::Shutdown::Write) {
        log::debug!("{} shutdown failed: {}", peer, err);
        return;
    }

    let deadline = Instant::now() + LINGER;
    let mut drained = 0;
    let mut buf = [0u8; 4096];
    while drained < LINGER_LIMIT {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() || stream.set_read_timeout(Some(left)).is_err() {
            break;
        }
        match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => drained += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    log::debug!("{} still sending after {} leftover bytes, closing", peer, drained);
}
