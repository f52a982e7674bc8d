use std::io;
use thiserror::Error;

/// Errors raised by the listener and the readiness loop.
///
/// Every variant is fatal for [`Server::run`](crate::Server::run): once the
/// listener or the poll instance is unusable the server cannot make progress.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Binding or configuring the listening socket failed
    #[error("bind failed: {0}")]
    Bind(io::Error),

    /// Creating the poll instance or its waker failed
    #[error("poll initialization failed: {0}")]
    Init(io::Error),

    /// Registering the listener with the poll instance failed
    #[error("registration failed: {0}")]
    Registration(io::Error),

    /// The readiness wait returned an error other than `Interrupted`
    #[error("polling failed: {0}")]
    Polling(io::Error),

    /// The configuration cannot be used to build a pool
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Wrapper for standard I/O errors
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// A connection's buffer filled up without ever presenting the terminator.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("request exceeds {capacity} bytes without a blank line")]
    Oversized { capacity: usize },
}

/// Errors raised while turning a request line into a dispatchable request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    /// The request line is not `METHOD TARGET [HTTP/x.y]`
    #[error("malformed request line: {0:?}")]
    Malformed(String),

    /// The target climbs out of the server root
    #[error("target escapes the server root: {0}")]
    Traversal(String),
}

/// Errors raised by the process runner and the worker pool.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Spawning the child failed, possibly after retries
    #[error("spawn of {program} failed after {attempts} attempt(s): {source}")]
    Spawn {
        program: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    /// Waiting for the child to exit failed
    #[error("wait failed: {0}")]
    Wait(io::Error),

    /// Error when a mutex lock becomes poisoned due to a panic in another thread
    #[error("mutex lock poisoned")]
    LockPoisoned,

    /// Error when spawning a new worker thread fails
    #[error("thread spawn failed: {0}")]
    ThreadSpawn(io::Error),

    /// Wrapper for standard I/O errors
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Type alias for Results using PoolError as the error type
pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// Type alias for Results using RunnerError as the error type
pub type RunnerResult<T> = std::result::Result<T, RunnerError>;
