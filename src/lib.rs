#![doc = include_str!("../README.md")]

//! # Architecture
//!
//! - `EventLoop`: one thread multiplexes the listener and every connection
//!   still sending its request, using mio readiness events
//! - `Pool`: fixed-capacity slot arena holding each connection's buffer
//! - `framer`: detects the blank line ending a request and extracts the
//!   request line
//! - `Dispatcher`: parses the request line, classifies the target on disk
//!   and picks a response strategy
//! - `ProcessRunner`: spawn-and-wait used for directory listings and CGI
//!   scripts, with the child writing straight to the connection
//! - `WorkerPool`: threads that run the dispatcher so a slow child does not
//!   stall the loop
//!
//! # Configuration
//! Settings come from:
//! - Environment variables (prefixed with `POLLHTTPD_`)
//! - Configuration file (`pollhttpd.toml` and friends)
//! - The [`ServerConfig`] struct directly

pub use crate::config::ServerConfig;
pub use crate::dispatch::{Dispatcher, Request, Target};
pub use crate::error::{FrameError, PoolError, PoolResult, RequestError, RunnerError, RunnerResult};
pub use crate::executor::WorkerPool;
pub use crate::framer::Frame;
pub use crate::http::StatusCode;
pub use crate::net::{EventLoop, Handoff, Listener, Outcome, Shutdown};
pub use crate::pool::{Pool, Slot};
pub use crate::process::ProcessRunner;
pub use crate::server::Server;

mod config;
mod dispatch;
mod error;
mod executor;
pub mod framer;
pub mod http;
mod net;
mod pool;
mod process;
pub mod respond;
mod server;
