//! Spawn-and-wait for the directory listing and CGI strategies.

use std::ffi::OsStr;
use std::io;
use std::os::fd::AsFd;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use crate::error::{RunnerError, RunnerResult};

/// Runs external programs with their output going straight to a connection.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    retries: u32,
    backoff: Duration,
}

impl ProcessRunner {
    /// `retries` extra spawn attempts are made while the system reports
    /// it is out of processes.
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            backoff: Duration::from_millis(10),
        }
    }

    /// Spawns `program` with `args`, stdout and stderr both duplicated from
    /// `target`, and blocks until it exits.
    ///
    /// The caller's thread is tied up for the child's whole lifetime.
    pub fn run<T, I, S>(&self, program: &OsStr, args: I, target: &T) -> RunnerResult<ExitStatus>
    where
        T: AsFd,
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null());

        let mut attempts = 0;
        let mut child = loop {
            attempts += 1;
            command.stdout(redirect(target)?).stderr(redirect(target)?);

            match command.spawn() {
                Ok(child) => break child,
                Err(err) if is_transient(&err) && attempts <= self.retries => {
                    log::warn!("spawn of {:?} failed ({}), retrying", program, err);
                    thread::sleep(self.backoff * attempts);
                }
                Err(source) => {
                    return Err(RunnerError::Spawn {
                        program: program.to_string_lossy().into_owned(),
                        attempts,
                        source,
                    })
                }
            }
        };

        log::debug!("spawned {:?} as pid {}", program, child.id());
        child.wait().map_err(RunnerError::Wait)
    }
}

/// A fresh descriptor for one of the child's standard streams.
fn redirect<T: AsFd>(target: &T) -> io::Result<Stdio> {
    Ok(Stdio::from(target.as_fd().try_clone_to_owned()?))
}

/// EAGAIN from fork surfaces as `WouldBlock`.
fn is_transient(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}
