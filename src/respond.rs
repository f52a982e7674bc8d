//! The response strategies.
//!
//! Each strategy writes one complete response; the connection is closed by
//! dropping it afterwards, which is what marks the end of the body.

use std::ffi::OsStr;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::os::fd::AsFd;
use std::path::Path;

use crate::error::RunnerError;
use crate::http::{self, StatusCode};
use crate::process::ProcessRunner;

/// A complete plain-text response.
fn text<W: Write>(out: &mut W, status: StatusCode, body: &str) -> io::Result<()> {
    let mut response = Vec::with_capacity(64 + body.len());
    http::write_head(&mut response, status, Some("text/plain"))?;
    response.extend_from_slice(b"\r\n");
    response.extend_from_slice(body.as_bytes());
    out.write_all(&response)?;
    out.flush()
}

/// 501 for any method other than GET.
pub fn reject<W: Write>(out: &mut W) -> io::Result<()> {
    text(out, StatusCode::NotImplemented, "That command is not yet implemented\r\n")
}

/// 404 naming the target as the client sent it.
pub fn not_found<W: Write>(out: &mut W, target: &str) -> io::Result<()> {
    let body = format!("The item you requested: {}\r\nis not found\r\n", target);
    text(out, StatusCode::NotFound, &body)
}

/// 400 for request lines that do not parse or never complete.
pub fn bad_request<W: Write>(out: &mut W, reason: &str) -> io::Result<()> {
    text(out, StatusCode::BadRequest, &format!("{}\r\n", reason))
}

/// 403 for targets outside the server root.
pub fn forbidden<W: Write>(out: &mut W, target: &str) -> io::Result<()> {
    let body = format!("The item you requested: {}\r\nis outside the server root\r\n", target);
    text(out, StatusCode::Forbidden, &body)
}

/// 500 for existing files that cannot be read.
pub fn internal_error<W: Write>(out: &mut W, target: &str) -> io::Result<()> {
    let body = format!("The item you requested: {}\r\ncould not be read\r\n", target);
    text(out, StatusCode::InternalServerError, &body)
}

/// 200 with the file's bytes copied verbatim.
pub fn send_file<W: Write>(out: &mut W, file: File, path: &Path) -> io::Result<u64> {
    let mut head = Vec::with_capacity(64);
    http::write_head(&mut head, StatusCode::Ok, Some(http::content_type_for(path)))?;
    head.extend_from_slice(b"\r\n");
    out.write_all(&head)?;

    let sent = io::copy(&mut BufReader::new(file), out)?;
    out.flush()?;
    Ok(sent)
}

/// 200 with the listing program's output for `dir` as a plain-text body.
pub fn list_directory<W>(
    out: &mut W,
    runner: &ProcessRunner,
    program: &str,
    flags: &[String],
    dir: &Path,
) -> io::Result<()>
where
    W: Write + AsFd,
{
    let mut head = Vec::with_capacity(64);
    http::write_head(&mut head, StatusCode::Ok, Some("text/plain"))?;
    head.extend_from_slice(b"\r\n");
    out.write_all(&head)?;
    out.flush()?;

    let args = flags
        .iter()
        .map(|flag| OsStr::new(flag.as_str()))
        .chain(std::iter::once(dir.as_os_str()));
    run_into(out, runner, OsStr::new(program), args)
}

/// A status line, then whatever the script writes: headers, blank line and body.
pub fn exec_cgi<W>(out: &mut W, runner: &ProcessRunner, script: &Path) -> io::Result<()>
where
    W: Write + AsFd,
{
    http::write_head(out, StatusCode::Ok, None)?;
    out.flush()?;

    run_into(out, runner, script.as_os_str(), std::iter::empty::<&OsStr>())
}

/// Runs a child against the connection. A child that cannot be started is
/// reported in the body, where its own error output would have gone.
fn run_into<'a, W, I>(out: &mut W, runner: &ProcessRunner, program: &OsStr, args: I) -> io::Result<()>
where
    W: Write + AsFd,
    I: IntoIterator<Item = &'a OsStr>,
{
    match runner.run(program, args, &*out) {
        Ok(status) if !status.success() => {
            log::debug!("{:?} exited with {}", program, status);
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(RunnerError::Spawn { source, .. }) => {
            log::warn!("cannot run {:?}: {}", program, source);
            writeln!(out, "{}: {}", program.to_string_lossy(), source)?;
            out.flush()
        }
        Err(RunnerError::Io(err)) => Err(err),
        Err(err) => {
            log::warn!("child {:?} failed: {}", program, err);
            Ok(())
        }
    }
}
