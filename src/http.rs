use core::fmt;
use std::io::{self, Write};
use std::path::Path;

/// The method every target can be fetched with. Everything else gets a 501.
pub const GET: &str = "GET";

/// Status codes the server answers with.
///
/// ```
/// # use pollhttpd::StatusCode;
/// assert_eq!(StatusCode::NotFound.code(), 404);
/// assert_eq!(StatusCode::NotFound.to_string(), "404 Not Found");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    BadRequest,
    Forbidden,
    NotFound,
    InternalServerError,
    NotImplemented,
}

impl StatusCode {
    /// The numeric code.
    pub fn code(self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::InternalServerError => 500,
            StatusCode::NotImplemented => 501,
        }
    }

    /// The reason phrase sent after the code.
    pub fn reason(self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::NotImplemented => "Not Implemented",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

/// Writes the status line and, when given, a content type header.
///
/// The blank line that ends the head is left to the caller: a CGI script
/// writes its own headers after the status line.
pub fn write_head<W: Write>(out: &mut W, status: StatusCode, content_type: Option<&str>) -> io::Result<()> {
    write!(out, "HTTP/1.1 {}\r\n", status)?;
    if let Some(content_type) = content_type {
        write!(out, "Content-type: {}\r\n", content_type)?;
    }
    Ok(())
}

/// Best-effort content type from a filename extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("html") | Some("htm") => "text/html",
        Some("gif") => "image/gif",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "text/plain",
    }
}
