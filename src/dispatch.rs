//! Request line parsing, target classification and strategy selection.

use std::fs::{self, File};
use std::io::{self, Write};
use std::os::fd::AsFd;
use std::path::{Component, Path, PathBuf};

use crate::config::ServerConfig;
use crate::error::RequestError;
use crate::http::{StatusCode, GET};
use crate::process::ProcessRunner;
use crate::respond;

/// The two tokens of a request line that matter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub target: String,
}

impl Request {
    /// Parses `METHOD TARGET`, optionally followed by an `HTTP/x.y` version
    /// token which is ignored.
    ///
    /// ```
    /// # use pollhttpd::Request;
    /// let request = Request::parse("GET /index.html HTTP/1.1").unwrap();
    /// assert_eq!(request.method, "GET");
    /// assert_eq!(request.target, "/index.html");
    /// assert!(Request::parse("GET").is_err());
    /// ```
    pub fn parse(line: &str) -> Result<Self, RequestError> {
        let mut tokens = line.split_whitespace();
        match (tokens.next(), tokens.next(), tokens.next(), tokens.next()) {
            (Some(method), Some(target), None, None) => Ok(Self::new(method, target)),
            (Some(method), Some(target), Some(version), None) if version.starts_with("HTTP/") => {
                Ok(Self::new(method, target))
            }
            _ => Err(RequestError::Malformed(line.to_owned())),
        }
    }

    fn new(method: &str, target: &str) -> Self {
        Self {
            method: method.to_owned(),
            target: target.to_owned(),
        }
    }
}

/// What a resolved target is on disk, in classification priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Missing,
    Directory,
    Script,
    File,
}

/// Maps request lines onto response strategies.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    root: PathBuf,
    script_extension: String,
    listing_program: String,
    listing_flags: Vec<String>,
    runner: ProcessRunner,
}

impl Dispatcher {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            root: config.root.clone(),
            script_extension: config.script_extension.clone(),
            listing_program: config.listing_program.clone(),
            listing_flags: config
                .listing_flags
                .split_whitespace()
                .map(str::to_owned)
                .collect(),
            runner: ProcessRunner::new(config.spawn_retries),
        }
    }

    /// Joins `target` onto the server root.
    ///
    /// Leading slashes are dropped so absolute targets stay under the root,
    /// and any `..` component is refused.
    pub fn resolve(&self, target: &str) -> Result<PathBuf, RequestError> {
        let relative = Path::new(target.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(RequestError::Traversal(target.to_owned()));
        }
        Ok(self.root.join(relative))
    }

    /// Existence first, then directory, then script extension.
    pub fn classify(&self, path: &Path) -> Target {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(_) => return Target::Missing,
        };

        if metadata.is_dir() {
            Target::Directory
        } else if path.extension().and_then(|ext| ext.to_str()) == Some(self.script_extension.as_str()) {
            Target::Script
        } else {
            Target::File
        }
    }

    /// Answers one request line on `out` and returns the status sent.
    ///
    /// Only errors writing to `out` are returned; everything else becomes a
    /// response.
    pub fn dispatch<S>(&self, line: &str, out: &mut S) -> io::Result<StatusCode>
    where
        S: Write + AsFd,
    {
        let request = match Request::parse(line) {
            Ok(request) => request,
            Err(err) => {
                log::warn!("{}", err);
                respond::bad_request(out, "Malformed request line")?;
                return Ok(StatusCode::BadRequest);
            }
        };

        if request.method != GET {
            respond::reject(out)?;
            return Ok(StatusCode::NotImplemented);
        }

        let path = match self.resolve(&request.target) {
            Ok(path) => path,
            Err(err) => {
                log::warn!("{}", err);
                respond::forbidden(out, &request.target)?;
                return Ok(StatusCode::Forbidden);
            }
        };

        match self.classify(&path) {
            Target::Missing => {
                respond::not_found(out, &request.target)?;
                Ok(StatusCode::NotFound)
            }
            Target::Directory => {
                respond::list_directory(out, &self.runner, &self.listing_program, &self.listing_flags, &path)?;
                Ok(StatusCode::Ok)
            }
            Target::Script => {
                respond::exec_cgi(out, &self.runner, &path)?;
                Ok(StatusCode::Ok)
            }
            Target::File => match File::open(&path) {
                Ok(file) => {
                    respond::send_file(out, file, &path)?;
                    Ok(StatusCode::Ok)
                }
                Err(err) => {
                    log::warn!("cannot open {}: {}", path.display(), err);
                    respond::internal_error(out, &request.target)?;
                    Ok(StatusCode::InternalServerError)
                }
            },
        }
    }

    /// Answers a connection whose request never completed within the buffer.
    pub fn reject_oversized<W: Write>(&self, out: &mut W) -> io::Result<StatusCode> {
        respond::bad_request(out, "Request too large")?;
        Ok(StatusCode::BadRequest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::{Read, Seek, SeekFrom};
    use std::os::unix::fs::PermissionsExt;

    fn dispatcher(root: &Path) -> Dispatcher {
        Dispatcher::new(&ServerConfig {
            root: root.to_path_buf(),
            ..ServerConfig::default()
        })
    }

    /// Dispatches into a scratch file and returns the status and response.
    fn run(dispatcher: &Dispatcher, line: &str) -> (StatusCode, String) {
        let mut out = tempfile::tempfile().unwrap();
        let status = dispatcher.dispatch(line, &mut out).unwrap();
        out.seek(SeekFrom::Start(0)).unwrap();
        let mut response = String::new();
        out.read_to_string(&mut response).unwrap();
        (status, response)
    }

    #[test]
    fn test_parse_request_line() {
        assert_eq!(Request::parse("GET /a").unwrap(), Request::new("GET", "/a"));
        assert_eq!(Request::parse("  POST   /b  ").unwrap(), Request::new("POST", "/b"));
        assert_eq!(Request::parse("GET /c HTTP/1.0").unwrap(), Request::new("GET", "/c"));
    }

    #[test]
    fn test_parse_rejects_wrong_token_count() {
        assert!(Request::parse("").is_err());
        assert!(Request::parse("GET").is_err());
        assert!(Request::parse("GET /a b").is_err());
        assert!(Request::parse("GET /a HTTP/1.1 extra").is_err());
    }

    #[test]
    fn test_resolve_confines_to_root() {
        let d = dispatcher(Path::new("/srv/www"));
        assert_eq!(d.resolve("/index.html").unwrap(), PathBuf::from("/srv/www/index.html"));
        assert_eq!(d.resolve("//etc/passwd").unwrap(), PathBuf::from("/srv/www/etc/passwd"));
        assert_eq!(d.resolve("/").unwrap(), PathBuf::from("/srv/www/"));
        assert!(matches!(d.resolve("/../etc/passwd"), Err(RequestError::Traversal(_))));
        assert!(d.resolve("/a/../../b").is_err());
    }

    /// A directory named like a script is still listed.
    #[test]
    fn test_classification_order() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("foo.cgi")).unwrap();
        fs::write(root.path().join("run.cgi"), "#!/bin/sh\n").unwrap();
        fs::write(root.path().join("page.html"), "x").unwrap();
        let d = dispatcher(root.path());

        assert_eq!(d.classify(&root.path().join("nope")), Target::Missing);
        assert_eq!(d.classify(&root.path().join("foo.cgi")), Target::Directory);
        assert_eq!(d.classify(&root.path().join("run.cgi")), Target::Script);
        assert_eq!(d.classify(&root.path().join("page.html")), Target::File);
    }

    #[test]
    fn test_dispatch_static_file() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("index.html"), "hi").unwrap();

        let (status, response) = run(&dispatcher(root.path()), "GET /index.html");
        assert_eq!(status, StatusCode::Ok);
        assert_eq!(response, "HTTP/1.1 200 OK\r\nContent-type: text/html\r\n\r\nhi");
    }

    #[test]
    fn test_dispatch_unsupported_method() {
        let root = tempfile::tempdir().unwrap();
        let (status, response) = run(&dispatcher(root.path()), "POST /index.html");
        assert_eq!(status, StatusCode::NotImplemented);
        assert!(response.starts_with("HTTP/1.1 501 Not Implemented\r\nContent-type: text/plain\r\n\r\n"));
    }

    #[test]
    fn test_dispatch_missing_target() {
        let root = tempfile::tempdir().unwrap();
        let (status, response) = run(&dispatcher(root.path()), "GET /missing.txt");
        assert_eq!(status, StatusCode::NotFound);
        assert!(response.contains("/missing.txt"));
    }

    #[test]
    fn test_dispatch_malformed_and_traversal() {
        let root = tempfile::tempdir().unwrap();
        let d = dispatcher(root.path());

        let (status, response) = run(&d, "GET");
        assert_eq!(status, StatusCode::BadRequest);
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));

        let (status, _) = run(&d, "GET /../secret");
        assert_eq!(status, StatusCode::Forbidden);
    }

    #[test]
    fn test_dispatch_cgi_script() {
        let root = tempfile::tempdir().unwrap();
        let script = root.path().join("hello.cgi");
        fs::write(&script, "#!/bin/sh\nprintf 'Content-type: text/plain\\r\\n\\r\\nhello'\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let (status, response) = run(&dispatcher(root.path()), "GET /hello.cgi");
        assert_eq!(status, StatusCode::Ok);
        assert_eq!(response, "HTTP/1.1 200 OK\r\nContent-type: text/plain\r\n\r\nhello");
    }

    /// Unreadable files answer 500 instead of closing silently.
    #[test]
    fn test_dispatch_unreadable_file() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("locked.txt");
        fs::write(&path, "secret").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o000)).unwrap();

        // root ignores permission bits
        if File::open(&path).is_ok() {
            return;
        }

        let (status, response) = run(&dispatcher(root.path()), "GET /locked.txt");
        assert_eq!(status, StatusCode::InternalServerError);
        assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    }
}
