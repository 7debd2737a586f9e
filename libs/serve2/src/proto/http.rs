//! Static file serving over HTTP/1.1.
//!
//! Request paths are resolved against a root directory. `.` and `..`
//! segments are applied lexically and clamped at the root, so no request can
//! name a file outside of it. Failed reads answer 404 with a body fixed at
//! construction time.

use std::convert::Infallible;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tracing::debug;

use crate::conn::{Connection, Hint};
use crate::error::Result;
use crate::handler::{check_any_prefix, Detection, Outcome, ProtocolHandler};

/// Default document served for the root path.
pub const DEFAULT_FILE: &str = "index.html";

/// Body of the 404 response when none is configured.
pub const DEFAULT_NOT_FOUND: &str = "<!DOCTYPE html><html><body><h1>404</h1></body></html>";

/// Request-line prefixes of HTTP/1.x methods.
const HTTP_METHODS: &[&[u8]] = &[
    b"GET ",
    b"HEAD ",
    b"POST ",
    b"PUT ",
    b"DELETE ",
    b"OPTIONS ",
    b"PATCH ",
    b"CONNECT ",
    b"TRACE ",
];

/// Serves files below a root directory.
pub struct HttpFile {
    root: PathBuf,
    default_file: String,
    not_found: Bytes,
}

impl HttpFile {
    pub fn new(
        root: impl Into<PathBuf>,
        default_file: impl Into<String>,
        not_found: impl Into<Bytes>,
    ) -> Self {
        Self {
            root: root.into(),
            default_file: default_file.into(),
            not_found: not_found.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn not_found_body(&self) -> &[u8] {
        &self.not_found
    }

    /// Map a request path to a file below the root.
    ///
    /// Returns `None` when the path cannot be decoded or names something
    /// that is not a plain file name.
    pub fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let decoded = percent_decode(request_path)?;

        let mut segments: Vec<&str> = Vec::new();
        for segment in decoded.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other),
            }
        }

        if segments.is_empty() {
            return Some(self.root.join(&self.default_file));
        }
        if segments.iter().any(|s| s.contains(['\\', '\0'])) {
            return None;
        }

        let mut path = self.root.clone();
        path.extend(segments);
        Some(path)
    }

    async fn respond(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        if req.method() == Method::OPTIONS {
            return Response::new(Full::new(Bytes::new()));
        }

        let Some(path) = self.resolve(req.uri().path()) else {
            debug!(path = %req.uri().path(), "Request path rejected");
            return self.not_found();
        };

        match tokio::fs::read(&path).await {
            Ok(content) => {
                let mut response = Response::new(Full::new(Bytes::from(content)));
                if let Some(content_type) = content_type(&path) {
                    response
                        .headers_mut()
                        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
                }
                response
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Could not read file");
                self.not_found()
            }
        }
    }

    fn not_found(&self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(self.not_found.clone()));
        *response.status_mut() = StatusCode::NOT_FOUND;
        response
    }
}

#[async_trait]
impl ProtocolHandler for HttpFile {
    fn check(&self, header: &[u8], _hints: &[Hint]) -> Detection {
        check_any_prefix(header, HTTP_METHODS.iter().copied())
    }

    async fn handle(&self, conn: Connection) -> Result<Outcome> {
        let service = service_fn(|req| async move { Ok::<_, Infallible>(self.respond(req).await) });

        http1::Builder::new()
            .serve_connection(TokioIo::new(conn), service)
            .await?;

        Ok(Outcome::Done)
    }
}

impl fmt::Display for HttpFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP [path: {}]", self.root.display())
    }
}

/// Decode `%XX` escapes. Malformed escapes and non-UTF-8 results yield `None`.
fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            if !hex.iter().all(u8::is_ascii_hexdigit) {
                return None;
            }
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn content_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let content_type = match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "wasm" => "application/wasm",
        _ => return None,
    };
    Some(content_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn handler(root: &Path) -> HttpFile {
        HttpFile::new(root, DEFAULT_FILE, DEFAULT_NOT_FOUND)
    }

    async fn request(handler: HttpFile, raw: &[u8]) -> String {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let conn = Connection::new(Box::new(server), Vec::new());
        let task = tokio::spawn(async move { handler.handle(conn).await });

        client.write_all(raw).await.unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        task.await.unwrap().unwrap();
        String::from_utf8(response).unwrap()
    }

    #[test]
    fn test_traversal_stays_under_root() {
        let http = handler(Path::new("/srv/http"));
        assert_eq!(
            http.resolve("/../../etc/passwd"),
            Some(PathBuf::from("/srv/http/etc/passwd"))
        );
        assert_eq!(
            http.resolve("/%2e%2e/%2E%2E/etc/passwd"),
            Some(PathBuf::from("/srv/http/etc/passwd"))
        );
        assert_eq!(
            http.resolve("/a/b/../../../c"),
            Some(PathBuf::from("/srv/http/c"))
        );
        assert_eq!(http.resolve("/a/..%5c..%5cetc"), None);
    }

    #[test]
    fn test_root_serves_default_file() {
        let http = handler(Path::new("/srv/http"));
        assert_eq!(http.resolve("/"), Some(PathBuf::from("/srv/http/index.html")));
        assert_eq!(http.resolve("/./"), Some(PathBuf::from("/srv/http/index.html")));
        assert_eq!(http.resolve("/.."), Some(PathBuf::from("/srv/http/index.html")));

        let http = HttpFile::new("/srv/http", "home.htm", DEFAULT_NOT_FOUND);
        assert_eq!(http.resolve("/"), Some(PathBuf::from("/srv/http/home.htm")));
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("/a%20b").as_deref(), Some("/a b"));
        assert_eq!(percent_decode("/plain").as_deref(), Some("/plain"));
        assert_eq!(percent_decode("/bad%2"), None);
        assert_eq!(percent_decode("/bad%zz"), None);
        assert_eq!(percent_decode("/%ff"), None);
    }

    #[test]
    fn test_check_methods() {
        let http = handler(Path::new("/srv/http"));
        assert_eq!(http.check(b"GET / HTTP/1.1", &[]), Detection::Match);
        assert_eq!(http.check(b"OPTIONS *", &[]), Detection::Match);
        assert_eq!(http.check(b"GE", &[]), Detection::NeedMore(4));
        assert_eq!(http.check(b"SSH-2.0", &[]), Detection::Reject);
    }

    #[tokio::test]
    async fn test_serves_file_and_default() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        fs::write(dir.path().join("notes.txt"), "hello").unwrap();

        let response = request(
            handler(dir.path()),
            b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        assert!(response.contains("text/html"));
        assert!(response.ends_with("<h1>home</h1>"));

        let response = request(
            handler(dir.path()),
            b"GET /notes.txt HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        assert!(response.ends_with("hello"));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let http = HttpFile::new(dir.path(), DEFAULT_FILE, "gone");

        let response = request(
            http,
            b"GET /missing.html HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found"), "{response}");
        assert!(response.ends_with("gone"));
    }

    #[tokio::test]
    async fn test_traversal_request_does_not_escape() {
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("www");
        fs::create_dir(&root).unwrap();
        fs::write(parent.path().join("secret.txt"), "secret").unwrap();

        let response = request(
            handler(&root),
            b"GET /../secret.txt HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found"), "{response}");
        assert!(!response.contains("secret"));
    }

    #[tokio::test]
    async fn test_options_is_empty_success() {
        let dir = tempfile::tempdir().unwrap();
        let response = request(
            handler(dir.path()),
            b"OPTIONS / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        assert!(response.contains("content-length: 0"));
    }
}
