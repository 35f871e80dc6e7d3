// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Minimal HTTP/1.1 framing for the gate server.
//
// Only what the JSON endpoints need: a request line, headers, and a body
// bounded by Content-Length. No chunked transfer, no keep-alive; every
// response closes the connection.

use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest header block accepted before the request is refused.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Largest body accepted. Check requests are a few hundred bytes.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Why a request could not be read.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The peer closed the connection before sending anything.
    #[error("connection closed before a request was sent")]
    Empty,

    #[error("malformed HTTP request: {0}")]
    Malformed(String),

    #[error("request exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A parsed HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    /// Request target without any query string.
    pub path: String,
    /// Header names are lower-cased.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Read one request from `stream`.
pub async fn read_request<S>(stream: &mut S) -> Result<HttpRequest, RequestError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos;
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(RequestError::TooLarge {
                limit: MAX_HEADER_BYTES,
            });
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(if buf.is_empty() {
                RequestError::Empty
            } else {
                RequestError::Malformed("connection closed inside headers".into())
            });
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = std::str::from_utf8(&buf[..header_end])
        .map_err(|_| RequestError::Malformed("headers are not UTF-8".into()))?;
    let (method, path, headers) = parse_head(head)?;

    let content_length = match headers.iter().find(|(key, _)| key == "content-length") {
        Some((_, value)) => value
            .parse::<usize>()
            .map_err(|_| RequestError::Malformed(format!("bad content-length {value:?}")))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(RequestError::TooLarge {
            limit: MAX_BODY_BYTES,
        });
    }

    let mut body = buf.split_off(header_end + 4);
    if body.len() > content_length {
        body.truncate(content_length);
    } else if body.len() < content_length {
        let already = body.len();
        body.resize(content_length, 0);
        stream
            .read_exact(&mut body[already..])
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => {
                    RequestError::Malformed("body shorter than content-length".into())
                }
                _ => RequestError::Io(e),
            })?;
    }

    Ok(HttpRequest {
        method,
        path,
        headers,
        body,
    })
}

fn parse_head(head: &str) -> Result<(String, String, Vec<(String, String)>), RequestError> {
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();

    let mut parts = request_line.split_ascii_whitespace();
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(RequestError::Malformed(format!(
            "bad request line {request_line:?}"
        )));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(RequestError::Malformed(format!("unsupported version {version}")));
    }
    let path = target.split('?').next().unwrap_or_default().to_owned();

    let mut headers = Vec::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            return Err(RequestError::Malformed(format!("bad header line {line:?}")));
        };
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_owned()));
    }

    Ok((method.to_ascii_uppercase(), path, headers))
}

/// Find the first occurrence of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// A response ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A JSON response. Serialization of our own types cannot fail, but if
    /// it does the client gets a 500 rather than a truncated body.
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                headers: vec![("Content-Type", "application/json".into())],
                body,
            },
            Err(e) => Self::error(500, &format!("response serialization failed: {e}")),
        }
    }

    /// `{"error": message}` with the given status.
    pub fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", "application/json".into())],
            body: serde_json::json!({ "error": message }).to_string().into_bytes(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Serialize status line, headers and body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status));
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n",
            self.body.len()
        ));

        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

/// Write `response` and flush.
pub async fn write_response<S>(stream: &mut S, response: &HttpResponse) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&response.to_bytes()).await?;
    stream.flush().await
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        402 => "Payment Required",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(raw: &[u8]) -> Result<HttpRequest, RequestError> {
        let mut reader = raw;
        read_request(&mut reader).await
    }

    #[tokio::test]
    async fn parses_post_with_body() {
        let req = parse(
            b"POST /api/check?x=1 HTTP/1.1\r\nHost: a\r\nContent-Length: 4\r\nContent-Type: application/json\r\n\r\n{}{}",
        )
        .await
        .unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/api/check");
        assert_eq!(req.header("Content-Type"), Some("application/json"));
        assert_eq!(req.body, b"{}{}");
    }

    #[tokio::test]
    async fn get_without_body() {
        let req = parse(b"GET /health HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(req.method, "GET");
        assert!(req.body.is_empty());
    }

    #[tokio::test]
    async fn empty_stream() {
        assert!(matches!(parse(b"").await, Err(RequestError::Empty)));
    }

    #[tokio::test]
    async fn short_body_is_malformed() {
        let err = parse(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\n{}")
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Malformed(_)));
    }

    #[tokio::test]
    async fn oversized_body_is_refused() {
        let raw = format!(
            "POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            MAX_BODY_BYTES + 1
        );
        assert!(matches!(
            parse(raw.as_bytes()).await,
            Err(RequestError::TooLarge { limit: MAX_BODY_BYTES })
        ));
    }

    #[tokio::test]
    async fn oversized_headers_are_refused() {
        let mut raw = b"GET / HTTP/1.1\r\nX-Pad: ".to_vec();
        raw.extend(std::iter::repeat_n(b'a', MAX_HEADER_BYTES * 2));
        assert!(matches!(
            parse(&raw).await,
            Err(RequestError::TooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn garbage_request_line() {
        assert!(matches!(
            parse(b"hello\r\n\r\n").await,
            Err(RequestError::Malformed(_))
        ));
        assert!(matches!(
            parse(b"GET / SPDY/3\r\n\r\n").await,
            Err(RequestError::Malformed(_))
        ));
    }

    #[test]
    fn response_framing() {
        let resp = HttpResponse::error(404, "no such route").with_header("Allow", "GET");
        let text = String::from_utf8(resp.to_bytes()).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Allow: GET\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with(r#"{"error":"no such route"}"#));
        assert_eq!(resp.header("allow"), Some("GET"));
    }
}
