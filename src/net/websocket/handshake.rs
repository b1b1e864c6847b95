//! Server side of the WebSocket opening handshake (RFC 6455 Section 4.2).
//!
//! # Client Request
//!
//! ```http
//! GET /chat HTTP/1.1
//! Host: server.example.com
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! # Server Response
//!
//! ```http
//! HTTP/1.1 101 Switching Protocols
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```
//!
//! Every failure, including an unknown request path, is answered with
//! `403 Forbidden` and the connection is closed.

use base64::Engine;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fmt;

/// RFC 6455 GUID for Sec-WebSocket-Accept calculation.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the size of an upgrade request header block.
pub const MAX_REQUEST_HEADER_SIZE: usize = 8 * 1024;

/// Compute the Sec-WebSocket-Accept value from a client key.
///
/// Per RFC 6455 Section 4.2.2:
/// 1. Concatenate the client's Sec-WebSocket-Key with the GUID
/// 2. Take the SHA-1 hash
/// 3. Base64 encode the result
///
/// # Example
///
/// ```
/// use wsengine::net::websocket::compute_accept_key;
///
/// let client_key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(client_key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// Index just past the blank line ending the header block, if present.
#[must_use]
pub fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// WebSocket handshake errors.
#[derive(Debug)]
pub enum HandshakeError {
    /// Malformed HTTP request.
    InvalidRequest(String),
    /// Missing required header.
    MissingHeader(&'static str),
    /// Sec-WebSocket-Key is not base64 of 16 bytes.
    InvalidKey,
    /// Unsupported WebSocket version.
    UnsupportedVersion(String),
    /// Header block grew past the limit without terminating.
    HeaderTooLarge(usize),
    /// No application is registered for the request path.
    UnknownPath(String),
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest(msg) => write!(f, "invalid HTTP request: {msg}"),
            Self::MissingHeader(name) => write!(f, "missing required header: {name}"),
            Self::InvalidKey => write!(f, "invalid Sec-WebSocket-Key"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported WebSocket version: {v}"),
            Self::HeaderTooLarge(size) => {
                write!(f, "request header exceeds {size} bytes")
            }
            Self::UnknownPath(path) => write!(f, "no application for path '{path}'"),
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Validates upgrade requests for one application.
#[derive(Debug, Clone, Default)]
pub struct ServerHandshake {
    /// Subprotocols the resolved application speaks.
    supported_protocols: Vec<String>,
}

impl ServerHandshake {
    /// A handshake advertising no subprotocol.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers `protocol` to clients that ask for it.
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.supported_protocols.push(protocol.into());
        self
    }

    /// Checks `request` and computes the 101 answer.
    ///
    /// # Errors
    ///
    /// A method other than GET, a missing or wrong `Upgrade`, `Connection` or
    /// `Sec-WebSocket-Version` header, or a key that is not base64 of 16 bytes.
    pub fn accept(&self, request: &HttpRequest) -> Result<AcceptResponse, HandshakeError> {
        if request.method != "GET" {
            return Err(HandshakeError::InvalidRequest(format!(
                "method must be GET, got '{}'",
                request.method
            )));
        }
        require(request, "Upgrade", |v| v.eq_ignore_ascii_case("websocket"))?;
        require(request, "Connection", |v| {
            v.split(',').any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        })?;

        let version = request
            .header("sec-websocket-version")
            .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Version"))?;
        if version != "13" {
            return Err(HandshakeError::UnsupportedVersion(version.to_string()));
        }

        let key = request
            .header("sec-websocket-key")
            .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Key"))?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(key)
            .map_err(|_| HandshakeError::InvalidKey)?;
        if decoded.len() != 16 {
            return Err(HandshakeError::InvalidKey);
        }

        let protocol = request.header("sec-websocket-protocol").and_then(|offered| {
            offered
                .split(',')
                .map(str::trim)
                .find(|p| self.supported_protocols.iter().any(|s| s == p))
                .map(str::to_string)
        });

        Ok(AcceptResponse {
            accept_key: compute_accept_key(key),
            protocol,
        })
    }

    /// A bodiless response with `status` that closes the connection.
    #[must_use]
    pub fn reject(status: u16, reason: &str) -> Vec<u8> {
        format!("HTTP/1.1 {status} {reason}\r\nConnection: close\r\n\r\n").into_bytes()
    }

    /// The response sent for every refused upgrade and for admissions over capacity.
    #[must_use]
    pub fn forbidden() -> Vec<u8> {
        Self::reject(403, "Forbidden")
    }
}

fn require(
    request: &HttpRequest,
    name: &'static str,
    valid: impl Fn(&str) -> bool,
) -> Result<(), HandshakeError> {
    let value = request
        .header(name)
        .ok_or(HandshakeError::MissingHeader(name))?;
    if valid(value) {
        Ok(())
    } else {
        Err(HandshakeError::InvalidRequest(format!(
            "unexpected {name} header: '{value}'"
        )))
    }
}

/// A validated upgrade, ready to be answered.
#[derive(Debug, Clone)]
pub struct AcceptResponse {
    /// `Sec-WebSocket-Accept` value.
    pub accept_key: String,
    /// Subprotocol both sides agreed on.
    pub protocol: Option<String>,
}

impl AcceptResponse {
    /// The `101 Switching Protocols` response.
    #[must_use]
    pub fn response_bytes(&self) -> Vec<u8> {
        let mut head = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n",
            self.accept_key
        );
        if let Some(protocol) = &self.protocol {
            head.push_str("Sec-WebSocket-Protocol: ");
            head.push_str(protocol);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        head.into_bytes()
    }
}

/// Request line and headers of an upgrade request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request method.
    pub method: String,
    /// Request path without any query string.
    pub path: String,
    /// Header values keyed by lowercase name.
    headers: HashMap<String, String>,
}

impl HttpRequest {
    /// Parses a header block ending in a blank line.
    ///
    /// Header lines without a colon are skipped.
    ///
    /// # Errors
    ///
    /// `HandshakeError::InvalidRequest` for non-UTF-8 input or a request line
    /// without method, target and an `HTTP/1.x` version.
    pub fn parse(data: &[u8]) -> Result<Self, HandshakeError> {
        let text = std::str::from_utf8(data)
            .map_err(|_| HandshakeError::InvalidRequest("invalid UTF-8".into()))?;
        let mut lines = text.lines();

        let request_line = lines.next().unwrap_or_default();
        let (method, target, version) = match request_line.split_whitespace().collect::<Vec<_>>()[..]
        {
            [method, target, version] => (method, target, version),
            _ => {
                return Err(HandshakeError::InvalidRequest(format!(
                    "malformed request line '{request_line}'"
                )))
            }
        };
        if !version.starts_with("HTTP/1.") {
            return Err(HandshakeError::InvalidRequest(format!(
                "unsupported HTTP version '{version}'"
            )));
        }
        let path = target.split_once('?').map_or(target, |(path, _)| path);

        let headers = lines
            .take_while(|line| !line.is_empty())
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
            .collect();

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            headers,
        })
    }

    /// Header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &[u8] = b"GET /chat?room=1 HTTP/1.1\r\n\
        Host: example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: keep-alive, Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        Sec-WebSocket-Protocol: superchat, chat\r\n\
        \r\n";

    #[test]
    fn test_compute_accept_key() {
        // RFC 6455 example
        let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_find_header_end() {
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n"), None);
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n\r\nrest"), Some(18));
        assert_eq!(find_header_end(REQUEST), Some(REQUEST.len()));
    }

    #[test]
    fn test_http_request_parse_strips_query() {
        let request = HttpRequest::parse(REQUEST).unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/chat");
        assert_eq!(request.header("HOST"), Some("example.com"));
        assert_eq!(request.header("sec-websocket-version"), Some("13"));
    }

    #[test]
    fn test_server_accept_with_protocol() {
        let request = HttpRequest::parse(REQUEST).unwrap();
        let accept = ServerHandshake::new().protocol("chat").accept(&request).unwrap();
        assert_eq!(accept.accept_key, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(accept.protocol.as_deref(), Some("chat"));
    }

    #[test]
    fn test_server_accept_without_matching_protocol() {
        let request = HttpRequest::parse(REQUEST).unwrap();
        let accept = ServerHandshake::new().protocol("other").accept(&request).unwrap();
        assert_eq!(accept.protocol, None);
        let text = String::from_utf8(accept.response_bytes()).unwrap();
        assert!(!text.contains("Sec-WebSocket-Protocol"));
    }

    #[test]
    fn test_server_reject_bad_version() {
        let request = HttpRequest::parse(
            b"GET /chat HTTP/1.1\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              Sec-WebSocket-Version: 8\r\n\
              \r\n",
        )
        .unwrap();
        let err = ServerHandshake::new().accept(&request).unwrap_err();
        assert!(matches!(err, HandshakeError::UnsupportedVersion(_)));
    }

    #[test]
    fn test_server_reject_short_key() {
        let request = HttpRequest::parse(
            b"GET /chat HTTP/1.1\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Key: c2hvcnQ=\r\n\
              Sec-WebSocket-Version: 13\r\n\
              \r\n",
        )
        .unwrap();
        let err = ServerHandshake::new().accept(&request).unwrap_err();
        assert!(matches!(err, HandshakeError::InvalidKey));
    }

    #[test]
    fn test_server_reject_post_and_missing_upgrade() {
        let post = HttpRequest::parse(b"POST /chat HTTP/1.1\r\n\r\n").unwrap();
        assert!(matches!(
            ServerHandshake::new().accept(&post),
            Err(HandshakeError::InvalidRequest(_))
        ));
        let plain = HttpRequest::parse(b"GET /chat HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert!(matches!(
            ServerHandshake::new().accept(&plain),
            Err(HandshakeError::MissingHeader("Upgrade"))
        ));
    }

    #[test]
    fn test_accept_response_bytes() {
        let accept = AcceptResponse {
            accept_key: "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=".to_string(),
            protocol: Some("chat".to_string()),
        };
        let text = String::from_utf8(accept.response_bytes()).unwrap();
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.contains("Upgrade: websocket\r\n"));
        assert!(text.contains("Connection: Upgrade\r\n"));
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(text.contains("Sec-WebSocket-Protocol: chat\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_forbidden_response() {
        let text = String::from_utf8(ServerHandshake::forbidden()).unwrap();
        assert!(text.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_request_line_must_be_http1() {
        let cases: [&[u8]; 3] = [b"GET /chat\r\n\r\n", b"GET /chat HTTP/2\r\n\r\n", b"\r\n"];
        for raw in cases {
            assert!(matches!(
                HttpRequest::parse(raw),
                Err(HandshakeError::InvalidRequest(_))
            ));
        }
    }

    #[test]
    fn test_refusal_errors_describe_the_request() {
        use std::error::Error;
        let cases = [
            (HandshakeError::MissingHeader("Upgrade"), "missing required header: Upgrade"),
            (HandshakeError::HeaderTooLarge(8192), "request header exceeds 8192 bytes"),
            (HandshakeError::UnknownPath("/nope".into()), "no application for path '/nope'"),
        ];
        for (err, text) in cases {
            assert_eq!(err.to_string(), text);
            assert!(err.source().is_none());
        }
    }
}
