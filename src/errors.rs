use crate::{query, Version};
use std::{error, fmt, io};

/// Classified failure reasons shared by the parser, the pools, and the
/// event loop. Parser/framing errors are fatal for the connection but
/// never for the process; handler failures never leak across requests.
#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    InvalidMethod,

    InvalidUrl,
    #[allow(dead_code)]
    Query(query::Error),

    InvalidVersion,
    UnsupportedVersion,

    InvalidHeader,
    TooManyHeaders,
    InvalidContentLength,
    InvalidConnection,

    BodyTooLarge,
    #[allow(dead_code)]
    BodyMismatch {
        expected: usize,
        available: usize,
    },
    #[allow(dead_code)]
    UnexpectedBody(usize),

    /// Bad `Transfer-Encoding: chunked` framing. Distinct from
    /// `InvalidContentLength`.
    MalformedFraming,

    ServiceUnavailable,
    Io(IoError),

    /// A worker pool's bounded queue was full at submission time. The
    /// submitting side handles backpressure directly; this variant exists
    /// so callers can classify the failure uniformly.
    PoolRejected,

    /// The selector itself failed. Fatal for the whole event loop, not
    /// just one connection.
    SelectorFailure(IoError),

    /// The idle reaper closed this connection for inactivity. Never
    /// serialized to the wire.
    IdleTimeout,
}

macro_rules! http_errors {
    ($($name:ident: $status_code:expr, $len:literal => $json:literal; )*) => {
        pub(crate) const fn as_http(
            &self,
            version: Version,
            json: bool,
        ) -> &'static [u8] {
            match (json, self, version) { $(
                (true, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
                (true, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
            )* }.as_bytes()
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidMethod: "400 Bad Request", "55"
            => r#"{"error":"Invalid HTTP method","code":"INVALID_METHOD"}"#;

        InvalidUrl: "400 Bad Request", "51"
            => r#"{"error":"Invalid URL format","code":"INVALID_URL"}"#;
        Query: "400 Bad Request", "55"
            => r#"{"error":"Invalid query string","code":"INVALID_QUERY"}"#;

        InvalidVersion: "400 Bad Request", "57"
            => r#"{"error":"Invalid HTTP version","code":"INVALID_VERSION"}"#;
        UnsupportedVersion: "505 HTTP Version Not Supported", "67"
            => r#"{"error":"HTTP version not supported","code":"UNSUPPORTED_VERSION"}"#;

        InvalidHeader: "400 Bad Request", "57"
            => r#"{"error":"Invalid header format","code":"INVALID_HEADER"}"#;
        TooManyHeaders: "431 Request Header Fields Too Large", "54"
            => r#"{"error":"Too many headers","code":"TOO_MANY_HEADERS"}"#;
        InvalidContentLength: "400 Bad Request", "66"
            => r#"{"error":"Invalid Content-Length","code":"INVALID_CONTENT_LENGTH"}"#;
        InvalidConnection: "400 Bad Request", "65"
            => r#"{"error":"Invalid Connection header","code":"INVALID_CONNECTION"}"#;

        BodyTooLarge: "413 Payload Too Large", "58"
            => r#"{"error":"Request body too large","code":"BODY_TOO_LARGE"}"#;
        BodyMismatch: "400 Bad Request", "55"
            => r#"{"error":"Body length mismatch","code":"BODY_MISMATCH"}"#;
        UnexpectedBody: "400 Bad Request", "60"
            => r#"{"error":"Unexpected request body","code":"UNEXPECTED_BODY"}"#;
        MalformedFraming: "400 Bad Request", "58"
            => r#"{"error":"Malformed chunked framing","code":"MALFORMED_FRAMING"}"#;

        ServiceUnavailable: "503 Service Unavailable", "72"
            => r#"{"error":"Service temporarily unavailable","code":"SERVICE_UNAVAILABLE"}"#;
        Io: "503 Service Unavailable", "48"
            => r#"{"error":"I/O error occurred","code":"IO_ERROR"}"#;
        PoolRejected: "503 Service Unavailable", "64"
            => r#"{"error":"Worker pool saturated","code":"POOL_REJECTED"}"#;
        SelectorFailure: "503 Service Unavailable", "58"
            => r#"{"error":"Event loop failure","code":"SELECTOR_FAILURE"}"#;
        IdleTimeout: "408 Request Timeout", "52"
            => r#"{"error":"Connection idle timeout","code":"IDLE_TIMEOUT"}"#;
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<query::Error> for ErrorKind {
    fn from(err: query::Error) -> Self {
        ErrorKind::Query(err)
    }
}
impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(IoError(err))
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_http_round_trips_status_and_json_flag() {
        let bytes = ErrorKind::InvalidMethod.as_http(Version::Http11, true);
        let text = std::str::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.contains("INVALID_METHOD"));

        let bytes = ErrorKind::InvalidMethod.as_http(Version::Http11, false);
        let text = std::str::from_utf8(bytes).unwrap();
        assert!(text.ends_with("content-length: 0\r\n\r\n"));
    }

    #[test]
    fn pool_rejected_and_idle_timeout_have_dedicated_dispositions() {
        let bytes = ErrorKind::PoolRejected.as_http(Version::Http11, true);
        assert!(std::str::from_utf8(bytes).unwrap().starts_with("HTTP/1.1 503"));

        let bytes = ErrorKind::IdleTimeout.as_http(Version::Http11, true);
        assert!(std::str::from_utf8(bytes).unwrap().starts_with("HTTP/1.1 408"));
    }

    #[test]
    fn io_error_equality_ignores_message_compares_kind() {
        let a = IoError(io::Error::new(io::ErrorKind::BrokenPipe, "a"));
        let b = IoError(io::Error::new(io::ErrorKind::BrokenPipe, "b"));
        assert_eq!(a, b);
    }
}
