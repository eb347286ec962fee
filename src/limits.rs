//! Web server configuration limits and timeouts
//!
//! # Security-First Defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Resource exhaustion attacks
//! - Memory overflows
//! - Slowloris attacks
//! - Header flooding
//!
//! # Memory Consumption
//!
//! Each active connection consumes memory according to:
//!
//! `Total` = [`Request Buffer`](crate::limits::ReqLimits#memory-allocation-strategy) +
//!           [`Response Buffer`](crate::limits::RespLimits#buffer-management) +
//!           `Runtime Overhead`
//!
//! See each component's documentation for details and configuration options.
//!
//! # Examples
//!
//! ```no_run
//! use maker_web::{Server, limits::{ConnLimits, ReqLimits, ServerLimits}};
//! use std::{net::TcpListener, time::Duration};
//!
//! # maker_web::impt_default_handler!{MyHandler}
//! fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").unwrap())
//!         .handler(MyHandler)
//!         .server_limits(ServerLimits {
//!             max_pending_connections: 5000,
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             socket_read_timeout: Duration::from_secs(5),
//!             max_requests_per_connection: 10_000,
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             header_count: 18,
//!             body_size: 16 * 1024,
//!             ..ReqLimits::default()
//!         })
//!         .build()
//!         .start()
//!         .unwrap();
//! }
//! ```

use std::time::Duration;

/// Controls server-level admission and overload behavior.
///
/// The pools themselves (read-parse and write-dispatch) are configured
/// separately via [`PoolLimits`]; `ServerLimits` governs the TCP-accept
/// side of the event loop.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Maximum number of TCP connections waiting to be registered with the
    /// selector before new accepts are answered with an immediate `503`
    /// (default: `250`).
    pub max_pending_connections: usize,

    /// Format for error responses (default: `true`).
    ///
    /// If `true`, error responses carry a structured JSON body; if `false`,
    /// the body is empty and only the status line/headers are sent.
    pub json_errors: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_pending_connections: 250,
            json_errors: true,
            _priv: (),
        }
    }
}

/// Bounded worker-pool sizing: `(core, max, queue_capacity)`.
///
/// Mirrors the constructor contract of the read-parse and write-dispatch
/// pools: `core` threads are always running, up to `max` threads are
/// spun up under load, and at most `queue_capacity` tasks may be queued
/// before `submit` synchronously invokes the rejection callback.
#[derive(Debug, Clone)]
pub struct PoolLimits {
    /// Threads kept alive even when idle (default: `4`).
    pub core: usize,
    /// Maximum threads spun up under load (default: `16`).
    pub max: usize,
    /// Bounded task-queue depth; beyond this, `submit` rejects synchronously
    /// instead of queuing (default: `512`).
    pub queue_capacity: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            core: 4,
            max: 16,
            queue_capacity: 512,
            _priv: (),
        }
    }
}

/// Connection-level limits and timeouts.
///
/// Controls individual TCP connection behavior including timeouts,
/// lifetime, and request limits.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum duration a connection may sit idle between requests before
    /// the idle reaper closes it (default: `2 seconds`).
    ///
    /// This is the primary mechanism for cleaning up stalled connections;
    /// prevents slowloris attacks and frees resources from inactive clients.
    pub socket_read_timeout: Duration,

    /// Maximum duration to wait for writing a response to the socket
    /// (default: `3 seconds`). If data can't be written in time, the
    /// connection is terminated.
    pub socket_write_timeout: Duration,

    /// Maximum number of requests allowed per connection (default: `100`).
    ///
    /// Connection closes (`Connection: close`) after processing this many
    /// requests, bounding per-connection memory accumulation.
    pub max_requests_per_connection: usize,

    /// Maximum lifetime of a connection from accept to closure
    /// (default: `2 minutes`). Final safety net independent of activity.
    pub connection_lifetime: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(2),
            socket_write_timeout: Duration::from_secs(3),
            connection_lifetime: Duration::from_secs(120),
            max_requests_per_connection: 100,
            _priv: (),
        }
    }
}

/// Idle-reaper sweep configuration.
///
/// Governs how often [`IdleReaper`](crate::server::IdleReaper) scans the
/// connection registry and the threshold past which an inactive connection
/// is considered stale. See [property 10](crate#testable-properties) of the
/// testable-properties list: a connection idle longer than
/// `ConnLimits::socket_read_timeout` is closed within one `reap_interval`.
#[derive(Debug, Clone)]
pub struct IdleLimits {
    /// How often the reaper wakes to scan the registry (default: `1 second`).
    pub reap_interval: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for IdleLimits {
    fn default() -> Self {
        Self {
            reap_interval: Duration::from_secs(1),
            _priv: (),
        }
    }
}

/// HTTP request parsing limits and buffer pre-allocation strategy.
///
/// **SECURITY-FIRST DEFAULTS**
///
/// These limits are intentionally conservative to prevent resource
/// exhaustion and various parsing attacks. They work well for simple REST
/// APIs, microservices, internal tools, and low-memory environments.
///
/// You may need to increase these if you see `413 Payload Too Large` or
/// `431 Request Header Fields Too Large` for legitimate requests.
///
/// # Memory Allocation Strategy
///
/// Each connection's read-accumulator is sized from these limits so the
/// [`BufferPool`](crate::pool::BufferPool) can hand out fixed-capacity
/// buffers without reallocating mid-request:
///
/// ```text
/// Total Buffer = First Line + (Headers × Header Line) + Body + Overhead
/// ```
///
/// # Example
/// ```
/// use maker_web::limits::ReqLimits;
///
/// let limits = ReqLimits::default();
/// let buffer_size = limits.estimated_buffer_size();
/// println!("Each connection needs {} bytes for its read buffer", buffer_size);
/// ```
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum URL length in bytes including path and query string
    /// (default: `256 B`).
    pub url_size: usize,
    /// Maximum number of path segments in the URL (default: `8`).
    pub url_parts: usize,
    /// Maximum query string length (default: `128`).
    pub url_query_size: usize,
    /// Maximum number of query parameters (default: `8`).
    pub url_query_parts: usize,

    /// Maximum number of headers per request (default: `16`).
    pub header_count: usize,
    /// Maximum header name length in bytes (default: `64`).
    pub header_name_size: usize,
    /// Maximum header value length in bytes (default: `512`).
    pub header_value_size: usize,

    /// Maximum request body size in bytes (default: `4 KB`).
    pub body_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub precalc: ReqLimitsPrecalc,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            url_size: 256,
            url_parts: 8,
            url_query_size: 128,
            url_query_parts: 8,

            header_count: 16,
            header_name_size: 64,
            header_value_size: 512,

            body_size: 4 * 1024,

            precalc: ReqLimitsPrecalc::default(),
        }
    }
}

impl ReqLimits {
    /// Returns the estimated buffer size required per connection.
    #[inline(always)]
    pub fn estimated_buffer_size(self) -> usize {
        self.precalculate().precalc.buffer
    }

    #[inline(always)]
    pub(crate) fn precalculate(mut self) -> Self {
        self.precalc.first_line = self.first_line();
        self.precalc.h_line = self.h_line();
        self.precalc.buffer = self.buffer();
        self.precalc.req_without_body = self.precalc.buffer - self.body_size;

        self
    }

    #[inline(always)]
    // First line + Header * N + "\r\n" + Body
    fn buffer(&self) -> usize {
        self.precalc.first_line + self.header_count * self.precalc.h_line + 2 + self.body_size
    }

    #[inline(always)]
    // GET /url/test HTTP/1.1\r\n
    // Formula: Method(7) + " " + URl + " " + Version(8) + "\r\n"
    fn first_line(&self) -> usize {
        19 + self.url_size
    }

    #[inline(always)]
    // Authorization: Sample%20Data\r\n
    // Formula: Name + ": " + Value + "\r\n"
    fn h_line(&self) -> usize {
        self.header_name_size + self.header_value_size + 4
    }
}

#[doc(hidden)]
#[derive(Debug, Clone, Default)]
pub struct ReqLimitsPrecalc {
    pub(crate) buffer: usize,
    pub(crate) first_line: usize,
    pub(crate) req_without_body: usize,
    pub(crate) h_line: usize,
}

/// Configuration for response processing and memory allocation limits.
///
/// Controls how response buffers are allocated and managed to balance
/// memory usage and performance.
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Initial buffer capacity allocated for responses (default: `1024 B`).
    pub default_capacity: usize,
    /// Maximum allowed buffer capacity kept around for reuse (default: `8192 B`).
    ///
    /// If a response exceeds `max_capacity`, the oversized buffer is
    /// dropped instead of returned to the pool.
    pub max_capacity: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            default_capacity: 1024,
            max_capacity: 8 * 1024,
            _priv: (),
        }
    }
}
