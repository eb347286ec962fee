use crate::{limits::ReqLimits, Handled, Response};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::Mutex,
    time::{Duration, Instant},
};

/// Per-connection read-accumulator state tracked by the event loop.
///
/// Bytes arrive in arbitrary chunks from the readiness selector; they
/// accumulate here until [`check_completeness`](crate::http::request::check_completeness)
/// reports a full request, at which point the consumed prefix is
/// drained and handed to the read-parse pool.
pub(crate) struct Connection {
    pub(crate) accumulator: Vec<u8>,
    pub(crate) last_active: Instant,
    pub(crate) request_count: usize,
    pub(crate) created: Instant,
    pub(crate) in_flight: bool,
    pub(crate) pending_write: Vec<u8>,
    pub(crate) write_progress: usize,
    pub(crate) close_after_write: bool,
}

impl Connection {
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Self {
            accumulator: Vec::with_capacity(limits.precalc.first_line),
            last_active: Instant::now(),
            request_count: 0,
            created: Instant::now(),
            in_flight: false,
            pending_write: Vec::new(),
            write_progress: 0,
            close_after_write: false,
        }
    }

    #[inline]
    pub(crate) fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    #[inline]
    pub(crate) fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }
}

/// Concurrent registry of live connections, keyed by their mio token.
///
/// A connection is inserted exactly once on accept and removed exactly
/// once, either by the event loop when the peer closes the socket or
/// by the [`IdleReaper`](crate::server::reaper::IdleReaper) when it
/// goes stale. Double-removal is a logic error, not handled gracefully.
pub(crate) struct ConnectionRegistry {
    inner: Mutex<HashMap<usize, Connection>>,
}

impl ConnectionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, token: usize, conn: Connection) {
        let prev = self.inner.lock().unwrap().insert(token, conn);
        debug_assert!(prev.is_none(), "token reused while still registered");
    }

    pub(crate) fn remove(&self, token: usize) -> Option<Connection> {
        self.inner.lock().unwrap().remove(&token)
    }

    pub(crate) fn contains(&self, token: usize) -> bool {
        self.inner.lock().unwrap().contains_key(&token)
    }

    pub(crate) fn with_mut<R>(&self, token: usize, f: impl FnOnce(&mut Connection) -> R) -> Option<R> {
        self.inner.lock().unwrap().get_mut(&token).map(f)
    }

    /// Returns the tokens of connections idle longer than `timeout`.
    pub(crate) fn stale_tokens(&self, timeout: Duration) -> Vec<usize> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c)| c.idle_for() > timeout)
            .map(|(token, _)| *token)
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

//

/// Managing user session data stored between requests within a single
/// HTTP connection.
///
/// This trait allows you to store arbitrary state (e.g. authentication
/// data, multistep form status, a small cache). The state lives across
/// every request on one keep-alive connection and is reset when the
/// connection closes, so a fresh connection never sees stale data.
///
/// # Examples
/// ```no_run
/// use maker_web::ConnectionData;
/// use std::collections::HashMap;
///
/// struct MyConnectionData {
///     user_id: Option<i32>,
///     request_count: usize,
///     cache: HashMap<usize, [u8; 4]>,
/// }
///
/// impl ConnectionData for MyConnectionData {
///     fn new() -> Self {
///         Self {
///             user_id: None,
///             request_count: 0,
///             cache: HashMap::new(),
///         }
///     }
///
///     fn reset(&mut self) {
///         self.user_id = None;
///         self.request_count = 0;
///         self.cache.clear(); // Keeps the allocated capacity
///     }
/// }
/// ```
pub trait ConnectionData: Sync + Send + 'static {
    /// Creates a new instance of user data.
    ///
    /// Called once per connection slot at pool warm-up, avoiding
    /// runtime allocation on the hot accept path.
    fn new() -> Self;

    /// Resets the internal state of the instance to its initial values.
    ///
    /// Called after a connection is closed, so the slot can be reused
    /// for the next one. If implemented correctly, avoids allocation.
    fn reset(&mut self);
}

impl ConnectionData for () {
    #[inline(always)]
    fn new() -> Self {}

    #[inline(always)]
    fn reset(&mut self) {}
}

/// A trait for filtering TCP connections before HTTP processing.
///
/// Runs once per accepted connection, before the first byte is read.
/// Checks here should be fast and in-memory (IP blacklists, geo
/// restrictions, rate-limit counters) since the event loop's single
/// thread blocks on it.
///
/// # Examples
/// ```
/// use std::{collections::HashSet, net::{SocketAddr, IpAddr}};
/// use maker_web::{ConnectionFilter, Response, Handled, StatusCode};
///
/// struct MyConnFilter {
///     blacklist: HashSet<IpAddr>,
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response,
///     ) -> Result<(), Handled> {
///         if self.blacklist.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
/// }
/// ```
pub trait ConnectionFilter: Sync + Send + 'static {
    /// Validates an incoming connection before any bytes are read.
    fn filter(
        &self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        error_response: &mut Response,
    ) -> Result<(), Handled>;
}

impl ConnectionFilter for () {
    #[inline(always)]
    fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_insert_remove_round_trips() {
        let registry = ConnectionRegistry::new();
        let limits = ReqLimits::default().precalculate();

        registry.insert(1, Connection::new(&limits));
        assert!(registry.contains(1));
        assert_eq!(registry.len(), 1);

        let removed = registry.remove(1);
        assert!(removed.is_some());
        assert!(!registry.contains(1));
    }

    #[test]
    fn stale_tokens_reports_only_connections_past_timeout() {
        let registry = ConnectionRegistry::new();
        let limits = ReqLimits::default().precalculate();

        registry.insert(1, Connection::new(&limits));
        assert!(registry.stale_tokens(Duration::from_secs(0)).contains(&1));
        assert!(registry.stale_tokens(Duration::from_secs(60)).is_empty());
    }
}
