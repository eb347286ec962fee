use crate::{
    http::{request::Request, response::Response},
    limits::{ConnLimits, IdleLimits, PoolLimits, ReqLimits, RespLimits, ServerLimits},
    pool::WorkerPool,
    server::{
        connection::{ConnectionData, ConnectionFilter},
        event_loop::EventLoop,
    },
    Handled,
};
use std::{
    io,
    marker::PhantomData,
    net::TcpListener as StdTcpListener,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// A trait for handling HTTP requests and generating responses.
///
/// You can use:
/// - `&self` for shared immutable data (e.g. database connection pool, router configuration)
/// - `&mut S` for connection-specific mutable state (e.g. authentication tokens, session data)
///
/// Runs on a write-dispatch worker thread, never on the event-loop thread,
/// so blocking work here only ever stalls one worker slot.
///
/// # Examples
///
/// Basic request handler
/// ```
/// use maker_web::{Handler, Request, Response, Handled, StatusCode};
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     fn handle(&self, _: &mut (), req: &Request, resp: &mut Response) -> Handled {
///         if req.path() == "/echo" {
///             resp.status(StatusCode::Ok).body("Echo response")
///         } else {
///             resp.status(StatusCode::NotFound).body("Not found :(")
///         }
///     }
/// }
/// ```
/// Handler with [`ConnectionData`]
/// ```
/// use maker_web::{Handler, ConnectionData, Request, Response, Handled, StatusCode};
///
/// struct CountingHandler;
///
/// impl Handler<State> for CountingHandler {
///     fn handle(&self, data: &mut State, _req: &Request, resp: &mut Response) -> Handled {
///         data.request_count += 1;
///
///         resp.status(StatusCode::Ok)
///             .body(format!("Request #{}", data.request_count))
///     }
/// }
///
/// struct State {
///     request_count: usize,
/// }
///
/// impl ConnectionData for State {
///     fn new() -> Self {
///         Self { request_count: 0 }
///     }
///
///     fn reset(&mut self) {
///         self.request_count = 0;
///     }
/// }
/// ```
pub trait Handler<S = ()>
where
    Self: Sync + Send + 'static,
    S: ConnectionData,
{
    /// Processes an HTTP request and generates a response.
    ///
    /// # Parameters
    ///
    /// - `connection_data`: Mutable reference to connection-specific state
    /// - `req`: Immutable reference to the parsed HTTP request
    /// - `resp`: Mutable response builder for constructing the response
    ///
    /// # Panics
    ///
    /// A panicking handler is caught at the call site and turned into a
    /// `500` with the connection closed afterward; it does not bring down
    /// the worker thread or the process.
    fn handle(&self, connection_data: &mut S, request: &Request, response: &mut Response) -> Handled;
}

/// Request/response instrumentation hook, installed via
/// [`ServerBuilder::profiler`]. The default `()` implementation is a no-op.
pub trait Profiler: Sync + Send + 'static {
    /// Called on the write-dispatch worker just before the handler runs.
    fn start_request(&self) {}
    /// Called on the write-dispatch worker just after the handler returns.
    fn end_request(&self) {}
}

impl Profiler for () {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServerState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl ServerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// A handle that can request graceful shutdown of a running [`Server`]
/// from another thread. Cheap to clone.
#[derive(Clone)]
pub struct ServerHandle {
    state: Arc<AtomicU8>,
    stop_requested: Arc<AtomicBool>,
    waker: Arc<mio::Waker>,
}

impl ServerHandle {
    /// Current lifecycle state, mostly useful for tests and diagnostics.
    pub(crate) fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Requests shutdown and waits up to `grace` for the event loop to
    /// drain in-flight work and reach [`ServerState::Stopped`]. Returns
    /// whether it stopped in time.
    pub fn stop(&self, grace: Duration) -> bool {
        if self.state() == ServerState::Stopped {
            return true;
        }
        self.stop_requested.store(true, Ordering::Release);
        let _ = self.waker.wake();

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if self.state() == ServerState::Stopped {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        self.state() == ServerState::Stopped
    }
}

/// An embeddable HTTP/1.1 server: a single-threaded event loop over a
/// readiness selector, with parsing and dispatch offloaded to bounded
/// worker pools.
///
/// # Examples
///
/// ```no_run
/// use maker_web::{Server, Handler, Request, Response, Handled, StatusCode};
/// use std::net::TcpListener;
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
///         resp.status(StatusCode::Ok).body("Hello world!")
///     }
/// }
///
/// fn main() {
///     Server::builder()
///         .listener(TcpListener::bind("127.0.0.1:8080").unwrap())
///         .handler(MyHandler)
///         .build()
///         .start()
///         .unwrap();
/// }
/// ```
pub struct Server<H, S = (), F = ()>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    event_loop: Option<EventLoop<H, S, F>>,
    state: Arc<AtomicU8>,
    stop_requested: Arc<AtomicBool>,
    waker: Arc<mio::Waker>,
    shutdown_grace: Duration,
}

impl<H, S> Server<H, S, ()>
where
    H: Handler<S>,
    S: ConnectionData,
{
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder() -> ServerBuilder<H, S, ()> {
        ServerBuilder {
            listener: None,
            handler: None,
            connection_filter: Arc::new(()),
            profiler: Arc::new(()),
            _marker: PhantomData,

            server_limits: None,
            connection_limits: None,
            request_limits: None,
            response_limits: None,
            idle_limits: None,
            read_pool_limits: None,
            write_pool_limits: None,
            shutdown_grace: None,
        }
    }
}

impl<H, S, F> Server<H, S, F>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    /// A cheap, cloneable handle for requesting shutdown from another
    /// thread while [`start`](Self::start) runs on this one.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            state: self.state.clone(),
            stop_requested: self.stop_requested.clone(),
            waker: self.waker.clone(),
        }
    }

    /// Runs the event loop on the calling thread until
    /// [`ServerHandle::stop`] is called (from another thread) or the
    /// selector itself fails.
    ///
    /// # Panics
    ///
    /// Panics if called more than once on the same `Server` -- a stopped
    /// server is a terminal state, matching the documented lifecycle.
    #[track_caller]
    pub fn start(&mut self) -> io::Result<()> {
        self.set_state(ServerState::Starting);
        let mut event_loop = self
            .event_loop
            .take()
            .expect("`start` must not be called on an already-started or stopped Server");

        self.set_state(ServerState::Running);
        let result = event_loop.run(&self.stop_requested);

        self.set_state(ServerState::Stopping);
        event_loop.shutdown_pools(self.shutdown_grace);
        self.set_state(ServerState::Stopped);

        result
    }

    fn set_state(&self, state: ServerState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

// `ServerState` values map onto a small, dense `u8` range, so storing the
// discriminant directly avoids a separate lookup table.
impl From<ServerState> for u8 {
    fn from(state: ServerState) -> Self {
        state as u8
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder<H, S = (), F = ()>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    listener: Option<StdTcpListener>,
    handler: Option<Arc<H>>,
    connection_filter: Arc<F>,
    profiler: Arc<dyn Profiler>,
    _marker: PhantomData<S>,

    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
    request_limits: Option<ReqLimits>,
    response_limits: Option<RespLimits>,
    idle_limits: Option<IdleLimits>,
    read_pool_limits: Option<PoolLimits>,
    write_pool_limits: Option<PoolLimits>,
    shutdown_grace: Option<Duration>,
}

impl<H, S, F> ServerBuilder<H, S, F>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    /// Sets the already-bound TCP listener the server will accept from.
    ///
    /// **This is a required component.** The listener is switched to
    /// non-blocking mode internally; callers should not do this
    /// themselves.
    #[inline(always)]
    pub fn listener(mut self, listener: StdTcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Sets the request handler that will process incoming requests.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Installs a connection filter to check incoming TCP connections
    /// before any bytes are read.
    ///
    /// For more information, see [`ConnectionFilter`](crate::ConnectionFilter).
    #[inline(always)]
    pub fn conn_filter<NewF>(self, filter: NewF) -> ServerBuilder<H, S, NewF>
    where
        NewF: ConnectionFilter,
    {
        ServerBuilder {
            listener: self.listener,
            handler: self.handler,
            connection_filter: Arc::new(filter),
            profiler: self.profiler,
            _marker: self._marker,
            server_limits: self.server_limits,
            connection_limits: self.connection_limits,
            request_limits: self.request_limits,
            response_limits: self.response_limits,
            idle_limits: self.idle_limits,
            read_pool_limits: self.read_pool_limits,
            write_pool_limits: self.write_pool_limits,
            shutdown_grace: self.shutdown_grace,
        }
    }

    /// Installs a [`Profiler`] to instrument every request/response pair.
    /// Omitting this call leaves the no-op default in place.
    #[inline(always)]
    pub fn profiler<P: Profiler>(mut self, profiler: P) -> Self {
        self.profiler = Arc::new(profiler);
        self
    }

    /// Configures server-level admission and overload behavior.
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures connection-level timeouts and lifetime.
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Configures idle-reaper sweep interval.
    #[inline(always)]
    pub fn idle_limits(mut self, limits: IdleLimits) -> Self {
        self.idle_limits = Some(limits);
        self
    }

    /// Configures request parsing and buffer pre-allocation limits.
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Configures response buffer allocation limits.
    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Configures the read-parse worker pool (`core`/`max`/`queue_capacity`).
    #[inline(always)]
    pub fn read_pool_limits(mut self, limits: PoolLimits) -> Self {
        self.read_pool_limits = Some(limits);
        self
    }

    /// Configures the write-dispatch worker pool (`core`/`max`/`queue_capacity`).
    #[inline(always)]
    pub fn write_pool_limits(mut self, limits: PoolLimits) -> Self {
        self.write_pool_limits = Some(limits);
        self
    }

    /// How long [`ServerHandle::stop`] waits for in-flight pool work to
    /// finish before forcibly joining worker threads (default: `5s`).
    #[inline(always)]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = Some(grace);
        self
    }

    /// Finalizes the builder and constructs a [`Server`] instance.
    ///
    /// # Panics
    ///
    /// Panics when:
    /// - The `listener` method was not called.
    /// - The `handler` method was not called.
    /// - The selector or non-blocking socket setup fails at the OS level.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server<H, S, F> {
        let listener = self
            .listener
            .expect("The `listener` method must be called to create");
        let handler = self
            .handler
            .expect("The `handler` method must be called to create");

        listener
            .set_nonblocking(true)
            .expect("failed to switch listener to non-blocking mode");
        let mio_listener = mio::net::TcpListener::from_std(listener);

        let server_limits = self.server_limits.unwrap_or_default();
        let conn_limits = self.connection_limits.unwrap_or_default();
        let req_limits = self.request_limits.unwrap_or_default().precalculate();
        let resp_limits = self.response_limits.unwrap_or_default();
        let idle_limits = self.idle_limits.unwrap_or_default();
        let read_pool_limits = self.read_pool_limits.unwrap_or_default();
        let write_pool_limits = self.write_pool_limits.unwrap_or_default();
        let shutdown_grace = self.shutdown_grace.unwrap_or(Duration::from_secs(5));

        let read_pool = WorkerPool::new(
            "read-parse",
            read_pool_limits.core,
            read_pool_limits.max,
            read_pool_limits.queue_capacity,
        );
        let write_pool = WorkerPool::new(
            "write-dispatch",
            write_pool_limits.core,
            write_pool_limits.max,
            write_pool_limits.queue_capacity,
        );

        let event_loop = EventLoop::new(
            mio_listener,
            handler,
            self.connection_filter,
            self.profiler,
            server_limits,
            conn_limits,
            req_limits,
            resp_limits,
            idle_limits,
            read_pool,
            write_pool,
        )
        .expect("failed to initialize the event loop's selector");

        let waker = event_loop.waker();

        Server {
            event_loop: Some(event_loop),
            state: Arc::new(AtomicU8::new(ServerState::Created as u8)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            waker,
            shutdown_grace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{limits::PoolLimits, Request, Response, StatusCode};

    struct Echo;
    impl Handler for Echo {
        fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
            resp.status(StatusCode::Ok).body("ok")
        }
    }

    fn bound_listener() -> StdTcpListener {
        StdTcpListener::bind("127.0.0.1:0").expect("binding to an ephemeral port must succeed")
    }

    #[test]
    fn builder_requires_listener_and_handler() {
        let result = std::panic::catch_unwind(|| {
            Server::<Echo>::builder().handler(Echo).build();
        });
        assert!(result.is_err());
    }

    #[test]
    fn build_starts_in_created_state_and_stop_is_idempotent_before_start() {
        let server = Server::<Echo>::builder()
            .listener(bound_listener())
            .handler(Echo)
            .read_pool_limits(PoolLimits {
                core: 1,
                max: 1,
                queue_capacity: 4,
                _priv: (),
            })
            .write_pool_limits(PoolLimits {
                core: 1,
                max: 1,
                queue_capacity: 4,
                _priv: (),
            })
            .build();

        assert_eq!(server.handle().state(), ServerState::Created);
    }

    #[test]
    fn handle_stop_transitions_a_running_server_to_stopped() {
        let mut server = Server::<Echo>::builder()
            .listener(bound_listener())
            .handler(Echo)
            .read_pool_limits(PoolLimits {
                core: 1,
                max: 1,
                queue_capacity: 4,
                _priv: (),
            })
            .write_pool_limits(PoolLimits {
                core: 1,
                max: 1,
                queue_capacity: 4,
                _priv: (),
            })
            .build();

        let handle = server.handle();
        let join = thread::spawn(move || server.start());

        assert!(handle.stop(Duration::from_secs(5)));
        join.join().unwrap().unwrap();
    }
}
