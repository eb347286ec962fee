//! The single-threaded event loop: accept/read/write readiness is handled
//! exclusively on this thread, while request parsing and handler dispatch
//! are offloaded to bounded worker pools so the loop thread never blocks
//! on CPU-bound work.

use crate::{
    errors::ErrorKind,
    http::request::{check_completeness, Completeness, Request, RequestParser},
    limits::{ConnLimits, IdleLimits, ReqLimits, RespLimits, ServerLimits},
    pool::{BufferPool, WorkerPool},
    server::{
        connection::{Connection, ConnectionData, ConnectionFilter, ConnectionRegistry},
        reaper::IdleReaper,
        server_impl::{Handler, Profiler},
    },
    Version,
};
use crossbeam::channel::{unbounded, Receiver, Sender};
use mio::{
    net::{TcpListener, TcpStream},
    Events, Interest, Poll, Token, Waker,
};
use std::{
    collections::HashMap,
    io::{self, ErrorKind as IoErrorKind, Read, Write},
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

const ACCEPT_TOKEN: Token = Token(0);
const WAKE_TOKEN: Token = Token(1);
const FIRST_CONN_TOKEN: usize = 2;

/// One finished request/response, handed back from a worker pool to the
/// event-loop thread over a bounded-free `crossbeam` channel.
struct Completion<S> {
    token: usize,
    bytes: Vec<u8>,
    close: bool,
    conn_data: Option<S>,
}

/// Owns every piece of mutable runtime state the event loop touches:
/// the selector, the raw sockets (keyed by token), the logical
/// connection registry, the two worker pools, and per-connection user
/// data. Built once by [`Server::build`](super::server_impl::ServerBuilder::build)
/// and driven by [`EventLoop::run`].
pub(crate) struct EventLoop<H, S, F>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    poll: Poll,
    listener: TcpListener,
    waker: Arc<Waker>,
    sockets: HashMap<usize, TcpStream>,
    conn_data: HashMap<usize, S>,
    next_token: usize,

    registry: Arc<ConnectionRegistry>,
    read_pool: Arc<WorkerPool>,
    write_pool: Arc<WorkerPool>,
    buffer_pool: Arc<BufferPool>,
    reaper: IdleReaper,

    completion_tx: Sender<Completion<S>>,
    completion_rx: Receiver<Completion<S>>,

    handler: Arc<H>,
    connection_filter: Arc<F>,
    profiler: Arc<dyn Profiler>,

    server_limits: ServerLimits,
    conn_limits: ConnLimits,
    req_limits: ReqLimits,
    resp_limits: RespLimits,
}

impl<H, S, F> EventLoop<H, S, F>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        mut listener: TcpListener,
        handler: Arc<H>,
        connection_filter: Arc<F>,
        profiler: Arc<dyn Profiler>,
        server_limits: ServerLimits,
        conn_limits: ConnLimits,
        req_limits: ReqLimits,
        resp_limits: RespLimits,
        idle_limits: IdleLimits,
        read_pool: WorkerPool,
        write_pool: WorkerPool,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, ACCEPT_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        let (completion_tx, completion_rx) = unbounded();

        Ok(Self {
            poll,
            listener,
            waker,
            sockets: HashMap::new(),
            conn_data: HashMap::new(),
            next_token: FIRST_CONN_TOKEN,
            registry: Arc::new(ConnectionRegistry::new()),
            read_pool: Arc::new(read_pool),
            write_pool: Arc::new(write_pool),
            buffer_pool: Arc::new(BufferPool::new(req_limits.precalc.first_line)),
            reaper: IdleReaper::new(&idle_limits),
            completion_tx,
            completion_rx,
            handler,
            connection_filter,
            profiler,
            server_limits,
            conn_limits,
            req_limits,
            resp_limits,
        })
    }

    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Runs until `stop` is observed set. Returns once every socket has
    /// been deregistered and in-flight dispatch jobs have drained.
    pub(crate) fn run(&mut self, stop: &AtomicBool) -> io::Result<()> {
        let mut events = Events::with_capacity(1024);

        while !stop.load(Ordering::Acquire) {
            match self.poll.poll(&mut events, Some(Duration::from_millis(250))) {
                Ok(()) => {}
                Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            for event in events.iter() {
                match event.token() {
                    ACCEPT_TOKEN => self.accept_all()?,
                    WAKE_TOKEN => {}
                    token => {
                        let token = token.0;
                        if event.is_readable() {
                            self.readable(token);
                        }
                        if event.is_writable() {
                            self.writable(token);
                        }
                    }
                }
            }

            self.drain_completions();
            self.sweep_idle();
        }

        for token in self.sockets.keys().copied().collect::<Vec<_>>() {
            self.close(token);
        }
        Ok(())
    }

    fn accept_all(&mut self) -> io::Result<()> {
        loop {
            let (mut stream, client_addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == IoErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            };

            if self.registry.len() >= self.server_limits.max_pending_connections {
                drop(stream);
                continue;
            }

            let _ = socket2::SockRef::from(&stream).set_nodelay(true);
            let server_addr = stream.local_addr().unwrap_or(client_addr);

            let mut error_response = crate::Response::new(&self.resp_limits);
            if let Err(_handled) =
                self.connection_filter
                    .filter(client_addr, server_addr, &mut error_response)
            {
                let _ = stream.write_all(error_response.buffer());
                continue;
            }

            let token = self.next_token;
            self.next_token += 1;

            self.poll
                .registry()
                .register(&mut stream, Token(token), Interest::READABLE)?;

            self.sockets.insert(token, stream);
            self.conn_data.insert(token, S::new());
            self.registry.insert(token, Connection::new(&self.req_limits));
        }
    }

    fn readable(&mut self, token: usize) {
        let Some(stream) = self.sockets.get_mut(&token) else {
            return;
        };

        let mut chunk = self.buffer_pool.acquire();
        chunk.resize(8192, 0);
        let read = match stream.read(&mut chunk) {
            Ok(0) => {
                self.buffer_pool.release(chunk);
                self.close(token);
                return;
            }
            Ok(n) => n,
            Err(e) if e.kind() == IoErrorKind::WouldBlock => {
                self.buffer_pool.release(chunk);
                return;
            }
            Err(_) => {
                self.buffer_pool.release(chunk);
                self.close(token);
                return;
            }
        };
        chunk.truncate(read);

        let dispatch_ready = self.registry.with_mut(token, |conn| {
            conn.touch();
            conn.accumulator.extend_from_slice(&chunk);
            matches!(
                check_completeness(&conn.accumulator, &self.req_limits),
                Completeness::Complete(_) | Completeness::Bad(_)
            )
        });
        self.buffer_pool.release(chunk);

        if dispatch_ready == Some(true) {
            self.dispatch(token);
        }
    }

    fn dispatch(&mut self, token: usize) {
        let Some((raw, bad)) = self.registry.with_mut(token, |conn| {
            let outcome = check_completeness(&conn.accumulator, &self.req_limits);
            let consumed = match outcome {
                Completeness::Complete(n) => n,
                _ => conn.accumulator.len(),
            };
            let raw: Vec<u8> = conn.accumulator.drain(..consumed).collect();
            conn.in_flight = true;
            conn.request_count += 1;
            let bad = match outcome {
                Completeness::Bad(reason) => Some(reason),
                _ => None,
            };
            (raw, bad)
        }) else {
            return;
        };

        let Some(conn_data) = self.conn_data.remove(&token) else {
            return;
        };

        let json_errors = self.server_limits.json_errors;
        let tx = self.completion_tx.clone();
        let waker = self.waker.clone();

        if let Some(reason) = bad {
            let kind: ErrorKind = reason.into();
            let bytes = kind.as_http(Version::Http11, json_errors).to_vec();
            let _ = tx.send(Completion {
                token,
                bytes,
                close: true,
                conn_data: None,
            });
            let _ = waker.wake();
            drop(conn_data);
            return;
        }

        let req_limits = self.req_limits.clone();
        let resp_limits = self.resp_limits.clone();
        let max_requests = self.conn_limits.max_requests_per_connection;
        let request_count = self
            .registry
            .with_mut(token, |c| c.request_count)
            .unwrap_or(0);

        let handler = self.handler.clone();
        let profiler = self.profiler.clone();
        let write_pool = self.write_pool.clone();

        let tx_reject = tx.clone();
        let waker_reject = waker.clone();
        self.read_pool.submit(
            move || {
                match RequestParser::parse(&raw, &req_limits) {
                    Ok(req) => {
                        let tx = tx.clone();
                        let waker = waker.clone();
                        let tx_wp_reject = tx.clone();
                        let waker_wp_reject = waker.clone();
                        let version = req.version();
                        write_pool.submit(
                            move || run_handler(
                                handler, profiler, conn_data, req, &resp_limits, request_count, max_requests, token, tx,
                            ),
                            move || {
                                let bytes = ErrorKind::PoolRejected
                                    .as_http(version, json_errors)
                                    .to_vec();
                                let _ = tx_wp_reject.send(Completion {
                                    token,
                                    bytes,
                                    close: true,
                                    conn_data: None,
                                });
                                let _ = waker_wp_reject.wake();
                            },
                        );
                    }
                    Err(kind) => {
                        let bytes = kind.as_http(Version::Http11, json_errors).to_vec();
                        let _ = tx.send(Completion {
                            token,
                            bytes,
                            close: true,
                            conn_data: Some(conn_data),
                        });
                        let _ = waker.wake();
                    }
                }
            },
            move || {
                let bytes = ErrorKind::PoolRejected
                    .as_http(Version::Http11, json_errors)
                    .to_vec();
                let _ = tx_reject.send(Completion {
                    token,
                    bytes,
                    close: true,
                    conn_data: None,
                });
                let _ = waker_reject.wake();
            },
        );
    }

    fn drain_completions(&mut self) {
        while let Ok(completion) = self.completion_rx.try_recv() {
            let Completion {
                token,
                bytes,
                close,
                conn_data,
            } = completion;

            if let Some(data) = conn_data {
                self.conn_data.insert(token, data);
            }

            let applied = self.registry.with_mut(token, |conn| {
                conn.pending_write = bytes;
                conn.write_progress = 0;
                conn.close_after_write = close;
                conn.in_flight = false;
            });
            if applied.is_none() {
                continue;
            }

            if let Some(stream) = self.sockets.get_mut(&token) {
                let _ = self.poll.registry().reregister(
                    stream,
                    Token(token),
                    Interest::READABLE | Interest::WRITABLE,
                );
            }
        }
    }

    fn writable(&mut self, token: usize) {
        let Some(stream) = self.sockets.get_mut(&token) else {
            return;
        };

        let (done, should_close) = {
            let Some(result) = self.registry.with_mut(token, |conn| -> io::Result<(bool, bool)> {
                loop {
                    if conn.write_progress >= conn.pending_write.len() {
                        return Ok((true, conn.close_after_write));
                    }
                    match stream.write(&conn.pending_write[conn.write_progress..]) {
                        Ok(0) => return Ok((false, true)),
                        Ok(n) => conn.write_progress += n,
                        Err(e) if e.kind() == IoErrorKind::WouldBlock => return Ok((false, false)),
                        Err(_) => return Ok((false, true)),
                    }
                }
            }) else {
                return;
            };
            match result {
                Ok(pair) => pair,
                Err(_) => (false, true),
            }
        };

        if should_close {
            self.close(token);
            return;
        }
        if done {
            self.registry.with_mut(token, |conn| {
                conn.pending_write.clear();
                conn.write_progress = 0;
                conn.touch();
            });
            let _ = self
                .poll
                .registry()
                .reregister(stream, Token(token), Interest::READABLE);
        }
    }

    fn sweep_idle(&mut self) {
        let stale = self
            .reaper
            .maybe_sweep(&self.registry, self.conn_limits.socket_read_timeout);
        for token in stale {
            self.close(token);
        }
    }

    fn close(&mut self, token: usize) {
        if let Some(mut stream) = self.sockets.remove(&token) {
            let _ = self.poll.registry().deregister(&mut stream);
        }
        self.registry.remove(token);
        self.conn_data.remove(&token);
    }

    /// Drains and joins both worker pools. Called once, after [`Self::run`]
    /// returns, so both `Arc`s are uniquely held here and unwrap cleanly.
    pub(crate) fn shutdown_pools(self, grace: Duration) {
        if let Ok(pool) = Arc::try_unwrap(self.read_pool) {
            pool.shutdown(grace);
        }
        if let Ok(pool) = Arc::try_unwrap(self.write_pool) {
            pool.shutdown(grace);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_handler<H, S>(
    handler: Arc<H>,
    profiler: Arc<dyn Profiler>,
    mut conn_data: S,
    req: Request,
    resp_limits: &RespLimits,
    request_count: usize,
    max_requests: usize,
    token: usize,
    tx: Sender<Completion<S>>,
) where
    H: Handler<S>,
    S: ConnectionData,
{
    let mut response = crate::Response::new(resp_limits);
    response.version = req.version();
    response.keep_alive = req.keep_alive() && request_count < max_requests;

    profiler.start_request();
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        handler.handle(&mut conn_data, &req, &mut response)
    }));
    profiler.end_request();

    if outcome.is_err() {
        log::error!("handler panicked while processing a request; closing the connection");
        response = crate::Response::new(resp_limits);
        response.version = req.version();
        response.keep_alive = false;
        let _ = response
            .status(crate::StatusCode::InternalServerError)
            .body("Internal Server Error");
    }

    let close = !response.keep_alive;
    if close {
        conn_data.reset();
    }
    let bytes = response.buffer().clone();

    let _ = tx.send(Completion {
        token,
        bytes,
        close,
        conn_data: if close { None } else { Some(conn_data) },
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_start_after_accept_and_wake_reserved_slots() {
        assert_eq!(ACCEPT_TOKEN, Token(0));
        assert_eq!(WAKE_TOKEN, Token(1));
        assert_eq!(FIRST_CONN_TOKEN, 2);
    }
}
