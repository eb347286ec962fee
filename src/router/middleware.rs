use crate::{http::request::Request, Handled, Response};
use std::sync::Arc;

pub(crate) type HandlerFn = Arc<dyn Fn(&Request, &mut Response) -> Handled + Send + Sync>;

/// A single link in the middleware chain.
///
/// Implementations call [`Next::call`] at most once to continue the
/// chain, or return directly from [`handle`](Middleware::handle) to
/// short-circuit it (e.g. an auth check rejecting the request before
/// it reaches the route handler). `Next::call` consumes the
/// continuation, so the chain cannot be invoked twice even by mistake.
///
/// # Examples
/// ```
/// use maker_web::{router::{Middleware, Next}, Handled, Request, Response, StatusCode};
///
/// struct RequireAuthHeader;
///
/// impl Middleware for RequireAuthHeader {
///     fn handle(&self, req: &Request, resp: &mut Response, next: Next<'_>) -> Handled {
///         if req.header("authorization").is_some() {
///             next.call(req, resp)
///         } else {
///             resp.status(StatusCode::Unauthorized).body("Missing credentials")
///         }
///     }
/// }
/// ```
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, req: &Request, resp: &mut Response, next: Next<'_>) -> Handled;
}

/// The remainder of the middleware chain, consumed by calling it once.
pub struct Next<'a> {
    pub(crate) chain: &'a [Arc<dyn Middleware>],
    pub(crate) terminal: &'a HandlerFn,
}

impl<'a> Next<'a> {
    /// Invokes the next middleware in the chain, or the terminal route
    /// handler once none remain.
    pub fn call(self, req: &Request, resp: &mut Response) -> Handled {
        match self.chain.split_first() {
            Some((mw, rest)) => mw.handle(
                req,
                resp,
                Next {
                    chain: rest,
                    terminal: self.terminal,
                },
            ),
            None => (self.terminal)(req, resp),
        }
    }
}

pub(crate) struct MiddlewareChain {
    pub(crate) middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub(crate) fn run(&self, req: &Request, resp: &mut Response, terminal: &HandlerFn) -> Handled {
        Next {
            chain: &self.middleware,
            terminal,
        }
        .call(req, resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        http::request::RequestParser,
        limits::{ReqLimits, RespLimits},
        StatusCode,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_request() -> Request {
        let limits = ReqLimits::default().precalculate();
        RequestParser::parse(b"GET /x HTTP/1.1\r\n\r\n", &limits).unwrap()
    }

    struct RecordingMiddleware {
        order: Arc<AtomicUsize>,
        expected: usize,
    }

    impl Middleware for RecordingMiddleware {
        fn handle(&self, req: &Request, resp: &mut Response, next: Next<'_>) -> Handled {
            assert_eq!(self.order.fetch_add(1, Ordering::SeqCst), self.expected);
            next.call(req, resp)
        }
    }

    struct ShortCircuit;

    impl Middleware for ShortCircuit {
        fn handle(&self, _req: &Request, resp: &mut Response, _next: Next<'_>) -> Handled {
            resp.status(StatusCode::Forbidden).body("blocked")
        }
    }

    #[test]
    fn chain_runs_in_registration_order_then_terminal() {
        let order = Arc::new(AtomicUsize::new(0));
        let chain = MiddlewareChain {
            middleware: vec![
                Arc::new(RecordingMiddleware {
                    order: order.clone(),
                    expected: 0,
                }),
                Arc::new(RecordingMiddleware {
                    order: order.clone(),
                    expected: 1,
                }),
            ],
        };
        let terminal: HandlerFn = Arc::new(|_req, resp| resp.status(StatusCode::Ok).body("done"));

        let req = test_request();
        let mut resp = Response::new(&RespLimits::default());
        chain.run(&req, &mut resp, &terminal);

        assert_eq!(order.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn middleware_can_short_circuit_before_terminal() {
        let chain = MiddlewareChain {
            middleware: vec![Arc::new(ShortCircuit)],
        };
        let terminal: HandlerFn =
            Arc::new(|_req, _resp| panic!("terminal handler must not run"));

        let req = test_request();
        let mut resp = Response::new(&RespLimits::default());
        chain.run(&req, &mut resp, &terminal);
    }
}
