//! Trie-based request router with static, dynamic (`:name`) and
//! wildcard (`*`) segments, mountable sub-routers, and an ordered
//! middleware chain run before every matched handler.

mod middleware;
mod trie;

pub use middleware::{Middleware, Next};

use crate::{
    http::{request::Request, types::Method},
    router::{middleware::MiddlewareChain, trie::RouterNode},
    ConnectionData, Handled, Handler, Response, StatusCode,
};
use std::sync::Arc;

/// Splits a request path into non-empty segments, mirroring how routes
/// are registered (`"/users/:id"` -> `["users", ":id"]`).
pub(crate) fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// A mountable collection of routes and middleware.
///
/// # Examples
/// ```
/// use maker_web::{Router, Request, Response, Handled, StatusCode};
///
/// let mut router = Router::new();
/// router.get("/ping", |_req: &Request, resp: &mut Response| {
///     resp.status(StatusCode::Ok).body("pong")
/// });
/// ```
pub struct Router {
    root: RouterNode,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            root: RouterNode::default(),
        }
    }

    fn route<F>(&mut self, method: Method, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response) -> Handled + Send + Sync + 'static,
    {
        let segments = split_path(path);
        self.root.insert(&segments, method, Arc::new(handler));
        self
    }

    pub fn get<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response) -> Handled + Send + Sync + 'static,
    {
        self.route(Method::Get, path, handler)
    }

    pub fn post<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response) -> Handled + Send + Sync + 'static,
    {
        self.route(Method::Post, path, handler)
    }

    pub fn put<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response) -> Handled + Send + Sync + 'static,
    {
        self.route(Method::Put, path, handler)
    }

    pub fn patch<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response) -> Handled + Send + Sync + 'static,
    {
        self.route(Method::Patch, path, handler)
    }

    pub fn delete<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response) -> Handled + Send + Sync + 'static,
    {
        self.route(Method::Delete, path, handler)
    }

    pub fn options<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response) -> Handled + Send + Sync + 'static,
    {
        self.route(Method::Options, path, handler)
    }

    pub fn head<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response) -> Handled + Send + Sync + 'static,
    {
        self.route(Method::Head, path, handler)
    }

    /// Registers `handler` for every method at `path` that has no more
    /// specific handler of its own (the `ALL` method token).
    pub fn all<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response) -> Handled + Send + Sync + 'static,
    {
        let segments = split_path(path);
        self.root.insert_all(&segments, Arc::new(handler));
        self
    }

    /// Registers `mw` to run, in registration order, ahead of every
    /// route already or later defined on this router (and, once
    /// mounted, ahead of routes on the parent that reach it too).
    pub fn middleware<M: Middleware>(&mut self, mw: M) -> &mut Self {
        self.root.use_middleware(Arc::new(mw));
        self
    }

    /// Grafts `sub`'s routes under `prefix`. Path params and
    /// middleware defined on `sub` are preserved; `sub`'s own
    /// middleware runs after the mounting router's.
    pub fn mount(&mut self, prefix: &str, sub: Router) -> &mut Self {
        let segments = split_path(prefix);
        self.root.mount(&segments, sub.root);
        self
    }

    /// Looks up and runs the matching route's middleware chain and
    /// handler, binding path parameters and the traversed mount prefix
    /// onto `req` first. Returns `None` if no route matches `req`'s
    /// method and path.
    pub(crate) fn dispatch(&self, req: &mut Request, resp: &mut Response) -> Option<Handled> {
        let segments = split_path(req.path());
        let (handler, params, middleware, base_url) = self.root.lookup(&segments, req.method())?;

        for (name, value) in params {
            req.path_params_mut().insert(name, value);
        }
        if !base_url.is_empty() {
            *req.base_url_mut() = base_url;
        }

        let chain = MiddlewareChain { middleware };
        Some(chain.run(req, resp, &handler))
    }
}

/// Lets a [`Router`] be installed directly as a server's handler:
///
/// ```no_run
/// use maker_web::{Router, Server, StatusCode, Request, Response};
///
/// let mut router = Router::new();
/// router.get("/ping", |_req: &Request, resp: &mut Response| {
///     resp.status(StatusCode::Ok).body("pong")
/// });
///
/// Server::<Router>::builder()
///     .listener(std::net::TcpListener::bind("127.0.0.1:0").unwrap())
///     .handler(router)
///     .build();
/// ```
///
/// `Request`/`Response` flow through `Handler::handle` by shared/exclusive
/// reference respectively, so dispatch works on an owned clone of the
/// incoming request -- this is the "in-flight copy" `Request::base_url`'s
/// doc comment refers to, never the caller's original.
impl<S: ConnectionData> Handler<S> for Router {
    fn handle(&self, _connection_data: &mut S, request: &Request, response: &mut Response) -> Handled {
        let mut req = request.clone();
        match self.dispatch(&mut req, response) {
            Some(handled) => handled,
            None => response.status(StatusCode::NotFound).body("Not Found"),
        }
    }
}
