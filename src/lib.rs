//! maker_web - Embeddable HTTP/1.1 server framework for microservices
//!
//! A performance-oriented HTTP/1.1 server built around a single-threaded
//! event loop over a readiness selector, with CPU-bound work (request
//! parsing, handler dispatch) offloaded to bounded worker pools so the
//! loop thread never blocks. Designed for microservices requiring
//! fine-grained control over resources and predictable backpressure.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1** only: persistent connections, chunked transfer
//!   encoding, optional gzip response compression.
//!
//! # Features
//!
//! ## 🔒 Security & Protection
//! - **Built-in DoS/DDoS protection** - bounded queues reject work with a
//!   synchronous 503 instead of growing without limit.
//! - **Fully configurable limits and timeouts** for requests, responses, and connections.
//! - **Custom connection filtering** - implement the [`ConnectionFilter`] trait to
//!   reject unwanted connections at the TCP level.
//!
//! ## 🚀 Performance & Memory
//! - **Single-threaded event loop** - accept/read readiness handled on one
//!   thread; parsing and dispatch run on bounded worker pools.
//! - **Buffer reuse** - read accumulators and response buffers are pooled
//!   instead of reallocated per request.
//!
//! ## 🌐 Routing & Management
//! - **Trie-based router** - static, `:dynamic`, and `*wildcard` segments
//!   with mountable sub-routers and an ordered middleware chain.
//! - **Storing data between requests** - ability to store data between requests in a
//!   single connection using the [`ConnectionData`] trait.
//!
//! ## 🏭 Production Ready
//! - **Graceful performance degradation** - automatic 503 responses when overloaded.
//! - **Graceful shutdown** - stops accepting new connections and waits for
//!   in-flight work to drain before returning.
//! - **Resource protection** - automatic closure of connections exceeding set limits.
//!
//! # Quick Start
//!
//! ```no_run
//! use maker_web::{Server, Handler, Request, Response, Handled, StatusCode};
//! use std::net::TcpListener;
//!
//! struct MyHandler;
//!
//! impl Handler for MyHandler {
//!     fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
//!         resp.status(StatusCode::Ok).body("Hello World!")
//!     }
//! }
//!
//! fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").unwrap())
//!         .handler(MyHandler)
//!         .build()
//!         .start()
//!         .unwrap();
//! }
//! ```
//!
//! # Use Cases
//!
//! - **High-throughput microservices** - configurable for specific workloads
//! - **Resource-constrained environments** - predictable memory usage
//! - **Internal APIs** - security-conscious defaults
//! - **Performance-critical applications** - bounded queues everywhere
pub(crate) mod http {
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod pool;
pub mod router;
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod event_loop;
    pub(crate) mod reaper;
    pub(crate) mod server_impl;
}
pub(crate) mod errors;
pub mod limits;

pub use crate::{
    http::{
        query,
        request::Request,
        response::{
            write::{BodyWriter, WriteBuffer},
            Handled, Response,
        },
        types::{Method, StatusCode, Version},
    },
    router::Router,
    server::{
        connection::{ConnectionData, ConnectionFilter},
        server_impl::{Handler, Server, ServerBuilder},
    },
};

#[doc(hidden)]
pub fn run_test<F: FnOnce(&Request, &mut Response) -> Handled>(f: F) {
    let limits = crate::limits::ReqLimits::default().precalculate();
    let req = crate::http::request::RequestParser::parse(b"GET / HTTP/1.1\r\n\r\n", &limits)
        .expect("well-formed literal request always parses");
    f(&req, &mut Response::new(&crate::limits::RespLimits::default()));
}

#[doc(hidden)]
#[macro_export]
macro_rules! impt_default_handler {
    ($name:ident) => {
        use maker_web::{Handled, Handler, Request, Response, StatusCode};
        struct $name;

        // `<()>` to check functionality
        impl Handler<()> for $name {
            fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
                resp.status(StatusCode::Ok).body("Hello world!")
            }
        }
    };
}

#[doc(hidden)]
#[cfg(test)]
pub(crate) mod tools {
    use std::str::from_utf8;

    #[inline]
    pub(crate) fn str(value: Option<&[u8]>) -> Option<&str> {
        Some(from_utf8(value?).unwrap())
    }

    #[inline]
    pub(crate) fn str_op(value: &[u8]) -> &str {
        from_utf8(value).unwrap()
    }

    #[inline]
    pub(crate) fn str_2<'a>(value: (&'a [u8], &'a [u8])) -> (&'a str, &'a str) {
        (from_utf8(value.0).unwrap(), from_utf8(value.1).unwrap())
    }
}
