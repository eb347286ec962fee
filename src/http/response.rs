//! A zero-copy-on-write HTTP/1.1 response builder.

use crate::{
    http::types::{HeaderMap, StatusCode, Version},
    limits::RespLimits,
    BodyWriter, WriteBuffer,
};
use std::{borrow::Cow, io::Write as _, rc::Rc, sync::Arc};

#[derive(Debug)]
/// HTTP/1.1 response builder for constructing server responses.
///
/// Provides a fluent interface for building HTTP responses with status
/// codes, headers, cookies and body content. Automatically handles
/// `content-length` calculation, optional gzip compression, and
/// connection management.
///
/// Build responses by chaining methods in strict order:
/// [`status()`](Response::status) -> headers/cookies/[`gzip()`](Response::gzip)
/// -> any body method.
///
/// Instances are created automatically by the server and passed to
/// [`Handler::handle`](crate::Handler::handle).
///
/// # Examples
/// ```
/// use maker_web::{Handled, Request, Response, StatusCode};
///
/// // In your implementation `Handler`
/// async fn handle(_req: &Request, resp: &mut Response) -> Handled {
///     resp
///         .status(StatusCode::Ok)
///         .header("content-type", "text/html")
///         .body("<h1>Hello World</h1>")
/// }
/// ```
///
/// # Panics
/// All methods perform validity checks in `debug` mode that panic on
/// violations. In `release` mode, these checks are omitted for
/// performance, which may produce invalid HTTP responses. Before
/// creating a release build, run your tests.
pub struct Response {
    buffer: Vec<u8>,
    /// Headers set via [`header()`](Response::header), held back and
    /// flushed as a case-insensitive, last-wins set when the body
    /// starts. `header_multi`/`header_params`/`cookie` write straight
    /// into `buffer` and are unaffected by this merge.
    pending_headers: HeaderMap,
    pub(crate) version: Version,
    pub(crate) keep_alive: bool,
    posit_length: usize,
    start_body: usize,
    state: ResponseState,
    gzip: bool,
}

#[doc(hidden)]
pub struct Handled(());

#[derive(Debug, Clone, Copy, PartialEq)]
enum ResponseState {
    Clean,
    Headers,
    Complete,
}

impl Response {
    #[inline(always)]
    pub(crate) fn new(limits: &RespLimits) -> Self {
        Self {
            buffer: Vec::with_capacity(limits.default_capacity),
            pending_headers: HeaderMap::with_capacity(8),
            version: Version::Http11,
            keep_alive: true,
            posit_length: 0,
            start_body: 0,
            state: ResponseState::Clean,
            gzip: false,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self, limits: &RespLimits) {
        if self.buffer.capacity() > limits.max_capacity {
            self.buffer = Vec::with_capacity(limits.default_capacity);
        } else {
            self.buffer.clear();
        }

        self.pending_headers.headers.clear();
        self.version = Version::Http11;
        self.keep_alive = true;
        self.posit_length = 0;
        self.start_body = 0;
        self.state = ResponseState::Clean;
        self.gzip = false;
    }

    #[inline(always)]
    pub(crate) fn buffer(&self) -> &Vec<u8> {
        &self.buffer
    }
}

impl Response {
    /// Forces the connection to close after this response.
    ///
    /// # Panics
    /// Panics in `debug` mode when called after any finalizing method
    /// (any method returning [`Handled`]).
    #[inline]
    #[track_caller]
    pub fn close(&mut self) -> &mut Self {
        debug_assert!(
            self.state != ResponseState::Complete,
            "Must be called before any finalizing method",
        );

        self.keep_alive = false;
        self
    }

    /// Sets the HTTP status code for the response.
    ///
    /// # Examples
    /// ```
    /// # maker_web::run_test(|_, resp| {
    /// use maker_web::StatusCode;
    ///
    /// resp.status(StatusCode::NotFound)
    ///     .body(r#"{"status": "not found", "code": 404}"#)
    /// # });
    /// ```
    ///
    /// # Panics
    /// Panics in `debug` mode when called more than once, or after any
    /// body method.
    #[inline]
    #[track_caller]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Clean,
            "Must be first and called only once"
        );

        self.buffer
            .extend_from_slice(status.to_first_line(self.version));
        self.state = ResponseState::Headers;
        self
    }

    /// Sets a header on the response, case-insensitive and last-wins:
    /// calling this again with a name that only differs in case
    /// overwrites the earlier value rather than duplicating the header.
    /// Flushed into the response once the body starts, after any
    /// [`header_multi`](Response::header_multi)/
    /// [`header_params`](Response::header_params)/
    /// [`cookie`](Response::cookie) headers already written.
    ///
    /// PLEASE DO NOT ADD THE FOLLOWING HEADERS:
    /// - `content-length` / `content-encoding` - calculated automatically
    /// - `connection` - use [`close()`](Response::close)
    /// - `set-cookie` - use [`cookie()`](Response::cookie)
    ///
    /// # Panics
    /// Panics in `debug` mode when called before [`status()`](Response::status)
    /// or after any body method.
    #[inline]
    #[track_caller]
    pub fn header<N: WriteBuffer, V: WriteBuffer>(&mut self, name: N, value: V) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        let mut name_buf = Vec::new();
        name.write_to(&mut name_buf);
        let mut value_buf = Vec::new();
        value.write_to(&mut value_buf);

        self.pending_headers.set(
            String::from_utf8_lossy(&name_buf).into_owned(),
            String::from_utf8_lossy(&value_buf).into_owned(),
        );
        self
    }

    /// Adds a multi-value header to the response, joined by `split`.
    ///
    /// # Panics
    /// Panics in `debug` mode when called before [`status()`](Response::status)
    /// or after any body method.
    #[inline]
    #[track_caller]
    pub fn header_multi<N, S, I, V>(&mut self, name: N, split: S, values: I) -> &mut Self
    where
        N: WriteBuffer,
        S: WriteBuffer,
        I: IntoIterator<Item = V>,
        V: WriteBuffer,
    {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        name.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b": ");

        let mut iter = values.into_iter();
        if let Some(first) = iter.next() {
            first.write_to(&mut self.buffer);

            for value in iter {
                split.write_to(&mut self.buffer);
                value.write_to(&mut self.buffer);
            }
        }

        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Adds a header with `key[=value]` parameters to the response.
    ///
    /// # Panics
    /// Panics in `debug` mode when called before [`status()`](Response::status)
    /// or after any body method.
    #[inline]
    #[track_caller]
    pub fn header_params<N, S, I, K, V>(&mut self, name: N, split: S, params: I) -> &mut Self
    where
        N: WriteBuffer,
        S: WriteBuffer,
        I: IntoIterator<Item = (K, Option<V>)>,
        K: WriteBuffer,
        V: WriteBuffer,
    {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        name.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b": ");

        let mut iter = params.into_iter();
        if let Some((first_key, first_val)) = iter.next() {
            first_key.write_to(&mut self.buffer);
            if let Some(val) = first_val {
                self.buffer.extend_from_slice(b"=");
                val.write_to(&mut self.buffer);
            }

            for (key, value) in iter {
                split.write_to(&mut self.buffer);
                key.write_to(&mut self.buffer);
                if let Some(val) = value {
                    self.buffer.extend_from_slice(b"=");
                    val.write_to(&mut self.buffer);
                }
            }
        }

        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Adds a `Set-Cookie` header for a single cookie, one header per call.
    ///
    /// # Panics
    /// Panics in `debug` mode when called before [`status()`](Response::status)
    /// or after any body method.
    #[inline]
    #[track_caller]
    pub fn cookie(&mut self, name: &str, value: &str, options: &CookieOptions) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        self.buffer.extend_from_slice(b"set-cookie: ");
        self.buffer.extend_from_slice(name.as_bytes());
        self.buffer.extend_from_slice(b"=");
        self.buffer.extend_from_slice(value.as_bytes());

        if let Some(domain) = &options.domain {
            self.buffer.extend_from_slice(b"; Domain=");
            self.buffer.extend_from_slice(domain.as_bytes());
        }
        if let Some(path) = &options.path {
            self.buffer.extend_from_slice(b"; Path=");
            self.buffer.extend_from_slice(path.as_bytes());
        }
        if let Some(max_age) = options.max_age_secs {
            self.buffer.extend_from_slice(b"; Max-Age=");
            max_age.write_to(&mut self.buffer);
        }
        if options.http_only {
            self.buffer.extend_from_slice(b"; HttpOnly");
        }
        if options.secure {
            self.buffer.extend_from_slice(b"; Secure");
        }
        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Enables gzip compression of the response body, adding a
    /// `content-encoding: gzip` header. Compression happens when the
    /// body is finalized, after any [`header()`](Response::header) calls.
    ///
    /// # Panics
    /// Panics in `debug` mode when called before [`status()`](Response::status)
    /// or after any body method.
    #[inline]
    #[track_caller]
    pub fn gzip(&mut self) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        self.gzip = true;
        self.header("content-encoding", "gzip")
    }

    /// Sets the response body and finalizes the response.
    ///
    /// # Panics
    /// Panics in `debug` mode when called before [`status()`](Response::status)
    /// or after any body method.
    #[inline]
    #[track_caller]
    pub fn body<T: WriteBuffer>(&mut self, data: T) -> Handled {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        self.start_body();
        data.write_to(&mut self.buffer);
        self.end_body()
    }

    /// Writes the response body via closure and finalizes the response.
    ///
    /// # Panics
    /// Panics in `debug` mode when called before [`status()`](Response::status)
    /// or after any body method.
    #[inline]
    #[track_caller]
    pub fn body_with<F: FnOnce(&mut BodyWriter)>(&mut self, f: F) -> Handled {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        self.start_body();
        f(&mut BodyWriter(&mut self.buffer));
        self.end_body()
    }
}

impl Response {
    #[inline(always)]
    #[track_caller]
    fn start_body(&mut self) -> &mut Self {
        if let Some(value) = self.connection_header() {
            self.header("connection", value);
        }

        for (name, value) in self.pending_headers.iter() {
            self.buffer.extend_from_slice(name.as_bytes());
            self.buffer.extend_from_slice(b": ");
            self.buffer.extend_from_slice(value.as_bytes());
            self.buffer.extend_from_slice(b"\r\n");
        }

        self.buffer.extend_from_slice(b"content-length: ");
        self.posit_length = self.buffer.len();
        self.buffer.extend_from_slice(b"0000000000\r\n\r\n");
        self.start_body = self.buffer.len();
        self
    }

    #[inline]
    fn end_body(&mut self) -> Handled {
        if self.gzip {
            self.compress_body();
        }

        let body_len = self.buffer.len() - self.start_body;
        let (arr, _) = Response::number_to_bytes(body_len as u128);

        let target_range = self.posit_length..self.posit_length + 10;
        self.buffer[target_range].copy_from_slice(&arr[29..39]);
        self.state = ResponseState::Complete;

        Handled(())
    }

    /// Replaces the raw body in-place with its gzip-compressed form.
    fn compress_body(&mut self) {
        use flate2::{write::GzEncoder, Compression};

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&self.buffer[self.start_body..])
            .expect("in-memory gzip encoder never fails");
        let compressed = encoder.finish().expect("in-memory gzip encoder never fails");

        self.buffer.truncate(self.start_body);
        self.buffer.extend_from_slice(&compressed);
    }

    #[inline(always)]
    const fn connection_header(&self) -> Option<&'static [u8]> {
        match (self.version, self.keep_alive) {
            (Version::Http11, true) => None,
            (Version::Http11, false) => Some(b"close"),
            (Version::Http10, true) => Some(b"keep-alive"),
            (Version::Http10, false) => Some(b"close"),
        }
    }

    #[inline]
    const fn number_to_bytes(mut n: u128) -> ([u8; 39], usize) {
        let mut buffer = [b'0'; 39];
        let mut i = 39;

        if n == 0 {
            return (buffer, 38);
        }

        while n > 0 {
            i -= 1;
            buffer[i] = b'0' + (n % 10) as u8;
            n /= 10;
        }

        (buffer, i)
    }
}

/// Attributes for a single `Set-Cookie` directive.
#[derive(Debug, Clone, Default)]
pub struct CookieOptions {
    pub domain: Option<String>,
    pub path: Option<String>,
    pub max_age_secs: Option<u64>,
    pub http_only: bool,
    pub secure: bool,
}

pub mod write {
    use super::*;

    /// Writer for constructing the HTTP response body.
    /// Used in [body_with](Response::body_with).
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        /// Appends content to the response body.
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Trait for writing data to the [`Response`] buffer.
    ///
    /// Implemented for common types like strings, bytes, booleans
    /// and numeric types (excluding floating-point numbers).
    ///
    /// # Note on Floating-Point
    /// Floating-point numbers are not implemented to avoid
    /// locale-dependent formatting and precision issues in protocol
    /// headers. For explicit float serialization, consider the
    /// [`ryu`](https://crates.io/crates/ryu) crate.
    pub trait WriteBuffer {
        /// Writes the value's representation directly to the buffer.
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (bytes, $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let closure = $conn;
                    closure(self, buffer);
                }
            })*
        };
        (number($type:ty), $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(*self as $type, buffer);
                }
            })*
        };
        (non_zero($type:ty), $conn:expr => $($t:ident),*) => {
            $(impl WriteBuffer for std::num::$t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(self.get() as $type, buffer);
                }
            })*
        };
    }

    impl<T: WriteBuffer> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl<T: WriteBuffer> WriteBuffer for &mut T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl_write_buffer! {
        bytes, |value: &str, buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value.as_bytes());
        } => &str, String, Box<str>, Cow<'_, str>,
        Arc<str>, Rc<str>, Arc<String>, Rc<String>
    }
    impl_write_buffer! {
        bytes, |value: &[u8], buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value);
        } => &[u8], Vec<u8>, Box<[u8]>, Cow<'_, [u8]>,
        Arc<[u8]>, Rc<[u8]>, Arc<Vec<u8>>, Rc<Vec<u8>>
    }
    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        number(u128), impl_write_buffer_u128 => u8, u16, u32, u64, u128, usize
    }
    impl_write_buffer! {
        non_zero(u128), impl_write_buffer_u128 => NonZeroU8,
        NonZeroU16, NonZeroU32, NonZeroU64, NonZeroU128, NonZeroUsize
    }
    impl_write_buffer! {
        number(i128), impl_write_buffer_i128 => i8, i16, i32, i64, i128, isize
    }
    impl_write_buffer! {
        non_zero(i128), impl_write_buffer_i128 => NonZeroI8,
        NonZeroI16, NonZeroI32, NonZeroI64, NonZeroI128, NonZeroIsize
    }
    impl WriteBuffer for bool {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(match self {
                true => b"true",
                false => b"false",
            });
        }
    }
    impl WriteBuffer for char {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            let mut buf = [0u8; 4];
            buffer.extend_from_slice(self.encode_utf8(&mut buf).as_bytes());
        }
    }

    #[inline(always)]
    fn impl_write_buffer_u128(value: u128, buffer: &mut Vec<u8>) {
        let (arr, start) = Response::number_to_bytes(value);
        buffer.extend_from_slice(&arr[start..]);
    }

    #[inline(always)]
    fn impl_write_buffer_i128(value: i128, buffer: &mut Vec<u8>) {
        if value < 0 {
            buffer.push(b'-');
        }
        let abs = value.unsigned_abs();

        let (arr, start) = Response::number_to_bytes(abs);
        buffer.extend_from_slice(&arr[start..]);
    }
}

#[cfg(test)]
mod close_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn basic() {
        let cases = [
            (Version::Http11, false, ""),
            (Version::Http11, true, "connection: close\r\n"),
            (Version::Http10, false, "connection: keep-alive\r\n"),
            (Version::Http10, true, "connection: close\r\n"),
        ];

        for (version, is_close, header) in cases {
            let mut resp = Response::new(&RespLimits::default());
            resp.version = version;

            assert_eq!(resp.keep_alive, true);
            if is_close {
                resp.close();
                assert_eq!(resp.keep_alive, false);
                resp.close();
                assert_eq!(resp.keep_alive, false);
            }

            resp.status(StatusCode::Ok).body("");
            assert_eq!(
                str_op(&resp.buffer),
                format!(
                    "{}{header}content-length: 0000000000\r\n\r\n",
                    str_op(StatusCode::Ok.to_first_line(version))
                )
            );
        }
    }

    #[test]
    #[should_panic(expected = "Must be called before any finalizing method")]
    fn after_body() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("");
        resp.close();
    }
}

#[cfg(test)]
mod status_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn basic() {
        let cases = [
            (StatusCode::Ok, "HTTP/1.1 200 OK\r\n"),
            (StatusCode::NotFound, "HTTP/1.1 404 Not Found\r\n"),
            (StatusCode::Found, "HTTP/1.1 302 Found\r\n"),
            (StatusCode::BadRequest, "HTTP/1.1 400 Bad Request\r\n"),
        ];

        for (status, result) in cases {
            let mut resp = Response::new(&RespLimits::default());

            assert_eq!(resp.buffer, []);
            assert_eq!(resp.state, ResponseState::Clean);

            resp.status(status);
            assert_eq!(str_op(&resp.buffer), result);
            assert_eq!(resp.state, ResponseState::Headers);
        }
    }

    #[test]
    #[should_panic(expected = "Must be first and called only once")]
    fn double_call() {
        Response::new(&RespLimits::default())
            .status(StatusCode::Ok)
            .status(StatusCode::Found);
    }
}

#[cfg(test)]
mod header_tests {
    use super::*;
    use crate::tools::*;

    macro_rules! test_header {
        ($method:ident, $(($name:expr $(, $params:expr)*; $result:expr);)*) => {
           #[test] fn $method() {$(
            let mut resp = Response::new(&RespLimits::default());

            assert_eq!(resp.buffer, []);

            resp.status(StatusCode::Ok);
            assert_eq!(resp.state, ResponseState::Headers);

            resp.$method($name $(, $params)*);
            assert_eq!(str_op(&resp.buffer[17..]), $result);
            assert_eq!(resp.state, ResponseState::Headers);
        )*}};
    }

    #[test]
    fn header_is_staged_and_flushed_at_body_time() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok);
        resp.header("name", "value");

        // `header()` defers to the pending set; nothing lands in the
        // buffer until the body starts.
        assert_eq!(str_op(&resp.buffer), "HTTP/1.1 200 OK\r\n");

        resp.body("");
        assert!(str_op(&resp.buffer).contains("name: value\r\n"));
    }

    #[test]
    fn header_set_is_case_insensitive_and_last_wins() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok);
        resp.header("Content-Type", "text/plain");
        resp.header("content-type", "application/json");
        resp.body("");

        let text = str_op(&resp.buffer);
        assert_eq!(text.matches("ontent-type").count(), 1, "duplicate header was not merged");
        assert!(text.contains("Content-Type: application/json\r\n"));
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_before_status() {
        Response::new(&RespLimits::default()).header("Name", "value");
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_after_body() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("");
        resp.header("Name", "value");
    }

    test_header! {header_multi,
        ("name", ", ", ["q", "w", "e"]; "name: q, w, e\r\n");
        ("name", ",", [true, false]; "name: true,false\r\n");
        ("name", "; ", [-123, 123]; "name: -123; 123\r\n");
    }

    test_header! {header_params,
        ("name", ", ", [("name", Some("value"))]; "name: name=value\r\n");
        (
            "name", ", ", [("q", Some("1")), ("w", Some("2")), ("e", Some("3"))];
            "name: q=1, w=2, e=3\r\n"
        );
        (
            "name", ", ", [("debug", Some(true)), ("doc", Some(false))];
            "name: debug=true, doc=false\r\n"
        );
        (
            "name", "; ", [("debug", None), ("text", Some("asd"))];
            "name: debug; text=asd\r\n"
        );
    }
}

#[cfg(test)]
mod cookie_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn minimal_cookie() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok);
        resp.cookie("session", "abc123", &CookieOptions::default());

        assert_eq!(str_op(&resp.buffer[17..]), "set-cookie: session=abc123\r\n");
    }

    #[test]
    fn full_cookie() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok);
        resp.cookie(
            "session",
            "abc123",
            &CookieOptions {
                domain: Some("example.com".into()),
                path: Some("/".into()),
                max_age_secs: Some(3600),
                http_only: true,
                secure: true,
            },
        );

        assert_eq!(
            str_op(&resp.buffer[17..]),
            "set-cookie: session=abc123; Domain=example.com; Path=/; Max-Age=3600; HttpOnly; Secure\r\n"
        );
    }
}

#[cfg(test)]
mod gzip_tests {
    use super::*;

    #[test]
    fn gzip_replaces_body_and_sets_length() {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).gzip().body("hello, world!");

        assert_eq!(resp.state, ResponseState::Complete);

        let header_end = resp.buffer.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        let compressed = &resp.buffer[header_end..];
        assert!(compressed.len() < "hello, world!".len() || compressed.starts_with(&[0x1f, 0x8b]));

        let mut decoder = GzDecoder::new(compressed);
        let mut out = String::new();
        decoder.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello, world!");
    }
}

#[cfg(test)]
mod body_tests {
    use super::*;
    use crate::tools::*;

    macro_rules! test_body {
        ($method:ident, $(($data:expr, $len:expr);)*) => {
        #[test] fn $method() {$(
            let mut resp = Response::new(&RespLimits::default());

            let result_data = test_body!{ $method, resp, $data };

            assert_eq!(
                str_op(&resp.buffer),
                format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\n\r\n{}",
                    format!("{:0>10}", $len),
                    str_op(&result_data)
                )
            );
            assert_eq!(resp.state, ResponseState::Complete);
        )*}};

        (body, $resp:expr, $data:expr) => {{
            $resp.status(StatusCode::Ok).body($data);
            let mut expected = Vec::new();
            $data.write_to(&mut expected);
            expected
        }};
        (body_with, $resp:expr, $data:expr) => {{
            $resp.status(StatusCode::Ok).body_with($data);

            let mut vector = Vec::new();
            let mut result_data = BodyWriter(&mut vector);
            $data(&mut result_data);
            vector
        }};
    }

    test_body! {body,
        ("sample body", 11);
        ("{\"debug\": true, \"doc\": false}", 29);
        (true, 4);
        (-1234, 5);
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and any header methods")]
    fn body_before_status() {
        Response::new(&RespLimits::default()).body("Name");
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and any header methods")]
    fn body_double_call() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("");
        resp.body("Name");
    }

    test_body! {body_with,
        (|buf: &mut BodyWriter| buf.write("qwe"), 3);
        (|buf: &mut BodyWriter| buf.write(vec![23, 34, 56]), 3);
        (|buf: &mut BodyWriter| buf.write(String::from("body")), 4);
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn full_sequence_with_close() {
        let mut resp = Response::new(&RespLimits::default());

        resp.status(StatusCode::Found);
        assert_eq!(str_op(&resp.buffer), "HTTP/1.1 302 Found\r\n");

        resp.header("location", "/api/update");
        // `header()` only stages the value; the status line is all
        // that's in the buffer until the body starts.
        assert_eq!(str_op(&resp.buffer), "HTTP/1.1 302 Found\r\n");

        resp.close();
        assert_eq!(str_op(&resp.buffer), "HTTP/1.1 302 Found\r\n");

        resp.body("Sample body");
        assert_eq!(
            str_op(&resp.buffer),
            "HTTP/1.1 302 Found\r\nlocation: /api/update\r\nconnection: close\r\n\
             content-length: 0000000011\r\n\r\nSample body"
        );
        assert_eq!(resp.state, ResponseState::Complete);
    }

    #[test]
    fn minimal_sequence() {
        let mut resp = Response::new(&RespLimits::default());
        let result = [
            "HTTP/1.1 302 Found\r\n",
            "content-length: 0000000011\r\n\r\nSample body",
        ];

        resp.status(StatusCode::Found);
        assert_eq!(str_op(&resp.buffer), result[0]);

        resp.body("Sample body");
        assert_eq!(str_op(&resp.buffer), result[0].to_owned() + result[1]);
        assert_eq!(resp.state, ResponseState::Complete);
    }
}
