//! HTTP/1.1 request representation and parser.

use crate::{
    errors::ErrorKind,
    http::types::{self, HeaderMap, Method, Version},
    limits::ReqLimits,
    query::Query,
};
use memchr::memchr;
use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

/// An immutable, fully-parsed HTTP/1.1 request.
///
/// Constructed once by [`RequestParser::parse`] and never mutated again;
/// the router only ever rewrites [`Request::path`]/[`Request::base_url`]
/// on the *in-flight copy* it owns while walking mount points (see
/// `router::trie`), never on a shared reference.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    version: Version,
    query: HashMap<String, String>,
    headers: HeaderMap,
    body: Vec<u8>,
    path_params: HashMap<String, String>,
    base_url: String,
    attributes: Attributes,
}

impl Request {
    /// The request method.
    #[inline(always)]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Percent-decoded, normalized path. Always starts with `/`.
    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline(always)]
    pub(crate) fn set_path(&mut self, path: String) {
        self.path = path;
    }

    /// HTTP protocol version of this request.
    #[inline(always)]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the value of a query parameter. Last occurrence wins on
    /// duplicates (decided at parse time).
    #[inline(always)]
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(|s| s.as_str())
    }

    /// All query parameters as a map.
    #[inline(always)]
    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// Case-insensitive header lookup.
    #[inline(always)]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Iterates headers in insertion order.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter()
    }

    /// Raw request body bytes.
    #[inline(always)]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Path parameter bound during routing (e.g. `:id` → `"42"`).
    #[inline(always)]
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(|s| s.as_str())
    }

    #[inline(always)]
    pub(crate) fn path_params_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.path_params
    }

    /// The accumulated mount prefix, rewritten each time the router
    /// descends into a mounted sub-router.
    #[inline(always)]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[inline(always)]
    pub(crate) fn base_url_mut(&mut self) -> &mut String {
        &mut self.base_url
    }

    /// Typed, request-scoped attribute storage (e.g. an authenticated user
    /// record set by an auth middleware and read by a downstream handler).
    #[inline(always)]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    #[inline(always)]
    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    /// Whether this connection should persist after this response,
    /// honoring an explicit `Connection` header over the version default.
    pub(crate) fn keep_alive(&self) -> bool {
        match self.header("connection").map(|v| v.to_ascii_lowercase()) {
            Some(v) if v == "close" => false,
            Some(v) if v == "keep-alive" => true,
            _ => self.version.persistent_by_default(),
        }
    }
}

/// Typed map keyed by [`TypeId`], used for request-scoped capability
/// attributes set by middleware and read by handlers further down the
/// chain.
#[derive(Default)]
pub struct Attributes(HashMap<TypeId, Box<dyn Any + Send>>);

impl Attributes {
    /// Inserts a value, returning the previous one of the same type if any.
    pub fn insert<T: Any + Send>(&mut self, value: T) -> Option<T> {
        self.0
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|prev| prev.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    /// Looks up a value by its static type.
    pub fn get<T: Any + Send>(&self) -> Option<&T> {
        self.0.get(&TypeId::of::<T>()).and_then(|v| v.downcast_ref())
    }

    /// Mutable lookup by static type.
    pub fn get_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.0.get_mut(&TypeId::of::<T>()).and_then(|v| v.downcast_mut())
    }
}

impl std::fmt::Debug for Attributes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Attributes({} entries)", self.0.len())
    }
}

impl Clone for Attributes {
    fn clone(&self) -> Self {
        // Attribute values are not required to be `Clone`; a fresh request
        // starts with an empty attribute set, same as the teacher's
        // `ConnectionData::reset` contract for per-request scratch state.
        Attributes::default()
    }
}

// COMPLETENESS PREDICATE

/// Outcome of checking whether an accumulated buffer holds a complete
/// HTTP/1.1 request, per the completeness predicate.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Completeness {
    /// The buffer holds exactly one complete request in `buf[..0..len]`.
    Complete(usize),
    /// More bytes are needed; not an error.
    NeedMore,
    /// The framing itself is malformed; fatal for the connection.
    Bad(BadReason),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum BadReason {
    TooManyHeaders,
    InvalidContentLength,
    MalformedFraming,
}

impl From<BadReason> for ErrorKind {
    fn from(reason: BadReason) -> Self {
        match reason {
            BadReason::TooManyHeaders => ErrorKind::TooManyHeaders,
            BadReason::InvalidContentLength => ErrorKind::InvalidContentLength,
            BadReason::MalformedFraming => ErrorKind::MalformedFraming,
        }
    }
}

/// Checks whether `buf` contains a complete HTTP/1.1 request, without
/// allocating a [`Request`]. Used by the event loop's read task to decide
/// whether to submit to the write-dispatch pool yet.
pub(crate) fn check_completeness(buf: &[u8], limits: &ReqLimits) -> Completeness {
    let Some(head_len) = find_double_crlf(buf) else {
        let headers_only_budget = limits.precalc.first_line + limits.header_count * limits.precalc.h_line;
        if buf.len() > headers_only_budget {
            return Completeness::Bad(BadReason::TooManyHeaders);
        }
        return Completeness::NeedMore;
    };
    let header_end = head_len;

    match scan_framing(&buf[..header_end]) {
        Framing::Chunked => {
            if find_chunked_terminator(&buf[header_end..]) {
                Completeness::Complete(buf.len().min(header_end + chunked_consumed(&buf[header_end..])))
            } else {
                Completeness::NeedMore
            }
        }
        Framing::ContentLength(Some(n)) => {
            let total = header_end + n;
            if buf.len() >= total {
                Completeness::Complete(total)
            } else {
                Completeness::NeedMore
            }
        }
        Framing::ContentLength(None) => Completeness::Bad(BadReason::InvalidContentLength),
        Framing::None => Completeness::Complete(header_end),
    }
}

enum Framing {
    None,
    ContentLength(Option<usize>),
    Chunked,
}

fn scan_framing(header_region: &[u8]) -> Framing {
    let mut content_length: Option<Option<usize>> = None;
    let mut chunked = false;

    for line in split_lines(header_region) {
        let Some(colon) = memchr(b':', line) else { continue };
        let name = &line[..colon];
        let value = trim_ascii(&line[colon + 1..]);

        if name.eq_ignore_ascii_case(b"content-length") {
            let parsed = types::slice_to_usize(value);
            content_length = Some(match (content_length, parsed) {
                (None, p) => p,
                (Some(Some(prev)), Some(p)) if prev == p => Some(p),
                _ => None,
            });
        } else if name.eq_ignore_ascii_case(b"transfer-encoding")
            && value.eq_ignore_ascii_case(b"chunked")
        {
            chunked = true;
        }
    }

    if chunked {
        Framing::Chunked
    } else if let Some(cl) = content_length {
        Framing::ContentLength(cl)
    } else {
        Framing::None
    }
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    let mut start = 0;
    while let Some(pos) = memchr(b'\r', &buf[start..]) {
        let idx = start + pos;
        if buf.len() >= idx + 4 && &buf[idx..idx + 4] == b"\r\n\r\n" {
            return Some(idx + 4);
        }
        start = idx + 1;
    }
    None
}

fn find_chunked_terminator(body: &[u8]) -> bool {
    body.windows(5).any(|w| w == b"0\r\n\r\n")
}

fn chunked_consumed(body: &[u8]) -> usize {
    body.windows(5)
        .position(|w| w == b"0\r\n\r\n")
        .map(|pos| pos + 5)
        .unwrap_or(body.len())
}

fn split_lines(region: &[u8]) -> impl Iterator<Item = &[u8]> {
    region
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.is_empty())
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let mut s = bytes;
    while let [first, rest @ ..] = s {
        if first.is_ascii_whitespace() {
            s = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = s {
        if last.is_ascii_whitespace() {
            s = rest;
        } else {
            break;
        }
    }
    s
}

// PARSER

/// Parses a single complete HTTP/1.1 request out of `buf`.
///
/// Callers are expected to have already run [`check_completeness`] and to
/// pass exactly `buf[..consumed]`. Parsing order follows the wire format:
/// start-line, headers (until blank line), body (by `Content-Length` or
/// chunked framing), then target decomposition (path/query,
/// percent-decoded).
pub(crate) struct RequestParser;

impl RequestParser {
    pub(crate) fn parse(buf: &[u8], limits: &ReqLimits) -> Result<Request, ErrorKind> {
        let (method, method_len) = Method::from_bytes(buf)?;
        let rest = &buf[method_len + 1..];

        let target_end = memchr(b' ', rest).ok_or(ErrorKind::InvalidUrl)?;
        let target = &rest[..target_end];
        if target.is_empty() || target.len() > limits.url_size {
            return Err(ErrorKind::InvalidUrl);
        }

        let after_target = &rest[target_end + 1..];
        let line_end = memchr(b'\r', after_target).ok_or(ErrorKind::InvalidVersion)?;
        if after_target.get(line_end + 1) != Some(&b'\n') {
            return Err(ErrorKind::InvalidVersion);
        }
        let version = Version::from_bytes(&after_target[..line_end])?;

        let headers_region_start = method_len + 1 + target_end + 1 + line_end + 2;
        let header_end = find_double_crlf(&buf[headers_region_start..])
            .map(|n| headers_region_start + n)
            .ok_or(ErrorKind::InvalidHeader)?;

        let (headers, framing) = Self::parse_headers(&buf[headers_region_start..header_end], limits)?;

        let body = match framing {
            Framing::None => Vec::new(),
            Framing::ContentLength(Some(n)) => {
                if n > limits.body_size {
                    return Err(ErrorKind::BodyTooLarge);
                }
                let available = buf.len().saturating_sub(header_end);
                if available < n {
                    return Err(ErrorKind::BodyMismatch {
                        expected: n,
                        available,
                    });
                }
                buf[header_end..header_end + n].to_vec()
            }
            Framing::ContentLength(None) => return Err(ErrorKind::InvalidContentLength),
            Framing::Chunked => Self::decode_chunked(&buf[header_end..], limits)?,
        };

        let (path, query) = Self::decompose_target(target, limits)?;

        Ok(Request {
            method,
            path,
            version,
            query,
            headers,
            body,
            path_params: HashMap::new(),
            base_url: String::new(),
            attributes: Attributes::default(),
        })
    }

    fn parse_headers(region: &[u8], limits: &ReqLimits) -> Result<(HeaderMap, Framing), ErrorKind> {
        let mut map = HeaderMap::with_capacity(limits.header_count);
        let mut count = 0usize;

        for line in split_lines(region) {
            count += 1;
            if count > limits.header_count {
                return Err(ErrorKind::TooManyHeaders);
            }

            let colon = memchr(b':', line).ok_or(ErrorKind::InvalidHeader)?;
            let name = trim_ascii(&line[..colon]);
            let value = trim_ascii(&line[colon + 1..]);
            if name.is_empty()
                || name.len() > limits.header_name_size
                || value.len() > limits.header_value_size
            {
                return Err(ErrorKind::InvalidHeader);
            }

            let name = String::from_utf8_lossy(name).into_owned();
            let value = String::from_utf8_lossy(value).into_owned();

            if name.eq_ignore_ascii_case("connection")
                && !value.eq_ignore_ascii_case("close")
                && !value.eq_ignore_ascii_case("keep-alive")
            {
                return Err(ErrorKind::InvalidConnection);
            }

            map.insert_or_join(name, value);
        }

        let framing = scan_framing(region);
        if let Framing::ContentLength(None) = framing {
            return Err(ErrorKind::InvalidContentLength);
        }

        Ok((map, framing))
    }

    /// Decodes `Transfer-Encoding: chunked` framing into a flat byte buffer.
    fn decode_chunked(mut body: &[u8], limits: &ReqLimits) -> Result<Vec<u8>, ErrorKind> {
        let mut out = Vec::new();

        loop {
            let line_end = memchr(b'\r', body).ok_or(ErrorKind::MalformedFraming)?;
            if body.get(line_end + 1) != Some(&b'\n') {
                return Err(ErrorKind::MalformedFraming);
            }
            let size_line = &body[..line_end];
            let size_str = match memchr(b';', size_line) {
                Some(pos) => &size_line[..pos],
                None => size_line,
            };
            let size = usize::from_str_radix(
                std::str::from_utf8(size_str).map_err(|_| ErrorKind::MalformedFraming)?,
                16,
            )
            .map_err(|_| ErrorKind::MalformedFraming)?;

            body = &body[line_end + 2..];

            if size == 0 {
                return Ok(out);
            }

            if out.len() + size > limits.body_size {
                return Err(ErrorKind::BodyTooLarge);
            }
            if body.len() < size + 2 {
                return Err(ErrorKind::MalformedFraming);
            }

            out.extend_from_slice(&body[..size]);
            if &body[size..size + 2] != b"\r\n" {
                return Err(ErrorKind::MalformedFraming);
            }
            body = &body[size + 2..];
        }
    }

    fn decompose_target(
        target: &[u8],
        limits: &ReqLimits,
    ) -> Result<(String, HashMap<String, String>), ErrorKind> {
        let (raw_path, raw_query) = match memchr(b'?', target) {
            Some(pos) => (&target[..pos], Some(&target[pos + 1..])),
            None => (target, None),
        };

        let path = normalize_path(&percent_decode(raw_path)?);

        let query = match raw_query {
            Some(q) if !q.is_empty() => {
                if q.len() > limits.url_query_size {
                    return Err(ErrorKind::InvalidUrl);
                }
                let pairs: Vec<(&[u8], &[u8])> =
                    Query::parse(q, limits.url_query_parts).map_err(ErrorKind::from)?;

                let mut map = HashMap::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let k = percent_decode(k)?;
                    let v = percent_decode(v)?;
                    map.insert(k, v); // last-wins: HashMap::insert overwrites
                }
                map
            }
            _ => HashMap::new(),
        };

        Ok((path, query))
    }
}

/// Percent-decodes a byte slice into an owned UTF-8 `String`, lossily
/// replacing invalid sequences rather than failing the whole request.
fn percent_decode(src: &[u8]) -> Result<String, ErrorKind> {
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;
    while i < src.len() {
        match src[i] {
            b'%' if i + 2 < src.len() => {
                let hi = (src[i + 1] as char).to_digit(16);
                let lo = (src[i + 2] as char).to_digit(16);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi * 16 + lo) as u8);
                        i += 3;
                    }
                    _ => return Err(ErrorKind::InvalidUrl),
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Normalizes a decoded path: ensures a leading `/`, strips a trailing `/`
/// (except root), and collapses repeated `/`.
fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    out.push('/');
    let mut prev_slash = true;
    for ch in path.trim_start_matches('/').chars() {
        if ch == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(ch);
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ReqLimits {
        ReqLimits::default().precalculate()
    }

    #[test]
    fn parses_simple_get() {
        let raw = b"GET /users/42?active=true HTTP/1.1\r\nHost: x\r\n\r\n";
        let req = RequestParser::parse(raw, &limits()).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/users/42");
        assert_eq!(req.query("active"), Some("true"));
        assert_eq!(req.header("host"), Some("x"));
        assert!(req.body().is_empty());
    }

    #[test]
    fn content_length_body_is_read_exactly() {
        let raw = b"POST /data/key1 HTTP/1.1\r\nContent-Length: 13\r\n\r\nhello, world!";
        let req = RequestParser::parse(raw, &limits()).unwrap();
        assert_eq!(req.body(), b"hello, world!");
    }

    #[test]
    fn chunked_body_is_decoded() {
        let raw = b"POST /x HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
        let req = RequestParser::parse(raw, &limits()).unwrap();
        assert_eq!(req.body(), b"hello");
    }

    #[test]
    fn malformed_start_line_is_rejected() {
        let raw = b"GET\r\n\r\n";
        assert!(RequestParser::parse(raw, &limits()).is_err());
    }

    #[test]
    fn path_is_percent_decoded_and_normalized() {
        let raw = b"GET //a%20b//c/ HTTP/1.1\r\n\r\n";
        let req = RequestParser::parse(raw, &limits()).unwrap();
        assert_eq!(req.path(), "/a b/c");
    }

    #[test]
    fn duplicate_query_keys_last_wins() {
        let raw = b"GET /x?a=1&a=2 HTTP/1.1\r\n\r\n";
        let req = RequestParser::parse(raw, &limits()).unwrap();
        assert_eq!(req.query("a"), Some("2"));
    }

    #[test]
    fn completeness_needs_more_without_full_body() {
        let raw = b"POST /x HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";
        assert_eq!(check_completeness(raw, &limits()), Completeness::NeedMore);
    }

    #[test]
    fn completeness_headers_only_request_is_complete_immediately() {
        let raw = b"GET /x HTTP/1.1\r\n\r\n";
        assert_eq!(check_completeness(raw, &limits()), Completeness::Complete(raw.len()));
    }

    #[test]
    fn conflicting_content_length_is_bad_framing() {
        let raw = b"POST /x HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 6\r\n\r\nhello!";
        match check_completeness(raw, &limits()) {
            Completeness::Bad(BadReason::InvalidContentLength) => {}
            other => panic!("expected Bad(InvalidContentLength), got {other:?}"),
        }
    }

    #[test]
    fn attributes_round_trip_by_type() {
        #[derive(Debug, PartialEq)]
        struct UserId(u32);

        let mut attrs = Attributes::default();
        assert!(attrs.get::<UserId>().is_none());
        attrs.insert(UserId(7));
        assert_eq!(attrs.get::<UserId>(), Some(&UserId(7)));
    }
}
