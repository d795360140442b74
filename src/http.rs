//! HTTP/1.1 message model and its wire text form.

use std::collections::btree_map::{self, BTreeMap};
use std::fmt;

use thiserror::Error;

/// The only protocol version this crate speaks.
pub const PROTO_HTTP1: &str = "HTTP/1.1";

const CONTENT_LENGTH: &str = "content-length";
const CONTENT_TYPE: &str = "content-type";
const APPLICATION_JSON: &str = "application/json";

/// Line terminator used when serializing a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineEnding {
    /// `\r\n`, what goes on the wire.
    #[default]
    CrLf,
    /// `\n`, handy for logging and debugging output.
    Lf,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::CrLf => "\r\n",
            LineEnding::Lf => "\n",
        }
    }
}

/// A bag of headers with case-insensitive names.
///
/// Each name maps to a single value and the last write wins, whatever the
/// casing used. The casing of that last write is kept for serialization, so a
/// header inserted as `Server` goes out as `Server` while parsed names, which
/// are lowercased, go out lowercase.
///
/// ```
/// # use nicehttp::Headers;
/// let mut headers = Headers::new();
/// headers.insert("X-Token", "a");
/// headers.insert("x-token", "b");
/// assert_eq!(headers.len(), 1);
/// assert_eq!(headers.get("X-TOKEN"), Some("b"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: BTreeMap<String, (String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a header, replacing any value stored under the same name.
    /// Returns the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let name = name.into();
        self.entries
            .insert(name.to_ascii_lowercase(), (name, value.into()))
            .map(|(_, value)| value)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries
            .remove(&name.to_ascii_lowercase())
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(name, value)` pairs, names as last written.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self.entries.values(),
        }
    }
}

pub struct Iter<'a> {
    inner: btree_map::Values<'a, String, (String, String)>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, &'a str);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<N, V> FromIterator<(N, V)> for Headers
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// A recoverable problem found while parsing a message.
///
/// Parsing never fails outright; the caller decides whether an issue is
/// worth rejecting the message over.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseIssue {
    #[error("malformed head: no line terminator")]
    MalformedHead,

    #[error("protocol not supported: {0:?}")]
    UnsupportedProtocol(String),

    #[error("invalid status code: {0:?}")]
    InvalidStatusCode(String),

    #[error("content length {declared} != body length {actual}")]
    BodyLengthMismatch { declared: usize, actual: usize },
}

/// A parsed message together with the issues found building it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parsed<T> {
    pub message: T,
    pub issues: Vec<ParseIssue>,
}

impl<T> Parsed<T> {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// True when an issue means the message cannot be trusted as framed.
    /// An unsupported protocol alone does not count.
    pub fn is_malformed(&self) -> bool {
        self.issues.iter().any(|issue| {
            matches!(
                issue,
                ParseIssue::MalformedHead | ParseIssue::BodyLengthMismatch { .. }
            )
        })
    }

    pub fn into_inner(self) -> T {
        self.message
    }
}

/// An HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub uri: String,
    pub proto: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub is_json: bool,
    /// Declared body length; `0` means no body. Should not exceed
    /// `body.len()`; only the available bytes are sent.
    pub content_length: usize,
}

/// An HTTP response.
///
/// ```
/// # use nicehttp::Response;
/// let response = Response::new(200, "OK").with_json(r#"{"status": "OK"}"#);
/// assert_eq!(response.content_length, 16);
/// assert!(response.is_json);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    /// Reason phrase; may contain spaces.
    pub message: String,
    pub proto: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub is_json: bool,
    /// Declared body length; `0` means no body. Should not exceed
    /// `body.len()`; only the available bytes are sent.
    pub content_length: usize,
}

impl Default for Request {
    fn default() -> Self {
        Request::new("", "")
    }
}

impl Default for Response {
    fn default() -> Self {
        Response::new(0, "")
    }
}

impl Request {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Request {
            method: method.into(),
            uri: uri.into(),
            proto: PROTO_HTTP1.to_string(),
            headers: Headers::new(),
            body: Vec::new(),
            is_json: false,
            content_length: 0,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the body and its declared length.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self.content_length = self.body.len();
        self
    }

    /// Sets a body that an external codec already encoded as JSON.
    pub fn with_json(self, body: impl Into<Vec<u8>>) -> Self {
        let mut request = self.with_body(body);
        request.is_json = true;
        request
    }

    /// The body as text, if it is valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn serialize(&self, line_ending: LineEnding) -> Vec<u8> {
        let start = format!("{} {} {}", self.method, self.uri, self.proto);
        write_message(
            &start,
            &self.headers,
            self.content_length,
            self.is_json,
            &self.body,
            line_ending,
        )
    }

    /// Wire form with CRLF line endings.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.serialize(LineEnding::CrLf)
    }

    /// Builds a request from a head block and its already extracted body.
    ///
    /// The start line is split on whitespace into method, uri and protocol;
    /// extra tokens are ignored.
    pub fn parse(head: &str, body: Vec<u8>) -> Parsed<Request> {
        let mut request = Request {
            proto: String::new(),
            ..Request::default()
        };
        let mut issues = Vec::new();

        let Some((line, rest)) = split_start_line(head) else {
            issues.push(ParseIssue::MalformedHead);
            log::warn!("{}", ParseIssue::MalformedHead);
            return Parsed {
                message: request,
                issues,
            };
        };

        let mut tokens = line.split_whitespace();
        request.method = tokens.next().unwrap_or_default().to_string();
        request.uri = tokens.next().unwrap_or_default().to_string();
        request.proto = tokens.next().unwrap_or_default().to_string();

        check_proto(&request.proto, &mut issues);
        let fields = parse_headers(rest, &mut request.headers);
        request.content_length = fields.content_length;
        request.is_json = fields.is_json;
        request.body = body;
        check_body(request.content_length, &request.body, &mut issues);

        Parsed {
            message: request,
            issues,
        }
    }
}

impl Response {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Response {
            code,
            message: message.into(),
            proto: PROTO_HTTP1.to_string(),
            headers: Headers::new(),
            body: Vec::new(),
            is_json: false,
            content_length: 0,
        }
    }

    pub fn ok() -> Self {
        Response::new(200, "OK")
    }

    pub fn bad_request() -> Self {
        Response::new(400, "Bad Request")
    }

    pub fn unauthorized() -> Self {
        Response::new(401, "Unauthorized")
    }

    pub fn not_found() -> Self {
        Response::new(404, "Not Found")
    }

    pub fn payload_too_large() -> Self {
        Response::new(413, "Payload Too Large")
    }

    pub fn request_timeout() -> Self {
        Response::new(408, "Request Timeout")
    }

    pub fn header_fields_too_large() -> Self {
        Response::new(431, "Request Header Fields Too Large")
    }

    pub fn internal_error() -> Self {
        Response::new(500, "Internal Server Error")
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the body and its declared length.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self.content_length = self.body.len();
        self
    }

    /// Sets a body that an external codec already encoded as JSON.
    pub fn with_json(self, body: impl Into<Vec<u8>>) -> Self {
        let mut response = self.with_body(body);
        response.is_json = true;
        response
    }

    /// The body as text, if it is valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn serialize(&self, line_ending: LineEnding) -> Vec<u8> {
        let start = format!("{} {} {}", self.proto, self.code, self.message);
        write_message(
            &start,
            &self.headers,
            self.content_length,
            self.is_json,
            &self.body,
            line_ending,
        )
    }

    /// Wire form with CRLF line endings.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.serialize(LineEnding::CrLf)
    }

    /// Builds a response from a head block and its already extracted body.
    ///
    /// The status line holds the protocol and the code; everything after
    /// them is the reason phrase, spaces included.
    pub fn parse(head: &str, body: Vec<u8>) -> Parsed<Response> {
        let mut response = Response {
            proto: String::new(),
            ..Response::default()
        };
        let mut issues = Vec::new();

        let Some((line, rest)) = split_start_line(head) else {
            issues.push(ParseIssue::MalformedHead);
            log::warn!("{}", ParseIssue::MalformedHead);
            return Parsed {
                message: response,
                issues,
            };
        };

        let mut parts = line.trim_start().splitn(3, ' ');
        response.proto = parts.next().unwrap_or_default().to_string();
        let code = parts.next().unwrap_or_default();
        response.message = parts.next().unwrap_or_default().to_string();

        match code.parse::<u16>() {
            Ok(code) => response.code = code,
            Err(_) => {
                let issue = ParseIssue::InvalidStatusCode(code.to_string());
                log::warn!("{}", issue);
                issues.push(issue);
            }
        }

        check_proto(&response.proto, &mut issues);
        let fields = parse_headers(rest, &mut response.headers);
        response.content_length = fields.content_length;
        response.is_json = fields.is_json;
        response.body = body;
        check_body(response.content_length, &response.body, &mut issues);

        Parsed {
            message: response,
            issues,
        }
    }
}

impl fmt::Display for Request {
    /// The request line, as used in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.method, self.uri, self.proto)
    }
}

impl fmt::Display for Response {
    /// The status line, as used in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.proto, self.code, self.message)
    }
}

/// Fields the header parser pulls out of the generic header bag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpecialHeaders {
    pub content_length: usize,
    pub is_json: bool,
}

/// Parses `Name: Value` lines into `headers`, lowercasing every name.
///
/// `Content-Length` and `Content-Type: application/json` are returned in
/// [`SpecialHeaders`] instead of being stored. Lines without a `": "`
/// separator are skipped.
pub fn parse_headers(block: &str, headers: &mut Headers) -> SpecialHeaders {
    let mut special = SpecialHeaders::default();

    for line in block.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let Some((name, value)) = line.split_once(": ") else {
            continue;
        };
        let name = name.to_ascii_lowercase();

        if name == CONTENT_LENGTH {
            special.content_length = parse_content_length(value);
        } else if name == CONTENT_TYPE && value == APPLICATION_JSON {
            special.is_json = true;
        } else {
            headers.insert(name, value);
        }
    }

    special
}

/// Parses a `Content-Length` value leniently.
///
/// Accepts decimal, or hexadecimal with a `0x` prefix, and uses the longest
/// run of valid digits. Yields 0 when nothing parses and saturates on
/// overflow.
pub fn parse_content_length(value: &str) -> usize {
    let value = value.trim_start();
    let value = value.strip_prefix('+').unwrap_or(value);

    let (digits, radix) = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) if hex.starts_with(|c: char| c.is_ascii_hexdigit()) => (hex, 16),
        _ => (value, 10),
    };

    digits
        .chars()
        .map_while(|c| c.to_digit(radix))
        .fold(0usize, |acc, digit| {
            acc.saturating_mul(radix as usize)
                .saturating_add(digit as usize)
        })
}

/// Splits off the start line. `None` when the head has no line terminator.
fn split_start_line(head: &str) -> Option<(&str, &str)> {
    let (line, rest) = head.split_once('\n')?;
    Some((line.strip_suffix('\r').unwrap_or(line), rest))
}

fn check_proto(proto: &str, issues: &mut Vec<ParseIssue>) {
    if proto != PROTO_HTTP1 {
        let issue = ParseIssue::UnsupportedProtocol(proto.to_string());
        log::warn!("{}", issue);
        issues.push(issue);
    }
}

fn check_body(declared: usize, body: &[u8], issues: &mut Vec<ParseIssue>) {
    if declared > 0 && body.len() != declared {
        let issue = ParseIssue::BodyLengthMismatch {
            declared,
            actual: body.len(),
        };
        log::warn!("{}", issue);
        issues.push(issue);
    }
}

fn write_message(
    start: &str,
    headers: &Headers,
    content_length: usize,
    is_json: bool,
    body: &[u8],
    line_ending: LineEnding,
) -> Vec<u8> {
    let eol = line_ending.as_str();
    let mut head = String::with_capacity(64 + headers.len() * 32);

    head.push_str(start);
    head.push_str(eol);
    for (name, value) in headers {
        // framing headers are derived from the message fields below
        if name.eq_ignore_ascii_case("content-length")
            || (is_json && name.eq_ignore_ascii_case("content-type"))
        {
            continue;
        }
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str(eol);
    }

    if content_length == 0 {
        head.push_str(eol);
        return head.into_bytes();
    }

    head.push_str("Content-Length: ");
    head.push_str(&content_length.to_string());
    head.push_str(eol);
    if is_json {
        head.push_str("Content-Type: ");
        head.push_str(APPLICATION_JSON);
        head.push_str(eol);
    }
    head.push_str(eol);

    if content_length > body.len() {
        log::warn!(
            "Content-Length {} exceeds the {} body bytes available",
            content_length,
            body.len()
        );
    }

    let mut out = head.into_bytes();
    let n = content_length.min(body.len());
    out.extend_from_slice(&body[..n]);
    out
}
