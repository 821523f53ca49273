//! HTTP/1.1 request framing and parsing.

use std::collections::HashMap;
use std::fmt;
use std::str;

use thiserror::Error;

use reactd_core::handler::Framing;

const HEADER_END: &[u8] = b"\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Head,
    Put,
    Delete,
    Options,
    Patch,
    Unknown,
}

impl Method {
    pub fn parse(s: &str) -> Method {
        match s {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "HEAD" => Method::Head,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            "PATCH" => Method::Patch,
            _ => Method::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("request head not terminated")]
    Incomplete,
    #[error("request head is not valid UTF-8")]
    NotUtf8,
    #[error("malformed request line")]
    RequestLine,
    #[error("malformed header line")]
    Header,
    #[error("invalid Content-Length")]
    ContentLength,
    #[error("chunked request bodies are not supported")]
    Chunked,
    #[error("body shorter than Content-Length")]
    ShortBody,
}

impl ParseError {
    /// Static description, as carried by `Framing::Invalid`.
    pub fn reason(&self) -> &'static str {
        match self {
            ParseError::Incomplete => "request head not terminated",
            ParseError::NotUtf8 => "request head is not valid UTF-8",
            ParseError::RequestLine => "malformed request line",
            ParseError::Header => "malformed header line",
            ParseError::ContentLength => "invalid Content-Length",
            ParseError::Chunked => "chunked request bodies are not supported",
            ParseError::ShortBody => "body shorter than Content-Length",
        }
    }
}

/// Parsed request line and headers.
struct Head<'a> {
    method: Method,
    target: &'a str,
    version: &'a str,
    headers: Vec<(&'a str, &'a str)>,
    /// Offset of the first body byte.
    body_start: usize,
    /// Offset one past the last body byte.
    body_end: usize,
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_END.len()).position(|w| w == HEADER_END)
}

/// `Ok(None)` while the head is still incomplete.
fn parse_head(buf: &[u8]) -> Result<Option<Head<'_>>, ParseError> {
    let Some(end) = find_header_end(buf) else {
        return Ok(None);
    };
    let text = str::from_utf8(&buf[..end]).map_err(|_| ParseError::NotUtf8)?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split(' ').filter(|p| !p.is_empty());
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::RequestLine);
    };
    if !version.starts_with("HTTP/") || !target.starts_with('/') {
        return Err(ParseError::RequestLine);
    }

    let mut headers = Vec::new();
    let mut content_length = 0;
    for line in lines {
        let (name, value) = line.split_once(':').ok_or(ParseError::Header)?;
        let (name, value) = (name.trim(), value.trim());
        if name.is_empty() {
            return Err(ParseError::Header);
        }
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse().map_err(|_| ParseError::ContentLength)?;
        } else if name.eq_ignore_ascii_case("transfer-encoding")
            && value.to_ascii_lowercase().contains("chunked")
        {
            return Err(ParseError::Chunked);
        }
        headers.push((name, value));
    }

    let body_start = end + HEADER_END.len();
    let body_end = body_start.checked_add(content_length).ok_or(ParseError::ContentLength)?;
    Ok(Some(Head {
        method: Method::parse(method),
        target,
        version,
        headers,
        body_start,
        body_end,
    }))
}

/// Decide whether `buf` starts with one complete request.
///
/// A request is complete once its head is terminated and `Content-Length`
/// body bytes have arrived. Bytes past that point are not part of it.
pub fn frame(buf: &[u8]) -> Framing {
    match parse_head(buf) {
        Ok(None) => Framing::Incomplete,
        Ok(Some(head)) => {
            if buf.len() >= head.body_end {
                Framing::Complete(head.body_end)
            } else {
                Framing::Incomplete
            }
        }
        Err(e) => Framing::Invalid(e.reason()),
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Path without the query string.
    pub path: String,
    pub query: Option<String>,
    pub version: String,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Parse one complete, framed request.
    pub fn parse(buf: &[u8]) -> Result<HttpRequest, ParseError> {
        let head = parse_head(buf)?.ok_or(ParseError::Incomplete)?;
        let body_end = head.body_end;
        if buf.len() < body_end {
            return Err(ParseError::ShortBody);
        }
        let (path, query) = match head.target.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (head.target.to_string(), None),
        };
        Ok(HttpRequest {
            method: head.method,
            path,
            query,
            version: head.version.to_string(),
            headers: head
                .headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            body: buf[head.body_start..body_end].to_vec(),
        })
    }

    /// Case-insensitive header lookup (first match).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Decode an `application/x-www-form-urlencoded` body. Pairs without
    /// `=` are skipped; a repeated key keeps the last value.
    pub fn form(&self) -> HashMap<String, String> {
        let body = String::from_utf8_lossy(&self.body);
        body.split('&')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (url_decode(k), url_decode(v)))
            .collect()
    }
}

/// Percent-decoding with `+` as space. Broken escapes are kept literally.
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                    (Some(h), Some(l)) => {
                        out.push(h << 4 | l);
                        i += 2;
                    }
                    _ => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN: &[u8] = b"POST /login HTTP/1.1\r\n\
        Host: localhost:8080\r\n\
        Content-Type: application/x-www-form-urlencoded\r\n\
        Content-Length: 31\r\n\
        \r\n\
        username=testname&password=test";

    #[test]
    fn test_frame_incomplete_head() {
        assert_eq!(frame(b"GET / HTTP/1.1\r\nHost: x\r\n"), Framing::Incomplete);
        assert_eq!(frame(b""), Framing::Incomplete);
    }

    #[test]
    fn test_frame_get() {
        let req = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        assert_eq!(frame(req), Framing::Complete(req.len()));
    }

    #[test]
    fn test_frame_waits_for_body() {
        let full = LOGIN;
        assert_eq!(frame(&full[..full.len() - 5]), Framing::Incomplete);
        assert_eq!(frame(full), Framing::Complete(full.len()));

        let mut more = full.to_vec();
        more.extend_from_slice(b"GET /next");
        assert_eq!(frame(&more), Framing::Complete(full.len()));
    }

    #[test]
    fn test_frame_invalid() {
        assert!(matches!(frame(b"garbage\r\n\r\n"), Framing::Invalid(_)));
        assert!(matches!(
            frame(b"POST / HTTP/1.1\r\nContent-Length: lots\r\n\r\n"),
            Framing::Invalid("invalid Content-Length")
        ));
        assert!(matches!(
            frame(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n"),
            Framing::Invalid(_)
        ));
        assert!(matches!(frame(b"GET / HTTP/1.1\r\nno colon\r\n\r\n"), Framing::Invalid(_)));
    }

    #[test]
    fn test_parse_post() {
        let req = HttpRequest::parse(LOGIN).unwrap();
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.path, "/login");
        assert_eq!(req.version, "HTTP/1.1");
        assert_eq!(req.header("content-length"), Some("31"));
        assert_eq!(req.header("HOST"), Some("localhost:8080"));
        let form = req.form();
        assert_eq!(form.get("username").map(String::as_str), Some("testname"));
        assert_eq!(form.get("password").map(String::as_str), Some("test"));
    }

    #[test]
    fn test_parse_query_split() {
        let req = HttpRequest::parse(b"GET /login?next=%2Fhome HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.path, "/login");
        assert_eq!(req.query.as_deref(), Some("next=%2Fhome"));
        assert!(req.body.is_empty());
    }

    #[test]
    fn test_parse_unknown_method() {
        let req = HttpRequest::parse(b"BREW /pot HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.method, Method::Unknown);
    }

    #[test]
    fn test_content_length_overflow_rejected() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\n";
        assert_eq!(HttpRequest::parse(raw).unwrap_err(), ParseError::ContentLength);
        assert_eq!(frame(raw), Framing::Invalid("invalid Content-Length"));
    }

    #[test]
    fn test_parse_short_body() {
        let err = HttpRequest::parse(&LOGIN[..LOGIN.len() - 1]).unwrap_err();
        assert_eq!(err, ParseError::ShortBody);
    }

    #[test]
    fn test_form_decoding() {
        let mut req = HttpRequest::parse(b"POST / HTTP/1.1\r\n\r\n").unwrap();
        req.body = b"username=J%C3%BCrgen+M&password=a%26b%3Dc&junk&bad=%zz".to_vec();
        let form = req.form();
        assert_eq!(form["username"], "Jürgen M");
        assert_eq!(form["password"], "a&b=c");
        assert_eq!(form["bad"], "%zz");
        assert!(!form.contains_key("junk"));
    }

    #[test]
    fn test_url_decode_trailing_percent() {
        assert_eq!(url_decode("100%"), "100%");
        assert_eq!(url_decode("%4"), "%4");
        assert_eq!(url_decode("%41"), "A");
    }
}
