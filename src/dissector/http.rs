//! The HTTP reference dissector.
//!
//! Parses a single HTTP/1.x request or response header per flow direction,
//! classifying by well-known port 80 (destination ⇒ request, source ⇒
//! response) the way the original Nemea `httpplugin` does, rather than
//! probing payload content the way `retina-core`'s `HttpParser` does.
//! This crate has no stream reassembly or multi-segment probing to lean
//! on, so port-based classification is the only signal available per
//! packet.
//!
//! A second request or response line observed on a flow that already has
//! one flushes the flow (`spec.md` §4.2): HTTP transactions are atomic per
//! flow record here, unlike `retina-core`'s pipelined transaction tracking.

use serde::Serialize;

use super::{Dissector, HookStatus};
use crate::flow::{ExtensionKind, FlowRecord, RecordExt};
use crate::packet::{Packet, TCP_PROTOCOL};

/// Maximum bytes copied into any bounded string field.
const FIELD_CAPACITY: usize = 256;

const METHODS: &[&[u8]] = &[
    b"GET", b"POST", b"PUT", b"HEAD", b"DELETE", b"TRACE", b"OPTIONS", b"CONNECT", b"PATCH",
];

#[derive(Debug, Clone, Default, Serialize)]
pub struct HttpRequestExt {
    pub method: String,
    pub host: String,
    pub url: String,
    pub user_agent: String,
    pub referer: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HttpResponseExt {
    pub status_code: u16,
    pub content_type: String,
}

#[derive(Debug, Default)]
pub struct HttpStats {
    pub requests_parsed: u64,
    pub responses_parsed: u64,
    pub attempts: u64,
}

/// The HTTP dissector. Stateless across flows: all per-flow state lives in
/// the [`HttpRequestExt`]/[`HttpResponseExt`] extensions; this struct only
/// accumulates cache-lifetime counters.
#[derive(Debug, Default)]
pub struct HttpDissector {
    stats: HttpStats,
}

const ADVERTISED: &[ExtensionKind] = &[ExtensionKind::HttpRequest, ExtensionKind::HttpResponse];

impl HttpDissector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &HttpStats {
        &self.stats
    }

    /// Shared logic for `post_create`/`pre_update`: classify the packet,
    /// attempt to parse a header, and decide whether to attach or flush.
    fn observe(&mut self, record: &mut FlowRecord, packet: &Packet, may_flush: bool) -> HookStatus {
        if packet.ip_proto != TCP_PROTOCOL || packet.payload.is_empty() {
            return HookStatus::Ok;
        }

        if packet.dst_port == 80 {
            self.stats.attempts += 1;
            let Some(req) = parse_request(packet.payload) else {
                return HookStatus::Ok;
            };
            if may_flush && record.get_extension(ExtensionKind::HttpRequest).is_some() {
                return HookStatus::Flush;
            }
            self.stats.requests_parsed += 1;
            record.add_extension(RecordExt::HttpRequest(req));
        } else if packet.src_port == 80 {
            self.stats.attempts += 1;
            let Some(resp) = parse_response(packet.payload) else {
                return HookStatus::Ok;
            };
            if may_flush && record.get_extension(ExtensionKind::HttpResponse).is_some() {
                return HookStatus::Flush;
            }
            self.stats.responses_parsed += 1;
            record.add_extension(RecordExt::HttpResponse(resp));
        }
        HookStatus::Ok
    }
}

impl Dissector for HttpDissector {
    fn post_create(&mut self, record: &mut FlowRecord, packet: &Packet) -> HookStatus {
        self.observe(record, packet, false)
    }

    fn pre_update(&mut self, record: &mut FlowRecord, packet: &Packet) -> HookStatus {
        self.observe(record, packet, true)
    }

    fn finish(&mut self) {
        log::info!(
            "http dissector: {} requests, {} responses, {} attempts",
            self.stats.requests_parsed,
            self.stats.responses_parsed,
            self.stats.attempts
        );
    }

    fn advertised_extension_kinds(&self) -> &'static [ExtensionKind] {
        ADVERTISED
    }

    fn advertised_output_schema(&self) -> &'static str {
        "http.v1"
    }
}

/// Splits `data` into lines at LF, stripping a trailing CR from each line.
/// The empty-line terminator and payload exhaustion are both expressed by
/// the iterator simply running out of lines or yielding an empty slice.
struct Lines<'a> {
    rest: &'a [u8],
    done: bool,
}

impl<'a> Lines<'a> {
    fn new(data: &'a [u8]) -> Self {
        Lines { rest: data, done: data.is_empty() }
    }
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.done {
            return None;
        }
        match memchr::memchr(b'\n', self.rest) {
            Some(pos) => {
                let mut line = &self.rest[..pos];
                if line.last() == Some(&b'\r') {
                    line = &line[..line.len() - 1];
                }
                self.rest = &self.rest[pos + 1..];
                if self.rest.is_empty() {
                    self.done = true;
                }
                Some(line)
            }
            None => {
                self.done = true;
                Some(self.rest)
            }
        }
    }
}

fn truncate_ascii(bytes: &[u8]) -> String {
    let bytes = &bytes[..bytes.len().min(FIELD_CAPACITY)];
    String::from_utf8_lossy(bytes).into_owned()
}

fn parse_request(data: &[u8]) -> Option<HttpRequestExt> {
    let mut lines = Lines::new(data);
    let request_line = lines.next()?;
    if request_line.is_empty() {
        return None;
    }

    let sp1 = request_line.iter().position(|&b| b == b' ')?;
    let rest = &request_line[sp1 + 1..];
    let sp2 = rest.iter().position(|&b| b == b' ')?;

    let method = &request_line[..sp1];
    if !METHODS.contains(&method) {
        return None;
    }
    let uri = &rest[..sp2];

    let mut ext = HttpRequestExt {
        method: truncate_ascii(method),
        url: truncate_ascii(uri),
        ..Default::default()
    };

    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            continue;
        };
        let name = &line[..colon];
        let mut value = &line[colon + 1..];
        if value.first() == Some(&b' ') {
            value = &value[1..];
        }
        match name {
            b"Host" => ext.host = truncate_ascii(value),
            b"User-Agent" => ext.user_agent = truncate_ascii(value),
            b"Referer" => ext.referer = truncate_ascii(value),
            _ => {}
        }
    }

    Some(ext)
}

fn parse_response(data: &[u8]) -> Option<HttpResponseExt> {
    let mut lines = Lines::new(data);
    let status_line = lines.next()?;
    if status_line.is_empty() {
        return None;
    }
    if status_line.get(..4) != Some(b"HTTP") {
        return None;
    }

    let begin = status_line.iter().position(|&b| b == b' ')?;
    let end = status_line[begin + 1..].iter().position(|&b| b == b' ')? + begin + 1;
    let code_str = &status_line[begin + 1..end];
    let code = c_atoi(code_str);
    if code <= 0 {
        return None;
    }

    let mut ext = HttpResponseExt {
        status_code: code.min(u16::MAX as i64) as u16,
        content_type: String::new(),
    };

    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            continue;
        };
        let name = &line[..colon];
        let mut value = &line[colon + 1..];
        if value.first() == Some(&b' ') {
            value = &value[1..];
        }
        if name == b"Content-Type" {
            ext.content_type = truncate_ascii(value);
        }
    }

    Some(ext)
}

/// Minimal `atoi`-equivalent: skips leading whitespace, an optional sign,
/// then consumes decimal digits until a non-digit; returns `0` if no
/// digits were found at all. Deliberately does not validate length or
/// range, per the resolved open question in `SPEC_FULL.md` §11.1.
fn c_atoi(s: &[u8]) -> i64 {
    let mut i = 0;
    while i < s.len() && (s[i] as char).is_whitespace() {
        i += 1;
    }
    let neg = if i < s.len() && (s[i] == b'-' || s[i] == b'+') {
        let n = s[i] == b'-';
        i += 1;
        n
    } else {
        false
    };
    let mut value: i64 = 0;
    let mut any = false;
    while i < s.len() && s[i].is_ascii_digit() {
        any = true;
        value = value * 10 + (s[i] - b'0') as i64;
        i += 1;
    }
    if !any {
        return 0;
    }
    if neg {
        -value
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get_request() {
        let data = b"GET /a HTTP/1.1\r\nHost: x\r\nUser-Agent: ua\r\nReferer: r\r\n\r\n";
        let req = parse_request(data).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.url, "/a");
        assert_eq!(req.host, "x");
        assert_eq!(req.user_agent, "ua");
        assert_eq!(req.referer, "r");
    }

    #[test]
    fn rejects_missing_second_space() {
        assert!(parse_request(b"GET /a\r\n\r\n").is_none());
    }

    #[test]
    fn rejects_unknown_method() {
        assert!(parse_request(b"FOO /a HTTP/1.1\r\n\r\n").is_none());
    }

    #[test]
    fn header_names_are_case_sensitive() {
        let req = parse_request(b"GET /a HTTP/1.1\r\nhost: x\r\n\r\n").unwrap();
        assert_eq!(req.host, "");
    }

    #[test]
    fn parses_response_and_accepts_two_digit_code() {
        let resp = parse_response(b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n").unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.content_type, "text/html");

        let resp2 = parse_response(b"HTTP/1.1 99 X\r\n\r\n").unwrap();
        assert_eq!(resp2.status_code, 99);
    }

    #[test]
    fn rejects_nonpositive_status_code() {
        assert!(parse_response(b"HTTP/1.1 0 X\r\n\r\n").is_none());
        assert!(parse_response(b"HTTP/1.1 -1 X\r\n\r\n").is_none());
    }

    #[test]
    fn rejects_status_line_without_http_prefix() {
        assert!(parse_response(b"xyz 200 foo\r\n\r\n").is_none());
    }

    #[test]
    fn empty_payload_not_attached() {
        assert!(parse_request(b"").is_none());
        assert!(parse_response(b"").is_none());
    }
}
