//! Low-level MOO/1 parsing and message building.

use crate::error::{Result, RoonError};
use crate::message::{MooBody, MooMessage, MooVerb};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

/// Upper bound on a single buffered message (headers + body).
const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Stateful MOO/1 parser.
///
/// Frames may arrive fragmented or coalesced; `feed` buffers input and
/// yields at most one message per call. Call `feed(&[])` repeatedly to
/// drain further messages already in the buffer.
#[derive(Debug, Default)]
pub struct MooParser {
    buffer: BytesMut,
}

impl MooParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append data and attempt to parse one complete message.
    ///
    /// Returns `Ok(None)` when more data is needed. On `Err` the buffer
    /// is left as-is; callers that cannot resynchronize should `clear()`.
    pub fn feed(&mut self, data: &[u8]) -> Result<Option<MooMessage>> {
        self.buffer.put_slice(data);

        if self.buffer.len() > MAX_MESSAGE_SIZE {
            return Err(RoonError::invalid_format("message too large"));
        }

        self.try_parse()
    }

    /// Discard any buffered partial input.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn try_parse(&mut self) -> Result<Option<MooMessage>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let header_end = match find_header_end(&self.buffer) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let header_str = std::str::from_utf8(&self.buffer[..header_end])
            .map_err(|e| RoonError::invalid_format(format!("non-utf8 header: {e}")))?;

        let parsed = parse_headers(header_str)?;

        // Tolerate extra blank lines between the header terminator and
        // the body bytes.
        let mut body_start = header_end + 2;
        if parsed.content_length.unwrap_or(0) > 0 {
            while self.buffer.get(body_start) == Some(&b'\n') {
                body_start += 1;
            }
        }

        let body_len = parsed.content_length.unwrap_or(0);
        let total = body_start + body_len;
        if self.buffer.len() < total {
            return Ok(None);
        }

        let body = if body_len > 0 {
            let bytes = &self.buffer[body_start..total];
            if parsed.content_type.as_deref() == Some("application/json") {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| RoonError::invalid_format(format!("non-utf8 body: {e}")))?;
                Some(MooBody::Json(serde_json::from_str(text)?))
            } else {
                Some(MooBody::Binary(Bytes::copy_from_slice(bytes)))
            }
        } else {
            None
        };

        let message = MooMessage {
            verb: parsed.verb,
            request_id: parsed.request_id,
            name: parsed.name,
            headers: parsed.headers,
            content_type: parsed.content_type,
            body,
        };

        self.buffer.advance(total);
        Ok(Some(message))
    }
}

struct ParsedHeaders {
    verb: MooVerb,
    name: String,
    request_id: i64,
    content_length: Option<usize>,
    content_type: Option<String>,
    headers: HashMap<String, String>,
}

fn parse_headers(header_str: &str) -> Result<ParsedHeaders> {
    let mut lines = header_str.lines();

    let first_line = lines
        .next()
        .ok_or_else(|| RoonError::invalid_format("empty message"))?;
    let (verb, name) = parse_first_line(first_line)?;

    let mut request_id = None;
    let mut content_length = None;
    let mut content_type = None;
    let mut headers = HashMap::new();

    for line in lines {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            break;
        }

        // Lines without a colon are silently skipped.
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        match key {
            "Request-Id" => {
                let id = value
                    .parse::<i64>()
                    .map_err(|_| RoonError::InvalidRequestId(value.to_string()))?;
                request_id = Some(id);
            }
            "Content-Length" => {
                let len = value
                    .parse::<usize>()
                    .map_err(|_| RoonError::invalid_format(format!("invalid content-length: {value}")))?;
                content_length = Some(len);
            }
            "Content-Type" => content_type = Some(value.to_string()),
            _ => {
                headers.insert(key.to_string(), value.to_string());
            }
        }
    }

    let request_id = request_id.ok_or(RoonError::MissingRequestId)?;

    Ok(ParsedHeaders {
        verb,
        name,
        request_id,
        content_length,
        content_type,
        headers,
    })
}

fn parse_first_line(line: &str) -> Result<(MooVerb, String)> {
    let parts: Vec<&str> = line.splitn(3, ' ').collect();
    if parts.len() != 3 {
        return Err(RoonError::invalid_format(format!("malformed first line: {line}")));
    }

    let Some(version) = parts[0].strip_prefix("MOO/") else {
        return Err(RoonError::invalid_format(format!("missing MOO token: {line}")));
    };
    if version != "1" {
        return Err(RoonError::invalid_format(format!(
            "unsupported protocol version: {}",
            parts[0]
        )));
    }

    let verb = parts[1].parse::<MooVerb>()?;
    Ok((verb, parts[2].to_string()))
}

/// Position of the first `\n` of the `\n\n` header terminator.
fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

/// Builder for encoding MOO/1 messages.
#[derive(Debug)]
pub struct MooMessageBuilder {
    message: MooMessage,
}

impl MooMessageBuilder {
    /// Begin a REQUEST with a slash-delimited service path.
    pub fn request(request_id: i64, path: impl Into<String>) -> Self {
        Self {
            message: MooMessage::request(request_id, path),
        }
    }

    /// Begin a CONTINUE response.
    pub fn continue_msg(request_id: i64, name: impl Into<String>) -> Self {
        Self {
            message: MooMessage::continue_msg(request_id, name),
        }
    }

    /// Begin a COMPLETE response.
    pub fn complete(request_id: i64, name: impl Into<String>) -> Self {
        Self {
            message: MooMessage::complete(request_id, name),
        }
    }

    /// Add an extra header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.message.headers.insert(key.into(), value.into());
        self
    }

    /// Set a JSON body.
    pub fn body_json(mut self, value: serde_json::Value) -> Self {
        self.message.body = Some(MooBody::Json(value));
        self
    }

    /// Set a JSON body if one is given.
    pub fn maybe_body(self, value: Option<serde_json::Value>) -> Self {
        match value {
            Some(v) => self.body_json(v),
            None => self,
        }
    }

    /// Encode the message into wire bytes.
    pub fn build(self) -> Result<Vec<u8>> {
        let mut out = Vec::new();

        out.extend_from_slice(b"MOO/1 ");
        out.extend_from_slice(self.message.verb.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.message.name.as_bytes());
        out.push(b'\n');

        out.extend_from_slice(b"Request-Id: ");
        out.extend_from_slice(self.message.request_id.to_string().as_bytes());
        out.push(b'\n');

        for (key, value) in &self.message.headers {
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.push(b'\n');
        }

        if let Some(body) = &self.message.body {
            let body_bytes = match body {
                MooBody::Json(v) => serde_json::to_vec(v)?,
                MooBody::Binary(b) => b.to_vec(),
            };

            if !body_bytes.is_empty() {
                out.extend_from_slice(b"Content-Type: ");
                out.extend_from_slice(body.content_type().as_bytes());
                out.push(b'\n');
                out.extend_from_slice(b"Content-Length: ");
                out.extend_from_slice(body_bytes.len().to_string().as_bytes());
                out.push(b'\n');
                out.push(b'\n');
                out.extend_from_slice(&body_bytes);
                return Ok(out);
            }
        }

        out.push(b'\n');
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_simple_request() {
        let mut parser = MooParser::new();
        let data = b"MOO/1 REQUEST com.roonlabs.registry:1/info\nRequest-Id: 1\n\n";

        let msg = parser.feed(data).unwrap().unwrap();
        assert_eq!(msg.verb, MooVerb::Request);
        assert_eq!(msg.name, "com.roonlabs.registry:1/info");
        assert_eq!(msg.request_id, 1);
        assert!(msg.body.is_none());
        assert_eq!(
            msg.service_method(),
            Some(("com.roonlabs.registry:1", "info"))
        );
    }

    #[test]
    fn parse_with_json_body() {
        let mut parser = MooParser::new();
        let data = b"MOO/1 COMPLETE Success\nRequest-Id: 2\nContent-Type: application/json\nContent-Length: 13\n\n{\"foo\":\"bar\"}";

        let msg = parser.feed(data).unwrap().unwrap();
        assert_eq!(msg.verb, MooVerb::Complete);
        assert_eq!(msg.name, "Success");
        assert_eq!(msg.body_json().unwrap(), &json!({"foo": "bar"}));
    }

    #[test]
    fn parse_negative_and_zero_request_ids() {
        for id in ["-3", "0"] {
            let mut parser = MooParser::new();
            let data = format!("MOO/1 COMPLETE Success\nRequest-Id: {id}\n\n");
            let msg = parser.feed(data.as_bytes()).unwrap().unwrap();
            assert_eq!(msg.request_id, id.parse::<i64>().unwrap());
        }
    }

    #[test]
    fn parse_skips_colonless_lines_and_trims_values() {
        let mut parser = MooParser::new();
        let data =
            b"MOO/1 CONTINUE Changed\nnonsense line without colon\nRequest-Id:   7  \nX-Extra:  padded value \n\n";
        let msg = parser.feed(data).unwrap().unwrap();
        assert_eq!(msg.request_id, 7);
        assert_eq!(msg.headers.get("X-Extra").map(String::as_str), Some("padded value"));
    }

    #[test]
    fn parse_tolerates_extra_blank_lines_before_body() {
        let mut parser = MooParser::new();
        let data = b"MOO/1 COMPLETE Success\nRequest-Id: 9\nContent-Type: application/json\nContent-Length: 2\n\n\n\n{}";
        let msg = parser.feed(data).unwrap().unwrap();
        assert!(msg.body_json().is_some());
    }

    #[test]
    fn parse_rejects_bad_frames() {
        let cases: &[(&[u8], fn(&RoonError) -> bool)] = &[
            (b"HTTP/1.1 REQUEST x/y\nRequest-Id: 1\n\n", |e| {
                matches!(e, RoonError::InvalidFormat(_))
            }),
            (b"MOO/2 REQUEST x/y\nRequest-Id: 1\n\n", |e| {
                matches!(e, RoonError::InvalidFormat(_))
            }),
            (b"MOO/1 NOTIFY x/y\nRequest-Id: 1\n\n", |e| {
                matches!(e, RoonError::InvalidVerb(_))
            }),
            (b"MOO/1 REQUEST x/y\n\n", |e| {
                matches!(e, RoonError::MissingRequestId)
            }),
            (b"MOO/1 REQUEST x/y\nRequest-Id: abc\n\n", |e| {
                matches!(e, RoonError::InvalidRequestId(_))
            }),
            (b"MOO/1 REQUEST\nRequest-Id: 1\n\n", |e| {
                matches!(e, RoonError::InvalidFormat(_))
            }),
        ];

        for (data, check) in cases {
            let mut parser = MooParser::new();
            let err = parser.feed(data).unwrap_err();
            assert!(check(&err), "unexpected error for {:?}: {err}", data);
        }
    }

    #[test]
    fn parse_partial_then_complete() {
        let mut parser = MooParser::new();
        assert!(parser.feed(b"MOO/1 REQUEST a/b\n").unwrap().is_none());
        assert!(parser.feed(b"Request-Id: 12\n").unwrap().is_none());
        let msg = parser.feed(b"\n").unwrap().unwrap();
        assert_eq!(msg.request_id, 12);
    }

    #[test]
    fn parse_drains_coalesced_messages() {
        let mut parser = MooParser::new();
        let mut data = Vec::new();
        data.extend_from_slice(b"MOO/1 CONTINUE Changed\nRequest-Id: 3\n\n");
        data.extend_from_slice(b"MOO/1 COMPLETE Success\nRequest-Id: 4\n\n");

        let first = parser.feed(&data).unwrap().unwrap();
        assert_eq!(first.request_id, 3);
        let second = parser.feed(&[]).unwrap().unwrap();
        assert_eq!(second.request_id, 4);
        assert!(parser.feed(&[]).unwrap().is_none());
    }

    #[test]
    fn build_round_trips_request() {
        let bytes = MooMessageBuilder::request(42, "com.roonlabs.transport:2/control")
            .body_json(json!({"zone_or_output_id": "z1", "control": "play"}))
            .build()
            .unwrap();

        let mut parser = MooParser::new();
        let msg = parser.feed(&bytes).unwrap().unwrap();
        assert_eq!(msg.verb, MooVerb::Request);
        assert_eq!(msg.request_id, 42);
        assert_eq!(msg.name, "com.roonlabs.transport:2/control");
        assert_eq!(
            msg.body_json().unwrap(),
            &json!({"zone_or_output_id": "z1", "control": "play"})
        );
    }

    #[test]
    fn build_round_trips_response_without_body() {
        let bytes = MooMessageBuilder::complete(7, "Success").build().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("MOO/1 COMPLETE Success\n"));
        assert!(!text.contains("Content-Type"));

        let mut parser = MooParser::new();
        let msg = parser.feed(&bytes).unwrap().unwrap();
        assert_eq!(msg.verb, MooVerb::Complete);
        assert!(msg.body.is_none());
    }

    #[test]
    fn content_length_counts_utf8_bytes() {
        let bytes = MooMessageBuilder::continue_msg(1, "Changed")
            .body_json(json!({"name": "café"}))
            .build()
            .unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        let expected = serde_json::to_vec(&json!({"name": "café"})).unwrap().len();
        assert!(text.contains(&format!("Content-Length: {expected}\n")));

        let mut parser = MooParser::new();
        let msg = parser.feed(&bytes).unwrap().unwrap();
        assert_eq!(msg.body_json().unwrap()["name"], "café");
    }
}
