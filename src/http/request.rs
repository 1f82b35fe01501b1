//! Request decoding.
//!
//! One request per connection: request line, CRLF header lines, a blank
//! line and an optional body sized by `Content-Length`. Everything must
//! fit in `max_request_bytes`.

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::routing::Payload;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";
const READ_CHUNK: usize = 4096;

/// Why a request could not be decoded. All map to 400.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed request line")]
    RequestLine,

    #[error("malformed header line: {0}")]
    Header(String),

    #[error("invalid Content-Length")]
    ContentLength,

    #[error("request exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("connection closed mid-request")]
    Truncated,

    #[error("request head is not valid UTF-8")]
    Encoding,

    #[error("invalid JSON body: {0}")]
    Json(String),

    #[error("JSON body must be an object")]
    NotAnObject,

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    /// Target path with the query string removed.
    pub path: String,
    pub query: Option<String>,
    /// Headers in arrival order, names as sent.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// Case-insensitive header lookup; first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<String> {
        self.header("Content-Type").map(str::to_ascii_lowercase)
    }

    /// Build the handler payload: query parameters for GET, the body
    /// otherwise.
    pub fn payload(&self) -> Result<Payload, DecodeError> {
        if self.method.eq_ignore_ascii_case("GET") {
            return Ok(self
                .query
                .as_deref()
                .map(|q| pairs_to_payload(q.as_bytes()))
                .unwrap_or_default());
        }
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Payload::new());
        }

        match self.content_type() {
            Some(ct) if ct.contains("application/x-www-form-urlencoded") => {
                Ok(pairs_to_payload(&self.body))
            }
            _ => match serde_json::from_slice::<Value>(&self.body) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Err(DecodeError::NotAnObject),
                Err(e) => Err(DecodeError::Json(e.to_string())),
            },
        }
    }
}

/// Decode `key=value&...` pairs. Repeated keys collect into an array.
pub fn pairs_to_payload(input: &[u8]) -> Payload {
    let mut payload = Map::new();
    for (key, value) in url::form_urlencoded::parse(input) {
        let value = Value::String(value.into_owned());
        match payload.get_mut(&*key) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                payload.insert(key.into_owned(), value);
            }
        }
    }
    payload
}

/// Read one request from `reader`. `Ok(None)` when the peer closed
/// without sending anything.
pub async fn read_request<R>(reader: &mut R, max_bytes: usize) -> Result<Option<Request>, DecodeError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK.min(max_bytes));
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        if let Progress::Done(request) = try_parse(&buf, max_bytes)? {
            return Ok(Some(request));
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(DecodeError::Truncated);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Decode a complete request held in memory.
pub fn decode(bytes: &[u8], max_bytes: usize) -> Result<Request, DecodeError> {
    match try_parse(bytes, max_bytes)? {
        Progress::Done(request) => Ok(request),
        Progress::Partial => Err(DecodeError::Truncated),
    }
}

enum Progress {
    Partial,
    Done(Request),
}

fn try_parse(buf: &[u8], max_bytes: usize) -> Result<Progress, DecodeError> {
    let Some(head_end) = find_terminator(buf) else {
        if buf.len() >= max_bytes {
            return Err(DecodeError::TooLarge { limit: max_bytes });
        }
        return Ok(Progress::Partial);
    };

    let head = std::str::from_utf8(&buf[..head_end]).map_err(|_| DecodeError::Encoding)?;
    let (method, target, headers) = parse_head(head)?;
    let body_start = head_end + HEAD_TERMINATOR.len();
    let total = body_start + content_length(&headers)?;
    if total > max_bytes {
        return Err(DecodeError::TooLarge { limit: max_bytes });
    }
    if buf.len() < total {
        return Ok(Progress::Partial);
    }

    // Bytes past Content-Length are ignored.
    let (path, query) = split_target(&target);
    Ok(Progress::Done(Request {
        method,
        path,
        query,
        headers,
        body: buf[body_start..total].to_vec(),
    }))
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
}

type Head = (String, String, Vec<(String, String)>);

fn parse_head(head: &str) -> Result<Head, DecodeError> {
    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or(DecodeError::RequestLine)?;

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(DecodeError::RequestLine);
    };
    if !version.starts_with("HTTP/") || !target.starts_with('/') {
        return Err(DecodeError::RequestLine);
    }

    let headers = lines
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| DecodeError::Header(line.to_string()))?;
            let name = name.trim();
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(DecodeError::Header(line.to_string()));
            }
            Ok((name.to_string(), value.trim().to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((method.to_ascii_uppercase(), target.to_string(), headers))
}

fn content_length(headers: &[(String, String)]) -> Result<usize, DecodeError> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("Content-Length"))
        .map(|(_, v)| v.parse::<usize>().map_err(|_| DecodeError::ContentLength))
        .unwrap_or(Ok(0))
}

fn split_target(target: &str) -> (String, Option<String>) {
    let target = target.split('#').next().unwrap_or(target);
    match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.to_string(), None),
    }
}
