//! Response encoding.

use serde_json::Value;
use uuid::Uuid;

use crate::routing::HandlerResponse;

/// A response ready to be written. Always closes the connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub code: u16,
    pub message: String,
    pub body: Value,
    pub request_id: Uuid,
}

impl Response {
    pub fn new(code: u16, message: impl Into<String>, body: Value) -> Self {
        Self {
            code,
            message: message.into(),
            body,
            request_id: Uuid::new_v4(),
        }
    }

    /// Error response with an `{"error": message}` body.
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self::from(HandlerResponse::error(code, message))
    }

    /// Serialize the status line, headers and body.
    pub fn encode(&self) -> Vec<u8> {
        let body = if is_empty_body(&self.body) {
            Vec::new()
        } else {
            // Serializing a `Value` cannot fail.
            serde_json::to_vec(&self.body).unwrap_or_default()
        };

        let mut out = format!(
            "HTTP/1.1 {} {}\r\n\
             Content-Type: application/json\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             X-Request-Id: {}\r\n\
             \r\n",
            self.code,
            status_line_safe(&self.message),
            body.len(),
            self.request_id,
        )
        .into_bytes();
        out.extend_from_slice(&body);
        out
    }
}

impl From<HandlerResponse> for Response {
    fn from(r: HandlerResponse) -> Self {
        Self::new(r.code, r.message, r.body)
    }
}

fn is_empty_body(body: &Value) -> bool {
    match body {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// The reason phrase is free text from handlers; keep it on one line.
fn status_line_safe(message: &str) -> String {
    message
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(r: &Response) -> String {
        String::from_utf8(r.encode()).unwrap()
    }

    #[test]
    fn encodes_status_headers_and_body() {
        let r = Response::new(200, "OK", json!({"message": "hi"}));
        let raw = text(&r);
        let body = r#"{"message":"hi"}"#;

        assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(raw.contains("Content-Type: application/json\r\n"));
        assert!(raw.contains(&format!("Content-Length: {}\r\n", body.len())));
        assert!(raw.contains("Connection: close\r\n"));
        assert!(raw.contains(&format!("X-Request-Id: {}\r\n", r.request_id)));
        assert!(raw.ends_with(&format!("\r\n\r\n{body}")));
    }

    #[test]
    fn empty_bodies_have_zero_length() {
        for body in [Value::Null, json!({})] {
            let raw = text(&Response::new(204, "Nothing", body));
            assert!(raw.contains("Content-Length: 0\r\n"));
            assert!(raw.ends_with("\r\n\r\n"));
        }
    }

    #[test]
    fn content_length_counts_bytes() {
        let r = Response::new(200, "OK", json!({"m": "héllo"}));
        let raw = r.encode();
        let body_len = serde_json::to_vec(&r.body).unwrap().len();
        assert!(String::from_utf8_lossy(&raw).contains(&format!("Content-Length: {body_len}\r\n")));
    }

    #[test]
    fn message_cannot_break_status_line() {
        let raw = text(&Response::error(400, "bad\r\nX-Evil: 1"));
        assert!(raw.starts_with("HTTP/1.1 400 bad  X-Evil: 1\r\n"));
    }

    #[test]
    fn request_ids_are_unique() {
        let a = Response::new(200, "OK", Value::Null);
        let b = Response::new(200, "OK", Value::Null);
        assert_ne!(a.request_id, b.request_id);
    }
}
