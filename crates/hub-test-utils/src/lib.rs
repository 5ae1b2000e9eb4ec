//! Throwaway HTTP endpoints for exercising outbound clients in tests.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;

/// One request as the mock server received it.
#[derive(Debug)]
pub struct CapturedRequest {
    pub method: String,
    /// Request target without the query string.
    pub path: String,
    pub query: Option<String>,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Canned response for [`spawn_server`].
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status_line: String,
    pub content_type: String,
    pub body: String,
}

impl MockResponse {
    pub fn new(status_line: &str, body: &str) -> Self {
        Self {
            status_line: status_line.to_string(),
            content_type: "text/plain; charset=utf-8".to_string(),
            body: body.to_string(),
        }
    }

    pub fn content_type(mut self, content_type: &str) -> Self {
        self.content_type = content_type.to_string();
        self
    }

    fn to_http(&self) -> String {
        format!(
            "HTTP/1.1 {}\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            self.status_line,
            self.content_type,
            self.body.len(),
            self.body
        )
    }
}

/// Accept a single connection, capture its request and answer with `response`.
/// Returns the base URL and a receiver for the captured request.
pub fn spawn_server(response: MockResponse) -> (String, mpsc::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
    let addr = listener.local_addr().expect("read mock server addr");
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept mock request");
        let request = read_request(&mut stream);
        let _ = tx.send(request);
        stream
            .write_all(response.to_http().as_bytes())
            .expect("write mock response");
    });

    (format!("http://{addr}"), rx)
}

/// [`spawn_server`] with a plain-text body.
pub fn spawn_one_shot_server(
    status_line: &str,
    body: &str,
) -> (String, mpsc::Receiver<CapturedRequest>) {
    spawn_server(MockResponse::new(status_line, body))
}

fn read_request(stream: &mut TcpStream) -> CapturedRequest {
    let mut buf = Vec::new();
    let mut header_end = None;
    let mut content_length = 0usize;

    while header_end.is_none_or(|end| buf.len() < end + content_length) {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).expect("read request bytes");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if header_end.is_none()
            && let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
        {
            header_end = Some(end);
            content_length = parse_headers(&String::from_utf8_lossy(&buf[..end]))
                .get("content-length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
        }
    }

    let end = header_end.expect("request headers must be present");
    let head = String::from_utf8_lossy(&buf[..end]).to_string();
    let request_line = head.lines().next().expect("request line");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().expect("method").to_string();
    let target = parts.next().expect("request target");
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.to_string(), None),
    };
    let body_end = (end + content_length).min(buf.len());
    let body = String::from_utf8(buf[end..body_end].to_vec()).expect("utf8 body");

    CapturedRequest {
        method,
        path,
        query,
        headers: parse_headers(&head),
        body,
    }
}

fn parse_headers(head: &str) -> HashMap<String, String> {
    head.lines()
        .skip(1)
        .take_while(|line| !line.trim().is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect()
}
