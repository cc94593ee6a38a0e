//! Minimal HTTP request-head handling ahead of the websocket upgrade.

use anyhow::{Result, bail};
use tokio::io::{AsyncRead, AsyncReadExt};

pub const MAX_HEAD_SIZE: usize = 8192;

pub const NOT_FOUND_RESPONSE: &[u8] =
    b"HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: 9\r\nConnection: close\r\n\r\nNot Found";

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Header slots offered to the parser; more fields than this is a bad request.
const MAX_HEADERS: usize = 64;

/// Request line and header fields of an HTTP/1.x request.
#[derive(Debug, Default)]
pub struct RequestHead {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parses the request head at the start of `buf`.
    /// Returns `None` if the head is incomplete or not a well-formed request.
    #[must_use]
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut slots);
        match request.parse(buf) {
            Ok(httparse::Status::Complete(_)) => {}
            Ok(httparse::Status::Partial) | Err(_) => return None,
        }

        let headers = request
            .headers
            .iter()
            .map(|header| {
                let value = String::from_utf8_lossy(header.value).trim().to_string();
                (header.name.to_string(), value)
            })
            .collect();
        Some(Self {
            method: request.method.unwrap_or_default().to_string(),
            path: request.path.unwrap_or_default().to_string(),
            headers,
        })
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn is_websocket_upgrade(&self) -> bool {
        self.header("upgrade")
            .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|window| window == HEAD_TERMINATOR)
}

/// Reads until the end of the request head, returning every byte read.
pub async fn read_request_head<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            bail!("Connection closed before the request head was complete");
        }
        buf.extend_from_slice(&chunk[..n]);
        if find_head_end(&buf).is_some() {
            return Ok(buf);
        }
        if buf.len() > MAX_HEAD_SIZE {
            bail!("Request head exceeds {MAX_HEAD_SIZE} bytes");
        }
    }
}
