use std::net::SocketAddr;

use bytes::BytesMut;

use crate::AppError::Incomplete;
use crate::{AppError, AppResult};

/// One parsed HTTP request.
///
/// The method is stored lowercased because route matching is defined on the
/// lowercased method; the path carries no query string. Header names keep
/// their wire casing, lookup is case-insensitive.
#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub peer_addr: SocketAddr,
}

impl HttpRequest {
    /// Case-insensitive header lookup, first occurrence wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header_name, _)| header_name.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The original request target, path plus query.
    pub fn target(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    /// Returns the total byte length of the first complete request in
    /// `buffer`, or `Incomplete` while headers or body are still partial.
    fn check(buffer: &BytesMut, max_size: usize) -> AppResult<(usize, usize)> {
        let header_end = match find_header_end(buffer) {
            Some(pos) => pos,
            None => {
                // no blank line yet; refuse to buffer past the limit
                if buffer.len() > max_size {
                    return Err(AppError::FrameTooLarge(buffer.len()));
                }
                return Err(Incomplete);
            }
        };
        let head = String::from_utf8_lossy(&buffer[..header_end]);
        let content_length = scan_content_length(&head)?;
        let total = header_end + 4 + content_length;
        if total > max_size {
            return Err(AppError::FrameTooLarge(total));
        }
        if buffer.len() < total {
            return Err(Incomplete);
        }
        Ok((header_end, total))
    }

    pub(crate) fn parse(
        buffer: &mut BytesMut,
        peer_addr: SocketAddr,
        max_size: usize,
    ) -> AppResult<Option<HttpRequest>> {
        match HttpRequest::check(buffer, max_size) {
            Ok((header_end, total)) => {
                let mut segment = buffer.split_to(total);
                let head_bytes = segment.split_to(header_end + 4);
                let head = String::from_utf8_lossy(&head_bytes[..header_end]).into_owned();
                let request = build_request(&head, segment.to_vec(), peer_addr)?;
                Ok(Some(request))
            }
            Err(AppError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn find_header_end(buffer: &BytesMut) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
}

fn scan_content_length(head: &str) -> AppResult<usize> {
    for line in head.lines().skip(1) {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                return value.trim().parse::<usize>().map_err(|_| {
                    AppError::MalformedRequest(format!("bad content-length: {}", value.trim()))
                });
            }
        }
    }
    Ok(0)
}

fn build_request(head: &str, body: Vec<u8>, peer_addr: SocketAddr) -> AppResult<HttpRequest> {
    let mut lines = head.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| AppError::MalformedRequest("empty request".to_string()))?;

    let mut parts = request_line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version)) => (method, target, version),
        _ => {
            return Err(AppError::MalformedRequest(format!(
                "bad request line: {}",
                request_line
            )))
        }
    };

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.to_string(), None),
    };

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line.split_once(':').ok_or_else(|| {
            AppError::MalformedRequest(format!("bad header line: {}", line))
        })?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(HttpRequest {
        method: method.to_lowercase(),
        path,
        query,
        version: version.to_string(),
        headers,
        body,
        peer_addr,
    })
}
