use chrono::Utc;

/// Response built by a route handler: body bytes plus a content type,
/// optionally reshaped with a status code, extra headers or cookies.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(body: impl Into<Vec<u8>>, content_type: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            content_type: content_type.to_string(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> HttpResponse {
        self.status = status;
        self
    }

    /// Appends an extra response header.
    pub fn header(mut self, name: &str, value: &str) -> HttpResponse {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Appends a `Set-Cookie` header expiring `expiry` from now, in the
    /// `{key}={value};Path=/;Expires=<date> GMT` shape with the expiry date
    /// rendered as e.g. `Mon, 25-Aug-2026 7:03:09`.
    pub fn set_cookie(self, key: &str, value: &str, expiry: chrono::Duration) -> HttpResponse {
        let cookie_date = (Utc::now() + expiry).format("%a, %d-%b-%Y %-H:%M:%S");
        self.header(
            "Set-Cookie",
            &format!("{}={};Path=/;Expires={} GMT", key, value, cookie_date),
        )
    }

    /// Status line, content headers, extras, `Connection: close`, blank
    /// line, body.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n",
            self.status,
            status_text(self.status),
            self.content_type,
            self.body.len()
        );
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("Connection: close\r\n\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "",
    }
}
