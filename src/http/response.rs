use crate::error::ServerError;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
}

impl Default for Response {
    fn default() -> Self {
        Response::new(200)
    }
}

impl Response {
    pub fn new(status: u16) -> Response {
        Response {
            status,
            headers: HashMap::new(),
            body: String::new(),
        }
    }

    // Chainable status setter
    pub fn status(&mut self, status: u16) -> &mut Self {
        self.status = status;
        self
    }

    pub fn body<T: AsRef<str>>(&mut self, body: T) -> &mut Self {
        self.body = body.as_ref().to_string();
        self
    }

    /// Replaces any existing value. Names are compared case-insensitively.
    pub fn header<K: AsRef<str>, V: AsRef<str>>(&mut self, name: K, value: V) -> &mut Self {
        let name = name.as_ref();
        if let Some(existing) = self.find_header_key(name) {
            self.headers.remove(&existing);
        }
        self.headers.insert(name.to_string(), value.as_ref().to_string());
        self
    }

    /// Adds a value to a comma separated header, skipping duplicates.
    pub fn append_header<K: AsRef<str>, V: AsRef<str>>(&mut self, name: K, value: V) -> &mut Self {
        let (name, value) = (name.as_ref(), value.as_ref());
        match self.find_header_key(name) {
            Some(key) => {
                let current = self.headers.entry(key).or_default();
                if !current.split(',').any(|v| v.trim() == value) {
                    if !current.is_empty() {
                        current.push_str(", ");
                    }
                    current.push_str(value);
                }
            }
            None => {
                self.headers.insert(name.to_string(), value.to_string());
            }
        }
        self
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.find_header_key(name)
            .and_then(|key| self.headers.get(&key))
            .map(String::as_str)
    }

    fn find_header_key(&self, name: &str) -> Option<String> {
        self.headers
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn json<T: Serialize>(&mut self, value: &T) -> Result<&mut Self, ServerError> {
        let json_string = serde_json::to_string(value)
            .map_err(|e| ServerError::InternalError(format!("JSON serialization error: {}", e)))?;
        self.header("Content-Type", "application/json");
        self.body(json_string);
        Ok(self)
    }

    pub fn text<T: AsRef<str>>(content: T) -> Response {
        let mut response = Response::new(200);
        response
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(content);
        response
    }

    /// Standard reason phrase for the status line.
    pub fn reason_phrase(&self) -> &'static str {
        match self.status {
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            301 => "Moved Permanently",
            302 => "Found",
            304 => "Not Modified",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            409 => "Conflict",
            413 => "Request Entity Too Large",
            422 => "Unprocessable Entity",
            429 => "Too Many Requests",
            431 => "Request Header Fields Too Large",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_replaces_case_insensitively() {
        let mut res = Response::new(200);
        res.header("content-type", "text/html");
        res.header("Content-Type", "text/plain");
        assert_eq!(res.headers.len(), 1);
        assert_eq!(res.get_header("CONTENT-TYPE"), Some("text/plain"));
    }

    #[test]
    fn append_header_skips_duplicates() {
        let mut res = Response::new(405);
        res.append_header("Allow", "GET");
        res.append_header("allow", "POST");
        res.append_header("Allow", "GET");
        assert_eq!(res.get_header("Allow"), Some("GET, POST"));
    }
}
