//! Per-request dispatch state.
//!
//! A [`Ctx`] lives for exactly one request. It carries the resumable route
//! cursor, the captured parameters and the response being built, and is
//! passed by reference through every handler of the chain.

use crate::config::Config;
use crate::error::{ServerError, ServerResult};
use crate::http::{Body, Method, Request, Response};
use crate::router::path::{normalize_path, tree_key, ParamSlots, EMPTY_SLOTS, MAX_PARAMS};
use crate::router::route::Route;
use crate::router::tree::TreeIndex;
use serde::Serialize;
use std::sync::Arc;

pub struct Ctx {
    tree: Arc<TreeIndex>,
    request: Request,
    response: Response,
    method: Method,
    path_original: String,
    path: String,
    detection_path: String,
    route_cursor: Option<usize>,
    handler_index: usize,
    matched: bool,
    route: Option<Arc<Route>>,
    values: ParamSlots,
    case_sensitive: bool,
}

impl Ctx {
    pub(crate) fn new(tree: Arc<TreeIndex>, request: Request, method: Method, config: &Config) -> Self {
        let path_original = request.path.clone();
        let path = if config.unescape_path {
            urlencoding::decode(&path_original)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| path_original.clone())
        } else {
            path_original.clone()
        };
        let detection_path = normalize_path(&path, config.route_options());

        Self {
            tree,
            request,
            response: Response::new(200),
            method,
            path_original,
            path,
            detection_path,
            route_cursor: None,
            handler_index: 0,
            matched: false,
            route: None,
            values: EMPTY_SLOTS,
            case_sensitive: config.case_sensitive,
        }
    }

    /// Continues the chain: the next handler of the current route, or the
    /// next matching route.
    pub fn next(&mut self) -> ServerResult<()> {
        self.handler_index += 1;
        let handler = self
            .route
            .as_ref()
            .and_then(|route| route.handlers.get(self.handler_index))
            .cloned();
        match handler {
            Some(handler) => handler.call(self),
            None => self.advance(),
        }
    }

    /// Resumes the scan after the route cursor and runs the first handler of
    /// the first matching route.
    ///
    /// Fails with `NotFound`, or `MethodNotAllowed` when no exact route
    /// matched here but one does under another method.
    pub fn advance(&mut self) -> ServerResult<()> {
        let tree = Arc::clone(&self.tree);
        let bucket = tree.bucket(self.method, tree_key(&self.detection_path));

        let mut index = self.route_cursor.map_or(0, |cursor| cursor + 1);
        while index < bucket.len() {
            self.route_cursor = Some(index);
            let route = &bucket[index];
            index += 1;

            if !route.matches(&self.detection_path, &self.path, &mut self.values) {
                continue;
            }
            self.route = Some(Arc::clone(route));
            if !self.matched && !route.is_middleware() {
                self.matched = true;
            }
            self.handler_index = 0;
            let handler = Arc::clone(&route.handlers[0]);
            return handler.call(self);
        }

        if !self.matched && self.method_exists() {
            return Err(ServerError::MethodNotAllowed);
        }
        Err(ServerError::NotFound(format!(
            "Cannot {} {}",
            self.method, self.path_original
        )))
    }

    /// Probes every other method for an exact route serving this path and
    /// lists the ones found in the `Allow` header.
    fn method_exists(&mut self) -> bool {
        let tree = Arc::clone(&self.tree);
        let key = tree_key(&self.detection_path);
        let mut scratch = EMPTY_SLOTS;
        let mut exists = false;
        for method in Method::ALL {
            if method == self.method {
                continue;
            }
            let found = tree
                .bucket(method, key)
                .iter()
                .filter(|route| !route.is_middleware())
                .any(|route| route.matches(&self.detection_path, &self.path, &mut scratch));
            if found {
                exists = true;
                self.response.append_header("Allow", method.as_str());
            }
        }
        exists
    }

    /// Whether a non-middleware route has matched so far.
    pub fn matched(&self) -> bool {
        self.matched
    }

    pub fn route(&self) -> Option<&Route> {
        self.route.as_deref()
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Path used for matching and parameter capture.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path exactly as received.
    pub fn original_path(&self) -> &str {
        &self.path_original
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn body(&self) -> &Body {
        &self.request.body
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.request.get_header(key)
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        self.request.query.get(key).map(String::as_str)
    }

    /// Value captured for the route parameter `key`, or an empty string.
    pub fn param(&self, key: &str) -> &str {
        self.param_or(key, "")
    }

    pub fn param_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        let Some(route) = &self.route else {
            return default;
        };
        let key = match key {
            "*" => "*1",
            "+" => "+1",
            key => key,
        };
        for (i, name) in route.params().iter().enumerate().take(MAX_PARAMS) {
            let same = name == key || (!self.case_sensitive && name.eq_ignore_ascii_case(key));
            if !same {
                continue;
            }
            let (start, end) = self.values[i];
            if end <= start {
                return default;
            }
            return self.path.get(start..end).unwrap_or(default);
        }
        default
    }

    /// All parameters of the active route as `(name, value)` pairs.
    pub fn params(&self) -> Vec<(&str, &str)> {
        match &self.route {
            Some(route) => route
                .params()
                .iter()
                .map(|name| (name.as_str(), self.param(name)))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    pub fn status(&mut self, status: u16) -> &mut Self {
        self.response.status(status);
        self
    }

    pub fn set(&mut self, key: &str, value: &str) -> &mut Self {
        self.response.header(key, value);
        self
    }

    pub fn append(&mut self, key: &str, value: &str) -> &mut Self {
        self.response.append_header(key, value);
        self
    }

    pub fn send_string<T: AsRef<str>>(&mut self, body: T) -> ServerResult<()> {
        self.response.body(body);
        Ok(())
    }

    /// Sets the status and, when no body was written, the reason phrase.
    pub fn send_status(&mut self, status: u16) -> ServerResult<()> {
        self.response.status(status);
        if self.response.body.is_empty() {
            let reason = self.response.reason_phrase().to_owned();
            self.response.body(reason);
        }
        Ok(())
    }

    pub fn json<T: Serialize>(&mut self, value: &T) -> ServerResult<()> {
        self.response.json(value)?;
        Ok(())
    }

    pub(crate) fn into_response(self) -> Response {
        self.response
    }
}
