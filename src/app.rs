//! The application: registration, startup and request handling.
//!
//! Routes are registered on the [`App`] (or on routers mounted into it),
//! the route tree is built by [`App::startup_process`], and requests are
//! served either in-process through [`App::handle`] / [`App::test`] or over
//! TCP through [`App::listen`].
//!
//! # Examples
//!
//! ```rust
//! use waypoint::{App, Request, Routable};
//!
//! let mut app = App::new();
//! app.middleware("/api", |c| {
//!     c.set("X-Api", "1");
//!     c.next()
//! });
//! app.get("/api/users/:id", |c| {
//!     let id = c.param("id").to_owned();
//!     c.send_string(id)
//! });
//!
//! let res = app.test(Request::new("GET", "/api/users/42"));
//! assert_eq!(res.body, "42");
//! assert_eq!(res.get_header("X-Api"), Some("1"));
//! ```

use crate::config::Config;
use crate::ctx::Ctx;
use crate::error::{ServerError, ServerResult, TransportError};
use crate::handler::BoxedHandler;
use crate::http::{Body, Method, Request, Response};
use crate::router::route::Route;
use crate::router::tree::TreeIndex;
use crate::router::{Group, Routable, Router};
use arc_swap::ArcSwap;
use futures::FutureExt;
use std::io::{self, ErrorKind};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

type ErrorHandler = Arc<dyn Fn(&mut Ctx, ServerError) -> ServerResult<()> + Send + Sync>;

pub struct App {
    config: Arc<Config>,
    router: Mutex<Router>,
    tree: ArcSwap<TreeIndex>,
    error_handler: ErrorHandler,
}

impl Default for App {
    fn default() -> Self {
        App::with_config(Config::default())
    }
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            router: Mutex::new(Router::with_options(config.route_options())),
            config: Arc::new(config),
            tree: ArcSwap::from_pointee(TreeIndex::default()),
            error_handler: Arc::new(default_error_handler),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replaces the handler that turns a failed chain into a response.
    pub fn error_handler<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&mut Ctx, ServerError) -> ServerResult<()> + Send + Sync + 'static,
    {
        self.error_handler = Arc::new(handler);
        self
    }

    fn router_mut(&mut self) -> &mut Router {
        self.router.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    fn router(&self) -> MutexGuard<'_, Router> {
        self.router.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mounts `sub` under `prefix`; see [`Router::mount`].
    pub fn mount(&mut self, prefix: &str, sub: Router) -> &mut Self {
        self.router_mut().mount(prefix, sub);
        self
    }

    pub fn register_router(&mut self, prefix: &str, router: Router) -> &mut Self {
        self.router_mut().register_router(prefix, router);
        self
    }

    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        self.router_mut().group(prefix)
    }

    pub fn routes_count(&self) -> u32 {
        self.router().routes_count()
    }

    pub fn handlers_count(&self) -> u32 {
        self.router().handlers_count()
    }

    /// Snapshot of the registered routes, one list per method.
    pub fn stack(&self) -> Vec<Vec<Route>> {
        self.router().stack().to_vec()
    }

    /// The index requests are currently dispatched against.
    pub fn tree(&self) -> Arc<TreeIndex> {
        self.tree.load_full()
    }

    /// Composes mounted routers and publishes a fresh route tree when the
    /// registry changed since the last call.
    pub fn startup_process(&self) {
        let mut router = self.router();
        if let Some(tree) = router.build_tree() {
            self.tree.store(Arc::new(tree));
        }
    }

    /// Serves one request against the published tree.
    pub fn handle(&self, request: Request) -> Response {
        let method = match request.method.parse::<Method>() {
            Ok(method) => method,
            Err(_) => {
                return self.respond_with_error(request, ServerError::new(400, "Invalid http method"))
            }
        };
        let mut ctx = Ctx::new(self.tree.load_full(), request, method, &self.config);
        if let Err(err) = ctx.advance() {
            self.apply_error(&mut ctx, err);
        }
        ctx.into_response()
    }

    /// Builds if needed, then handles `request`.
    pub fn test(&self, request: Request) -> Response {
        self.startup_process();
        self.handle(request)
    }

    fn respond_with_error(&self, request: Request, err: ServerError) -> Response {
        let method = request.method.parse::<Method>().unwrap_or(Method::GET);
        let mut ctx = Ctx::new(self.tree.load_full(), request, method, &self.config);
        self.apply_error(&mut ctx, err);
        ctx.into_response()
    }

    fn apply_error(&self, ctx: &mut Ctx, err: ServerError) {
        if let Err(failure) = (self.error_handler)(ctx, err) {
            warn!(error = %failure, path = %ctx.original_path(), "error handler failed");
            ctx.status(500);
            if ctx.response().body.is_empty() {
                ctx.send_string("Internal Server Error").ok();
            }
        }
    }

    /// Binds `addr` and serves until the process exits.
    pub fn listen(self, addr: &str) -> Result<(), Box<dyn std::error::Error>> {
        let runtime = Runtime::new()?;
        runtime.block_on(async {
            let listener = TcpListener::bind(addr).await?;
            info!(addr = %addr, "server listening");
            Arc::new(self).serve(listener).await?;
            Ok::<(), Box<dyn std::error::Error>>(())
        })
    }

    /// Accept loop over an already bound listener.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        self.startup_process();
        let permits = Arc::new(Semaphore::new(self.config.concurrency));

        loop {
            let permit = Arc::clone(&permits)
                .acquire_owned()
                .await
                .map_err(|e| io::Error::new(ErrorKind::Other, e))?;

            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            let app = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = app.handle_connection(stream).await {
                    debug!(peer = %peer, error = %e, "connection closed with error");
                }
                drop(permit);
            });
        }
    }

    async fn handle_connection<S>(&self, mut stream: S) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(&mut stream);
        let read = read_request(&mut reader, &self.config);
        let outcome = match self.config.read_timeout() {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .unwrap_or(Err(TransportError::Timeout)),
            None => read.await,
        };

        let (response, head) = match outcome {
            Ok(None) => return Ok(()),
            Ok(Some(request)) => {
                let head = request.method == Method::HEAD.as_str();
                (self.dispatch(request).await, head)
            }
            Err(err) => {
                warn!(error = %err, "rejected request");
                let fallback = Request::new(Method::GET.as_str(), "/");
                (self.respond_with_error(fallback, err.into_server_error()), false)
            }
        };

        let bytes = serialize_response(&response, head, &self.config);
        match self.config.write_timeout() {
            Some(limit) => tokio::time::timeout(limit, stream.write_all(&bytes))
                .await
                .map_err(|_| io::Error::new(ErrorKind::TimedOut, "write timed out"))??,
            None => stream.write_all(&bytes).await?,
        }
        stream.flush().await
    }

    /// Handles `request`, turning a handler panic into a `PanicError`.
    async fn dispatch(&self, request: Request) -> Response {
        let fallback = Request::new(&request.method, &request.path);
        match AssertUnwindSafe(async { self.handle(request) })
            .catch_unwind()
            .await
        {
            Ok(response) => response,
            Err(panic) => {
                let message = if let Some(msg) = panic.downcast_ref::<&str>() {
                    msg.to_string()
                } else if let Some(msg) = panic.downcast_ref::<String>() {
                    msg.clone()
                } else {
                    "Unknown panic".to_string()
                };
                warn!(path = %fallback.path, panic = %message, "handler panicked");
                self.respond_with_error(fallback, ServerError::PanicError(message))
            }
        }
    }
}

impl Routable for App {
    fn add(&mut self, method: &str, path: &str, handlers: Vec<BoxedHandler>) -> &mut Self {
        self.router_mut().register(method, path, handlers);
        self
    }
}

/// Writes the error's status and text as a plain-text response.
pub fn default_error_handler(ctx: &mut Ctx, err: ServerError) -> ServerResult<()> {
    ctx.status(err.status_code())
        .set("Content-Type", "text/plain; charset=utf-8");
    ctx.send_string(err.to_string())
}

/// Reads one request. `Ok(None)` means the peer closed before sending
/// anything.
async fn read_request<R>(reader: &mut R, config: &Config) -> Result<Option<Request>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let Some(lines) = read_head(reader, config.read_buffer_size).await? else {
        return Ok(None);
    };

    let mut parts = lines[0].split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Err(TransportError::Malformed(format!("bad request line: {}", lines[0])));
    };
    if config.get_only && method != Method::GET.as_str() {
        return Err(TransportError::GetOnly);
    }

    let mut request = Request::new(method, target);
    for line in &lines[1..] {
        let Some((key, value)) = line.split_once(':') else {
            return Err(TransportError::Malformed(format!("bad header line: {}", line)));
        };
        request = request.with_header(key.trim(), value.trim());
    }

    if request.get_header("transfer-encoding").is_some() {
        return Err(TransportError::Malformed("chunked bodies are not supported".into()));
    }
    let length = match request.get_header("content-length") {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| TransportError::Malformed(format!("bad content-length: {}", raw)))?,
        None => 0,
    };
    if length > config.body_limit {
        return Err(TransportError::BodyTooLarge);
    }
    if length > 0 {
        let mut data = vec![0; length];
        reader.read_exact(&mut data).await?;
        let content_type = request.get_header("content-type").unwrap_or("").to_owned();
        request = request.with_body(Body::from_bytes(&content_type, data));
    }
    Ok(Some(request))
}

/// Request line plus header lines, bounded by `limit` bytes in total.
async fn read_head<R>(reader: &mut R, limit: usize) -> Result<Option<Vec<String>>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines: Vec<String> = Vec::new();
    let mut consumed = 0usize;
    loop {
        let mut line = Vec::new();
        let budget = (limit - consumed) as u64 + 1;
        let n = (&mut *reader).take(budget).read_until(b'\n', &mut line).await?;
        if n == 0 {
            if consumed == 0 {
                return Ok(None);
            }
            return Err(TransportError::Malformed("unexpected end of request head".into()));
        }
        consumed += n;
        if consumed > limit {
            return Err(TransportError::SmallBuffer);
        }
        if !line.ends_with(b"\n") {
            return Err(TransportError::Malformed("unexpected end of request head".into()));
        }

        let text = String::from_utf8(line)
            .map_err(|_| TransportError::Malformed("request head is not valid UTF-8".into()))?;
        let text = text.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            if lines.is_empty() {
                continue;
            }
            return Ok(Some(lines));
        }
        lines.push(text.to_owned());
    }
}

fn serialize_response(response: &Response, head: bool, config: &Config) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {} {}\r\n", response.status, response.reason_phrase());

    if !config.disable_default_date && response.get_header("Date").is_none() {
        out += &format!("Date: {}\r\n", httpdate::fmt_http_date(SystemTime::now()));
    }
    if !config.server_header.is_empty() && response.get_header("Server").is_none() {
        out += &format!("Server: {}\r\n", config.server_header);
    }
    if !config.disable_default_content_type && response.get_header("Content-Type").is_none() {
        out += "Content-Type: text/plain; charset=utf-8\r\n";
    }
    for (name, value) in &response.headers {
        if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("connection") {
            continue;
        }
        out += &format!("{}: {}\r\n", name, value);
    }
    out += &format!("Content-Length: {}\r\nConnection: close\r\n\r\n", response.body.len());

    let mut bytes = out.into_bytes();
    if !head {
        bytes.extend_from_slice(response.body.as_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read(raw: &str, config: &Config) -> Result<Option<Request>, TransportError> {
        let mut reader = BufReader::new(raw.as_bytes());
        read_request(&mut reader, config).await
    }

    #[tokio::test]
    async fn reads_request_line_headers_and_body() {
        let raw = "POST /items?tag=a HTTP/1.1\r\nHost: x\r\nContent-Type: application/json\r\nContent-Length: 8\r\n\r\n{\"id\":1}";
        let request = read(raw, &Config::default()).await.unwrap().unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/items");
        assert_eq!(request.query.get("tag").map(String::as_str), Some("a"));
        assert_eq!(request.get_header("host"), Some("x"));
        assert_eq!(request.body.as_string(), "{\"id\":1}");
        assert_eq!(request.body.content_type(), "application/json");
    }

    #[tokio::test]
    async fn empty_connection_yields_nothing() {
        assert!(read("", &Config::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_head_is_rejected() {
        let config = Config {
            read_buffer_size: 64,
            ..Config::default()
        };
        let raw = format!("GET / HTTP/1.1\r\nX-Long: {}\r\n\r\n", "a".repeat(100));
        let err = read(&raw, &config).await.unwrap_err();
        assert!(matches!(err, TransportError::SmallBuffer));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let config = Config {
            body_limit: 4,
            ..Config::default()
        };
        let raw = "POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let err = read(raw, &config).await.unwrap_err();
        assert!(matches!(err, TransportError::BodyTooLarge));
    }

    #[tokio::test]
    async fn get_only_rejects_other_methods() {
        let config = Config {
            get_only: true,
            ..Config::default()
        };
        let err = read("POST / HTTP/1.1\r\n\r\n", &config).await.unwrap_err();
        assert!(matches!(err, TransportError::GetOnly));
        assert!(read("GET / HTTP/1.1\r\n\r\n", &config).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn malformed_head_is_rejected() {
        let err = read("GARBAGE\r\n\r\n", &Config::default()).await.unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)));
        let err = read("GET / HTTP/1.1\r\nno-colon\r\n\r\n", &Config::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)));
    }

    #[test]
    fn serialized_response_has_default_headers() {
        let config = Config {
            server_header: "waypoint".into(),
            ..Config::default()
        };
        let mut response = Response::new(201);
        response.body("made");
        let text = String::from_utf8(serialize_response(&response, false, &config)).unwrap();
        assert!(text.starts_with("HTTP/1.1 201 Created\r\n"));
        assert!(text.contains("Date: "));
        assert!(text.contains("Server: waypoint\r\n"));
        assert!(text.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(text.contains("Content-Length: 4\r\n"));
        assert!(text.ends_with("\r\n\r\nmade"));
    }

    #[test]
    fn head_responses_omit_the_body() {
        let config = Config {
            disable_default_date: true,
            ..Config::default()
        };
        let mut response = Response::new(200);
        response.body("hidden");
        let text = String::from_utf8(serialize_response(&response, true, &config)).unwrap();
        assert!(!text.contains("Date: "));
        assert!(text.contains("Content-Length: 6\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn error_handler_failure_forces_500() {
        let mut app = App::new();
        app.error_handler(|_, err| Err(err));
        let res = app.test(Request::new("GET", "/nothing"));
        assert_eq!(res.status, 500);
        assert_eq!(res.body, "Internal Server Error");
    }

    #[test]
    fn invalid_method_is_a_bad_request() {
        let mut app = App::new();
        app.get("/", |c| c.send_string("root"));
        let res = app.test(Request::new("BREW", "/"));
        assert_eq!(res.status, 400);
        assert_eq!(res.body, "Invalid http method");
    }

    #[tokio::test]
    async fn panicking_handler_becomes_500() {
        let mut app = App::new();
        app.get("/boom", |_| panic!("kaboom"));
        app.startup_process();
        let res = app.dispatch(Request::new("GET", "/boom")).await;
        assert_eq!(res.status, 500);
        assert_eq!(res.body, "Panic: kaboom");
    }
}
