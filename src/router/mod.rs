pub mod path;
pub mod route;
pub mod tree;

use crate::ctx::Ctx;
use crate::error::ServerResult;
use crate::handler::{handler, BoxedHandler};
use crate::http::{Method, METHOD_USE};
use path::{group_path, RouteOptions};
use route::Route;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;
use tree::TreeIndex;

/// Registration surface shared by [`Router`], [`Group`] and the application.
pub trait Routable {
    /// Registers `handlers` for `method` (or [`METHOD_USE`]) at `path`.
    ///
    /// # Panics
    /// On an unknown method, an empty handler list, or a path with more
    /// parameters than [`path::MAX_PARAMS`].
    fn add(&mut self, method: &str, path: &str, handlers: Vec<BoxedHandler>) -> &mut Self;

    /// Registers a GET route; HEAD is registered alongside it.
    fn get<F>(&mut self, path: &str, f: F) -> &mut Self
    where
        F: Fn(&mut Ctx) -> ServerResult<()> + Send + Sync + 'static,
        Self: Sized,
    {
        let h = handler(f);
        self.add("HEAD", path, vec![h.clone()]).add("GET", path, vec![h])
    }

    fn head<F>(&mut self, path: &str, f: F) -> &mut Self
    where
        F: Fn(&mut Ctx) -> ServerResult<()> + Send + Sync + 'static,
        Self: Sized,
    {
        self.add("HEAD", path, vec![handler(f)])
    }

    fn post<F>(&mut self, path: &str, f: F) -> &mut Self
    where
        F: Fn(&mut Ctx) -> ServerResult<()> + Send + Sync + 'static,
        Self: Sized,
    {
        self.add("POST", path, vec![handler(f)])
    }

    fn put<F>(&mut self, path: &str, f: F) -> &mut Self
    where
        F: Fn(&mut Ctx) -> ServerResult<()> + Send + Sync + 'static,
        Self: Sized,
    {
        self.add("PUT", path, vec![handler(f)])
    }

    fn patch<F>(&mut self, path: &str, f: F) -> &mut Self
    where
        F: Fn(&mut Ctx) -> ServerResult<()> + Send + Sync + 'static,
        Self: Sized,
    {
        self.add("PATCH", path, vec![handler(f)])
    }

    fn delete<F>(&mut self, path: &str, f: F) -> &mut Self
    where
        F: Fn(&mut Ctx) -> ServerResult<()> + Send + Sync + 'static,
        Self: Sized,
    {
        self.add("DELETE", path, vec![handler(f)])
    }

    fn connect<F>(&mut self, path: &str, f: F) -> &mut Self
    where
        F: Fn(&mut Ctx) -> ServerResult<()> + Send + Sync + 'static,
        Self: Sized,
    {
        self.add("CONNECT", path, vec![handler(f)])
    }

    fn options<F>(&mut self, path: &str, f: F) -> &mut Self
    where
        F: Fn(&mut Ctx) -> ServerResult<()> + Send + Sync + 'static,
        Self: Sized,
    {
        self.add("OPTIONS", path, vec![handler(f)])
    }

    fn trace<F>(&mut self, path: &str, f: F) -> &mut Self
    where
        F: Fn(&mut Ctx) -> ServerResult<()> + Send + Sync + 'static,
        Self: Sized,
    {
        self.add("TRACE", path, vec![handler(f)])
    }

    /// Registers an exact route for every method.
    fn all<F>(&mut self, path: &str, f: F) -> &mut Self
    where
        F: Fn(&mut Ctx) -> ServerResult<()> + Send + Sync + 'static,
        Self: Sized,
    {
        let h = handler(f);
        for method in Method::ALL {
            self.add(method.as_str(), path, vec![h.clone()]);
        }
        self
    }

    /// Registers a prefix-matching middleware for every method.
    fn middleware<F>(&mut self, path: &str, f: F) -> &mut Self
    where
        F: Fn(&mut Ctx) -> ServerResult<()> + Send + Sync + 'static,
        Self: Sized,
    {
        self.add(METHOD_USE, path, vec![handler(f)])
    }

    fn use_handlers(&mut self, path: &str, handlers: Vec<BoxedHandler>) -> &mut Self
    where
        Self: Sized,
    {
        self.add(METHOD_USE, path, handlers)
    }
}

/// A router contributed to another router under a prefix.
struct Attachment {
    prefix: String,
    router: Router,
    composed: bool,
}

fn attach(list: &mut Vec<Attachment>, prefix: String, router: Router) {
    match list.iter_mut().find(|a| a.prefix == prefix) {
        Some(existing) => {
            existing.router = router;
            existing.composed = false;
        }
        None => list.push(Attachment {
            prefix,
            router,
            composed: false,
        }),
    }
}

fn trim_prefix(prefix: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        "/".to_owned()
    } else {
        prefix.to_owned()
    }
}

/// The route registry.
///
/// Routes are kept per method in registration order. Mounted and attached
/// routers are copied in when the tree is built; the registry is otherwise
/// append-only.
pub struct Router {
    options: RouteOptions,
    stack: Vec<Vec<Route>>,
    mount_path: String,
    mounts: Vec<Attachment>,
    routers: Vec<Attachment>,
    routes_count: AtomicU32,
    handlers_count: AtomicU32,
    routes_refreshed: bool,
}

impl Default for Router {
    fn default() -> Self {
        Router::with_options(RouteOptions::default())
    }
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: RouteOptions) -> Self {
        Self {
            options,
            stack: (0..Method::COUNT).map(|_| Vec::new()).collect(),
            mount_path: String::new(),
            mounts: Vec::new(),
            routers: Vec::new(),
            routes_count: AtomicU32::new(0),
            handlers_count: AtomicU32::new(0),
            routes_refreshed: false,
        }
    }

    pub fn route_options(&self) -> RouteOptions {
        self.options
    }

    /// Full path this router is mounted at, empty for a top-level router.
    pub fn mount_path(&self) -> &str {
        &self.mount_path
    }

    pub fn routes_count(&self) -> u32 {
        self.routes_count.load(Ordering::Relaxed)
    }

    pub fn handlers_count(&self) -> u32 {
        self.handlers_count.load(Ordering::Relaxed)
    }

    pub fn is_dirty(&self) -> bool {
        self.routes_refreshed
    }

    /// Registered routes for `method`, in registration order.
    pub fn routes(&self, method: Method) -> &[Route] {
        &self.stack[method.index()]
    }

    pub fn stack(&self) -> &[Vec<Route>] {
        &self.stack
    }

    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        Group {
            router: self,
            prefix: prefix.to_owned(),
        }
    }

    pub(crate) fn register(&mut self, method: &str, path: &str, handlers: Vec<BoxedHandler>) {
        let method = method.to_uppercase();
        let is_use = method == METHOD_USE;
        let concrete = method.parse::<Method>().ok();
        if !is_use && concrete.is_none() {
            panic!("add: invalid http method {}", method);
        }
        if handlers.is_empty() {
            panic!("missing handler in route: {}", path);
        }

        let route = Route::compile(path, handlers, is_use, self.options);
        self.handlers_count
            .fetch_add(route.handlers.len() as u32, Ordering::Relaxed);

        match concrete {
            Some(method) if !is_use => self.add_route(method, route),
            _ => {
                for method in Method::ALL {
                    self.add_route(method, route.clone());
                }
            }
        }
    }

    /// Appends to the method's stack, merging into the previous route when
    /// it has the same registered path and kind.
    fn add_route(&mut self, method: Method, mut route: Route) {
        let stack = &mut self.stack[method.index()];
        if let Some(previous) = stack.last_mut() {
            if previous.path == route.path && previous.middleware == route.middleware {
                previous.handlers.extend(route.handlers);
                self.routes_refreshed = true;
                return;
            }
        }
        route.position = self.routes_count.fetch_add(1, Ordering::Relaxed) + 1;
        route.method = method;
        stack.push(route);
        self.routes_refreshed = true;
    }

    /// Attaches `sub` under `prefix`. Its routes become reachable after the
    /// next build; mounting again at the same prefix replaces it.
    pub fn mount(&mut self, prefix: &str, mut sub: Router) -> &mut Self {
        let prefix = trim_prefix(prefix);
        sub.set_mount_path(join_mount_path(&self.mount_path, &prefix));
        self.handlers_count
            .fetch_add(sub.handlers_count(), Ordering::Relaxed);
        debug!(prefix = %prefix, mount_path = %sub.mount_path, "mounted sub-router");
        attach(&mut self.mounts, prefix, sub);
        self
    }

    /// Merges `router`'s routes under `prefix` at the next build without
    /// keeping a parent relationship.
    pub fn register_router(&mut self, prefix: &str, router: Router) -> &mut Self {
        attach(&mut self.routers, trim_prefix(prefix), router);
        self
    }

    fn set_mount_path(&mut self, mount_path: String) {
        for mount in &mut self.mounts {
            mount.router
                .set_mount_path(join_mount_path(&mount_path, &mount.prefix));
        }
        self.mount_path = mount_path;
    }

    /// This router's routes followed by copies of everything mounted or
    /// attached below it, prefixed relative to this router.
    fn flattened(&self) -> Vec<Route> {
        let mut routes: Vec<Route> = self.stack.iter().flatten().cloned().collect();
        for attachment in self.mounts.iter().chain(&self.routers) {
            for route in attachment.router.flattened() {
                routes.push(route.with_prefix(&attachment.prefix, self.options));
            }
        }
        routes
    }

    /// Copies routes of not-yet-composed mounts and attached routers into
    /// this registry.
    fn compose(&mut self) {
        let options = self.options;
        let mut pending = Vec::new();
        for mount in self.mounts.iter_mut().filter(|m| !m.composed) {
            mount.composed = true;
            for route in mount.router.flattened() {
                pending.push(route.with_prefix(&mount.prefix, options));
            }
        }
        for attached in self.routers.iter_mut().filter(|r| !r.composed) {
            attached.composed = true;
            for route in attached.router.flattened() {
                self.handlers_count
                    .fetch_add(route.handlers.len() as u32, Ordering::Relaxed);
                pending.push(route.with_prefix(&attached.prefix, options));
            }
        }
        for route in pending {
            self.add_route(route.method, route);
        }
    }

    /// Composes sub-routers and, when the registry changed since the last
    /// build, returns a fresh index.
    pub(crate) fn build_tree(&mut self) -> Option<TreeIndex> {
        self.compose();
        if !self.routes_refreshed {
            return None;
        }
        let tree = TreeIndex::build(&self.stack);
        self.routes_refreshed = false;
        debug!(routes = self.routes_count(), handlers = self.handlers_count(), "route tree rebuilt");
        Some(tree)
    }
}

fn join_mount_path(parent: &str, prefix: &str) -> String {
    if parent.is_empty() {
        return prefix.to_owned();
    }
    trim_prefix(&group_path(parent, prefix))
}

impl Routable for Router {
    fn add(&mut self, method: &str, path: &str, handlers: Vec<BoxedHandler>) -> &mut Self {
        self.register(method, path, handlers);
        self
    }
}

/// A prefix view over a router.
pub struct Group<'r> {
    router: &'r mut Router,
    prefix: String,
}

impl<'r> Group<'r> {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        Group {
            prefix: group_path(&self.prefix, prefix),
            router: &mut *self.router,
        }
    }
}

impl Routable for Group<'_> {
    fn add(&mut self, method: &str, path: &str, handlers: Vec<BoxedHandler>) -> &mut Self {
        let full = group_path(&self.prefix, path);
        self.router.register(method, &full, handlers);
        self
    }
}
