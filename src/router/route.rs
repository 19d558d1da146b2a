use crate::handler::BoxedHandler;
use crate::http::Method;
use crate::router::path::{
    canonical_path, group_path, normalize_path, remove_escape_chars, ParamSlots, RouteOptions,
    RoutePattern, MAX_PARAMS,
};
use serde::Serialize;
use std::fmt;

/// Metadata for one registered handler chain.
///
/// Routes are immutable once the tree is built; mounting and prefixing
/// always work on copies.
#[derive(Clone, Serialize)]
pub struct Route {
    #[serde(skip)]
    pub(crate) position: u32,
    #[serde(skip)]
    pub(crate) middleware: bool,
    #[serde(skip)]
    pub(crate) wildcard: bool,
    #[serde(skip)]
    pub(crate) root: bool,
    #[serde(skip)]
    pub(crate) normalized_path: String,
    #[serde(skip)]
    pub(crate) pattern: RoutePattern,

    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) params: Vec<String>,
    #[serde(skip)]
    pub(crate) handlers: Vec<BoxedHandler>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("params", &self.params)
            .field("position", &self.position)
            .field("middleware", &self.middleware)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl Route {
    /// Normalizes and compiles `raw` into a route that is not yet placed in
    /// any stack (method and position are assigned on insertion).
    pub(crate) fn compile(
        raw: &str,
        handlers: Vec<BoxedHandler>,
        middleware: bool,
        options: RouteOptions,
    ) -> Route {
        let path = canonical_path(raw);
        let mut route = Route {
            position: 0,
            middleware,
            wildcard: false,
            root: false,
            normalized_path: String::new(),
            pattern: RoutePattern::default(),
            method: Method::GET,
            path,
            params: Vec::new(),
            handlers,
        };
        route.recompile(options);
        route
    }

    /// Copy of this route with `prefix` prepended and everything derived
    /// from the path recomputed.
    pub(crate) fn with_prefix(&self, prefix: &str, options: RouteOptions) -> Route {
        let mut route = self.clone();
        route.path = group_path(prefix, &self.path);
        route.recompile(options);
        route
    }

    fn recompile(&mut self, options: RouteOptions) {
        let pretty = normalize_path(&self.path, options);
        let params = RoutePattern::parse(&self.path).params().to_vec();
        if params.len() > MAX_PARAMS {
            panic!(
                "route {} declares {} parameters, the maximum is {}",
                self.path,
                params.len(),
                MAX_PARAMS
            );
        }
        self.wildcard = pretty == "/*";
        self.root = pretty == "/";
        self.normalized_path = remove_escape_chars(&pretty);
        self.pattern = RoutePattern::parse(&pretty);
        self.params = params;
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// The path exactly as registered (after prefixing).
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn normalized_path(&self) -> &str {
        &self.normalized_path
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn is_middleware(&self) -> bool {
        self.middleware
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn pattern(&self) -> &RoutePattern {
        &self.pattern
    }

    pub(crate) fn tree_key(&self) -> &str {
        self.pattern.tree_key()
    }

    /// Decides whether this route serves `detection_path`, writing captured
    /// ranges (relative to `path`) into `slots`.
    pub fn matches(&self, detection_path: &str, path: &str, slots: &mut ParamSlots) -> bool {
        if self.root && detection_path == "/" {
            return true;
        }
        if self.wildcard {
            slots[0] = if path.len() > 1 { (1, path.len()) } else { (0, 0) };
            return true;
        }
        if !self.params.is_empty()
            && self.pattern.captures(detection_path, slots, self.middleware)
        {
            return true;
        }
        if self.middleware {
            return self.root || detection_path.starts_with(self.normalized_path.as_str());
        }
        self.normalized_path.len() == detection_path.len() && self.normalized_path == detection_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::path::EMPTY_SLOTS;

    fn route(path: &str, middleware: bool) -> Route {
        let noop = crate::handler::handler(|_| Ok(()));
        Route::compile(path, vec![noop], middleware, RouteOptions::default())
    }

    fn matches(route: &Route, path: &str) -> bool {
        let detection = normalize_path(path, RouteOptions::default());
        route.matches(&detection, path, &mut EMPTY_SLOTS.clone())
    }

    #[test]
    fn flags_follow_normalized_path() {
        assert!(route("", false).is_root());
        assert!(route("/*", false).is_wildcard());
        assert!(route("/API/", true).is_middleware());
        assert_eq!(route("/API/", true).normalized_path(), "/api");
        assert_eq!(route("/API/", true).path(), "/API/");
    }

    #[test]
    fn params_keep_original_case() {
        assert_eq!(route("/users/:userId", false).params(), ["userId"]);
    }

    #[test]
    fn exact_routes_need_identical_paths() {
        let r = route("/users", false);
        assert!(matches(&r, "/users"));
        assert!(matches(&r, "/USERS/"));
        assert!(!matches(&r, "/users/1"));
        assert!(!matches(&r, "/user"));
    }

    #[test]
    fn middleware_matches_byte_prefix() {
        let r = route("/api", true);
        assert!(matches(&r, "/api"));
        assert!(matches(&r, "/api/users"));
        assert!(matches(&r, "/apiv2"));
        assert!(!matches(&r, "/ap"));
        assert!(!matches(&r, "/v1/api"));
    }

    #[test]
    fn root_route_matches_only_root() {
        let exact = route("/", false);
        assert!(matches(&exact, "/"));
        assert!(!matches(&exact, "/x"));
    }

    #[test]
    fn root_middleware_matches_every_path() {
        let mw = route("/", true);
        assert!(matches(&mw, "/"));
        assert!(matches(&mw, "/anything"));
    }

    #[test]
    fn wildcard_captures_remainder() {
        let r = route("/*", false);
        let mut slots = EMPTY_SLOTS;
        assert!(r.matches("/x/y", "/x/y", &mut slots));
        assert_eq!(&"/x/y"[slots[0].0..slots[0].1], "x/y");
        assert!(r.matches("/", "/", &mut slots));
        assert_eq!(slots[0], (0, 0));
    }

    #[test]
    fn parameterized_middleware_matches_structurally() {
        let r = route("/tenants/:id", true);
        let mut slots = EMPTY_SLOTS;
        assert!(r.matches("/tenants/7/users", "/tenants/7/users", &mut slots));
        assert_eq!(slots[0], (9, 10));
        assert!(!matches(&r, "/other/7"));
    }

    #[test]
    fn prefixing_recomputes_flags() {
        let r = route("/", false).with_prefix("/v1", RouteOptions::default());
        assert_eq!(r.path(), "/v1/");
        assert_eq!(r.normalized_path(), "/v1");
        assert!(!r.is_root());

        let star = route("/*", false).with_prefix("/files", RouteOptions::default());
        assert!(!star.is_wildcard());
        assert_eq!(star.params(), ["*1"]);
        assert!(matches(&star, "/files/a/b"));
    }

    #[test]
    fn prefix_params_are_recompiled() {
        let r = route("/users", false).with_prefix("/:tenant", RouteOptions::default());
        assert_eq!(r.params(), ["tenant"]);
        assert!(matches(&r, "/acme/users"));
    }

    #[test]
    #[should_panic(expected = "maximum")]
    fn too_many_params_panics() {
        let path: String = (0..31).map(|i| format!("/:p{}", i)).collect();
        route(&path, false);
    }
}
