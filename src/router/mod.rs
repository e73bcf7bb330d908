//! Request routing — map URL rules and HTTP methods to handler functions,
//! with a plugin hook that wraps handlers at registration time.
//!
//! Three rule styles are supported:
//!
//! | Rule                 | Example match              | Captured params                 |
//! |----------------------|----------------------------|---------------------------------|
//! | `/users`             | `/users`                   | *(none)*                        |
//! | `/users/:id`         | `/users/42`                | `id → "42"`                     |
//! | `/files/*`           | `/files/docs/readme.txt`   | `wildcard → "/docs/readme.txt"` |
//!
//! Trailing slashes are normalized on both rules and incoming paths. Routes
//! are matched in registration order; the first route whose method and rule
//! both match wins.
//!
//! Registration returns a [`RouteBuilder`] so a route can carry a name and a
//! per-route config map — the surface plugins (notably the cache decorator)
//! introspect. Installed [`Plugin`]s wrap each route's handler exactly once,
//! on first dispatch, in reverse installation order (first installed ends up
//! outermost).

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use crate::context::{Context, PathParams};
use crate::plugin::{Plugin, PluginError};
use crate::{Method, Request, Response, StatusCode};

/// Type-erased, heap-allocated async handler that processes a [`Context`]
/// and returns a [`Response`].
///
/// Handlers are stored behind `Arc<dyn Fn(…)>` so plugins can cheaply wrap
/// and share them across threads. You never construct this type directly —
/// use [`Router::get`], [`Router::post`], and the other method-specific
/// helpers.
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this automatically.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given context, boxing the returned future.
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

// A single path segment, either a literal string or a named capture (`:name`).
#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Parameter(String),
}

// Compiled representation of a route rule string.
#[derive(Debug, Clone)]
enum Pattern {
    // Matches one exact path string, e.g. `/users`.
    Exact(String),
    // Matches a fixed number of segments where some may be named captures, e.g. `/users/:id`.
    Parameterized { segments: Vec<Segment> },
    // Matches any path that starts with the given prefix, e.g. `/files/*`.
    Wildcard(String),
}

/// Name under which a trailing `/*` capture is stored in [`PathParams`].
const WILDCARD_PARAM: &str = "wildcard";

impl Pattern {
    /// Parse a rule string into a `Pattern`.
    ///
    /// Classified in order: ends with `/*` → `Wildcard`; contains `:` →
    /// `Parameterized`; otherwise `Exact`. A trailing slash (other than on
    /// the root `/`) is stripped first so `/users/` and `/users` compile to
    /// identical patterns.
    fn parse(rule: &str) -> Self {
        let rule = if rule != "/" && rule.ends_with('/') {
            &rule[..rule.len() - 1]
        } else {
            rule
        };

        if let Some(prefix) = rule.strip_suffix("/*") {
            return Pattern::Wildcard(prefix.to_string());
        }

        if rule.contains(':') {
            let segments = rule
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| {
                    if let Some(p) = s.strip_prefix(':') {
                        Segment::Parameter(p.to_string())
                    } else {
                        Segment::Static(s.to_string())
                    }
                })
                .collect();

            return Pattern::Parameterized { segments };
        }

        Pattern::Exact(rule.to_string())
    }

    // Try to match `path` against this pattern, returning extracted [`PathParams`] on success.
    fn matches(&self, path: &str) -> Option<PathParams> {
        let path = if path != "/" && path.ends_with('/') {
            &path[..path.len() - 1]
        } else {
            path
        };

        match self {
            Pattern::Exact(p) => {
                if p == path {
                    Some(PathParams::new())
                } else {
                    None
                }
            }
            Pattern::Parameterized { segments } => {
                let mut params = PathParams::new();
                let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

                if segments.len() != path_segments.len() {
                    return None;
                }

                for (seg, path_seg) in segments.iter().zip(path_segments) {
                    match seg {
                        Segment::Static(s) => {
                            if s != path_seg {
                                return None;
                            }
                        }
                        Segment::Parameter(name) => {
                            params.insert(name.clone(), path_seg.to_string());
                        }
                    }
                }

                Some(params)
            }
            Pattern::Wildcard(prefix) => {
                if let Some(suffix) = path.strip_prefix(prefix) {
                    let mut params = PathParams::new();
                    params.insert(WILDCARD_PARAM.to_string(), suffix.to_string());
                    Some(params)
                } else {
                    None
                }
            }
        }
    }

    // Names of the captures this pattern can produce, in rule order.
    fn param_names(&self) -> Vec<String> {
        match self {
            Pattern::Exact(_) => Vec::new(),
            Pattern::Parameterized { segments } => segments
                .iter()
                .filter_map(|seg| match seg {
                    Segment::Parameter(name) => Some(name.clone()),
                    Segment::Static(_) => None,
                })
                .collect(),
            Pattern::Wildcard(_) => vec![WILDCARD_PARAM.to_string()],
        }
    }

    // Rebuild a URL from this pattern, consuming matching entries from
    // `params`. Captures without a supplied value keep their `:name` form.
    fn build(&self, params: &mut BTreeMap<String, String>) -> String {
        match self {
            Pattern::Exact(p) => p.clone(),
            Pattern::Parameterized { segments } => {
                let mut url = String::new();
                for seg in segments {
                    url.push('/');
                    match seg {
                        Segment::Static(s) => url.push_str(s),
                        Segment::Parameter(name) => match params.remove(name) {
                            Some(value) => url.push_str(&value),
                            None => {
                                url.push(':');
                                url.push_str(name);
                            }
                        },
                    }
                }
                url
            }
            Pattern::Wildcard(prefix) => {
                let suffix = params.remove(WILDCARD_PARAM).unwrap_or_default();
                format!("{prefix}{suffix}")
            }
        }
    }
}

/// Per-route configuration map, the surface plugins read their per-route
/// settings from (expire time, compression level, store opt-in).
#[derive(Debug, Clone, Default)]
pub struct RouteConfig {
    map: HashMap<String, String>,
}

impl RouteConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a config entry, replacing any previous value for `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.map.insert(key.into(), value.into());
    }

    /// Get a config value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// Returns `true` if `key` is declared, regardless of its value.
    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Get a config value parsed into `T`. `None` when the key is absent or
    /// the value does not parse.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key)?.parse().ok()
    }
}

/// Immutable snapshot of a registered route, handed to plugins at apply
/// time: the raw rule, the optional assigned name, and the config map.
#[derive(Clone)]
pub struct RouteInfo {
    rule: String,
    name: Option<String>,
    config: RouteConfig,
    pattern: Pattern,
}

impl RouteInfo {
    /// The raw rule string the route was registered with.
    pub fn rule(&self) -> &str {
        &self.rule
    }

    /// The human-assigned route name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The per-route config map.
    pub fn config(&self) -> &RouteConfig {
        &self.config
    }

    /// Names of the wildcards the rule declares, in rule order.
    pub fn param_names(&self) -> Vec<String> {
        self.pattern.param_names()
    }

    /// Reconstruct a URL for this route.
    ///
    /// Wildcard values are substituted into the rule in place; leftover
    /// entries are appended as a query string in sorted key order so the
    /// same parameter set always yields the same URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::BTreeMap;
    /// use routecache::{Response, Router, StatusCode};
    ///
    /// let mut router = Router::new();
    /// router.get("/users/:id", |_ctx| async { Response::new(StatusCode::Ok) });
    ///
    /// let info = router.route_info("/users/:id").unwrap();
    /// let mut params = BTreeMap::new();
    /// params.insert("id".to_owned(), "42".to_owned());
    /// params.insert("page".to_owned(), "2".to_owned());
    /// assert_eq!(info.url_for(&params), "/users/42?page=2");
    /// ```
    pub fn url_for(&self, params: &BTreeMap<String, String>) -> String {
        let mut params = params.clone();
        let mut url = self.pattern.build(&mut params);

        if !params.is_empty() {
            let query = params
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            url.push('?');
            url.push_str(&query);
        }

        url
    }
}

// A single registered route binding a method + rule to a handler, plus the
// metadata plugins introspect.
struct Route {
    method: Method,
    rule: String,
    pattern: Pattern,
    name: Option<String>,
    config: RouteConfig,
    handler: Handler,
    // Handler with all plugins applied, built once on first dispatch.
    prepared: OnceLock<Handler>,
}

impl Route {
    fn new(method: Method, rule: &str, handler: Handler) -> Self {
        Self {
            method,
            rule: rule.to_owned(),
            pattern: Pattern::parse(rule),
            name: None,
            config: RouteConfig::new(),
            handler,
            prepared: OnceLock::new(),
        }
    }

    // Returns `Some(params)` when both the HTTP method and rule match, `None` otherwise.
    fn matches(&self, method: &Method, path: &str) -> Option<PathParams> {
        if &self.method == method {
            self.pattern.matches(path)
        } else {
            None
        }
    }

    fn info(&self) -> RouteInfo {
        RouteInfo {
            rule: self.rule.clone(),
            name: self.name.clone(),
            config: self.config.clone(),
            pattern: self.pattern.clone(),
        }
    }

    // The plugin-wrapped handler. Plugins run `apply` exactly once per
    // route, in reverse installation order (first installed outermost).
    fn prepared(&self, plugins: &[Arc<dyn Plugin>]) -> Handler {
        self.prepared
            .get_or_init(|| {
                let info = self.info();
                let mut handler = self.handler.clone();
                for plugin in plugins.iter().rev() {
                    handler = plugin.apply(handler, &info);
                }
                handler
            })
            .clone()
    }
}

/// Builder returned by route registration for attaching a name and config
/// entries to the route just added.
///
/// # Examples
///
/// ```
/// use routecache::{Response, Router, StatusCode};
///
/// let mut router = Router::new();
/// router
///     .get("/articles/:slug", |_ctx| async { Response::new(StatusCode::Ok) })
///     .name("article")
///     .config("store", "")
///     .config("cache_expire", "3600");
/// ```
pub struct RouteBuilder<'a> {
    route: &'a mut Route,
}

impl RouteBuilder<'_> {
    /// Assign a human-readable name to the route. Named routes use the name
    /// (rather than the rule) as the default cache key.
    pub fn name(self, name: impl Into<String>) -> Self {
        self.route.name = Some(name.into());
        self
    }

    /// Set one per-route config entry.
    pub fn config(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.route.config.set(key, value);
        self
    }
}

/// HTTP request router that dispatches requests to registered handlers and
/// hosts the plugin chain.
///
/// Routes are evaluated in registration order; the first route whose method
/// and rule both match wins. When no route matches, `404 Not Found` is
/// returned automatically.
///
/// # Examples
///
/// ```rust,no_run
/// use routecache::{Response, Router, StatusCode};
///
/// let mut router = Router::new();
///
/// router.get("/ping", |_ctx| async { Response::new(StatusCode::Ok) });
///
/// router.get("/users/:id", |ctx: routecache::Context| async move {
///     let id = ctx.params().get("id").unwrap_or("unknown").to_owned();
///     Response::new(StatusCode::Ok).body(id)
/// });
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl Router {
    /// Create a new, empty `Router` with no routes and no plugins.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a plugin.
    ///
    /// Runs the plugin's `setup` against the plugins already installed, so
    /// configuration conflicts are rejected here and never reach dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Conflict`] when the plugin's keywords collide
    /// with an already-installed plugin.
    pub fn install<P: Plugin>(&mut self, plugin: P) -> Result<(), PluginError> {
        plugin.setup(self)?;
        self.plugins.push(Arc::new(plugin));
        Ok(())
    }

    /// The plugins installed so far, in installation order.
    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    /// Register a handler for `GET` requests matching `rule`.
    pub fn get(&mut self, rule: &str, handler: impl IntoHandler) -> RouteBuilder<'_> {
        self.add_route(Method::Get, rule, handler)
    }

    /// Register a handler for `POST` requests matching `rule`.
    pub fn post(&mut self, rule: &str, handler: impl IntoHandler) -> RouteBuilder<'_> {
        self.add_route(Method::Post, rule, handler)
    }

    /// Register a handler for `PUT` requests matching `rule`.
    pub fn put(&mut self, rule: &str, handler: impl IntoHandler) -> RouteBuilder<'_> {
        self.add_route(Method::Put, rule, handler)
    }

    /// Register a handler for `DELETE` requests matching `rule`.
    pub fn delete(&mut self, rule: &str, handler: impl IntoHandler) -> RouteBuilder<'_> {
        self.add_route(Method::Delete, rule, handler)
    }

    /// Register a handler for `PATCH` requests matching `rule`.
    pub fn patch(&mut self, rule: &str, handler: impl IntoHandler) -> RouteBuilder<'_> {
        self.add_route(Method::Patch, rule, handler)
    }

    /// Register a handler for `OPTIONS` requests matching `rule`.
    pub fn options(&mut self, rule: &str, handler: impl IntoHandler) -> RouteBuilder<'_> {
        self.add_route(Method::Options, rule, handler)
    }

    // Erase the concrete handler type and store the new route.
    fn add_route(&mut self, method: Method, rule: &str, handler: impl IntoHandler) -> RouteBuilder<'_> {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route::new(method, rule, handler));
        RouteBuilder {
            route: self.routes.last_mut().expect("route just pushed"),
        }
    }

    /// Return the number of routes registered in this router.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Return `true` if no routes have been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Snapshot of the first registered route with the given rule, if any.
    /// This is the introspection surface plugins receive at apply time.
    pub fn route_info(&self, rule: &str) -> Option<RouteInfo> {
        self.routes
            .iter()
            .find(|route| route.rule == rule)
            .map(Route::info)
    }

    /// Dispatch `request` to the first matching route and return its response.
    ///
    /// The matched route's handler is wrapped by the installed plugins on
    /// first dispatch and memoized; subsequent dispatches reuse the wrapped
    /// handler. If no route matches, `404 Not Found` is returned.
    pub async fn route(&self, request: Request) -> Response {
        let path = request.path();

        for route in &self.routes {
            if let Some(params) = route.matches(request.method(), path) {
                let handler = route.prepared(&self.plugins);
                let ctx = Context::with_params(request, params);
                return handler(ctx).await;
            }
        }

        Response::new(StatusCode::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn make_request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        req
    }

    // ── Pattern ───────────────────────────────────────────────────────────────

    #[test]
    fn pattern_parse_classification() {
        assert!(matches!(Pattern::parse("/"), Pattern::Exact(s) if s == "/"));
        assert!(matches!(Pattern::parse("/users"), Pattern::Exact(s) if s == "/users"));
        assert!(matches!(Pattern::parse("/users/"), Pattern::Exact(s) if s == "/users"));
        assert!(matches!(
            Pattern::parse("/users/:id"),
            Pattern::Parameterized { .. }
        ));
        assert!(matches!(
            Pattern::parse("/files/*"),
            Pattern::Wildcard(s) if s == "/files"
        ));
    }

    #[test]
    fn pattern_param_extracts_values() {
        let pat = Pattern::parse("/users/:id/posts/:post_id");
        let params = pat.matches("/users/7/posts/99").unwrap();
        assert_eq!(params.get("id"), Some("7"));
        assert_eq!(params.get("post_id"), Some("99"));
    }

    #[test]
    fn pattern_param_rejects_mismatches() {
        let pat = Pattern::parse("/users/:id");
        assert!(pat.matches("/users").is_none());
        assert!(pat.matches("/users/42/extra").is_none());
        assert!(pat.matches("/posts/42").is_none());
    }

    #[test]
    fn pattern_wildcard_captures_suffix() {
        let pat = Pattern::parse("/files/*");
        let params = pat.matches("/files/docs/readme.txt").unwrap();
        assert_eq!(params.get("wildcard"), Some("/docs/readme.txt"));
        assert!(pat.matches("/other/readme.txt").is_none());
    }

    #[test]
    fn pattern_param_names() {
        assert!(Pattern::parse("/users").param_names().is_empty());
        assert_eq!(
            Pattern::parse("/users/:id/posts/:post_id").param_names(),
            vec!["id".to_owned(), "post_id".to_owned()]
        );
        assert_eq!(
            Pattern::parse("/files/*").param_names(),
            vec!["wildcard".to_owned()]
        );
    }

    // ── RouteInfo::url_for ────────────────────────────────────────────────────

    fn info_for(rule: &str) -> RouteInfo {
        let mut router = Router::new();
        router.get(rule, |_ctx| async { Response::new(StatusCode::Ok) });
        router.route_info(rule).unwrap()
    }

    fn btree(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn url_for_substitutes_wildcards() {
        let info = info_for("/users/:id");
        assert_eq!(info.url_for(&btree(&[("id", "42")])), "/users/42");
    }

    #[test]
    fn url_for_appends_leftovers_sorted() {
        let info = info_for("/search");
        assert_eq!(
            info.url_for(&btree(&[("q", "rust"), ("page", "2")])),
            "/search?page=2&q=rust"
        );
    }

    #[test]
    fn url_for_mixes_wildcards_and_query() {
        let info = info_for("/users/:id");
        assert_eq!(
            info.url_for(&btree(&[("id", "7"), ("range", "bytes=0-")])),
            "/users/7?range=bytes=0-"
        );
    }

    #[test]
    fn url_for_tail_wildcard() {
        let info = info_for("/files/*");
        assert_eq!(
            info.url_for(&btree(&[("wildcard", "/docs/readme.txt")])),
            "/files/docs/readme.txt"
        );
    }

    // ── Registration + dispatch ──────────────────────────────────────────────

    #[test]
    fn builder_sets_name_and_config() {
        let mut router = Router::new();
        router
            .get("/a", |_ctx| async { Response::new(StatusCode::Ok) })
            .name("alpha")
            .config("cache_expire", "60");

        let info = router.route_info("/a").unwrap();
        assert_eq!(info.name(), Some("alpha"));
        assert_eq!(info.config().get_parsed::<u64>("cache_expire"), Some(60));
        assert!(!info.config().contains("store"));
    }

    #[tokio::test]
    async fn dispatches_to_matching_route() {
        let mut router = Router::new();
        router.get("/hello", |_ctx| async { Response::new(StatusCode::Ok) });

        let res = router.route(make_request("GET", "/hello")).await;
        assert_eq!(res.status(), StatusCode::Ok);

        let res = router.route(make_request("POST", "/hello")).await;
        assert_eq!(res.status(), StatusCode::NotFound);

        let res = router.route(make_request("GET", "/world")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn first_matching_route_wins() {
        let mut router = Router::new();
        router.get("/path", |_ctx| async { Response::new(StatusCode::Ok) });
        router.get("/path", |_ctx| async {
            Response::new(StatusCode::Accepted)
        });

        let res = router.route(make_request("GET", "/path")).await;
        assert_eq!(res.status(), StatusCode::Ok);
    }

    #[tokio::test]
    async fn parameterized_route_receives_params() {
        let mut router = Router::new();
        router.get("/users/:id", |ctx: Context| async move {
            let id = ctx.params().get("id").unwrap_or("").to_owned();
            Response::new(StatusCode::Ok).body(id)
        });
        let res = router.route(make_request("GET", "/users/42")).await;
        assert_eq!(res.body_ref(), b"42");
    }

    // ── Plugin application ────────────────────────────────────────────────────

    struct TagPlugin {
        tag: &'static str,
        applies: Arc<AtomicUsize>,
    }

    impl Plugin for TagPlugin {
        fn name(&self) -> &'static str {
            "tag"
        }

        fn apply(&self, handler: Handler, _route: &RouteInfo) -> Handler {
            self.applies.fetch_add(1, Ordering::SeqCst);
            let tag = self.tag;
            Arc::new(move |ctx| {
                let handler = handler.clone();
                Box::pin(async move {
                    let inner = handler(ctx).await;
                    let body = String::from_utf8_lossy(inner.body_ref()).into_owned();
                    Response::new(inner.status()).body(format!("{tag}:{body}"))
                })
            })
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[tokio::test]
    async fn plugins_apply_once_per_route() {
        let applies = Arc::new(AtomicUsize::new(0));
        let mut router = Router::new();
        router
            .install(TagPlugin {
                tag: "t",
                applies: applies.clone(),
            })
            .unwrap();
        router.get("/x", |_ctx| async { Response::new(StatusCode::Ok).body("base") });

        router.route(make_request("GET", "/x")).await;
        router.route(make_request("GET", "/x")).await;
        assert_eq!(applies.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn first_installed_plugin_is_outermost() {
        let applies = Arc::new(AtomicUsize::new(0));
        let mut router = Router::new();
        router
            .install(TagPlugin {
                tag: "outer",
                applies: applies.clone(),
            })
            .unwrap();
        router
            .install(TagPlugin {
                tag: "inner",
                applies: applies.clone(),
            })
            .unwrap();
        router.get("/x", |_ctx| async { Response::new(StatusCode::Ok).body("base") });

        let res = router.route(make_request("GET", "/x")).await;
        assert_eq!(res.body_ref(), b"outer:inner:base");
    }
}
