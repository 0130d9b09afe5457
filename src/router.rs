//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. The router is the
//! bottom of the middleware chain: [`Endpoint::from`] turns it into the
//! terminal dispatch capability every middleware ultimately delegates to.

use std::collections::HashMap;
use std::sync::Arc;

use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;

use crate::handler::{BoxedHandler, Endpoint, Handler};
use crate::request::Request;
use crate::response::Response;

/// The application router.
///
/// Registration methods take `&mut self` and return `&mut Self` so calls
/// chain:
///
/// ```rust
/// # use weft::{Request, Response, Router};
/// # async fn get_user(_: Request) -> Response { Response::text("") }
/// # async fn create_user(_: Request) -> Response { Response::text("") }
/// let mut router = Router::new();
/// router
///     .get("/users/:id", get_user)
///     .post("/users",    create_user);
/// ```
///
/// Cloning is cheap: handlers are shared, only the trees are copied.
#[derive(Clone)]
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
    redirect_trailing_slash: bool,
}

/// Result of matching a method + path against the registered routes.
pub(crate) enum Lookup {
    Found(BoxedHandler, HashMap<String, String>),
    /// Path matches with the trailing slash added or removed.
    Redirect(String),
    /// Path matches, but only for these methods.
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new(), redirect_trailing_slash: true }
    }

    /// Enables or disables the trailing-slash redirect. On by default.
    pub fn redirect_trailing_slash(&mut self, enabled: bool) -> &mut Self {
        self.redirect_trailing_slash = enabled;
        self
    }

    /// Registers a handler for a method + pattern pair.
    ///
    /// Patterns accept `:name` for a single segment and `*name` for the rest
    /// of the path (last segment only). The `{name}` / `{*name}` forms work
    /// too.
    ///
    /// A catch-all captures the remainder without its leading slash and
    /// must be non-empty: `/files/*path` gives `path = "css/app.css"` for
    /// `/files/css/app.css` and does not match `/files/` at all. Register
    /// `/files/` separately if the bare prefix should be served.
    ///
    /// # Panics
    ///
    /// Panics if the pattern is malformed or conflicts with an existing
    /// route. Routes are registered at startup, so this is a programming
    /// error, not a runtime condition.
    pub fn handle(&mut self, method: Method, pattern: &str, handler: impl Handler) -> &mut Self {
        let path = normalize_pattern(pattern);
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{pattern}`: {e}"));
        self
    }

    pub fn get(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.handle(Method::GET, pattern, handler)
    }

    pub fn post(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.handle(Method::POST, pattern, handler)
    }

    pub fn put(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.handle(Method::PUT, pattern, handler)
    }

    pub fn patch(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.handle(Method::PATCH, pattern, handler)
    }

    pub fn delete(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.handle(Method::DELETE, pattern, handler)
    }

    pub fn options(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.handle(Method::OPTIONS, pattern, handler)
    }

    pub fn head(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.handle(Method::HEAD, pattern, handler)
    }

    pub(crate) fn lookup(&self, method: &Method, path: &str) -> Lookup {
        if let Some(tree) = self.routes.get(method) {
            if let Ok(matched) = tree.at(path) {
                let handler = Arc::clone(matched.value);
                let params = matched.params.iter()
                    .map(|(k, v)| (k.to_owned(), v.to_owned()))
                    .collect();
                return Lookup::Found(handler, params);
            }

            if self.redirect_trailing_slash && *method != Method::CONNECT && path != "/" {
                let alternate = match path.strip_suffix('/') {
                    Some(trimmed) => trimmed.to_owned(),
                    None => format!("{path}/"),
                };
                if tree.at(&alternate).is_ok() {
                    return Lookup::Redirect(alternate);
                }
            }
        }

        let mut allowed: Vec<Method> = self.routes.iter()
            .filter(|(m, tree)| *m != method && tree.at(path).is_ok())
            .map(|(m, _)| m.clone())
            .collect();
        if allowed.is_empty() {
            return Lookup::NotFound;
        }
        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Lookup::MethodNotAllowed(allowed)
    }

    /// Routes one request to its handler, or answers with 301/308, 405 or 404.
    pub async fn dispatch(&self, mut req: Request) -> Response {
        match self.lookup(&req.method, &req.path) {
            Lookup::Found(handler, params) => {
                req.params = params;
                handler.call(req).await
            }
            Lookup::Redirect(mut location) => {
                if let Some(query) = req.query() {
                    location.push('?');
                    location.push_str(query);
                }
                let status = if req.method == Method::GET {
                    StatusCode::MOVED_PERMANENTLY
                } else {
                    StatusCode::PERMANENT_REDIRECT
                };
                Response::builder()
                    .status(status)
                    .header("location", &location)
                    .no_body()
            }
            Lookup::MethodNotAllowed(allowed) => {
                let allow = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
                Response::builder()
                    .status(StatusCode::METHOD_NOT_ALLOWED)
                    .header("allow", &allow)
                    .no_body()
            }
            Lookup::NotFound => Response::status(StatusCode::NOT_FOUND),
        }
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

impl From<Router> for Endpoint {
    fn from(router: Router) -> Self {
        let router = Arc::new(router);
        Endpoint::new(move |req: Request| {
            let router = Arc::clone(&router);
            async move { router.dispatch(req).await }
        })
    }
}

/// Rewrites `:name` and `*name` segments into matchit's `{name}` / `{*name}`.
fn normalize_pattern(pattern: &str) -> String {
    pattern.split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*') {
                format!("{{*{name}}}")
            } else {
                segment.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
