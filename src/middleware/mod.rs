//! Middleware layer.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns: tracing, request-id injection, authentication,
//! caching.
//!
//! A middleware turns one [`Endpoint`] into another. The wrapped endpoint is
//! conventionally called `next`; the new one may run code before calling it,
//! after it returns, or never call it at all.
//!
//! ```rust
//! use weft::middleware;
//! use weft::{Endpoint, Request, Response};
//! use http::StatusCode;
//!
//! // Closure form: `Fn(Endpoint) -> handler`.
//! let tag = |next: Endpoint| move |req: Request| {
//!     let next = next.clone();
//!     async move {
//!         let mut res = next.call(req).await;
//!         res.set_header("x-served-by", "weft");
//!         res
//!     }
//! };
//!
//! // `from_fn` form: `Fn(Request, Endpoint) -> Future`.
//! let auth = middleware::from_fn(|req: Request, next: Endpoint| async move {
//!     if req.header("authorization").is_none() {
//!         return Response::status(StatusCode::UNAUTHORIZED);
//!     }
//!     next.call(req).await
//! });
//! # let _ = (tag, auth);
//! ```

mod trace;

use std::future::Future;
use std::sync::Arc;

use crate::handler::{Endpoint, Handler};
use crate::request::Request;
use crate::response::IntoResponse;

pub use trace::Trace;

/// Wraps an [`Endpoint`] with additional behaviour.
///
/// Implemented for every `Fn(Endpoint) -> H` where `H` is a route handler,
/// so most middleware is a closure. Implement it by hand for middleware that
/// carries configuration.
pub trait Middleware: Send + Sync + 'static {
    fn wrap(&self, next: Endpoint) -> Endpoint;
}

impl<F, H> Middleware for F
where
    F: Fn(Endpoint) -> H + Send + Sync + 'static,
    H: Handler,
{
    fn wrap(&self, next: Endpoint) -> Endpoint {
        Endpoint::new(self(next))
    }
}

/// A type-erased middleware, as stored by the application.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Composes `middlewares` around `terminal`.
///
/// `middlewares[0]` becomes the outermost layer: it sees the request first
/// and the response last. An empty slice returns `terminal` unchanged.
pub fn chain(terminal: Endpoint, middlewares: &[BoxedMiddleware]) -> Endpoint {
    middlewares.iter()
        .rev()
        .fold(terminal, |next, middleware| middleware.wrap(next))
}

// ── from_fn ───────────────────────────────────────────────────────────────────

/// Builds a middleware from an async function of the request and `next`.
pub fn from_fn<F, Fut, R>(f: F) -> FromFn<F>
where
    F: Fn(Request, Endpoint) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    FromFn(Arc::new(f))
}

/// Middleware returned by [`from_fn`].
pub struct FromFn<F>(Arc<F>);

impl<F, Fut, R> Middleware for FromFn<F>
where
    F: Fn(Request, Endpoint) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn wrap(&self, next: Endpoint) -> Endpoint {
        let f = Arc::clone(&self.0);
        Endpoint::new(move |req: Request| (*f)(req, next.clone()))
    }
}
