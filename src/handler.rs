//! Handler trait, type erasure, and the [`Endpoint`] dispatch capability.
//!
//! # From `async fn` to `Endpoint`
//!
//! Routes, middleware layers, and the router itself all share one shape:
//! take a [`Request`], produce a [`Response`]. Each of them is stored behind
//! the same trait object so the router can keep handlers of different types
//! in one tree and the middleware chain can nest them freely.
//!
//! ```text
//! async fn hello(req: Request) -> Response { … }   ← user writes this
//!        ↓ router.get("/", hello)
//! hello.into_boxed_handler()                       ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(hello))                       ← stored as BoxedHandler
//!        ↓
//! Endpoint(BoxedHandler)                           ← what middleware wraps
//!        ↓
//! endpoint.call(req) at request time               ← one vtable dispatch
//! ```
//!
//! The runtime cost per layer is one `Arc` clone and one virtual call.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

// ── Erased types ──────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future that resolves to a [`Response`].
///
/// `Send + 'static` so the server can run it on its own task.
pub type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is automatically satisfied for any
/// function or closure with the signature:
///
/// ```text
/// async fn name(req: Request) -> impl IntoResponse
/// ```
///
/// The trait is sealed: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Bridges a concrete handler `F` to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// A dispatch capability: accepts one request, produces one response.
///
/// This is the unit the middleware chain composes. A [`Router`](crate::Router)
/// becomes an `Endpoint` at the bottom of the chain, and every
/// [`Middleware`](crate::middleware::Middleware) turns one `Endpoint` into
/// another.
///
/// Cloning is one atomic increment. An `Endpoint` is safe to call from many
/// tasks at once as long as the handler behind it is, which the `Handler`
/// bounds already guarantee.
#[derive(Clone)]
pub struct Endpoint(BoxedHandler);

impl Endpoint {
    /// Wraps any handler.
    ///
    /// ```rust
    /// use weft::{Endpoint, Request};
    ///
    /// let ok = Endpoint::new(|_req: Request| async { "ok" });
    /// ```
    pub fn new(handler: impl Handler) -> Self {
        Self(handler.into_boxed_handler())
    }

    /// Dispatches one request.
    ///
    /// The returned future owns everything it needs, so it can be spawned.
    pub fn call(&self, req: Request) -> BoxFuture {
        self.0.call(req)
    }

    /// `true` when both values share the same underlying handler.
    pub fn ptr_eq(&self, other: &Endpoint) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint").finish_non_exhaustive()
    }
}
