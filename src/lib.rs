//! # weft
//!
//! The application layer of an HTTP service: one [`Application`] binds a
//! [`Router`], an ordered middleware chain, and a [`Server`], and owns the
//! step from "configured" to "serving".
//!
//! ## The contract
//!
//! - **Middleware order is registration order.** The first middleware you
//!   register is the outermost layer: it sees the request first and the
//!   response last. Any layer can short-circuit.
//! - **The handler is always fresh.** Every serving entry point recomposes
//!   the middleware around the router immediately before the first
//!   connection is accepted. There is no cached chain to go stale.
//! - **Configuration happens before serving.** Serving borrows the
//!   application mutably, so the compiler enforces the phase boundary.
//! - **Cleanup is explicit.** Registered cleanup actions run, in order, when
//!   you call [`Application::clean_up`], and never on their own.
//!
//! What sits underneath and is deliberately not reinvented:
//!
//! - Radix-tree routing via [`matchit`]
//! - HTTP/1.1 and HTTP/2 via `hyper`
//! - TLS via `rustls`
//! - Graceful shutdown on SIGTERM / Ctrl-C or a [`ShutdownHandle`]
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use weft::{Application, Endpoint, Request, Response, middleware};
//! use http::StatusCode;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), weft::Error> {
//!     let mut app = Application::new(":8080");
//!
//!     app.use_middleware(middleware::Trace);
//!     app.use_middleware(middleware::from_fn(|req: Request, next: Endpoint| async move {
//!         match req.header("authorization") {
//!             Some(_) => next.call(req).await,
//!             None => Response::status(StatusCode::UNAUTHORIZED),
//!         }
//!     }));
//!
//!     app.get("/hello/:name", hello);
//!
//!     let result = app.listen_and_serve().await;
//!     app.clean_up();
//!     result
//! }
//!
//! async fn hello(req: Request) -> String {
//!     format!("hello, {}!", req.param("name").unwrap_or("stranger"))
//! }
//! ```

mod app;
mod cleanup;
mod error;
mod handler;
mod listener;
mod request;
mod response;
mod router;
mod server;
mod tls;

pub mod middleware;

pub use app::Application;
pub use cleanup::{CleanupAction, CleanupRegistry};
pub use error::Error;
pub use handler::{BoxFuture, Endpoint, Handler};
pub use listener::Listener;
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::{Server, ShutdownHandle};
