//! The application: router, middleware and server bound together.
//!
//! Configuration and serving are two separate phases. Routes, middleware
//! and cleanup actions are registered first; then one of the serving entry
//! points composes the middleware around the router, installs the result on
//! the [`Server`], and hands control to it.
//!
//! Every serving entry point borrows the application mutably for as long as
//! the accept loop runs, so the compiler rejects `use_middleware` or route
//! registration while serving. Stop a running application through the
//! [`ShutdownHandle`] obtained beforehand.

use std::path::Path;
use std::sync::Arc;

use http::Method;
use tracing::debug;

use crate::cleanup::CleanupRegistry;
use crate::error::Error;
use crate::handler::{Endpoint, Handler};
use crate::listener::Listener;
use crate::middleware::{self, BoxedMiddleware, Middleware};
use crate::router::Router;
use crate::server::{Server, ShutdownHandle};

/// A router, an ordered middleware chain and a server, managed as one unit.
///
/// ```rust,no_run
/// use weft::{Application, Request, middleware::Trace};
///
/// #[tokio::main]
/// async fn main() -> Result<(), weft::Error> {
///     let mut app = Application::new(":8080");
///     app.use_middleware(Trace);
///     app.get("/hello/:name", |req: Request| async move {
///         format!("hello, {}!", req.param("name").unwrap_or("stranger"))
///     });
///
///     let result = app.listen_and_serve().await;
///     app.clean_up();
///     result
/// }
/// ```
pub struct Application {
    router: Router,
    server: Server,
    middlewares: Vec<BoxedMiddleware>,
    cleanup: CleanupRegistry,
}

impl Application {
    /// Creates an application that will serve on `addr`.
    ///
    /// See [`Server::new`] for the address forms.
    pub fn new(addr: impl Into<String>) -> Self {
        Self::with_server(Server::new(addr))
    }

    /// Creates an application around a preconfigured server.
    pub fn with_server(server: Server) -> Self {
        Self {
            router: Router::new(),
            server,
            middlewares: Vec::new(),
            cleanup: CleanupRegistry::new(),
        }
    }

    // ── Middleware ────────────────────────────────────────────────────────────

    /// Appends a middleware. The first one registered is the outermost.
    pub fn use_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Appends several type-erased middlewares, keeping their order.
    pub fn use_middlewares(&mut self, middlewares: impl IntoIterator<Item = BoxedMiddleware>) -> &mut Self {
        self.middlewares.extend(middlewares);
        self
    }

    /// Rebuilds the composed handler from the current router and middleware
    /// list and installs it on the server, replacing any earlier one.
    fn prepare(&mut self) {
        debug!(middlewares = self.middlewares.len(), "composing handler");
        let terminal = Endpoint::from(self.router.clone());
        self.server.set_handler(middleware::chain(terminal, &self.middlewares));
    }

    // ── Serving ───────────────────────────────────────────────────────────────

    /// Serves HTTP over TCP on the configured address.
    pub async fn listen_and_serve(&mut self) -> Result<(), Error> {
        self.prepare();
        self.server.listen_and_serve().await
    }

    /// Serves HTTPS over TCP on the configured address.
    pub async fn listen_and_serve_tls(
        &mut self,
        cert_file: impl AsRef<Path>,
        key_file: impl AsRef<Path>,
    ) -> Result<(), Error> {
        self.prepare();
        self.server.listen_and_serve_tls(cert_file, key_file).await
    }

    /// Serves HTTP on a caller-supplied listener.
    pub async fn serve<L: Listener>(&mut self, listener: L) -> Result<(), Error> {
        self.prepare();
        self.server.serve(listener).await
    }

    /// Serves HTTPS on a caller-supplied listener.
    pub async fn serve_tls<L: Listener>(
        &mut self,
        listener: L,
        cert_file: impl AsRef<Path>,
        key_file: impl AsRef<Path>,
    ) -> Result<(), Error> {
        self.prepare();
        self.server.serve_tls(listener, cert_file, key_file).await
    }

    /// Serves HTTP on a Unix domain socket at the configured address.
    ///
    /// The socket is created before anything else happens; if that fails
    /// the error is returned and the handler is never composed. The socket
    /// file is removed once serving ends. A serving error takes precedence
    /// over a failed removal, which is reported as [`Error::Io`].
    #[cfg(unix)]
    pub async fn listen_and_serve_unix(&mut self) -> Result<(), Error> {
        let path = self.server.addr().to_owned();
        let listener = tokio::net::UnixListener::bind(&path)
            .map_err(|source| Error::bind(path.as_str(), source))?;

        let result = self.serve(listener).await;

        let removed = match tokio::fs::remove_file(&path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                debug!(%path, "could not remove socket file: {e}");
                Err(Error::Io(e))
            }
            _ => Ok(()),
        };
        result.and(removed)
    }

    // ── Cleanup ───────────────────────────────────────────────────────────────

    /// Registers an action for [`clean_up`](Self::clean_up).
    pub fn register_on_clean_up(&mut self, action: impl Fn() + Send + Sync + 'static) -> &mut Self {
        self.cleanup.register(action);
        self
    }

    /// Runs every registered cleanup action, in registration order.
    ///
    /// Does not stop the server. Calling it again runs every action again.
    pub fn clean_up(&self) {
        self.cleanup.run();
    }

    // ── Collaborators ─────────────────────────────────────────────────────────

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.server.shutdown_handle()
    }

    /// Registers a route on the router. See [`Router::handle`].
    pub fn handle(&mut self, method: Method, pattern: &str, handler: impl Handler) -> &mut Self {
        self.router.handle(method, pattern, handler);
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
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::request::Request;

    use super::*;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn tagged(log: &Log, name: &'static str) -> BoxedMiddleware {
        let log = Arc::clone(log);
        Arc::new(middleware::from_fn(move |req: Request, next: Endpoint| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(name);
                next.call(req).await
            }
        }))
    }

    async fn call(app: &Application, path: &str) -> crate::Response {
        let handler = app.server().handler().expect("handler installed");
        handler.call(Request::new(Method::GET, path)).await
    }

    #[tokio::test]
    async fn use_appends_in_order() {
        let log = Log::default();
        let mut app = Application::new(":0");
        app.use_middlewares([tagged(&log, "a")]);
        app.use_middlewares([tagged(&log, "b"), tagged(&log, "c")]);
        app.get("/", |_req: Request| async { "root" });

        app.prepare();
        let res = call(&app, "/").await;
        assert_eq!(res.body(), b"root");
        assert_eq!(*log.lock().unwrap(), ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn prepare_twice_does_not_double_wrap() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut app = Application::new(":0");
        {
            let hits = Arc::clone(&hits);
            app.use_middleware(move |next: Endpoint| {
                let hits = Arc::clone(&hits);
                move |req: Request| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    next.call(req)
                }
            });
        }
        app.get("/", |_req: Request| async { "root" });

        app.prepare();
        app.prepare();
        call(&app, "/").await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn prepare_picks_up_later_changes() {
        let log = Log::default();
        let mut app = Application::new(":0");
        app.get("/", |_req: Request| async { "root" });
        app.prepare();
        assert_eq!(call(&app, "/late").await.status_code(), http::StatusCode::NOT_FOUND);

        app.use_middlewares([tagged(&log, "late")]);
        app.get("/late", |_req: Request| async { "late" });
        app.prepare();

        let res = call(&app, "/late").await;
        assert_eq!(res.body(), b"late");
        assert_eq!(*log.lock().unwrap(), ["late"]);
    }

    #[test]
    fn clean_up_runs_in_registration_order() {
        let log = Log::default();
        let mut app = Application::new(":0");
        for name in ["f1", "f2"] {
            let log = Arc::clone(&log);
            app.register_on_clean_up(move || log.lock().unwrap().push(name));
        }

        app.clean_up();
        app.clean_up();
        assert_eq!(*log.lock().unwrap(), ["f1", "f2", "f1", "f2"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_bind_failure_happens_before_prepare() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap().to_owned();

        let composed = Arc::new(AtomicUsize::new(0));
        let mut app = Application::new(path.clone());
        {
            let composed = Arc::clone(&composed);
            app.use_middleware(move |next: Endpoint| {
                composed.fetch_add(1, Ordering::SeqCst);
                move |req: Request| next.call(req)
            });
        }

        let err = app.listen_and_serve_unix().await.unwrap_err();
        assert!(matches!(err, Error::Bind { ref addr, .. } if *addr == path));
        assert_eq!(composed.load(Ordering::SeqCst), 0);
        assert!(app.server().handler().is_none());
        assert!(file.path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unremovable_socket_path_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.sock");

        let mut app = Application::with_server(
            Server::new(path.to_str().unwrap()).handle_signals(false),
        );
        let handle = app.shutdown_handle();
        let task = tokio::spawn(async move { app.listen_and_serve_unix().await });

        while !path.exists() {
            tokio::task::yield_now().await;
        }
        // Swap the socket file for a directory, which `remove_file` refuses.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        handle.shutdown();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Io(_)), "{err}");
    }
}
