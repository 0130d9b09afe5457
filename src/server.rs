//! HTTP server and graceful shutdown.
//!
//! The [`Server`] owns exactly one installed handler and runs the accept
//! loop for whatever transport it is given. It knows nothing about routing
//! or middleware; the [`Application`](crate::Application) composes those
//! into a single [`Endpoint`] and installs it here before serving.
//!
//! # Graceful shutdown
//!
//! Serving stops when [`ShutdownHandle::shutdown`] is called or, unless
//! disabled with [`Server::handle_signals`], when the process receives
//! SIGTERM or Ctrl-C. The server then:
//! 1. Stops calling `accept` on the listener.
//! 2. Asks every open connection to finish its in-flight request and close.
//!    TLS handshakes still in progress are dropped.
//! 3. Waits up to [`Server::shutdown_timeout`] for those connections, aborts
//!    whatever is left, then returns `Ok(())`.
//!
//! Shutdown is sticky: once a server has been shut down, every later
//! serving call returns `Ok(())` straight away.

use std::convert::Infallible;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::handler::Endpoint;
use crate::listener::{Listener, is_connection_error};
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;
use crate::tls;

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_HEADER_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// The HTTP server.
pub struct Server {
    addr: String,
    handler: Option<Endpoint>,
    handle_signals: bool,
    shutdown_timeout: Duration,
    header_read_timeout: Duration,
    shutdown: Arc<watch::Sender<bool>>,
}

/// Stops a running [`Server`] from another task.
///
/// Obtained from [`Server::shutdown_handle`] before serving starts; the
/// serving call itself holds the server for as long as it runs.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Requests a graceful shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Server {
    /// Configures a server for `addr`.
    ///
    /// For TCP the address is `host:port`; `":8080"` binds every interface
    /// and an empty string means port 80 (443 for TLS). For Unix sockets it
    /// is the socket path. Nothing is bound until a serving call.
    pub fn new(addr: impl Into<String>) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            addr: addr.into(),
            handler: None,
            handle_signals: true,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            header_read_timeout: DEFAULT_HEADER_READ_TIMEOUT,
            shutdown: Arc::new(tx),
        }
    }

    /// Whether SIGTERM / Ctrl-C trigger a graceful shutdown. On by default.
    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// How long a graceful shutdown waits for open connections before
    /// aborting them. 30 seconds by default.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// How long an HTTP/1.1 client may take to send a complete request
    /// header block. 30 seconds by default.
    pub fn header_read_timeout(mut self, timeout: Duration) -> Self {
        self.header_read_timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Installs the handler every request is dispatched to, replacing the
    /// previous one.
    pub fn set_handler(&mut self, handler: Endpoint) {
        self.handler = Some(handler);
    }

    pub fn handler(&self) -> Option<&Endpoint> {
        self.handler.as_ref()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { tx: Arc::clone(&self.shutdown) }
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Binds a TCP listener on the configured address and serves it.
    pub async fn listen_and_serve(&self) -> Result<(), Error> {
        if self.is_shutdown() {
            return Ok(());
        }
        let listener = self.bind_tcp(false).await?;
        self.serve(listener).await
    }

    /// Binds a TCP listener on the configured address and serves TLS on it.
    pub async fn listen_and_serve_tls(
        &self,
        cert_file: impl AsRef<Path>,
        key_file: impl AsRef<Path>,
    ) -> Result<(), Error> {
        if self.is_shutdown() {
            return Ok(());
        }
        let listener = self.bind_tcp(true).await?;
        self.serve_tls(listener, cert_file, key_file).await
    }

    /// Serves plain HTTP on a caller-supplied listener.
    pub async fn serve<L: Listener>(&self, listener: L) -> Result<(), Error> {
        self.run(listener, None).await
    }

    /// Serves HTTPS on a caller-supplied listener.
    pub async fn serve_tls<L: Listener>(
        &self,
        listener: L,
        cert_file: impl AsRef<Path>,
        key_file: impl AsRef<Path>,
    ) -> Result<(), Error> {
        let acceptor = tls::load_acceptor(cert_file.as_ref(), key_file.as_ref()).await?;
        self.run(listener, Some(acceptor)).await
    }

    async fn bind_tcp(&self, tls: bool) -> Result<TcpListener, Error> {
        let addr = tcp_addr(&self.addr, tls);
        TcpListener::bind(&addr)
            .await
            .map_err(|source| Error::bind(addr, source))
    }

    // ── Accept loop ───────────────────────────────────────────────────────────

    async fn run<L: Listener>(&self, mut listener: L, tls: Option<TlsAcceptor>) -> Result<(), Error> {
        if self.is_shutdown() {
            return Ok(());
        }

        let handler = match &self.handler {
            Some(handler) => handler.clone(),
            None => Endpoint::from(Router::new()),
        };

        info!(addr = ?listener.local_addr().ok(), tls = tls.is_some(), "weft listening");

        let closed = closed(self.shutdown.subscribe());
        tokio::pin!(closed);
        let signal = os_signal(self.handle_signals);
        tokio::pin!(signal);

        // Every connection task is tracked so shutdown can wait for them.
        let mut tasks = JoinSet::new();

        let result = loop {
            tokio::select! {
                biased;

                () = &mut closed => break Ok(()),

                () = &mut signal => {
                    info!("shutdown signal received");
                    self.shutdown.send_replace(true);
                    break Ok(());
                }

                res = listener.accept() => match res {
                    Ok((io, peer)) => {
                        tasks.spawn(serve_connection(
                            io,
                            peer,
                            handler.clone(),
                            tls.clone(),
                            self.header_read_timeout,
                            self.shutdown.subscribe(),
                        ));
                    }
                    Err(e) if is_connection_error(&e) => {
                        debug!("accept error: {e}");
                    }
                    Err(e) => {
                        error!("accept failed, stopping: {e}");
                        break Err(Error::Accept(e));
                    }
                },

                // Reap finished connection tasks so the set stays small.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        };
        drop(listener);

        match result {
            Ok(()) => {
                info!(in_flight = tasks.len(), timeout = ?self.shutdown_timeout, "draining connections");
                let drain = async { while tasks.join_next().await.is_some() {} };
                if tokio::time::timeout(self.shutdown_timeout, drain).await.is_err() {
                    warn!(remaining = tasks.len(), "shutdown timeout reached, aborting connections");
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                }
                info!("weft stopped");
            }
            // Open connections outlive a failed listener.
            Err(_) => tasks.detach_all(),
        }
        result
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("addr", &self.addr)
            .field("handler", &self.handler.is_some())
            .field("handle_signals", &self.handle_signals)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("header_read_timeout", &self.header_read_timeout)
            .finish()
    }
}

/// Fills in what a bare `:port` or empty address leaves out.
fn tcp_addr(addr: &str, tls: bool) -> String {
    match addr {
        "" if tls => "0.0.0.0:443".to_owned(),
        "" => "0.0.0.0:80".to_owned(),
        _ if addr.starts_with(':') => format!("0.0.0.0{addr}"),
        _ => addr.to_owned(),
    }
}

// ── Connections ───────────────────────────────────────────────────────────────

async fn serve_connection<I, A>(
    io: I,
    peer: A,
    handler: Endpoint,
    tls: Option<TlsAcceptor>,
    header_read_timeout: Duration,
    shutdown: watch::Receiver<bool>,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    A: fmt::Debug,
{
    let peer = format!("{peer:?}");
    let Some(acceptor) = tls else {
        return drive(TokioIo::new(io), peer, handler, header_read_timeout, shutdown).await;
    };

    // A client that never finishes the handshake must not hold up shutdown.
    let handshake = tokio::select! {
        res = acceptor.accept(io) => res,
        () = closed(shutdown.clone()) => {
            debug!(%peer, "shutdown during tls handshake");
            return;
        }
    };
    match handshake {
        Ok(stream) => drive(TokioIo::new(stream), peer, handler, header_read_timeout, shutdown).await,
        Err(e) => warn!(%peer, "tls handshake failed: {e}"),
    }
}

async fn drive<I>(
    io: TokioIo<I>,
    peer: String,
    handler: Endpoint,
    header_read_timeout: Duration,
    shutdown: watch::Receiver<bool>,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    // Called once per request on the connection, not once per connection.
    let svc = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
        let handler = handler.clone();
        async move { Ok::<_, Infallible>(dispatch(handler, req).await) }
    });

    // `auto::Builder` handles both HTTP/1.1 and HTTP/2.
    let mut builder = ConnBuilder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(header_read_timeout);
    let conn = builder.serve_connection(io, svc);
    tokio::pin!(conn);

    let closed = closed(shutdown);
    tokio::pin!(closed);

    let res = tokio::select! {
        res = conn.as_mut() => res,
        () = &mut closed => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = res {
        debug!(%peer, "connection error: {e}");
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Buffers one request, runs it through the installed handler, and converts
/// the result for hyper.
///
/// The handler runs on its own task so a panic costs one `500`, not the
/// connection or the accept loop.
async fn dispatch(
    handler: Endpoint,
    req: hyper::Request<hyper::body::Incoming>,
) -> http::Response<Full<Bytes>> {
    let req = match Request::from_hyper(req).await {
        Ok(req) => req,
        Err(e) => {
            debug!("failed to read request body: {e}");
            return Response::status(StatusCode::BAD_REQUEST).into_inner();
        }
    };

    let method = req.method().clone();
    let path = req.path().to_owned();

    match tokio::spawn(handler.call(req)).await {
        Ok(res) => res.into_inner(),
        Err(e) => {
            error!(%method, %path, "handler failed: {e}");
            Response::status(StatusCode::INTERNAL_SERVER_ERROR).into_inner()
        }
    }
}

// ── Shutdown signals ──────────────────────────────────────────────────────────

/// Resolves once the shutdown flag is set, or the server is gone.
async fn closed(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|closed| *closed).await;
}

/// Resolves on SIGTERM or Ctrl-C when `enabled`, never otherwise.
async fn os_signal(enabled: bool) {
    if !enabled {
        return std::future::pending().await;
    }

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => { sig.recv().await; }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}
