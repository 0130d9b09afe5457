//! End-to-end tests: a real `Application` serving raw HTTP/1.1 over sockets.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::StatusCode;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use weft::middleware::{self, Middleware};
use weft::{Application, Endpoint, Request, Response, Server};

type Log = Arc<Mutex<Vec<&'static str>>>;

fn quiet_app() -> Application {
    Application::with_server(Server::new("127.0.0.1:0").handle_signals(false))
}

async fn roundtrip<S>(mut stream: S, method: &str, target: &str, headers: &str) -> String
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let req = format!("{method} {target} HTTP/1.1\r\nhost: test\r\nconnection: close\r\n{headers}\r\n");
    stream.write_all(req.as_bytes()).await.unwrap();
    let mut buf = String::new();
    stream.read_to_string(&mut buf).await.unwrap();
    buf
}

/// Reads until the response ends with `body` or the peer stops sending.
async fn read_response<S: AsyncRead + Unpin>(stream: &mut S, body: &str) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.ends_with(body.as_bytes()) {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8(buf).unwrap()
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

/// A client that trusts the test CA and offers HTTP/1.1 over ALPN.
fn tls_connector() -> TlsConnector {
    let pem = std::fs::read(fixture("ca.pem")).unwrap();
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
        roots.add(cert.unwrap()).unwrap();
    }
    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    TlsConnector::from(Arc::new(config))
}

fn logging(log: Log) -> impl Middleware {
    middleware::from_fn(move |req: Request, next: Endpoint| {
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap().push("log");
            next.call(req).await
        }
    })
}

fn auth(log: Log) -> impl Middleware {
    middleware::from_fn(move |req: Request, next: Endpoint| {
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap().push("auth");
            if req.header("authorization") != Some("letmein") {
                return Response::status(StatusCode::UNAUTHORIZED);
            }
            next.call(req).await
        }
    })
}

fn hello_app(log: &Log) -> Application {
    let mut app = quiet_app();
    app.use_middleware(logging(Arc::clone(log)));
    app.use_middleware(auth(Arc::clone(log)));

    let route_log = Arc::clone(log);
    app.get("/hello/:name", move |req: Request| {
        route_log.lock().unwrap().push("route");
        async move { format!("hello, {}!", req.param("name").unwrap_or_default()) }
    });
    app
}

#[tokio::test]
async fn request_passes_middleware_in_order_then_route() {
    let log = Log::default();
    let mut app = hello_app(&log);
    let handle = app.shutdown_handle();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move { app.serve(listener).await });

    let stream = TcpStream::connect(addr).await.unwrap();
    let res = roundtrip(stream, "GET", "/hello/world", "authorization: letmein\r\n").await;

    assert!(res.starts_with("HTTP/1.1 200"), "{res}");
    assert!(res.contains("world"), "{res}");
    assert_eq!(*log.lock().unwrap(), ["log", "auth", "route"]);

    handle.shutdown();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn short_circuit_never_reaches_the_route() {
    let log = Log::default();
    let mut app = hello_app(&log);
    let handle = app.shutdown_handle();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move { app.serve(listener).await });

    let stream = TcpStream::connect(addr).await.unwrap();
    let res = roundtrip(stream, "GET", "/hello/world", "").await;

    assert!(res.starts_with("HTTP/1.1 401"), "{res}");
    assert_eq!(*log.lock().unwrap(), ["log", "auth"]);

    handle.shutdown();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn serves_https_through_the_chain() {
    let log = Log::default();
    let mut app = hello_app(&log);
    let handle = app.shutdown_handle();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        app.serve_tls(listener, fixture("localhost.pem"), fixture("localhost.key")).await
    });

    let tcp = TcpStream::connect(addr).await.unwrap();
    let domain = ServerName::try_from("localhost").unwrap();
    let mut stream = tls_connector().connect(domain, tcp).await.unwrap();
    assert_eq!(stream.get_ref().1.alpn_protocol(), Some(&b"http/1.1"[..]));

    let req = "GET /hello/tls HTTP/1.1\r\nhost: localhost\r\nauthorization: letmein\r\nconnection: close\r\n\r\n";
    stream.write_all(req.as_bytes()).await.unwrap();
    let res = read_response(&mut stream, "hello, tls!").await;

    assert!(res.starts_with("HTTP/1.1 200"), "{res}");
    assert!(res.ends_with("hello, tls!"), "{res}");
    assert_eq!(*log.lock().unwrap(), ["log", "auth", "route"]);

    handle.shutdown();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn listen_and_serve_binds_a_bare_port_on_all_interfaces() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let mut app = Application::with_server(Server::new(format!(":{port}")).handle_signals(false));
    app.get("/ping", |_req: Request| async { "pong" });
    let handle = app.shutdown_handle();
    let server = tokio::spawn(async move { app.listen_and_serve().await });

    let stream = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match TcpStream::connect(("127.0.0.1", port)).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    })
    .await
    .expect("server never started listening");

    let res = roundtrip(stream, "GET", "/ping", "").await;
    assert!(res.starts_with("HTTP/1.1 200"), "{res}");
    assert!(res.ends_with("pong"), "{res}");

    handle.shutdown();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn router_answers_404_and_405_through_the_chain() {
    let log = Log::default();
    let mut app = quiet_app();
    app.use_middleware(logging(Arc::clone(&log)));
    app.post("/users", |_req: Request| async { StatusCode::CREATED });
    let handle = app.shutdown_handle();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move { app.serve(listener).await });

    let res = roundtrip(TcpStream::connect(addr).await.unwrap(), "GET", "/nope", "").await;
    assert!(res.starts_with("HTTP/1.1 404"), "{res}");

    let res = roundtrip(TcpStream::connect(addr).await.unwrap(), "GET", "/users", "").await;
    assert!(res.starts_with("HTTP/1.1 405"), "{res}");
    assert!(res.to_ascii_lowercase().contains("allow: post"), "{res}");

    assert_eq!(*log.lock().unwrap(), ["log", "log"]);

    handle.shutdown();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_then_cleanup() {
    let log = Log::default();
    let mut app = quiet_app();
    for name in ["close db", "flush metrics"] {
        let log = Arc::clone(&log);
        app.register_on_clean_up(move || log.lock().unwrap().push(name));
    }
    let handle = app.shutdown_handle();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = tokio::spawn(async move {
        let result = app.serve(listener).await;
        app.clean_up();
        result
    });

    handle.shutdown();
    server.await.unwrap().unwrap();
    assert_eq!(*log.lock().unwrap(), ["close db", "flush metrics"]);
}

#[cfg(unix)]
#[tokio::test]
async fn serves_over_a_unix_socket_and_removes_it() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weft.sock");

    let mut app = Application::with_server(
        Server::new(path.to_str().unwrap()).handle_signals(false),
    );
    app.get("/ping", |_req: Request| async { "pong" });
    let handle = app.shutdown_handle();

    let server = tokio::spawn(async move { app.listen_and_serve_unix().await });

    // The socket appears once the listener is bound.
    let stream = loop {
        match tokio::net::UnixStream::connect(&path).await {
            Ok(stream) => break stream,
            Err(_) => tokio::task::yield_now().await,
        }
    };
    let res = roundtrip(stream, "GET", "/ping", "").await;
    assert!(res.starts_with("HTTP/1.1 200"), "{res}");
    assert!(res.ends_with("pong"), "{res}");

    handle.shutdown();
    server.await.unwrap().unwrap();
    assert!(!path.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn unix_socket_on_a_regular_file_fails_before_serving() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let mut app = Application::with_server(
        Server::new(file.path().to_str().unwrap()).handle_signals(false),
    );

    let err = app.listen_and_serve_unix().await.unwrap_err();
    assert!(matches!(err, weft::Error::Bind { .. }), "{err}");
    assert!(app.server().handler().is_none());
}

#[tokio::test]
async fn tls_with_missing_certificate_reports_the_file() {
    let mut app = quiet_app();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let err = app
        .serve_tls(listener, "/nonexistent/cert.pem", "/nonexistent/key.pem")
        .await
        .unwrap_err();
    assert!(matches!(err, weft::Error::TlsFile { .. }), "{err}");
    // The handler is installed before the server looks at TLS material.
    assert!(app.server().handler().is_some());
}
