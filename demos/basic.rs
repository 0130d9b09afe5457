//! Minimal weft application: two middleware layers, a few routes, cleanup.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/hello/world
//!   curl -H 'authorization: demo' http://localhost:3000/users/42
//!   curl -X POST -H 'authorization: demo' http://localhost:3000/users -d '{"name":"alice"}'
//!   curl http://localhost:3000/hello/world/      # trailing-slash redirect

use http::StatusCode;
use weft::{Application, Endpoint, Request, Response, middleware};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let mut app = Application::new("127.0.0.1:3000");

    app.use_middleware(middleware::Trace);
    app.use_middleware(middleware::from_fn(require_auth));

    app.get("/hello/:name", hello)
        .get("/users/:id", get_user)
        .post("/users", create_user)
        .delete("/users/:id", delete_user);

    app.register_on_clean_up(|| tracing::info!("closing connection pool"));
    app.register_on_clean_up(|| tracing::info!("flushing metrics"));

    if let Err(e) = app.listen_and_serve().await {
        tracing::error!("server error: {e}");
    }
    app.clean_up();
}

// Everything under /users needs an authorization header.
async fn require_auth(req: Request, next: Endpoint) -> Response {
    if req.path().starts_with("/users") && req.header("authorization").is_none() {
        return Response::status(StatusCode::UNAUTHORIZED);
    }
    next.call(req).await
}

async fn hello(req: Request) -> String {
    format!("hello, {}!", req.param("name").unwrap_or("stranger"))
}

async fn get_user(req: Request) -> Response {
    let id = req.param("id").unwrap_or("unknown");
    Response::json(format!(r#"{{"id":"{id}","name":"alice"}}"#).into_bytes())
}

async fn create_user(req: Request) -> Response {
    if req.body().is_empty() {
        return Response::status(StatusCode::BAD_REQUEST);
    }
    Response::builder()
        .status(StatusCode::CREATED)
        .header("location", "/users/99")
        .json(r#"{"id":"99","name":"new_user"}"#.to_owned().into_bytes())
}

async fn delete_user(_req: Request) -> StatusCode {
    StatusCode::NO_CONTENT
}
