//! Per-request tracing span.

use std::time::Instant;

use tracing::{Instrument, info, info_span};

use crate::handler::Endpoint;
use crate::middleware::Middleware;
use crate::request::Request;

/// Opens an `http.request` span per request and logs status and latency
/// once the response is ready.
///
/// Register it first so the span covers every other layer:
///
/// ```rust
/// use weft::{Application, middleware::Trace};
///
/// let mut app = Application::new(":3000");
/// app.use_middleware(Trace);
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct Trace;

impl Middleware for Trace {
    fn wrap(&self, next: Endpoint) -> Endpoint {
        Endpoint::new(move |req: Request| {
            let span = info_span!("http.request", method = %req.method(), path = %req.path());
            let next = next.clone();
            async move {
                let started = Instant::now();
                let res = next.call(req).await;
                info!(
                    status = res.status_code().as_u16(),
                    latency_us = started.elapsed().as_micros() as u64,
                    "request finished"
                );
                res
            }
            .instrument(span)
        })
    }
}
