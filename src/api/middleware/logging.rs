//! Request logging middleware

use std::time::Instant;

use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, info, warn};

/// Log method, path, status and duration of every API call
pub async fn log_request(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    debug!("{} {} - started", method, uri);

    let response = next.run(req).await;

    let duration = start.elapsed();
    let status = response.status();

    if status.is_server_error() {
        warn!("{} {} - {} in {:?}", method, uri, status, duration);
    } else {
        info!("{} {} - {} in {:?}", method, uri, status, duration);
    }

    response
}
