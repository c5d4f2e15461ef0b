//! CORS configuration
//!
//! Only explicitly listed origins are allowed; an empty list means localhost.

use axum::http::header;
use axum::http::{HeaderValue, Method};
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};

fn localhost_origins() -> Vec<HeaderValue> {
    vec![
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
    ]
}

/// Create a CORS layer for the configured origins
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = if allowed_origins.is_empty() {
        debug!("CORS: no origins configured, allowing localhost only");
        localhost_origins()
    } else {
        debug!("CORS: allowing origins {:?}", allowed_origins);
        allowed_origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("CORS: ignoring invalid origin '{}'", o);
                    None
                }
            })
            .collect()
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use tower::ServiceExt;

    async fn allowed_origin(origins: &[String], origin: &str) -> Option<String> {
        let app = axum::Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(cors_layer(origins));

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/")
                    .header("Origin", origin)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        response
            .headers()
            .get("access-control-allow-origin")
            .map(|v| v.to_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn test_cors_defaults_to_localhost() {
        assert_eq!(
            allowed_origin(&[], "http://localhost:3000").await.as_deref(),
            Some("http://localhost:3000")
        );
        assert_eq!(allowed_origin(&[], "https://example.com").await, None);
    }

    #[tokio::test]
    async fn test_cors_with_configured_origins() {
        let origins = vec![
            "https://ops.example.com".to_string(),
            "not a header value\n".to_string(),
        ];
        assert_eq!(
            allowed_origin(&origins, "https://ops.example.com").await.as_deref(),
            Some("https://ops.example.com")
        );
        assert_eq!(allowed_origin(&origins, "http://localhost:3000").await, None);
    }
}
