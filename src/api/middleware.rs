//! API Middleware
//!
//! Per-request logging span keyed by the request id.

use std::time::Instant;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, Request},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;

/// Header carrying the per-request id set by `SetRequestIdLayer`
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The only request headers that reach the logs
static LOGGED_HEADERS: [HeaderName; 3] = [header::CONTENT_TYPE, header::CONTENT_LENGTH, header::USER_AGENT];

/// Allow-listed request headers as `(name, value)` pairs
pub fn loggable_headers(headers: &HeaderMap) -> Vec<(&'static str, String)> {
    LOGGED_HEADERS
        .iter()
        .filter_map(|name| {
            let value = headers.get(name)?;
            Some((name.as_str(), value.to_str().unwrap_or("<binary>").to_string()))
        })
        .collect()
}

/// Wraps the request in an `http` span and logs its outcome by status class
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let span = tracing::info_span!(
        "http",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
    );

    async move {
        tracing::debug!(headers = ?loggable_headers(request.headers()), "Request received");

        let start = Instant::now();
        let response = next.run(request).await;
        let status = response.status();
        let elapsed_ms = start.elapsed().as_millis() as u64;

        if status.is_server_error() {
            tracing::error!(%status, elapsed_ms, "Request failed");
        } else if status.is_client_error() {
            tracing::warn!(%status, elapsed_ms, "Request rejected");
        } else {
            tracing::info!(%status, elapsed_ms, "Request completed");
        }

        response
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_allow_listed_headers_are_logged() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert(header::AUTHORIZATION, "Bearer secret".parse().unwrap());
        headers.insert(REQUEST_ID_HEADER, "req-123".parse().unwrap());

        let logged = loggable_headers(&headers);

        assert_eq!(logged, vec![("content-type", "application/json".to_string())]);
    }
}
