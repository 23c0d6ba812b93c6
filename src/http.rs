//! Middleware stack wrapped around whatever router the service is built with.

use axum::{
    extract::{ConnectInfo, Request},
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    Router,
};
use std::{
    net::{IpAddr, SocketAddr},
    time::Instant,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Wraps `routes` with request ids, tracing spans, per-request logging and
/// panic recovery.
pub fn app(routes: Router) -> Router {
    routes
        .layer(CatchPanicLayer::new())
        .layer(middleware::from_fn(log_request))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

fn client_ip(request: &Request) -> Option<IpAddr> {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());

    forwarded.or_else(|| {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}

fn header_str(value: Option<&HeaderValue>) -> String {
    value
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

macro_rules! request_event {
    ($level:expr, $log:ident) => {
        tracing::event!(
            $level,
            status = $log.status,
            method = %$log.method,
            path = %$log.path,
            query = %$log.query,
            ip = %$log.ip,
            user_agent = %$log.user_agent,
            latency = ?$log.latency,
            latency_ms = $log.latency.as_millis() as u64,
            request_id = %$log.request_id,
            "HTTP Request"
        )
    };
}

struct RequestLog {
    status: u16,
    method: String,
    path: String,
    query: String,
    ip: String,
    user_agent: String,
    latency: std::time::Duration,
    request_id: String,
}

/// Logs one event per request: `error` for 5xx, `warn` for 4xx, `info` otherwise.
pub async fn log_request(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or_default().to_string();
    let ip = client_ip(&request)
        .map(|ip| ip.to_string())
        .unwrap_or_default();
    let user_agent = header_str(request.headers().get(axum::http::header::USER_AGENT));
    let request_id = header_str(request.headers().get(REQUEST_ID_HEADER));

    let response = next.run(request).await;

    let log = RequestLog {
        status: response.status().as_u16(),
        method,
        path,
        query,
        ip,
        user_agent,
        latency: start.elapsed(),
        request_id,
    };

    if response.status().is_server_error() {
        request_event!(tracing::Level::ERROR, log);
    } else if response.status().is_client_error() {
        request_event!(tracing::Level::WARN, log);
    } else {
        request_event!(tracing::Level::INFO, log);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, routing::get};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn explode() -> &'static str {
        panic!("handler exploded")
    }

    fn routes() -> Router {
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .route("/panic", get(explode))
    }

    #[tokio::test]
    async fn test_app_forwards_to_routes_and_sets_request_id() {
        let response = app(routes())
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"pong");
    }

    #[tokio::test]
    async fn test_app_keeps_incoming_request_id() {
        let response = app(routes())
            .oneshot(
                Request::builder()
                    .uri("/ping")
                    .header(REQUEST_ID_HEADER, "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-42");
    }

    #[tokio::test]
    async fn test_app_recovers_from_handler_panic() {
        let response = app(routes())
            .oneshot(Request::builder().uri("/panic").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_app_without_routes_returns_not_found() {
        let response = app(Router::new())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(client_ip(&request), Some("203.0.113.7".parse().unwrap()));
    }

    #[test]
    fn test_client_ip_falls_back_to_connect_info() {
        let mut request = Request::builder().body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("198.51.100.2:4000".parse::<SocketAddr>().unwrap()));

        assert_eq!(client_ip(&request), Some("198.51.100.2".parse().unwrap()));
    }
}
