use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderMap, HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;
use sentinel_core::error::{ApiError, codes};
use sentinel_core::{AdmissionCoordinator, Decision, EngineConfig};
use serde_json::json;
use tower::{Layer, Service, ServiceExt};
use uuid::Uuid;

const UNKNOWN_IDENTITY: &str = "unknown";

/// Runs every request through the admission engine before it reaches a handler.
#[derive(Clone)]
pub struct AdmissionLayer {
    coordinator: Arc<AdmissionCoordinator>,
    trust_proxy_headers: bool,
}

impl AdmissionLayer {
    pub fn new(coordinator: Arc<AdmissionCoordinator>) -> Self {
        Self {
            coordinator,
            trust_proxy_headers: false,
        }
    }

    /// Read the caller address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a proxy that overwrites these headers.
    pub fn trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            coordinator: self.coordinator.clone(),
            trust_proxy_headers: self.trust_proxy_headers,
        }
    }
}

#[derive(Clone)]
pub struct AdmissionService<S> {
    inner: S,
    coordinator: Arc<AdmissionCoordinator>,
    trust_proxy_headers: bool,
}

impl<S> Service<Request> for AdmissionService<S>
where
    S: Service<Request, Response = axum::response::Response, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = axum::response::Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);
        let coordinator = self.coordinator.clone();
        let trust_proxy_headers = self.trust_proxy_headers;

        Box::pin(async move {
            let peer = req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr);
            let identity = resolve_identity(req.headers(), peer, trust_proxy_headers);
            let path = req.uri().path().to_string();

            let decision = coordinator.evaluate(&identity, &path);
            if !decision.allowed {
                tracing::info!(
                    identity = %identity,
                    path = %path,
                    verdict = decision.verdict.as_str(),
                    retry_after_secs = decision.retry_after_secs,
                    "request rejected by admission"
                );
                return Ok(build_reject_response(&decision, coordinator.config()));
            }

            let mut response = ready.oneshot(req).await.into_response();
            annotate_response_headers(&mut response, coordinator.config(), None);
            Ok(response)
        })
    }
}

/// Caller identity for admission purposes.
///
/// Proxy headers are consulted only when trusted; the first `X-Forwarded-For`
/// entry is the original client. Falls back to the socket peer address.
pub fn resolve_identity(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy_headers: bool,
) -> String {
    if trust_proxy_headers {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(client) = forwarded {
            return client.to_string();
        }

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(client) = real_ip {
            return client.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string())
}

/// Seconds until an idle caller's bucket is full again.
fn full_refill_secs(config: &EngineConfig) -> u64 {
    let secs = f64::from(config.identity_burst) / config.identity_rate_limit;
    (secs.ceil() as u64).max(1)
}

fn build_reject_response(decision: &Decision, config: &EngineConfig) -> axum::response::Response {
    let retry_after_secs = decision.retry_after_secs.unwrap_or(1).max(1);
    let body = ApiError {
        error: codes::RATE_LIMITED.to_string(),
        message: decision.reason.to_string(),
        field: Some("admission".to_string()),
        received: Some(json!({
            "verdict": decision.verdict,
            "retry_after_secs": retry_after_secs
        })),
        request_id: Uuid::now_v7().to_string(),
        docs_hint: Some(format!(
            "Reduce request rate and retry after {retry_after_secs} seconds."
        )),
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
    response
        .headers_mut()
        .insert("retry-after", HeaderValue::from(retry_after_secs));
    response
        .headers_mut()
        .insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
    annotate_response_headers(&mut response, config, Some(retry_after_secs));
    response
}

fn annotate_response_headers<B>(
    response: &mut Response<B>,
    config: &EngineConfig,
    reset_secs: Option<u64>,
) {
    let reset = reset_secs.unwrap_or_else(|| full_refill_secs(config));
    response
        .headers_mut()
        .insert("x-ratelimit-limit", HeaderValue::from(config.identity_burst));
    response
        .headers_mut()
        .insert("x-ratelimit-reset", HeaderValue::from(reset));
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::routing::get;
    use std::collections::{BTreeMap, BTreeSet};

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(*value));
        }
        map
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            identity_rate_limit: 1.0,
            identity_burst: 3,
            endpoint_limits: BTreeMap::new(),
            whitelist: BTreeSet::from(["127.0.0.1".to_string()]),
            ..EngineConfig::default()
        }
    }

    fn app(coordinator: Arc<AdmissionCoordinator>) -> Router {
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(AdmissionLayer::new(coordinator).trust_proxy_headers(true))
    }

    fn request_from(ip: &'static str) -> Request {
        axum::http::Request::builder()
            .uri("/ping")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn forwarded_for_first_entry_wins_when_trusted() {
        let map = headers(&[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        let peer: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        assert_eq!(resolve_identity(&map, Some(peer), true), "203.0.113.7");
    }

    #[test]
    fn real_ip_used_when_forwarded_for_missing() {
        let map = headers(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(resolve_identity(&map, None, true), "198.51.100.2");
    }

    #[test]
    fn proxy_headers_ignored_unless_trusted() {
        let map = headers(&[("x-forwarded-for", "203.0.113.7")]);
        let peer: SocketAddr = "192.0.2.9:5123".parse().unwrap();
        assert_eq!(resolve_identity(&map, Some(peer), false), "192.0.2.9");
        assert_eq!(resolve_identity(&map, None, false), "unknown");
    }

    #[test]
    fn refill_horizon_rounds_up() {
        let config = EngineConfig {
            identity_rate_limit: 30.0,
            identity_burst: 60,
            ..EngineConfig::default()
        };
        assert_eq!(full_refill_secs(&config), 2);
        let config = EngineConfig {
            identity_rate_limit: 40.0,
            identity_burst: 60,
            ..EngineConfig::default()
        };
        assert_eq!(full_refill_secs(&config), 2);
    }

    #[tokio::test]
    async fn admitted_requests_carry_limit_headers() {
        let coordinator = Arc::new(AdmissionCoordinator::new(test_config()).unwrap());
        let response = app(coordinator)
            .oneshot(request_from("203.0.113.10"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "3");
        assert_eq!(response.headers()["x-ratelimit-reset"], "3");
        assert!(response.headers().get("retry-after").is_none());
    }

    #[tokio::test]
    async fn exhausted_bucket_answers_429_with_structured_body() {
        let coordinator = Arc::new(AdmissionCoordinator::new(test_config()).unwrap());
        let router = app(coordinator.clone());

        for _ in 0..3 {
            let response = router
                .clone()
                .oneshot(request_from("203.0.113.11"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = router
            .clone()
            .oneshot(request_from("203.0.113.11"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        assert_eq!(response.headers()["x-ratelimit-limit"], "3");
        assert!(response.headers().get("retry-after").is_some());

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "rate_limited");
        assert_eq!(body["field"], "admission");
        assert_eq!(body["message"], "rate limit exceeded, slow down");
        assert_eq!(body["received"]["verdict"], "rate_limited");
        assert!(body["received"]["retry_after_secs"].as_u64().unwrap() >= 1);
        assert!(body["request_id"].as_str().is_some());
        assert!(body["docs_hint"].as_str().unwrap().contains("retry after"));

        // Other callers are unaffected.
        let response = router
            .oneshot(request_from("203.0.113.12"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let stats = coordinator.stats();
        assert_eq!(stats.total_requests, 5);
        assert_eq!(stats.rate_limited_count, 1);
    }

    #[tokio::test]
    async fn whitelisted_caller_is_never_limited() {
        let coordinator = Arc::new(AdmissionCoordinator::new(test_config()).unwrap());
        let router = app(coordinator);

        for _ in 0..10 {
            let response = router
                .clone()
                .oneshot(request_from("127.0.0.1"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
