use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use sentinel_core::{AdmissionCoordinator, EngineConfig};

mod error;
mod middleware;
mod routes;
mod state;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Sentinel Admission API",
        version = "0.1.0",
        description = "Request admission and DoS mitigation in front of HTTP services."
    ),
    paths(
        routes::health::health_check,
        routes::admin::get_admission_stats,
        routes::admin::inspect_identity,
        routes::admin::reset_identity,
    ),
    components(schemas(
        HealthResponse,
        routes::admin::ResetIdentityResponse,
        sentinel_core::error::ApiError,
        sentinel_core::AdmissionStats,
        sentinel_core::ConfigSummary,
        sentinel_core::IdentitySnapshot,
        sentinel_core::IdentityState,
        sentinel_core::BlockReason,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn load_engine_config() -> Result<EngineConfig, sentinel_core::ConfigError> {
    match std::env::var("SENTINEL_CONFIG") {
        Ok(path) if !path.trim().is_empty() => {
            tracing::info!(path = %path, "loading admission config");
            EngineConfig::from_file(path.trim())
        }
        _ => {
            tracing::info!("SENTINEL_CONFIG not set; using default admission config");
            Ok(EngineConfig::default())
        }
    }
}

fn build_app(state: state::AppState, trust_proxy_headers: bool) -> Router {
    let admission = middleware::admission::AdmissionLayer::new(state.coordinator.clone())
        .trust_proxy_headers(trust_proxy_headers);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::admin::router())
        .layer(admission)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::cors::build_cors_layer()),
        )
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sentinel_api=debug,sentinel_core=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = match load_engine_config() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid admission config");
            std::process::exit(1);
        }
    };

    let coordinator = match AdmissionCoordinator::start(config).await {
        Ok(coordinator) => Arc::new(coordinator),
        Err(err) => {
            tracing::error!(error = %err, "admission engine failed to start");
            std::process::exit(1);
        }
    };

    let admin_token = std::env::var("SENTINEL_ADMIN_TOKEN").ok();
    if admin_token.is_none() {
        tracing::warn!("SENTINEL_ADMIN_TOKEN not set; admin routes will reject all requests");
    }
    let app_state = state::AppState::new(coordinator.clone(), admin_token.as_deref());

    let trust_proxy_headers = env_flag("SENTINEL_TRUST_PROXY_HEADERS");
    let app = build_app(app_state, trust_proxy_headers);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, %addr, "failed to bind listener");
            std::process::exit(1);
        }
    };
    tracing::info!(trust_proxy_headers, "Sentinel API listening on {}", addr);

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;
    if let Err(err) = served {
        tracing::error!(error = %err, "server error");
    }

    coordinator.shutdown().await;
    tracing::info!("Sentinel API stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_passes_through_admission() {
        let coordinator = Arc::new(AdmissionCoordinator::new(EngineConfig::default()).unwrap());
        let app = build_app(state::AppState::new(coordinator.clone(), None), true);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("x-forwarded-for", "203.0.113.40")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "60");
        assert_eq!(coordinator.stats().total_requests, 1);
    }

    #[test]
    fn openapi_lists_admin_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/health"));
        assert!(doc.paths.paths.contains_key("/v1/admin/admission/stats"));
        assert!(
            doc.paths
                .paths
                .contains_key("/v1/admin/admission/identities/{identity}/reset")
        );
    }
}
