use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use sentinel_core::auth::{bearer_token, verify_token};
use sentinel_core::error::ApiError;
use sentinel_core::{AdmissionStats, IdentitySnapshot};

use crate::error::AppError;
use crate::state::AppState;

const MAX_IDENTITY_LEN: usize = 256;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/admission/stats", get(get_admission_stats))
        .route(
            "/v1/admin/admission/identities/{identity}",
            get(inspect_identity),
        )
        .route(
            "/v1/admin/admission/identities/{identity}/reset",
            post(reset_identity),
        )
}

/// Proof that the request carried the configured admin token.
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected_hash) = state.admin_token_hash.as_deref() else {
            return Err(AppError::Unauthorized {
                message: "Admin API is disabled".to_string(),
                docs_hint: Some(
                    "Set SENTINEL_ADMIN_TOKEN on the server to enable admin routes.".to_string(),
                ),
            });
        };

        let header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
                docs_hint: Some("Include 'Authorization: Bearer <admin token>' header.".to_string()),
            })?;

        let token = bearer_token(header).ok_or_else(|| AppError::Unauthorized {
            message: "Authorization header must use Bearer scheme".to_string(),
            docs_hint: Some("Format: 'Authorization: Bearer <token>'".to_string()),
        })?;

        if !verify_token(token, expected_hash) {
            tracing::warn!("admin request with invalid token");
            return Err(AppError::Unauthorized {
                message: "Invalid admin token".to_string(),
                docs_hint: None,
            });
        }

        Ok(AdminAuth)
    }
}

/// Response for POST /v1/admin/admission/identities/{identity}/reset
#[derive(Serialize, utoipa::ToSchema)]
pub struct ResetIdentityResponse {
    pub identity: String,
    /// Whether any state existed for the identity before the reset.
    pub had_state: bool,
}

fn validate_identity(identity: &str) -> Result<(), AppError> {
    if identity.trim().is_empty() || identity.len() > MAX_IDENTITY_LEN {
        return Err(AppError::Validation {
            message: format!("identity must be 1-{MAX_IDENTITY_LEN} non-blank characters"),
            field: Some("identity".to_string()),
            received: Some(serde_json::Value::String(identity.to_string())),
        });
    }
    Ok(())
}

/// Aggregate admission counters and current table sizes
#[utoipa::path(
    get,
    path = "/v1/admin/admission/stats",
    responses(
        (status = 200, description = "Admission statistics", body = AdmissionStats),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn get_admission_stats(
    State(state): State<AppState>,
    _admin: AdminAuth,
) -> Json<AdmissionStats> {
    Json(state.coordinator.stats())
}

/// Current limiter and block state for one identity
#[utoipa::path(
    get,
    path = "/v1/admin/admission/identities/{identity}",
    params(("identity" = String, Path, description = "Caller identity, usually an IP address")),
    responses(
        (status = 200, description = "Identity state", body = IdentitySnapshot),
        (status = 400, description = "Invalid identity", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn inspect_identity(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(identity): Path<String>,
) -> Result<Json<IdentitySnapshot>, AppError> {
    validate_identity(&identity)?;
    Ok(Json(state.coordinator.inspect_identity(&identity)))
}

/// Clear every piece of state held for an identity, including an active block
#[utoipa::path(
    post,
    path = "/v1/admin/admission/identities/{identity}/reset",
    params(("identity" = String, Path, description = "Caller identity, usually an IP address")),
    responses(
        (status = 200, description = "Identity reset", body = ResetIdentityResponse),
        (status = 400, description = "Invalid identity", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn reset_identity(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(identity): Path<String>,
) -> Result<Json<ResetIdentityResponse>, AppError> {
    validate_identity(&identity)?;
    let had_state = state.coordinator.reset_identity(&identity);
    tracing::info!(identity = %identity, had_state, "admission state reset by admin");
    Ok(Json(ResetIdentityResponse {
        identity,
        had_state,
    }))
}
