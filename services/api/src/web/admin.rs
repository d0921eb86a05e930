//! services/api/src/web/admin.rs
//!
//! Operator endpoints guarded by the admin API key.

use crate::error::ApiError;
use crate::web::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use bridge_core::usage::translation_limit;
use bridge_core::{NewUser, PortError, Role, SubscriptionPlan};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub const ADMIN_KEY_HEADER: &str = "x-admin-api-key";

#[derive(Deserialize, ToSchema)]
pub struct CreateUserRequest {
    email: String,
    name: String,
    #[serde(default)]
    #[schema(value_type = Option<String>, example = "internal")]
    role: Option<Role>,
    #[serde(default)]
    #[schema(value_type = Option<String>, example = "free")]
    plan: Option<SubscriptionPlan>,
}

#[derive(Serialize, ToSchema)]
pub struct CreatedUser {
    id: Uuid,
    email: String,
    name: String,
    #[schema(value_type = String)]
    role: Role,
    #[schema(value_type = String)]
    plan: SubscriptionPlan,
}

#[derive(Serialize, ToSchema)]
pub struct CreateUserResponse {
    success: bool,
    user: CreatedUser,
}

fn check_admin_key(configured: Option<&str>, headers: &HeaderMap) -> Result<(), ApiError> {
    let configured = configured.ok_or_else(|| {
        ApiError::ServiceUnavailable("Admin API is not configured".to_string())
    })?;
    let presented = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if bool::from(presented.as_bytes().ct_eq(configured.as_bytes())) {
        Ok(())
    } else {
        warn!("Rejected admin request with an invalid API key");
        Err(ApiError::Unauthorized)
    }
}

/// Create an account with a given role and plan.
#[utoipa::path(
    post,
    path = "/admin/users",
    request_body = CreateUserRequest,
    params(("x-admin-api-key" = String, Header, description = "Admin API key")),
    responses(
        (status = 201, description = "User created", body = CreateUserResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Invalid API key"),
        (status = 409, description = "A user with this email already exists"),
        (status = 503, description = "Admin API not configured")
    )
)]
pub async fn create_user_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateUserResponse>), ApiError> {
    check_admin_key(state.config.admin_api_key.as_deref(), &headers)?;
    let Json(request) = payload?;

    let email = request.email.trim().to_lowercase();
    let name = request.name.trim().to_string();
    if !email.contains('@') || name.is_empty() {
        return Err(ApiError::BadRequest(
            "A valid email and a name are required".to_string(),
        ));
    }
    let role = request.role.unwrap_or_default();
    let plan = request.plan.unwrap_or_default();

    let user = state
        .db
        .create_user(NewUser {
            email,
            name,
            role,
            subscription_plan: plan,
            translation_limit: translation_limit(Some(plan)),
        })
        .await
        .map_err(|e| match e {
            PortError::Conflict(_) => ApiError::Conflict {
                code: "USER_EXISTS",
                message: "User with this email already exists".to_string(),
            },
            other => other.into(),
        })?;
    info!(user_id = %user.id, role = %user.role, "Created user through the admin API");

    Ok((
        StatusCode::CREATED,
        Json(CreateUserResponse {
            success: true,
            user: CreatedUser {
                id: user.id,
                email: user.email,
                name: user.name,
                role: user.role,
                plan: user.subscription_plan,
            },
        }),
    ))
}
