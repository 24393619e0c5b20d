use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tracing::error;

use crate::errors::ApiError;
use crate::management::KeyManager;
use crate::models::{IssueKeyRequest, KeyStatus, RateLimitInfo, VerifyResponse};
use crate::store::{KeyStore, UsageStore};
use crate::verification::VerificationService;

/// Header carrying the credential on the verification endpoint.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Header carrying the authenticated owner on management endpoints. Set by
/// the upstream gateway that handles human sign-in.
pub const OWNER_HEADER: &str = "x-owner-id";

pub struct AppState<S> {
    pub verifier: VerificationService<S>,
    pub manager: KeyManager<S>,
}

pub fn router<S>(state: Arc<AppState<S>>) -> Router
where
    S: KeyStore + UsageStore + 'static,
{
    Router::new()
        .route("/v1/verify", post(verify_api_key::<S>))
        .route("/api-keys", post(create_api_key::<S>).get(list_api_keys::<S>))
        .route(
            "/api-keys/:id",
            get(get_api_key::<S>).delete(revoke_api_key::<S>),
        )
        .with_state(state)
}

/// Runs blocking store and hashing work off the async executor.
async fn blocking<S, T, F>(state: &Arc<AppState<S>>, f: F) -> Result<T, ApiError>
where
    S: KeyStore + UsageStore + 'static,
    T: Send + 'static,
    F: FnOnce(&AppState<S>) -> Result<T, ApiError> + Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| ApiError::Internal(format!("worker task failed: {}", e)))?
}

fn verify_failure(status: StatusCode, message: String) -> (StatusCode, Json<VerifyResponse>) {
    (
        status,
        Json(VerifyResponse {
            valid: false,
            key_id: None,
            user_id: None,
            project_id: None,
            error: Some(message),
            status: None,
            rate_limit: None,
        }),
    )
}

fn verification_error(err: ApiError) -> (StatusCode, Json<VerifyResponse>) {
    match err {
        ApiError::RateLimited { limit, reset_at } => {
            let (status, Json(mut body)) =
                verify_failure(StatusCode::TOO_MANY_REQUESTS, err.to_string());
            body.rate_limit = Some(RateLimitInfo {
                limit,
                remaining: 0,
                reset: reset_at,
            });
            (status, Json(body))
        }
        ApiError::KeyInactive(key_status) => {
            let (status, Json(mut body)) = verify_failure(StatusCode::UNAUTHORIZED, err.to_string());
            body.status = Some(key_status);
            (status, Json(body))
        }
        ApiError::KeyExpired => {
            let (status, Json(mut body)) = verify_failure(StatusCode::UNAUTHORIZED, err.to_string());
            body.status = Some(KeyStatus::Expired);
            (status, Json(body))
        }
        err if err.is_authentication_failure() => {
            verify_failure(StatusCode::UNAUTHORIZED, err.to_string())
        }
        err => {
            error!("Error verifying API key: {}", err);
            verify_failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
    }
}

async fn verify_api_key<S>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
) -> (StatusCode, Json<VerifyResponse>)
where
    S: KeyStore + UsageStore + 'static,
{
    let presented = match headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        Some(key) => key.to_string(),
        None => {
            return verify_failure(StatusCode::UNAUTHORIZED, "API key is required".to_string())
        }
    };

    match blocking(&state, move |state| state.verifier.verify(&presented)).await {
        Ok(verified) => (StatusCode::OK, Json(verified.into())),
        Err(e) => verification_error(e),
    }
}

type ManagementResult = Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)>;

fn management_error(err: ApiError) -> (StatusCode, Json<Value>) {
    let (status, message) = match err {
        ApiError::InvalidRequest(message) => (StatusCode::BAD_REQUEST, message),
        ApiError::KeyNotFound => (StatusCode::NOT_FOUND, err.to_string()),
        ApiError::Conflict(_) => (StatusCode::CONFLICT, "API key could not be issued".to_string()),
        err => {
            error!("Error managing API keys: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
    };
    (status, Json(json!({ "error": message })))
}

fn owner_from(headers: &HeaderMap) -> Result<String, (StatusCode, Json<Value>)> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|owner| !owner.is_empty())
        .map(str::to_string)
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))))
}

async fn create_api_key<S>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(mut payload): Json<IssueKeyRequest>,
) -> ManagementResult
where
    S: KeyStore + UsageStore + 'static,
{
    payload.owner_id = owner_from(&headers)?;

    let issued = blocking(&state, move |state| state.manager.issue(payload))
        .await
        .map_err(management_error)?;

    let mut api_key = serde_json::to_value(&issued.key)
        .map_err(|e| management_error(ApiError::Internal(e.to_string())))?;
    // The plaintext is returned here and nowhere else.
    api_key["key"] = json!(issued.plaintext);

    Ok((StatusCode::CREATED, Json(json!({ "apiKey": api_key }))))
}

async fn list_api_keys<S>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
) -> ManagementResult
where
    S: KeyStore + UsageStore + 'static,
{
    let owner = owner_from(&headers)?;
    let keys = blocking(&state, move |state| state.manager.list_for_owner(&owner))
        .await
        .map_err(management_error)?;

    Ok((StatusCode::OK, Json(json!({ "keys": keys }))))
}

async fn get_api_key<S>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ManagementResult
where
    S: KeyStore + UsageStore + 'static,
{
    let owner = owner_from(&headers)?;
    let details = blocking(&state, move |state| state.manager.get_for_owner(&owner, &id))
        .await
        .map_err(management_error)?;

    let mut api_key = serde_json::to_value(&details.key)
        .map_err(|e| management_error(ApiError::Internal(e.to_string())))?;
    api_key["remaining"] = json!(details.remaining);
    api_key["usage"] = json!(details.usage);

    Ok((StatusCode::OK, Json(json!({ "apiKey": api_key }))))
}

async fn revoke_api_key<S>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ManagementResult
where
    S: KeyStore + UsageStore + 'static,
{
    let owner = owner_from(&headers)?;
    let key = blocking(&state, move |state| state.manager.revoke(&owner, &id))
        .await
        .map_err(management_error)?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "message": "API key revoked successfully",
            "status": key.status,
        })),
    ))
}
