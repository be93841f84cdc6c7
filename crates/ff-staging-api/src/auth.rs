use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;

use crate::{ApiError, AppState};

/// Field devices authenticate with an API key plus a device identifier on
/// every request.
pub(crate) async fn require_field_device(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = request.headers();

    let api_key = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if api_key.is_empty() || !state.api_keys().iter().any(|key| key == api_key) {
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "valid field API key required",
        ));
    }

    let device_id = headers
        .get("x-device-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if device_id.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "MISSING_DEVICE_ID",
            "x-device-id header required for field devices",
        ));
    }

    Ok(next.run(request).await)
}
