use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use service::ServiceError;
use tracing::error;

/// Error returned by request handlers, rendered as a JSON body with the
/// error kind, a message and kind-specific details.
#[derive(Debug)]
pub enum ApiError {
    Service(ServiceError),
    /// The upstream authentication layer did not supply a usable identity.
    MissingIdentity(String),
    BadRequest(String),
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        ApiError::Service(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Status code for each kind of business error.
pub fn status_of(e: &ServiceError) -> StatusCode {
    match e {
        ServiceError::NotFound(_) | ServiceError::ItemNotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::Unauthorized => StatusCode::FORBIDDEN,
        ServiceError::InvalidTransition { .. } | ServiceError::Contention => StatusCode::CONFLICT,
        ServiceError::InsufficientStock { .. }
        | ServiceError::StaleCartItem { .. }
        | ServiceError::SlotUnavailable
        | ServiceError::InvalidLineItem(_)
        | ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
        ServiceError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn body_of(e: &ServiceError) -> Value {
    let mut body = json!({ "error": e.kind(), "message": e.to_string() });
    match e {
        ServiceError::InsufficientStock { product_id, available } => {
            body["productId"] = json!(product_id);
            body["available"] = json!(available);
        }
        ServiceError::StaleCartItem { product_id, requested, available } => {
            body["productId"] = json!(product_id);
            body["requested"] = json!(requested);
            body["available"] = json!(available);
        }
        ServiceError::InvalidTransition { from, to } => {
            body["from"] = json!(from);
            body["to"] = json!(to);
        }
        ServiceError::Repository(_) => {
            body["message"] = json!("Internal server error");
        }
        _ => {}
    }
    body
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Service(e) => {
                let status = status_of(&e);
                if status.is_server_error() {
                    error!("Request failed: {}", e);
                }
                (status, Json(body_of(&e))).into_response()
            }
            ApiError::MissingIdentity(message) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Unauthenticated", "message": message })),
            )
                .into_response(),
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "BadRequest", "message": message })),
            )
                .into_response(),
        }
    }
}
