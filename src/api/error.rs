//! HTTP error mapping. Every error body is `{code, message, errors: {field: message}}`.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use crate::checkout::{CheckoutError, FieldErrors};
use crate::context::ActorError;
use crate::fulfillment::TransitionError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Checkout(#[from] CheckoutError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid identity headers: {0}")]
    Unauthorized(#[from] ActorError),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("malformed request body: {0}")]
    MalformedBody(String),
    #[error("validation failed: {0}")]
    Validation(FieldErrors),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self { Self::MalformedBody(rejection.body_text()) }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, FieldErrors) {
        let single = |field: &str, message: String| {
            let mut errors = FieldErrors::default();
            errors.insert(field, message);
            errors
        };
        match self {
            Self::Checkout(e) => match e {
                CheckoutError::EmptyCart => (StatusCode::BAD_REQUEST, "empty_cart", single("items", e.to_string())),
                CheckoutError::Validation(errors) => (StatusCode::BAD_REQUEST, "validation_failed", errors.clone()),
                CheckoutError::UnknownProduct(_) => (StatusCode::UNPROCESSABLE_ENTITY, "unknown_product", single("items", e.to_string())),
                CheckoutError::InsufficientStock { .. } => (StatusCode::CONFLICT, "insufficient_stock", single("items", e.to_string())),
                CheckoutError::Store(_) | CheckoutError::Order(_) | CheckoutError::Shipping(_) => internal(),
            },
            Self::Transition(e) => match e {
                TransitionError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found", FieldErrors::default()),
                TransitionError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden", FieldErrors::default()),
                TransitionError::InvalidTransition { .. } => (StatusCode::BAD_REQUEST, "invalid_transition", single("status", e.to_string())),
                TransitionError::Store(_) => internal(),
            },
            Self::Store(_) => internal(),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized", FieldErrors::default()),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden", FieldErrors::default()),
            Self::MalformedBody(message) => (StatusCode::BAD_REQUEST, "malformed_body", single("body", message.clone())),
            Self::Validation(errors) => (StatusCode::BAD_REQUEST, "validation_failed", errors.clone()),
        }
    }
}

fn internal() -> (StatusCode, &'static str, FieldErrors) {
    (StatusCode::INTERNAL_SERVER_ERROR, "internal", FieldErrors::default())
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, errors) = self.parts();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "code": code, "message": message, "errors": errors }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use crate::domain::value_objects::Quantity;

    #[test]
    fn test_status_mapping() {
        let stock = ApiError::from(CheckoutError::InsufficientStock { product_id: Uuid::nil(), requested: Quantity::new(3), available: Quantity::new(1) });
        assert_eq!(stock.parts().0, StatusCode::CONFLICT);
        assert_eq!(ApiError::from(CheckoutError::UnknownProduct(Uuid::nil())).parts().0, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ApiError::from(CheckoutError::EmptyCart).parts().0, StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::from(TransitionError::Forbidden("no")).parts().0, StatusCode::FORBIDDEN);
        let invalid = ApiError::from(TransitionError::InvalidTransition { entity: "item", from: "REJECTED".into(), to: "REJECTED".into() });
        let (status, code, errors) = invalid.parts();
        assert_eq!((status, code), (StatusCode::BAD_REQUEST, "invalid_transition"));
        assert_eq!(errors.get("status"), Some("cannot move item from REJECTED to REJECTED"));
        assert_eq!(ApiError::from(StoreError::Corrupt("x".into())).parts().0, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
