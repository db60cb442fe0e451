use crate::errors::{FieldErrors, ServiceError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use validator::Validate;

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(data)).into_response()
}

/// Validate request input, reporting every failing field
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input
        .validate()
        .map_err(|e| ServiceError::InvalidFields(FieldErrors::from(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[derive(Validate)]
    struct Quantity {
        #[validate(range(min = 1, message = "must be at least 1"))]
        quantity: i32,
    }

    #[test]
    fn validate_input_collects_field_errors() {
        assert!(validate_input(&Quantity { quantity: 2 }).is_ok());
        assert_matches!(
            validate_input(&Quantity { quantity: 0 }),
            Err(ServiceError::InvalidFields(fields)) if fields.contains("quantity")
        );
    }

    #[test]
    fn created_response_sets_status() {
        assert_eq!(created_response("x").status(), StatusCode::CREATED);
        assert_eq!(success_response("x").status(), StatusCode::OK);
    }
}
