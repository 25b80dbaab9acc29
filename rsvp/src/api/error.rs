//! HTTP error mapping.
//!
//! Every failure leaves a handler as an [`ApiError`], rendered as
//! `{"success": false, "reason": "...", "message": "..."}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rsvp_core::{RsvpError, StoreError};
use serde::Serialize;
use std::fmt;

/// Error returned by API handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    reason: &'static str,
    message: String,
    // Logged for 5xx, never sent to the client
    detail: Option<String>,
}

impl ApiError {
    /// Create a new error.
    #[must_use]
    pub fn new(status: StatusCode, reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            reason,
            message: message.into(),
            detail: None,
        }
    }

    /// Attach an internal detail for the log.
    #[must_use]
    pub fn with_detail(mut self, detail: impl fmt::Display) -> Self {
        self.detail = Some(detail.to_string());
        self
    }

    /// 400 with reason `ValidationError`.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "ValidationError", message)
    }

    /// 401 Unauthorized.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized", message)
    }

    /// 404 Not Found.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "NotFound",
            format!("{resource} with id {id} not found"),
        )
    }

    /// 500 with reason `InternalError`.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", message)
    }

    /// HTTP status
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable reason
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        self.reason
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.reason, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<RsvpError> for ApiError {
    fn from(error: RsvpError) -> Self {
        match error {
            RsvpError::Validation(message) => Self::validation(message),
            RsvpError::DuplicateRegistration => Self::new(
                StatusCode::BAD_REQUEST,
                "AlreadyRegistered",
                "You are already registered for this event",
            ),
            RsvpError::CapacityExceeded => Self::new(
                StatusCode::BAD_REQUEST,
                "CapacityExceeded",
                "This event is at full capacity",
            ),
            RsvpError::EventNotFound(id) => Self::not_found("Event", id),
            RsvpError::PaymentInitiation(source) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "PaymentInitiationFailed",
                "Could not start the payment, please try again",
            )
            .with_detail(source),
            RsvpError::Storage(source) => source.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        Self::internal("Internal server error").with_detail(error)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    reason: &'a str,
    message: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                reason = self.reason,
                message = %self.message,
                detail = self.detail.as_deref().unwrap_or("-"),
                "Internal server error"
            );
        }

        let body = ErrorBody {
            success: false,
            reason: self.reason,
            message: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}
