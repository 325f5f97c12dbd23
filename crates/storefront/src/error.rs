//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures server-side failures to
//! Sentry before responding to the client. All route handlers return
//! `Result<T, AppError>`; the response body is always JSON:
//!
//! ```json
//! {"message": "...", "code": "...", "fields": {...}, "retry_after": 3, "login_url": "/login"}
//! ```
//!
//! Only `message` is always present.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::api::{ApiError, FieldErrors};
use crate::checkout::CheckoutError;

/// Where shoppers are sent to sign in.
pub const LOGIN_URL: &str = "/login";

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Backend API call failed.
    #[error("Backend error: {0}")]
    Api(#[from] ApiError),

    /// Checkout operation failed.
    #[error("Checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    /// Session store operation failed.
    #[error("Session error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<FieldErrors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    login_url: Option<&'static str>,
}

fn api_status(err: &ApiError) -> StatusCode {
    match err {
        ApiError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
        ApiError::VersionConflict { .. } | ApiError::CartChanged => StatusCode::CONFLICT,
        ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        ApiError::CheckoutExpired => StatusCode::GONE,
        ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ApiError::Server { status, .. } if *status < 500 => StatusCode::BAD_REQUEST,
        ApiError::Http(_) | ApiError::Parse(_) | ApiError::CsrfMismatch | ApiError::Server { .. } => {
            StatusCode::BAD_GATEWAY
        }
    }
}

const fn api_code(err: &ApiError) -> Option<&'static str> {
    match err {
        ApiError::Validation { .. } => Some("validation"),
        ApiError::VersionConflict { .. } => Some("version_conflict"),
        ApiError::CartChanged => Some("cart_changed"),
        ApiError::CheckoutExpired => Some("checkout_expired"),
        ApiError::RateLimited(_) => Some("rate_limited"),
        _ => None,
    }
}

fn single_field(field: &str, message: String) -> FieldErrors {
    FieldErrors::from([(field.to_string(), vec![message])])
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Api(err) | Self::Checkout(CheckoutError::Api(err)) => api_status(err),
            Self::Checkout(err) => match err {
                CheckoutError::IllegalTransition { .. }
                | CheckoutError::NotReady { .. }
                | CheckoutError::CartChanged
                | CheckoutError::Superseded => StatusCode::CONFLICT,
                CheckoutError::Expired => StatusCode::GONE,
                CheckoutError::EmptyCart
                | CheckoutError::UnknownQuote
                | CheckoutError::WarehouseRequired(_)
                | CheckoutError::InvalidAddress(_)
                | CheckoutError::LoyaltyLimit { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                CheckoutError::Api(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Session(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn body(&self) -> ErrorBody {
        let mut body = ErrorBody {
            message: String::new(),
            code: None,
            fields: None,
            retry_after: None,
            login_url: None,
        };

        match self {
            Self::Api(err) | Self::Checkout(CheckoutError::Api(err)) => {
                body.message = err.user_message();
                body.code = api_code(err);
                body.fields = err.field_errors().cloned();
                body.retry_after = err.retry_after();
                if matches!(err, ApiError::Unauthorized) {
                    body.login_url = Some(LOGIN_URL);
                }
            }
            Self::Checkout(err) => {
                body.message = err.user_message();
                body.code = Some(match err {
                    CheckoutError::IllegalTransition { .. } => "illegal_transition",
                    CheckoutError::NotReady { .. } => "not_ready",
                    CheckoutError::CartChanged => "cart_changed",
                    CheckoutError::Expired => "checkout_expired",
                    CheckoutError::Superseded => "superseded",
                    CheckoutError::EmptyCart => "empty_cart",
                    CheckoutError::UnknownQuote => "unknown_quote",
                    CheckoutError::WarehouseRequired(_) => "warehouse_required",
                    CheckoutError::InvalidAddress(_) | CheckoutError::LoyaltyLimit { .. } => {
                        "validation"
                    }
                    CheckoutError::Api(_) => "backend",
                });
                body.fields = match err {
                    CheckoutError::InvalidAddress(fields) => Some(fields.clone()),
                    CheckoutError::WarehouseRequired(_) => {
                        Some(single_field("warehouse_ref", err.user_message()))
                    }
                    CheckoutError::LoyaltyLimit { .. } => {
                        Some(single_field("points", err.user_message()))
                    }
                    _ => None,
                };
            }
            Self::NotFound(_) => body.message = "The requested item was not found".to_string(),
            Self::BadRequest(msg) => body.message.clone_from(msg),
            // Don't expose internal error details to clients
            Self::Session(_) | Self::Internal(_) => {
                body.message = "Internal server error".to_string();
            }
        }
        body
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        } else {
            tracing::debug!(error = %self, %status, "Request rejected");
        }

        let body = self.body();
        let retry_after = body.retry_after;
        let mut response = (status, Json(body)).into_response();

        if let Some(seconds) = retry_after
            && let Ok(value) = HeaderValue::from_str(&seconds.to_string())
        {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
        response
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Add a breadcrumb for shopper actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of actions
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("cart", "Added item", Some(&[("variant_id", "123")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use emporium_core::{CartVersion, CheckoutStep, Transition};

    fn get_status(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("product-123".to_string());
        assert_eq!(err.to_string(), "Not found: product-123");

        let err = AppError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            get_status(AppError::NotFound("test".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(ApiError::Unauthorized.into()),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(ApiError::VersionConflict { current: Some(CartVersion::new(4)) }.into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(ApiError::Server { status: 503, message: String::new() }.into()),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            get_status(CheckoutError::NotReady { missing: vec!["payment"] }.into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(CheckoutError::Expired.into()),
            StatusCode::GONE
        );
        assert_eq!(
            get_status(
                CheckoutError::IllegalTransition {
                    from: CheckoutStep::Idle,
                    transition: Transition::Confirm
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(AppError::Internal("test".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_rate_limit_sets_retry_after() {
        let response = AppError::from(ApiError::RateLimited(7)).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "7");
    }

    #[test]
    fn test_unauthorized_body_has_login_url() {
        let body = AppError::from(ApiError::Unauthorized).body();
        assert_eq!(body.login_url, Some(LOGIN_URL));
        assert!(body.fields.is_none());
    }

    #[test]
    fn test_validation_body_carries_fields() {
        let fields = single_field("email", "The email must be valid.".to_string());
        let body = AppError::from(ApiError::Validation {
            message: "The given data was invalid.".to_string(),
            fields: fields.clone(),
        })
        .body();
        assert_eq!(body.message, "The given data was invalid.");
        assert_eq!(body.fields, Some(fields));
        assert_eq!(body.code, Some("validation"));
    }

    #[test]
    fn test_checkout_api_error_uses_api_status() {
        let err = AppError::from(CheckoutError::Api(ApiError::RateLimited(2)));
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.body().retry_after, Some(2));
    }
}
