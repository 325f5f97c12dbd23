//! Backend error taxonomy.
//!
//! Every non-success response from the backend is classified into an
//! [`ApiError`] here, once, so callers match on variants instead of status
//! codes.

use std::collections::BTreeMap;

use emporium_core::CartVersion;
use reqwest::StatusCode;
use reqwest::header::{ETAG, HeaderMap, RETRY_AFTER};
use serde::Deserialize;
use thiserror::Error;

/// Laravel-style status for a rejected CSRF token.
pub const CSRF_MISMATCH_STATUS: u16 = 419;

/// Backend error code sent when the cart changed under a checkout session.
pub const CODE_CART_CHANGED: &str = "CART_CHANGED";

/// Backend error code sent when a checkout session timed out.
pub const CODE_CHECKOUT_EXPIRED: &str = "CHECKOUT_EXPIRED";

/// Field name -> messages, as returned with a 422.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Errors that can occur when calling the backend REST API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body did not match the expected shape.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Request was rejected with field-level messages (422).
    #[error("Validation failed: {message}")]
    Validation {
        /// Summary message.
        message: String,
        /// Per-field messages.
        fields: FieldErrors,
    },

    /// Caller is not authenticated (401).
    #[error("Unauthorized")]
    Unauthorized,

    /// The `If-Match` precondition did not hold (409).
    #[error("Version conflict (server version: {})", .current.map_or_else(|| "unknown".to_string(), |v| v.to_string()))]
    VersionConflict {
        /// The server's current version, when it reported one.
        current: Option<CartVersion>,
    },

    /// Too many requests (429).
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Resource not found (404).
    #[error("Not found: {0}")]
    NotFound(String),

    /// The cart changed after the checkout session was started.
    #[error("Cart changed since checkout started")]
    CartChanged,

    /// The checkout session expired on the server.
    #[error("Checkout session expired")]
    CheckoutExpired,

    /// CSRF token was rejected even after a refresh.
    #[error("CSRF token mismatch")]
    CsrfMismatch,

    /// Any other non-success status.
    #[error("Backend error {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Message from the body, or a truncated body.
        message: String,
    },

    /// The request could not be built.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// Message suitable for showing to a shopper.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { message, .. } => message.clone(),
            Self::Unauthorized => "Please sign in to continue".to_string(),
            Self::VersionConflict { .. } => {
                "Your cart was updated elsewhere. Please review it and try again".to_string()
            }
            Self::RateLimited(seconds) => {
                format!("Too many requests. Please try again in {seconds} seconds")
            }
            Self::NotFound(_) => "The requested item was not found".to_string(),
            Self::CartChanged => {
                "Your cart changed. Checkout has been restarted".to_string()
            }
            Self::CheckoutExpired => {
                "Your checkout session expired. Please start again".to_string()
            }
            Self::CsrfMismatch => "Your session expired. Please reload the page".to_string(),
            Self::Http(_) | Self::Parse(_) | Self::Server { .. } | Self::InvalidRequest(_) => {
                "Something went wrong. Please try again".to_string()
            }
        }
    }

    /// Field-level messages, for validation failures.
    #[must_use]
    pub const fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            Self::Validation { fields, .. } => Some(fields),
            _ => None,
        }
    }

    /// Seconds to wait before retrying, for rate-limit failures.
    #[must_use]
    pub const fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited(seconds) => Some(*seconds),
            _ => None,
        }
    }

    /// Whether this failure means the checkout session is gone for good.
    #[must_use]
    pub const fn ends_checkout(&self) -> bool {
        matches!(self, Self::CartChanged | Self::CheckoutExpired)
    }
}

/// Error body shape shared by all backend endpoints.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    #[serde(default)]
    errors: FieldErrors,
    code: Option<String>,
    current_version: Option<u64>,
}

/// Classify a non-success response.
pub(crate) fn classify(status: StatusCode, headers: &HeaderMap, body: &str) -> ApiError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();

    match parsed.code.as_deref() {
        Some(CODE_CART_CHANGED) => return ApiError::CartChanged,
        Some(CODE_CHECKOUT_EXPIRED) => return ApiError::CheckoutExpired,
        _ => {}
    }

    let message = parsed
        .message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| body.chars().take(200).collect());

    match status.as_u16() {
        401 => ApiError::Unauthorized,
        404 => ApiError::NotFound(message),
        409 => ApiError::VersionConflict {
            current: parsed.current_version.map(CartVersion::new).or_else(|| {
                headers
                    .get(ETAG)
                    .and_then(|v| v.to_str().ok())
                    .and_then(CartVersion::parse_etag)
            }),
        },
        410 => ApiError::CheckoutExpired,
        CSRF_MISMATCH_STATUS => ApiError::CsrfMismatch,
        422 => ApiError::Validation {
            message,
            fields: parsed.errors,
        },
        429 => ApiError::RateLimited(
            headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(1),
        ),
        code => ApiError::Server {
            status: code,
            message,
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    fn status(code: u16) -> StatusCode {
        StatusCode::from_u16(code).unwrap()
    }

    #[test]
    fn test_classify_validation_keeps_fields() {
        let body = r#"{"message":"The given data was invalid.","errors":{"phone":["The phone field is required."]}}"#;
        let err = classify(status(422), &HeaderMap::new(), body);

        assert_eq!(err.user_message(), "The given data was invalid.");
        let fields = err.field_errors().unwrap();
        assert_eq!(fields["phone"], vec!["The phone field is required."]);
    }

    #[test]
    fn test_classify_conflict_reads_body_version() {
        let err = classify(status(409), &HeaderMap::new(), r#"{"current_version":9}"#);
        assert!(matches!(
            err,
            ApiError::VersionConflict { current: Some(v) } if v == CartVersion::new(9)
        ));
    }

    #[test]
    fn test_classify_conflict_falls_back_to_etag() {
        let mut headers = HeaderMap::new();
        headers.insert(ETAG, HeaderValue::from_static("\"4\""));
        let err = classify(status(409), &headers, "");
        assert!(matches!(
            err,
            ApiError::VersionConflict { current: Some(v) } if v == CartVersion::new(4)
        ));
    }

    #[test]
    fn test_classify_rate_limit_uses_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        let err = classify(status(429), &headers, "");
        assert_eq!(err.retry_after(), Some(30));

        let err = classify(status(429), &HeaderMap::new(), "");
        assert_eq!(err.retry_after(), Some(1));
    }

    #[test]
    fn test_classify_error_codes_win_over_status() {
        let err = classify(status(409), &HeaderMap::new(), r#"{"code":"CART_CHANGED"}"#);
        assert!(matches!(err, ApiError::CartChanged));
        assert!(err.ends_checkout());

        let err = classify(status(422), &HeaderMap::new(), r#"{"code":"CHECKOUT_EXPIRED"}"#);
        assert!(matches!(err, ApiError::CheckoutExpired));
    }

    #[test]
    fn test_classify_simple_statuses() {
        assert!(matches!(
            classify(status(401), &HeaderMap::new(), ""),
            ApiError::Unauthorized
        ));
        assert!(matches!(
            classify(status(404), &HeaderMap::new(), r#"{"message":"No such product"}"#),
            ApiError::NotFound(m) if m == "No such product"
        ));
        assert!(matches!(
            classify(status(419), &HeaderMap::new(), ""),
            ApiError::CsrfMismatch
        ));
        assert!(matches!(
            classify(status(503), &HeaderMap::new(), "upstream down"),
            ApiError::Server { status: 503, message } if message == "upstream down"
        ));
    }

    #[test]
    fn test_server_errors_hide_details_from_shoppers() {
        let err = ApiError::Server {
            status: 500,
            message: "SQLSTATE[HY000]".to_string(),
        };
        assert_eq!(err.user_message(), "Something went wrong. Please try again");
    }
}
