//! Unified error handling for the Learnwave backend.
//!
//! Layer-specific errors (payments, database) convert into a single
//! [`AppError`] with HTTP status mapping, user-facing messages and structured
//! error codes for client handling.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic client handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "PAYMENT_ALREADY_INITIATED")]
    PaymentAlreadyInitiated,
    #[serde(rename = "COURSE_NOT_FOUND")]
    CourseNotFound,
    #[serde(rename = "ACCOUNT_NOT_FOUND")]
    AccountNotFound,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503, 429)
    #[serde(rename = "PAYMENT_GATEWAY_ERROR")]
    PaymentGatewayError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "UNSUPPORTED_ISSUER")]
    UnsupportedIssuer,
}

/// Domain-specific business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Payment with the given id doesn't exist
    PaymentNotFound { payment_id: i64 },
    /// The request path may only drive Pending payments
    PaymentAlreadyInitiated { payment_id: i64, status: String },
    /// Course referenced by a purchase doesn't exist
    CourseNotFound { code: String },
    /// User account doesn't exist
    AccountNotFound { user_code: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
}

/// External service errors (the payment gateway)
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentGateway { message: String, is_retryable: bool },
    RateLimit { retry_after: Option<u64> },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Invalid { field: String, reason: String },
    UnsupportedIssuer { phone: String },
    MissingField { field: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => 404,
                DomainError::PaymentAlreadyInitiated { .. } => 409,
                DomainError::CourseNotFound { .. } => 404,
                DomainError::AccountNotFound { .. } => 404,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => 500,
                InfrastructureError::Configuration { .. } => 500,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => 502,
                ExternalError::RateLimit { .. } => 429,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::PaymentAlreadyInitiated { .. } => ErrorCode::PaymentAlreadyInitiated,
                DomainError::CourseNotFound { .. } => ErrorCode::CourseNotFound,
                DomainError::AccountNotFound { .. } => ErrorCode::AccountNotFound,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => ErrorCode::PaymentGatewayError,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::UnsupportedIssuer { .. } => ErrorCode::UnsupportedIssuer,
                _ => ErrorCode::ValidationError,
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { is_retryable, .. } => *is_retryable,
                ExternalError::RateLimit { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }

    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { payment_id } => {
                    format!("Payment {} was not found", payment_id)
                }
                DomainError::PaymentAlreadyInitiated { status, .. } => {
                    format!("Payment is already {} and cannot be initiated again", status)
                }
                DomainError::CourseNotFound { code } => {
                    format!("Course {} was not found", code)
                }
                DomainError::AccountNotFound { user_code } => {
                    format!("Account {} was not found", user_code)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "An internal error occurred. Please try again later.".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => {
                    "The payment gateway is temporarily unavailable".to_string()
                }
                ExternalError::RateLimit { .. } => {
                    "Too many requests. Please retry shortly".to_string()
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::Invalid { field, reason } => {
                    format!("Invalid value for {}: {}", field, reason)
                }
                ValidationError::UnsupportedIssuer { .. } => {
                    "This phone number is not served by a supported mobile money carrier"
                        .to_string()
                }
                ValidationError::MissingField { field } => {
                    format!("{} is required", field)
                }
            },
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())?;
        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_client_statuses() {
        let not_found = AppError::new(AppErrorKind::Domain(DomainError::PaymentNotFound {
            payment_id: 42,
        }));
        assert_eq!(not_found.status_code(), 404);
        assert_eq!(not_found.error_code(), ErrorCode::PaymentNotFound);

        let conflict = AppError::new(AppErrorKind::Domain(DomainError::PaymentAlreadyInitiated {
            payment_id: 42,
            status: "processing".to_string(),
        }));
        assert_eq!(conflict.status_code(), 409);
    }

    #[test]
    fn unsupported_issuer_is_a_400_with_its_own_code() {
        let err = AppError::new(AppErrorKind::Validation(ValidationError::UnsupportedIssuer {
            phone: "+14155551234".to_string(),
        }));
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), ErrorCode::UnsupportedIssuer);
        assert!(!err.is_retryable());
    }

    #[test]
    fn gateway_errors_carry_retryability() {
        let err = AppError::new(AppErrorKind::External(ExternalError::PaymentGateway {
            message: "timeout".to_string(),
            is_retryable: true,
        }));
        assert_eq!(err.status_code(), 502);
        assert!(err.is_retryable());
    }

    #[test]
    fn request_id_is_attached() {
        let err = AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: "down".to_string(),
            is_retryable: true,
        }))
        .with_request_id("req_123");
        assert_eq!(err.request_id.as_deref(), Some("req_123"));
        assert_eq!(err.status_code(), 500);
    }
}
