use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Unsupported mobile issuer for {phone}")]
    UnsupportedIssuer { phone: String },

    #[error("Gateway communication error: {message}")]
    Network { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Gateway error: {message}")]
    Gateway {
        message: String,
        gateway_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::Validation { .. } => false,
            PaymentError::UnsupportedIssuer { .. } => false,
            PaymentError::Network { .. } => true,
            PaymentError::RateLimit { .. } => true,
            PaymentError::Gateway { retryable, .. } => *retryable,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::Validation { .. } => 400,
            PaymentError::UnsupportedIssuer { .. } => 400,
            PaymentError::Network { .. } => 503,
            PaymentError::RateLimit { .. } => 429,
            PaymentError::Gateway { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::Validation { message, .. } => message.clone(),
            PaymentError::UnsupportedIssuer { .. } => {
                "This phone number is not served by a supported mobile money carrier".to_string()
            }
            PaymentError::Network { .. } => {
                "Payment gateway is temporarily unavailable".to_string()
            }
            PaymentError::RateLimit { .. } => {
                "Too many requests to the payment gateway. Please retry shortly".to_string()
            }
            PaymentError::Gateway { .. } => "Payment gateway returned an error".to_string(),
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};

        match &err {
            PaymentError::Validation { message, field } => {
                AppError::new(AppErrorKind::Validation(ValidationError::Invalid {
                    field: field.clone().unwrap_or_else(|| "request".to_string()),
                    reason: message.clone(),
                }))
            }
            PaymentError::UnsupportedIssuer { phone } => AppError::new(AppErrorKind::Validation(
                ValidationError::UnsupportedIssuer {
                    phone: phone.clone(),
                },
            )),
            _ => AppError::new(AppErrorKind::External(ExternalError::PaymentGateway {
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            })),
        }
    }
}
