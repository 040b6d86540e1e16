//! Request-path operations on payments: create, initiate, read.
//!
//! The request path only ever performs Pending → Processing; every other
//! mutation belongs to the reconciliation worker. Both paths go through the
//! state machine and the dispatcher, so the status-guarded UPDATE is the
//! single point deciding races.

use crate::database::payment_repository::{NewPayment, Payment, PaymentRepository};
use crate::error::{AppError, AppErrorKind, DomainError};
use crate::payments::error::PaymentError;
use crate::payments::gateway::PaymentGateway;
use crate::payments::issuers::{normalize_phone, IssuerDirectory};
use crate::payments::machine::{self, GatewayOutcome};
use crate::payments::types::{
    validate_amount, ContactInfo, PaymentDetails, PaymentMode, PaymentReason,
};
use crate::services::effects::SideEffectDispatcher;
use bigdecimal::BigDecimal;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct CreatePaymentInput {
    pub reason: PaymentReason,
    pub mode: PaymentMode,
    pub amount: BigDecimal,
    pub item_code: String,
    pub user_code: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub card_token: Option<String>,
}

/// Result of driving a Pending payment into the gateway.
#[derive(Debug, Clone)]
pub struct InitiatedPayment {
    pub payment: Payment,
    pub checkout_url: Option<String>,
}

pub struct PaymentService {
    pool: PgPool,
    gateway: Arc<dyn PaymentGateway>,
    issuers: Arc<IssuerDirectory>,
    dispatcher: Arc<SideEffectDispatcher>,
}

impl PaymentService {
    pub fn new(
        pool: PgPool,
        gateway: Arc<dyn PaymentGateway>,
        issuers: Arc<IssuerDirectory>,
        dispatcher: Arc<SideEffectDispatcher>,
    ) -> Self {
        Self {
            pool,
            gateway,
            issuers,
            dispatcher,
        }
    }

    fn repo(&self) -> PaymentRepository {
        PaymentRepository::new(self.pool.clone())
    }

    /// Validate and persist a new Pending payment. Mobile numbers must
    /// resolve to a supported carrier before any row is created.
    pub async fn create_payment(&self, input: CreatePaymentInput) -> Result<Payment, AppError> {
        validate_amount(&input.amount, "amount")?;
        require_field(&input.item_code, "item_code")?;
        require_field(&input.user_code, "user_code")?;

        let details = match input.mode {
            PaymentMode::Mobile => {
                let raw = input
                    .phone
                    .as_deref()
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| PaymentError::Validation {
                        message: "phone is required for mobile payments".to_string(),
                        field: Some("phone".to_string()),
                    })?;
                let normalized = normalize_phone(raw)?;
                let issuer = self.issuers.resolve(&normalized)?;
                PaymentDetails::Mobile {
                    phone_number: normalized,
                    issuer_code: issuer.code.to_string(),
                }
            }
            PaymentMode::Card => {
                let token = input
                    .card_token
                    .as_deref()
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| PaymentError::Validation {
                        message: "card_token is required for card payments".to_string(),
                        field: Some("card_token".to_string()),
                    })?;
                PaymentDetails::Card {
                    card_token: token.to_string(),
                }
            }
            PaymentMode::External => PaymentDetails::External { checkout_url: None },
        };

        let payment = self
            .repo()
            .create(NewPayment {
                reason: input.reason,
                kind: input.reason.kind(),
                mode: input.mode,
                amount: input.amount,
                item_code: input.item_code,
                user_code: input.user_code,
                contact: ContactInfo {
                    email: input.email,
                    phone: input.phone,
                },
                details,
            })
            .await?;

        info!(
            payment_id = payment.id,
            reason = %payment.reason,
            mode = payment.mode.as_str(),
            "payment created"
        );
        Ok(payment)
    }

    /// Drive a Pending payment into the gateway.
    ///
    /// An expired Pending row fails here without ever reaching the gateway;
    /// otherwise a successful submission moves it to Processing. Redirect
    /// modes hand back the hosted checkout URL.
    pub async fn initiate_payment(&self, id: i64) -> Result<InitiatedPayment, AppError> {
        let payment = self.find_or_not_found(id).await?;

        if payment.status != crate::payments::types::PaymentStatus::Pending {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::PaymentAlreadyInitiated {
                    payment_id: id,
                    status: payment.status.as_str().to_string(),
                },
            )));
        }

        let now = Utc::now();
        if machine::verify_window_elapsed(&payment, now) {
            let payment = self.apply_lazy_timeout(payment, now).await?;
            return Ok(InitiatedPayment {
                payment,
                checkout_url: None,
            });
        }

        let ack = self.gateway.initiate(&payment).await?;

        let payment = match machine::transition(&payment, &GatewayOutcome::InitiateAccepted, now) {
            Some(transition) => match self.dispatcher.settle(&payment, &transition).await? {
                Some(updated) => updated,
                // Lost the race against the worker; re-read the row.
                None => self.find_or_not_found(id).await?,
            },
            None => payment,
        };

        let payment = match (&ack.checkout_url, payment.typed_details()?) {
            (Some(url), PaymentDetails::External { .. }) => {
                self.repo()
                    .update_details(
                        payment.id,
                        &PaymentDetails::External {
                            checkout_url: Some(url.clone()),
                        },
                    )
                    .await?
            }
            _ => payment,
        };

        Ok(InitiatedPayment {
            payment,
            checkout_url: ack.checkout_url,
        })
    }

    /// Read a payment. The verify window is evaluated lazily, so an expired
    /// in-flight payment surfaces as Failed on this read even before the
    /// worker gets to it.
    pub async fn get_payment(&self, id: i64) -> Result<Payment, AppError> {
        let payment = self.find_or_not_found(id).await?;

        let now = Utc::now();
        if machine::verify_window_elapsed(&payment, now) {
            return self.apply_lazy_timeout(payment, now).await;
        }
        Ok(payment)
    }

    async fn find_or_not_found(&self, id: i64) -> Result<Payment, AppError> {
        self.repo()
            .find_by_id(id)
            .await?
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(DomainError::PaymentNotFound {
                    payment_id: id,
                }))
            })
    }

    async fn apply_lazy_timeout(
        &self,
        payment: Payment,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Payment, AppError> {
        // Unreachable carries no gateway answer, so the only rule that can
        // fire is the timeout.
        match machine::transition(&payment, &GatewayOutcome::Unreachable, now) {
            Some(transition) => match self.dispatcher.settle(&payment, &transition).await? {
                Some(updated) => Ok(updated),
                None => self.find_or_not_found(payment.id).await,
            },
            None => Ok(payment),
        }
    }
}

fn require_field(value: &str, field: &str) -> Result<(), PaymentError> {
    if value.trim().is_empty() {
        return Err(PaymentError::Validation {
            message: format!("{} is required", field),
            field: Some(field.to_string()),
        });
    }
    Ok(())
}
