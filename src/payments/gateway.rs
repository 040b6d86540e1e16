//! Client for the external mobile-money/card switch.
//!
//! Charges are routed by carrier switch code; completion of a mobile charge
//! is never learned from the charge call itself but from the polling status
//! endpoint, so `initiate` submits the charge without awaiting its response.

use crate::database::payment_repository::Payment;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::issuers::IssuerDirectory;
use crate::payments::machine::VerifyOutcome;
use crate::payments::types::PaymentDetails;
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Gateway status code signalling a settled mobile charge.
const MOBILE_STATUS_APPROVED: &str = "000";
/// Gateway status codes for a charge still awaiting subscriber approval.
const MOBILE_STATUS_IN_PROGRESS: [&str; 2] = ["001", "111"];
/// Envelope code for an accepted checkout initiation.
const CHECKOUT_CODE_OK: &str = "200";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub merchant_id: String,
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl GatewayConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let merchant_id =
            std::env::var("GATEWAY_MERCHANT_ID").map_err(|_| PaymentError::Validation {
                message: "GATEWAY_MERCHANT_ID environment variable is required".to_string(),
                field: Some("GATEWAY_MERCHANT_ID".to_string()),
            })?;
        let api_key = std::env::var("GATEWAY_API_KEY").map_err(|_| PaymentError::Validation {
            message: "GATEWAY_API_KEY environment variable is required".to_string(),
            field: Some("GATEWAY_API_KEY".to_string()),
        })?;
        let base_url = std::env::var("GATEWAY_BASE_URL").map_err(|_| PaymentError::Validation {
            message: "GATEWAY_BASE_URL environment variable is required".to_string(),
            field: Some("GATEWAY_BASE_URL".to_string()),
        })?;

        Ok(Self {
            merchant_id,
            api_key,
            base_url,
            timeout_secs: std::env::var("GATEWAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("GATEWAY_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(3),
        })
    }
}

/// What `initiate` hands back so the caller can move the payment to
/// Processing. For redirect modes this carries the hosted checkout URL.
#[derive(Debug, Clone)]
pub struct InitiateAck {
    pub transaction_ref: String,
    pub checkout_url: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate(&self, payment: &Payment) -> PaymentResult<InitiateAck>;

    async fn verify(&self, payment: &Payment) -> PaymentResult<VerifyOutcome>;
}

pub struct HttpPaymentGateway {
    config: GatewayConfig,
    http: PaymentHttpClient,
    issuers: Arc<IssuerDirectory>,
}

#[derive(Debug, Deserialize)]
struct CheckoutEnvelope {
    code: String,
    #[serde(default)]
    checkout_url: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusEnvelope {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

impl HttpPaymentGateway {
    pub fn new(config: GatewayConfig, issuers: Arc<IssuerDirectory>) -> PaymentResult<Self> {
        let http =
            PaymentHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self {
            config,
            http,
            issuers,
        })
    }

    pub fn from_env(issuers: Arc<IssuerDirectory>) -> PaymentResult<Self> {
        Self::new(GatewayConfig::from_env()?, issuers)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Submit a mobile charge without awaiting its response. The charge
    /// settles out of band on the subscriber's handset; only the polling
    /// status endpoint is authoritative, so a slow or lost response here must
    /// not block the request path.
    fn submit_mobile_charge(&self, transaction_ref: &str, body: JsonValue) {
        let http = self.http.clone();
        let url = self.endpoint("/v1/charge");
        let api_key = self.config.api_key.clone();
        let tx_ref = transaction_ref.to_string();
        tokio::spawn(async move {
            match http
                .request_json::<JsonValue>(
                    reqwest::Method::POST,
                    &url,
                    Some(&api_key),
                    Some(&body),
                    &[("Content-Type", "application/json")],
                )
                .await
            {
                Ok(_) => info!(transaction_ref = %tx_ref, "mobile charge submitted"),
                Err(e) => warn!(
                    transaction_ref = %tx_ref,
                    error = %e,
                    "mobile charge submission failed; status poll will decide the outcome"
                ),
            }
        });
    }

    async fn initiate_checkout(
        &self,
        payment: &Payment,
        transaction_ref: &str,
        card_token: Option<&str>,
    ) -> PaymentResult<InitiateAck> {
        let mut body = serde_json::json!({
            "merchant_id": self.config.merchant_id,
            "transaction_id": transaction_ref,
            "amount": encode_minor_units(&payment.amount)?,
            "desc": charge_description(payment),
        });
        if let Some(token) = card_token {
            body["card_token"] = serde_json::json!(token);
        }

        let raw: CheckoutEnvelope = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/checkout/initiate"),
                Some(&self.config.api_key),
                Some(&body),
                &[("Content-Type", "application/json")],
            )
            .await?;

        if raw.code != CHECKOUT_CODE_OK {
            return Err(PaymentError::Gateway {
                message: raw
                    .message
                    .unwrap_or_else(|| "checkout initiation rejected".to_string()),
                gateway_code: Some(raw.code),
                retryable: false,
            });
        }

        let checkout_url = raw.checkout_url.ok_or_else(|| PaymentError::Network {
            message: "checkout response is missing checkout_url".to_string(),
        })?;

        info!(payment_id = payment.id, "checkout initiated");
        Ok(InitiateAck {
            transaction_ref: transaction_ref.to_string(),
            checkout_url: Some(checkout_url),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn initiate(&self, payment: &Payment) -> PaymentResult<InitiateAck> {
        let transaction_ref = derive_transaction_ref(payment.id);

        match payment.typed_details()? {
            PaymentDetails::Mobile { phone_number, .. } => {
                // Resolution happens against the live table on every initiate;
                // the first matching prefix wins.
                let issuer = self.issuers.resolve(&phone_number)?;
                let body = serde_json::json!({
                    "merchant_id": self.config.merchant_id,
                    "transaction_id": transaction_ref,
                    "amount": encode_minor_units(&payment.amount)?,
                    "r_switch": issuer.code,
                    "desc": charge_description(payment),
                    "subscriber_number": phone_number.trim_start_matches('+'),
                });
                self.submit_mobile_charge(&transaction_ref, body);
                Ok(InitiateAck {
                    transaction_ref,
                    checkout_url: None,
                })
            }
            PaymentDetails::Card { card_token } => {
                self.initiate_checkout(payment, &transaction_ref, Some(&card_token))
                    .await
            }
            PaymentDetails::External { .. } => {
                self.initiate_checkout(payment, &transaction_ref, None).await
            }
        }
    }

    async fn verify(&self, payment: &Payment) -> PaymentResult<VerifyOutcome> {
        let transaction_ref = derive_transaction_ref(payment.id);
        let raw: StatusEnvelope = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/transactions/{}/status", transaction_ref)),
                Some(&self.config.api_key),
                None,
                &[],
            )
            .await?;

        Ok(map_gateway_status(&raw.status, raw.message.as_deref()))
    }
}

/// Wire transaction id: the payment's numeric identifier, zero-padded to 13
/// digits.
pub fn derive_transaction_ref(payment_id: i64) -> String {
    format!("{:013}", payment_id)
}

/// Wire amount: integer minor units (amount x 100), zero-padded to 12 digits.
pub fn encode_minor_units(amount: &BigDecimal) -> PaymentResult<String> {
    if amount < &BigDecimal::from(0) {
        return Err(PaymentError::Validation {
            message: format!("amount must not be negative: {}", amount),
            field: Some("amount".to_string()),
        });
    }

    let minor = (amount * BigDecimal::from(100))
        .with_scale_round(0, bigdecimal::RoundingMode::HalfUp);
    let minor = minor.to_i64().ok_or_else(|| PaymentError::Validation {
        message: format!("amount out of range: {}", amount),
        field: Some("amount".to_string()),
    })?;

    if minor > 999_999_999_999 {
        return Err(PaymentError::Validation {
            message: format!("amount exceeds 12 wire digits: {}", amount),
            field: Some("amount".to_string()),
        });
    }

    Ok(format!("{:012}", minor))
}

/// Map the provider status code onto the three outcomes the state machine
/// understands.
pub fn map_gateway_status(code: &str, message: Option<&str>) -> VerifyOutcome {
    if code == MOBILE_STATUS_APPROVED {
        VerifyOutcome::Succeeded
    } else if MOBILE_STATUS_IN_PROGRESS.contains(&code) {
        VerifyOutcome::StillProcessing
    } else {
        VerifyOutcome::Failed(format!(
            "gateway status {}: {}",
            code,
            message.unwrap_or("no detail")
        ))
    }
}

fn charge_description(payment: &Payment) -> String {
    format!("{} {}", payment.reason, payment.item_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{PaymentKind, PaymentMode, PaymentReason, PaymentStatus};
    use chrono::Utc;
    use std::str::FromStr;

    fn mobile_payment(phone: &str) -> Payment {
        Payment {
            id: 42,
            reason: PaymentReason::Course,
            kind: PaymentKind::Payin,
            mode: PaymentMode::Mobile,
            status: PaymentStatus::Pending,
            amount: BigDecimal::from_str("12.50").unwrap(),
            item_code: "crs-101".to_string(),
            user_code: "usr-1".to_string(),
            contact_email: None,
            contact_phone: Some(phone.to_string()),
            details: serde_json::json!({
                "mode": "mobile",
                "phone_number": phone,
                "issuer_code": "MTN"
            }),
            issued_at: Utc::now(),
            processing_at: None,
            completed_at: None,
        }
    }

    fn test_gateway() -> HttpPaymentGateway {
        HttpPaymentGateway::new(
            GatewayConfig {
                merchant_id: "TTM-00001".to_string(),
                api_key: "test-key".to_string(),
                // Unroutable; nothing in these tests may await a response.
                base_url: "http://127.0.0.1:9".to_string(),
                timeout_secs: 1,
                max_retries: 0,
            },
            Arc::new(IssuerDirectory::new()),
        )
        .expect("gateway under test")
    }

    #[test]
    fn transaction_ref_is_thirteen_digits() {
        assert_eq!(derive_transaction_ref(42), "0000000000042");
        assert_eq!(derive_transaction_ref(1234567890123), "1234567890123");
    }

    #[test]
    fn minor_units_are_twelve_digits_times_one_hundred() {
        let amount = BigDecimal::from_str("12.50").unwrap();
        assert_eq!(encode_minor_units(&amount).unwrap(), "000000001250");

        let whole = BigDecimal::from(7);
        assert_eq!(encode_minor_units(&whole).unwrap(), "000000000700");

        let zero = BigDecimal::from(0);
        assert_eq!(encode_minor_units(&zero).unwrap(), "000000000000");
    }

    #[test]
    fn negative_amount_cannot_be_encoded() {
        let amount = BigDecimal::from_str("-0.01").unwrap();
        assert!(encode_minor_units(&amount).is_err());
    }

    #[test]
    fn status_codes_map_to_outcomes() {
        assert_eq!(map_gateway_status("000", None), VerifyOutcome::Succeeded);
        assert_eq!(
            map_gateway_status("001", None),
            VerifyOutcome::StillProcessing
        );
        assert_eq!(
            map_gateway_status("111", None),
            VerifyOutcome::StillProcessing
        );
        assert!(matches!(
            map_gateway_status("101", Some("declined")),
            VerifyOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn unsupported_issuer_rejects_before_any_submission() {
        let gateway = test_gateway();
        let payment = mobile_payment("+14155551234");
        let err = gateway.initiate(&payment).await.unwrap_err();
        assert!(matches!(err, PaymentError::UnsupportedIssuer { .. }));
    }

    #[tokio::test]
    async fn mobile_initiate_returns_without_awaiting_the_charge() {
        // The configured base URL never answers; if initiate awaited the
        // charge response this would exceed the timeout below.
        let gateway = test_gateway();
        let payment = mobile_payment("+233241234567");
        let ack = tokio::time::timeout(Duration::from_millis(250), gateway.initiate(&payment))
            .await
            .expect("initiate must not block on the charge response")
            .expect("charge submission is fire-and-forget");
        assert_eq!(ack.transaction_ref, "0000000000042");
        assert!(ack.checkout_url.is_none());
    }
}
