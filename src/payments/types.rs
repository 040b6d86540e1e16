use crate::payments::error::{PaymentError, PaymentResult};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

/// Why the money is moving.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PaymentReason {
    Course,
    Withdrawal,
    Sponsorship,
}

impl PaymentReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentReason::Course => "course",
            PaymentReason::Withdrawal => "withdrawal",
            PaymentReason::Sponsorship => "sponsorship",
        }
    }

    /// Withdrawals push money out; everything else collects it.
    pub fn kind(&self) -> PaymentKind {
        match self {
            PaymentReason::Withdrawal => PaymentKind::Payout,
            _ => PaymentKind::Payin,
        }
    }
}

impl std::fmt::Display for PaymentReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentReason {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "course" => Ok(PaymentReason::Course),
            "withdrawal" => Ok(PaymentReason::Withdrawal),
            "sponsorship" => Ok(PaymentReason::Sponsorship),
            _ => Err(PaymentError::Validation {
                message: format!("unsupported payment reason: {}", value),
                field: Some("reason".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PaymentKind {
    Payin,
    Payout,
}

impl PaymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::Payin => "payin",
            PaymentKind::Payout => "payout",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PaymentMode {
    Mobile,
    Card,
    External,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Mobile => "mobile",
            PaymentMode::Card => "card",
            PaymentMode::External => "external",
        }
    }
}

impl FromStr for PaymentMode {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "mobile" | "mobile_money" => Ok(PaymentMode::Mobile),
            "card" => Ok(PaymentMode::Card),
            "external" => Ok(PaymentMode::External),
            _ => Err(PaymentError::Validation {
                message: format!("unsupported payment mode: {}", value),
                field: Some("mode".to_string()),
            }),
        }
    }
}

/// Lifecycle state of a payment attempt.
///
/// The only legal paths are Pending → Processing → {Succeeded, Failed} and
/// Pending → Failed (verify-window timeout). Terminal rows are never
/// re-evaluated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "processing" => Some(PaymentStatus::Processing),
            "succeeded" => Some(PaymentStatus::Succeeded),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Succeeded | PaymentStatus::Failed)
    }

    /// Position in the monotonic ordering Pending < Processing < terminal.
    pub fn rank(&self) -> u8 {
        match self {
            PaymentStatus::Pending => 0,
            PaymentStatus::Processing => 1,
            PaymentStatus::Succeeded | PaymentStatus::Failed => 2,
        }
    }

    pub fn can_transition_to(&self, next: &PaymentStatus) -> bool {
        match (self, next) {
            (PaymentStatus::Pending, PaymentStatus::Processing) => true,
            (PaymentStatus::Pending, PaymentStatus::Failed) => true,
            (PaymentStatus::Processing, PaymentStatus::Succeeded) => true,
            (PaymentStatus::Processing, PaymentStatus::Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Notification targets supplied by the payer at checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Mode-specific payload carried by a payment.
///
/// Typed at the application boundary; serialized to an opaque JSONB blob only
/// at the persistence boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PaymentDetails {
    Mobile {
        phone_number: String,
        issuer_code: String,
    },
    Card {
        card_token: String,
    },
    External {
        checkout_url: Option<String>,
    },
}

impl PaymentDetails {
    pub fn mode(&self) -> PaymentMode {
        match self {
            PaymentDetails::Mobile { .. } => PaymentMode::Mobile,
            PaymentDetails::Card { .. } => PaymentMode::Card,
            PaymentDetails::External { .. } => PaymentMode::External,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }

    pub fn from_json(value: &JsonValue) -> PaymentResult<Self> {
        serde_json::from_value(value.clone()).map_err(|e| PaymentError::Validation {
            message: format!("malformed payment details: {}", e),
            field: Some("details".to_string()),
        })
    }
}

/// Reject negative amounts before a payment row ever exists.
pub fn validate_amount(amount: &BigDecimal, field: &str) -> PaymentResult<()> {
    if amount < &BigDecimal::from(0) {
        return Err(PaymentError::Validation {
            message: format!("amount must not be negative: {}", amount),
            field: Some(field.to_string()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr as _;

    #[test]
    fn reason_derives_kind() {
        assert_eq!(PaymentReason::Course.kind(), PaymentKind::Payin);
        assert_eq!(PaymentReason::Sponsorship.kind(), PaymentKind::Payin);
        assert_eq!(PaymentReason::Withdrawal.kind(), PaymentKind::Payout);
    }

    #[test]
    fn status_ordering_is_monotonic() {
        assert!(PaymentStatus::Pending.rank() < PaymentStatus::Processing.rank());
        assert!(PaymentStatus::Processing.rank() < PaymentStatus::Succeeded.rank());
        assert_eq!(
            PaymentStatus::Succeeded.rank(),
            PaymentStatus::Failed.rank()
        );
    }

    #[test]
    fn terminal_states_accept_no_transition() {
        for terminal in [PaymentStatus::Succeeded, PaymentStatus::Failed] {
            for next in [
                PaymentStatus::Pending,
                PaymentStatus::Processing,
                PaymentStatus::Succeeded,
                PaymentStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(&next));
            }
        }
    }

    #[test]
    fn pending_can_fail_directly() {
        assert!(PaymentStatus::Pending.can_transition_to(&PaymentStatus::Failed));
        assert!(!PaymentStatus::Pending.can_transition_to(&PaymentStatus::Succeeded));
    }

    #[test]
    fn details_round_trip_through_json_blob() {
        let details = PaymentDetails::Mobile {
            phone_number: "+233241234567".to_string(),
            issuer_code: "MTN".to_string(),
        };
        let blob = details.to_json();
        assert_eq!(blob["mode"], "mobile");
        let parsed = PaymentDetails::from_json(&blob).expect("details should parse");
        assert_eq!(parsed, details);
    }

    #[test]
    fn negative_amount_is_rejected() {
        let amount = BigDecimal::from_str("-1.00").unwrap();
        assert!(validate_amount(&amount, "amount").is_err());
        let zero = BigDecimal::from(0);
        assert!(validate_amount(&zero, "amount").is_ok());
    }

    #[test]
    fn reason_parsing_works() {
        assert!(matches!(
            PaymentReason::from_str("course"),
            Ok(PaymentReason::Course)
        ));
        assert!(PaymentReason::from_str("unknown").is_err());
    }
}
