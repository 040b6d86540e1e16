//! Pure payment state machine.
//!
//! Maps (current payment, gateway outcome, wall-clock time) to the next
//! status and the side effects owed on that transition. No I/O happens here;
//! persistence and effect application live in the repository and dispatcher.

use crate::database::payment_repository::Payment;
use crate::payments::types::PaymentStatus;
use chrono::{DateTime, Duration, Utc};

/// Hard ceiling on how long a payment may stay in flight, measured from the
/// moment it was issued. Evaluated lazily at each poll or status read, not by
/// a timer.
pub const MAX_VERIFY_WINDOW_SECS: i64 = 15 * 60;

pub fn max_verify_window() -> Duration {
    Duration::seconds(MAX_VERIFY_WINDOW_SECS)
}

/// What the gateway told us (or failed to tell us) about a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    /// `initiate` was accepted for submission.
    InitiateAccepted,
    /// A status query resolved.
    Verify(VerifyOutcome),
    /// Communication failure: network error, non-success HTTP status or a
    /// malformed body. Never a state change; the next poll retries.
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Succeeded,
    StillProcessing,
    Failed(String),
}

/// A side effect owed on a terminal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Apply the reason-specific success effects (balance mutation and, for
    /// sponsorships, payer notification).
    ApplySuccessEffects,
}

/// The state change the machine decided on. `None` from [`transition`] means
/// the payment is left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: PaymentStatus,
    pub mark_processing: bool,
    pub mark_completed: bool,
    pub effect: Option<Effect>,
}

/// True once the verify window has elapsed for an in-flight payment.
///
/// The window is measured from `issued_at` even while Processing, so time
/// spent Pending eats into the Processing allowance. Intentionally preserved
/// from the observed production behavior; see DESIGN.md before changing.
pub fn verify_window_elapsed(payment: &Payment, now: DateTime<Utc>) -> bool {
    !payment.status.is_terminal()
        && now.signed_duration_since(payment.issued_at) >= max_verify_window()
}

/// Decide the next state for `payment` given `outcome` at time `now`.
pub fn transition(payment: &Payment, outcome: &GatewayOutcome, now: DateTime<Utc>) -> Option<Transition> {
    // Terminal rows are never re-evaluated. The worker's scan already
    // excludes them; this guard keeps the machine total.
    if payment.status.is_terminal() {
        return None;
    }

    // The timeout rule wins over any gateway outcome.
    if verify_window_elapsed(payment, now) {
        return Some(Transition {
            next: PaymentStatus::Failed,
            mark_processing: false,
            mark_completed: true,
            effect: None,
        });
    }

    match (payment.status, outcome) {
        (PaymentStatus::Pending, GatewayOutcome::InitiateAccepted) => Some(Transition {
            next: PaymentStatus::Processing,
            mark_processing: true,
            mark_completed: false,
            effect: None,
        }),
        (PaymentStatus::Processing, GatewayOutcome::Verify(VerifyOutcome::Succeeded)) => {
            Some(Transition {
                next: PaymentStatus::Succeeded,
                mark_processing: false,
                mark_completed: true,
                effect: Some(Effect::ApplySuccessEffects),
            })
        }
        (PaymentStatus::Processing, GatewayOutcome::Verify(VerifyOutcome::Failed(_))) => {
            Some(Transition {
                next: PaymentStatus::Failed,
                mark_processing: false,
                mark_completed: true,
                effect: None,
            })
        }
        // Still processing, a verify answer while Pending (the charge has not
        // been submitted yet), or an unreachable gateway: leave the row alone
        // and let the next poll try again.
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{PaymentKind, PaymentMode, PaymentReason};
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn payment(status: PaymentStatus, issued_minutes_ago: i64) -> Payment {
        let now = Utc::now();
        Payment {
            id: 42,
            reason: PaymentReason::Course,
            kind: PaymentKind::Payin,
            mode: PaymentMode::Mobile,
            status,
            amount: BigDecimal::from_str("25.00").unwrap(),
            item_code: "crs-101".to_string(),
            user_code: "usr-1".to_string(),
            contact_email: Some("payer@example.com".to_string()),
            contact_phone: Some("+233241234567".to_string()),
            details: serde_json::json!({
                "mode": "mobile",
                "phone_number": "+233241234567",
                "issuer_code": "MTN"
            }),
            issued_at: now - Duration::minutes(issued_minutes_ago),
            processing_at: if status == PaymentStatus::Pending {
                None
            } else {
                Some(now - Duration::minutes(issued_minutes_ago) + Duration::seconds(10))
            },
            completed_at: None,
        }
    }

    fn all_outcomes() -> Vec<GatewayOutcome> {
        vec![
            GatewayOutcome::InitiateAccepted,
            GatewayOutcome::Verify(VerifyOutcome::Succeeded),
            GatewayOutcome::Verify(VerifyOutcome::StillProcessing),
            GatewayOutcome::Verify(VerifyOutcome::Failed("declined".to_string())),
            GatewayOutcome::Unreachable,
        ]
    }

    #[test]
    fn pending_initiate_moves_to_processing() {
        let p = payment(PaymentStatus::Pending, 1);
        let t = transition(&p, &GatewayOutcome::InitiateAccepted, Utc::now()).unwrap();
        assert_eq!(t.next, PaymentStatus::Processing);
        assert!(t.mark_processing);
        assert!(!t.mark_completed);
        assert!(t.effect.is_none());
    }

    #[test]
    fn processing_success_completes_with_effect() {
        let p = payment(PaymentStatus::Processing, 5);
        let t = transition(
            &p,
            &GatewayOutcome::Verify(VerifyOutcome::Succeeded),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(t.next, PaymentStatus::Succeeded);
        assert!(t.mark_completed);
        assert_eq!(t.effect, Some(Effect::ApplySuccessEffects));
    }

    #[test]
    fn processing_failure_completes_without_effect() {
        let p = payment(PaymentStatus::Processing, 5);
        let t = transition(
            &p,
            &GatewayOutcome::Verify(VerifyOutcome::Failed("declined".to_string())),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(t.next, PaymentStatus::Failed);
        assert!(t.mark_completed);
        assert!(t.effect.is_none());
    }

    #[test]
    fn still_processing_is_a_no_op() {
        let p = payment(PaymentStatus::Processing, 5);
        assert!(transition(
            &p,
            &GatewayOutcome::Verify(VerifyOutcome::StillProcessing),
            Utc::now()
        )
        .is_none());
    }

    #[test]
    fn unreachable_gateway_never_changes_state() {
        for status in [PaymentStatus::Pending, PaymentStatus::Processing] {
            let p = payment(status, 5);
            assert!(transition(&p, &GatewayOutcome::Unreachable, Utc::now()).is_none());
        }
    }

    #[test]
    fn pending_timeout_fails_for_any_outcome() {
        // Issued 16 minutes ago: past the 15-minute window.
        for outcome in all_outcomes() {
            let p = payment(PaymentStatus::Pending, 16);
            let t = transition(&p, &outcome, Utc::now()).unwrap();
            assert_eq!(t.next, PaymentStatus::Failed);
            assert!(t.mark_completed);
            assert!(!t.mark_processing);
            assert!(t.effect.is_none());
        }
    }

    #[test]
    fn processing_timeout_is_measured_from_issue_time() {
        // Issued 20 minutes ago even though it reached Processing quickly.
        let p = payment(PaymentStatus::Processing, 20);
        let t = transition(
            &p,
            &GatewayOutcome::Verify(VerifyOutcome::StillProcessing),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(t.next, PaymentStatus::Failed);
        assert!(t.effect.is_none());
    }

    #[test]
    fn timeout_beats_a_late_success_report() {
        let p = payment(PaymentStatus::Processing, 16);
        let t = transition(
            &p,
            &GatewayOutcome::Verify(VerifyOutcome::Succeeded),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(t.next, PaymentStatus::Failed);
        assert!(t.effect.is_none());
    }

    #[test]
    fn terminal_states_are_never_reevaluated() {
        for status in [PaymentStatus::Succeeded, PaymentStatus::Failed] {
            for outcome in all_outcomes() {
                let p = payment(status, 30);
                assert!(transition(&p, &outcome, Utc::now()).is_none());
            }
        }
    }

    #[test]
    fn pending_verify_success_does_not_skip_processing() {
        // A charge completing out of band is only honored after initiate has
        // moved the row to Processing; the monotonic path has no shortcut.
        let p = payment(PaymentStatus::Pending, 2);
        assert!(transition(
            &p,
            &GatewayOutcome::Verify(VerifyOutcome::Succeeded),
            Utc::now()
        )
        .is_none());
    }

    #[test]
    fn every_transition_respects_monotonic_ordering() {
        for status in [PaymentStatus::Pending, PaymentStatus::Processing] {
            for outcome in all_outcomes() {
                for minutes in [1, 20] {
                    let p = payment(status, minutes);
                    if let Some(t) = transition(&p, &outcome, Utc::now()) {
                        assert!(
                            t.next.rank() > p.status.rank(),
                            "{:?} -> {:?} is not monotonic",
                            p.status,
                            t.next
                        );
                        assert!(p.status.can_transition_to(&t.next));
                        assert_eq!(t.mark_completed, t.next.is_terminal());
                    }
                }
            }
        }
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let p = payment(PaymentStatus::Pending, 15);
        assert!(verify_window_elapsed(&p, Utc::now()));
        let fresh = payment(PaymentStatus::Pending, 14);
        assert!(!verify_window_elapsed(&fresh, Utc::now()));
    }
}
