//! End-to-end scenarios for the reconciliation pipeline, driven through the
//! state machine and effect planner with a scripted gateway. Persistence is
//! exercised separately; these tests pin down the decision logic the worker
//! executes each cycle.

use learnwave_backend::database::balance_repository::BalanceDirection;
use learnwave_backend::database::course_repository::CourseRef;
use learnwave_backend::database::payment_repository::Payment;
use learnwave_backend::payments::error::{PaymentError, PaymentResult};
use learnwave_backend::payments::gateway::{InitiateAck, PaymentGateway};
use learnwave_backend::payments::machine::{
    transition, verify_window_elapsed, Effect, GatewayOutcome, VerifyOutcome,
};
use learnwave_backend::payments::types::{
    PaymentKind, PaymentMode, PaymentReason, PaymentStatus,
};
use learnwave_backend::services::effects::plan;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn payment(reason: PaymentReason, status: PaymentStatus, issued_minutes_ago: i64) -> Payment {
    let issued_at = Utc::now() - Duration::minutes(issued_minutes_ago);
    Payment {
        id: 42,
        reason,
        kind: reason.kind(),
        mode: PaymentMode::Mobile,
        status,
        amount: BigDecimal::from_str("40.00").unwrap(),
        item_code: match reason {
            PaymentReason::Course => "crs-101".to_string(),
            _ => "usr-target".to_string(),
        },
        user_code: "usr-payer".to_string(),
        contact_email: Some("payer@example.com".to_string()),
        contact_phone: Some("+233241234567".to_string()),
        details: serde_json::json!({
            "mode": "mobile",
            "phone_number": "+233241234567",
            "issuer_code": "MTN"
        }),
        issued_at,
        processing_at: match status {
            PaymentStatus::Pending => None,
            _ => Some(issued_at + Duration::seconds(5)),
        },
        completed_at: None,
    }
}

fn course() -> CourseRef {
    CourseRef {
        code: "crs-101".to_string(),
        owner_code: "usr-owner".to_string(),
        cost: BigDecimal::from_str("25.00").unwrap(),
    }
}

/// Applies a transition to an owned payment the way the repository persists
/// it, so multi-cycle scenarios can thread state through.
fn apply(payment: &mut Payment, t: &learnwave_backend::payments::machine::Transition) {
    let now = Utc::now();
    payment.status = t.next;
    if t.mark_processing && payment.processing_at.is_none() {
        payment.processing_at = Some(now);
    }
    if t.mark_completed && payment.completed_at.is_none() {
        payment.completed_at = Some(now);
    }
}

/// Gateway that answers `verify` from a script, like the worker would see
/// over consecutive poll cycles.
struct ScriptedGateway {
    verifies: Mutex<VecDeque<PaymentResult<VerifyOutcome>>>,
}

impl ScriptedGateway {
    fn new(verifies: Vec<PaymentResult<VerifyOutcome>>) -> Self {
        Self {
            verifies: Mutex::new(verifies.into()),
        }
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn initiate(&self, payment: &Payment) -> PaymentResult<InitiateAck> {
        Ok(InitiateAck {
            transaction_ref: format!("{:013}", payment.id),
            checkout_url: None,
        })
    }

    async fn verify(&self, _payment: &Payment) -> PaymentResult<VerifyOutcome> {
        self.verifies
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or(Ok(VerifyOutcome::StillProcessing))
    }
}

/// One reconciliation step as the worker performs it: consult the window,
/// then the gateway, then the machine.
async fn reconcile_step(gateway: &dyn PaymentGateway, payment: &mut Payment) -> Option<Effect> {
    let now = Utc::now();
    let outcome = if verify_window_elapsed(payment, now) {
        GatewayOutcome::Unreachable
    } else {
        match gateway.verify(payment).await {
            Ok(v) => GatewayOutcome::Verify(v),
            Err(_) => GatewayOutcome::Unreachable,
        }
    };

    match transition(payment, &outcome, now) {
        Some(t) => {
            let effect = t.effect;
            apply(payment, &t);
            effect
        }
        None => None,
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_course_purchase_credits_owner_exactly_once() {
    let mut p = payment(PaymentReason::Course, PaymentStatus::Pending, 1);

    // Request path: initiate succeeds and moves the payment to Processing.
    let t = transition(&p, &GatewayOutcome::InitiateAccepted, Utc::now())
        .expect("pending payment must accept initiate");
    assert_eq!(t.next, PaymentStatus::Processing);
    apply(&mut p, &t);
    assert!(p.processing_at.is_some());
    assert!(p.completed_at.is_none());

    // Next poll: the gateway reports success.
    let gateway = ScriptedGateway::new(vec![Ok(VerifyOutcome::Succeeded)]);
    let effect = reconcile_step(&gateway, &mut p).await;
    assert_eq!(p.status, PaymentStatus::Succeeded);
    assert!(p.completed_at.is_some());

    // The transition owes exactly one credit of the course cost to the owner.
    let c = course();
    let effect_plan = plan(&p, effect.as_ref(), Some(&c));
    assert_eq!(effect_plan.balance_changes.len(), 1);
    assert_eq!(effect_plan.balance_changes[0].user_code, "usr-owner");
    assert_eq!(
        effect_plan.balance_changes[0].amount,
        BigDecimal::from_str("25.00").unwrap()
    );
    assert_eq!(
        effect_plan.balance_changes[0].direction,
        BalanceDirection::Credit
    );

    // Further polls see a terminal row: no transition, no second credit.
    let gateway = ScriptedGateway::new(vec![Ok(VerifyOutcome::Succeeded)]);
    let repeat = reconcile_step(&gateway, &mut p).await;
    assert!(repeat.is_none());
    assert_eq!(p.status, PaymentStatus::Succeeded);
}

#[tokio::test]
async fn stuck_withdrawal_fails_with_balance_untouched() {
    // Processing for 20 minutes: well past the verify window.
    let mut p = payment(PaymentReason::Withdrawal, PaymentStatus::Processing, 20);

    let gateway = ScriptedGateway::new(vec![Ok(VerifyOutcome::Succeeded)]);
    let effect = reconcile_step(&gateway, &mut p).await;

    assert_eq!(p.status, PaymentStatus::Failed);
    assert!(p.completed_at.is_some());
    assert!(effect.is_none());

    let effect_plan = plan(&p, effect.as_ref(), None);
    assert!(effect_plan.balance_changes.is_empty());
    assert!(effect_plan.notifications.is_empty());
}

#[tokio::test]
async fn transient_gateway_outage_preserves_state_until_recovery() {
    let mut p = payment(PaymentReason::Course, PaymentStatus::Processing, 10);

    // Several cycles of communication failures: no state change each time.
    let gateway = ScriptedGateway::new(vec![
        Err(PaymentError::Network {
            message: "connection refused".to_string(),
        }),
        Err(PaymentError::Network {
            message: "connection refused".to_string(),
        }),
        Err(PaymentError::Gateway {
            message: "HTTP 502".to_string(),
            gateway_code: Some("502".to_string()),
            retryable: true,
        }),
        // The gateway recovers before the window closes.
        Ok(VerifyOutcome::Succeeded),
    ]);

    for _ in 0..3 {
        let effect = reconcile_step(&gateway, &mut p).await;
        assert!(effect.is_none());
        assert_eq!(p.status, PaymentStatus::Processing);
    }

    let effect = reconcile_step(&gateway, &mut p).await;
    assert_eq!(p.status, PaymentStatus::Succeeded);
    assert_eq!(effect, Some(Effect::ApplySuccessEffects));
}

#[tokio::test]
async fn declined_charge_fails_without_effects() {
    let mut p = payment(PaymentReason::Sponsorship, PaymentStatus::Processing, 3);

    let gateway = ScriptedGateway::new(vec![Ok(VerifyOutcome::Failed(
        "gateway status 101: declined".to_string(),
    ))]);
    let effect = reconcile_step(&gateway, &mut p).await;

    assert_eq!(p.status, PaymentStatus::Failed);
    assert!(effect.is_none());
    let effect_plan = plan(&p, effect.as_ref(), None);
    assert!(effect_plan.is_empty());
}

#[tokio::test]
async fn sponsorship_success_credits_target_and_notifies() {
    let mut p = payment(PaymentReason::Sponsorship, PaymentStatus::Processing, 2);

    let gateway = ScriptedGateway::new(vec![Ok(VerifyOutcome::Succeeded)]);
    let effect = reconcile_step(&gateway, &mut p).await;
    assert_eq!(p.status, PaymentStatus::Succeeded);

    let effect_plan = plan(&p, effect.as_ref(), None);
    assert_eq!(effect_plan.balance_changes.len(), 1);
    assert_eq!(effect_plan.balance_changes[0].user_code, "usr-target");
    assert_eq!(
        effect_plan.balance_changes[0].direction,
        BalanceDirection::Credit
    );
    // Email and SMS to the payer's contact info.
    assert_eq!(effect_plan.notifications.len(), 2);
}

#[tokio::test]
async fn pending_payment_that_never_initiated_times_out() {
    let mut p = payment(PaymentReason::Course, PaymentStatus::Pending, 16);

    let gateway = ScriptedGateway::new(vec![]);
    let effect = reconcile_step(&gateway, &mut p).await;

    assert_eq!(p.status, PaymentStatus::Failed);
    assert!(effect.is_none());
    // Never reached Processing, so that timestamp stays unset while the
    // completion timestamp records the terminal transition.
    assert!(p.processing_at.is_none());
    assert!(p.completed_at.is_some());
}

#[tokio::test]
async fn kind_follows_reason_through_the_pipeline() {
    let withdrawal = payment(PaymentReason::Withdrawal, PaymentStatus::Pending, 0);
    assert_eq!(withdrawal.kind, PaymentKind::Payout);
    let purchase = payment(PaymentReason::Course, PaymentStatus::Pending, 0);
    assert_eq!(purchase.kind, PaymentKind::Payin);
}
