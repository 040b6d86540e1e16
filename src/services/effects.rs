//! Side effects of terminal payment transitions.
//!
//! Planning is pure: given a payment, the effect decided by the state machine
//! and (for course purchases) the course reference, it produces the balance
//! changes and notifications owed. Application is atomic: the balance changes
//! land in the same transaction as the status update, and notifications go
//! out only after that transaction commits.

use crate::database::balance_repository::BalanceChange;
use crate::database::course_repository::{CourseRef, CourseRepository};
use crate::database::error::DatabaseError;
use crate::database::payment_repository::{Payment, PaymentRepository};
use crate::payments::machine::{Effect, Transition};
use crate::payments::types::PaymentReason;
use crate::services::notification::{NotificationRequest, NotificationSender};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct EffectPlan {
    pub balance_changes: Vec<BalanceChange>,
    pub notifications: Vec<NotificationRequest>,
}

impl EffectPlan {
    pub fn is_empty(&self) -> bool {
        self.balance_changes.is_empty() && self.notifications.is_empty()
    }
}

/// Decide what a transition owes. Failed transitions owe nothing; success
/// effects depend on the payment reason.
pub fn plan(payment: &Payment, effect: Option<&Effect>, course: Option<&CourseRef>) -> EffectPlan {
    let Some(Effect::ApplySuccessEffects) = effect else {
        return EffectPlan::default();
    };

    match payment.reason {
        PaymentReason::Course => match course {
            Some(course) => EffectPlan {
                balance_changes: vec![BalanceChange::credit(
                    course.owner_code.clone(),
                    course.cost.clone(),
                )],
                notifications: Vec::new(),
            },
            None => {
                // The course record is gone; the status transition still has
                // to land for the audit trail, but nobody can be credited.
                warn!(
                    payment_id = payment.id,
                    item_code = %payment.item_code,
                    "course not found for succeeded purchase; skipping owner credit"
                );
                EffectPlan::default()
            }
        },
        PaymentReason::Withdrawal => EffectPlan {
            balance_changes: vec![BalanceChange::debit(
                payment.user_code.clone(),
                payment.amount.clone(),
            )],
            notifications: Vec::new(),
        },
        PaymentReason::Sponsorship => {
            let mut notifications = Vec::new();
            if let Some(email) = payment.contact_email.as_deref().filter(|v| !v.is_empty()) {
                notifications.push(NotificationRequest::Email {
                    to: email.to_string(),
                    subject: "Sponsorship payment received".to_string(),
                    body: format!(
                        "Your sponsorship of {} for {} has been received.",
                        payment.amount, payment.item_code
                    ),
                });
            }
            if let Some(phone) = payment.contact_phone.as_deref().filter(|v| !v.is_empty()) {
                notifications.push(NotificationRequest::Sms {
                    to: phone.to_string(),
                    body: format!("Sponsorship payment of {} received.", payment.amount),
                });
            }
            EffectPlan {
                balance_changes: vec![BalanceChange::credit(
                    payment.item_code.clone(),
                    payment.amount.clone(),
                )],
                notifications,
            }
        }
    }
}

/// Applies transitions and their effects exactly once per payment.
pub struct SideEffectDispatcher {
    pool: PgPool,
    notifier: Arc<dyn NotificationSender>,
}

impl SideEffectDispatcher {
    pub fn new(pool: PgPool, notifier: Arc<dyn NotificationSender>) -> Self {
        Self { pool, notifier }
    }

    /// Persist `transition` for `payment` and apply whatever it owes.
    ///
    /// Returns the updated row, or `None` when the payment changed under us —
    /// in which case nothing was written and no notification is sent. The
    /// balance mutation and the status update commit together; notification
    /// delivery failures are swallowed and never retried.
    pub async fn settle(
        &self,
        payment: &Payment,
        transition: &Transition,
    ) -> Result<Option<Payment>, DatabaseError> {
        let course = match (transition.effect.as_ref(), payment.reason) {
            (Some(Effect::ApplySuccessEffects), PaymentReason::Course) => {
                CourseRepository::new(self.pool.clone())
                    .find_by_code(&payment.item_code)
                    .await?
            }
            _ => None,
        };

        let plan = plan(payment, transition.effect.as_ref(), course.as_ref());

        let repo = PaymentRepository::new(self.pool.clone());
        let updated = repo
            .apply_transition(payment, transition, &plan.balance_changes)
            .await?;

        if let Some(updated) = &updated {
            info!(
                payment_id = updated.id,
                from = %payment.status,
                to = %updated.status,
                balance_changes = plan.balance_changes.len(),
                "payment transition applied"
            );
            for request in &plan.notifications {
                if let Err(e) = self.notifier.send(request).await {
                    warn!(
                        payment_id = updated.id,
                        error = %e,
                        "notification delivery failed; balance mutation is already committed"
                    );
                }
            }
        }

        Ok(updated)
    }
}
