use crate::database::balance_repository::{self, BalanceChange};
use crate::database::error::DatabaseError;
use crate::payments::error::PaymentResult;
use crate::payments::machine::Transition;
use crate::payments::types::{
    ContactInfo, PaymentDetails, PaymentKind, PaymentMode, PaymentReason, PaymentStatus,
};
use bigdecimal::BigDecimal;
use sqlx::{FromRow, PgPool};

const PAYMENT_COLUMNS: &str = "id, reason, kind, mode, status, amount, item_code, user_code, \
                               contact_email, contact_phone, details, issued_at, processing_at, \
                               completed_at";

/// One money-movement attempt. Rows are only ever created Pending and only
/// ever mutated by the reconciliation pipeline; terminal rows are the audit
/// trail and are never deleted.
#[derive(Debug, Clone, FromRow)]
pub struct Payment {
    pub id: i64,
    pub reason: PaymentReason,
    pub kind: PaymentKind,
    pub mode: PaymentMode,
    pub status: PaymentStatus,
    pub amount: BigDecimal,
    pub item_code: String,
    pub user_code: String,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub details: serde_json::Value,
    pub issued_at: chrono::DateTime<chrono::Utc>,
    pub processing_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Payment {
    /// The mode-specific payload, typed. The JSONB blob is an implementation
    /// detail of the persistence boundary.
    pub fn typed_details(&self) -> PaymentResult<PaymentDetails> {
        PaymentDetails::from_json(&self.details)
    }

    pub fn contact(&self) -> ContactInfo {
        ContactInfo {
            email: self.contact_email.clone(),
            phone: self.contact_phone.clone(),
        }
    }
}

/// Write model for a new payment attempt.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub reason: PaymentReason,
    pub kind: PaymentKind,
    pub mode: PaymentMode,
    pub amount: BigDecimal,
    pub item_code: String,
    pub user_code: String,
    pub contact: ContactInfo,
    pub details: PaymentDetails,
}

pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new payment in Pending state with `issued_at = NOW()`.
    pub async fn create(&self, new: NewPayment) -> Result<Payment, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "INSERT INTO payments \
             (reason, kind, mode, status, amount, item_code, user_code, \
              contact_email, contact_phone, details) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(new.reason)
        .bind(new.kind)
        .bind(new.mode)
        .bind(PaymentStatus::Pending)
        .bind(new.amount)
        .bind(&new.item_code)
        .bind(&new.user_code)
        .bind(&new.contact.email)
        .bind(&new.contact.phone)
        .bind(new.details.to_json())
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Payment>, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Fetch the reconciliation batch: every non-terminal payment, oldest
    /// first. Terminal rows are excluded here so repeated polls can never
    /// re-fire their side effects.
    pub async fn find_in_flight(&self, limit: i64) -> Result<Vec<Payment>, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments \
             WHERE status IN ('pending', 'processing') \
             ORDER BY issued_at ASC \
             LIMIT $1",
            PAYMENT_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Persist a state-machine transition together with the balance changes
    /// it owes, in one transaction: either both land or neither does.
    ///
    /// The UPDATE is guarded on the status the caller read (`payment.status`),
    /// so a row that moved concurrently is left untouched and `Ok(None)` is
    /// returned; the caller must then skip its side effects.
    pub async fn apply_transition(
        &self,
        payment: &Payment,
        transition: &Transition,
        balance_changes: &[BalanceChange],
    ) -> Result<Option<Payment>, DatabaseError> {
        let now = chrono::Utc::now();
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let updated = sqlx::query_as::<_, Payment>(&format!(
            "UPDATE payments \
             SET status = $3, \
                 processing_at = CASE WHEN $4 THEN COALESCE(processing_at, $6) \
                                      ELSE processing_at END, \
                 completed_at  = CASE WHEN $5 THEN COALESCE(completed_at, $6) \
                                      ELSE completed_at END \
             WHERE id = $1 AND status = $2 \
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(payment.id)
        .bind(payment.status)
        .bind(transition.next)
        .bind(transition.mark_processing)
        .bind(transition.mark_completed)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let Some(updated) = updated else {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(None);
        };

        for change in balance_changes {
            balance_repository::apply_change(&mut *tx, change).await?;
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(Some(updated))
    }

    /// Replace the serialized details blob (e.g. to record the checkout URL
    /// handed back by the gateway).
    pub async fn update_details(
        &self,
        id: i64,
        details: &PaymentDetails,
    ) -> Result<Payment, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "UPDATE payments SET details = $2 WHERE id = $1 RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .bind(details.to_json())
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
