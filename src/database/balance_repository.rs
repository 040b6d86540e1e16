use crate::database::error::DatabaseError;
use bigdecimal::BigDecimal;
use sqlx::{FromRow, PgPool};

/// User account row; only the balance is owned by the payment core.
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub user_code: String,
    pub balance: BigDecimal,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceDirection {
    Credit,
    Debit,
}

/// A single balance mutation owed by a terminal payment transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceChange {
    pub user_code: String,
    pub amount: BigDecimal,
    pub direction: BalanceDirection,
}

impl BalanceChange {
    pub fn credit(user_code: impl Into<String>, amount: BigDecimal) -> Self {
        Self {
            user_code: user_code.into(),
            amount,
            direction: BalanceDirection::Credit,
        }
    }

    pub fn debit(user_code: impl Into<String>, amount: BigDecimal) -> Self {
        Self {
            user_code: user_code.into(),
            amount,
            direction: BalanceDirection::Debit,
        }
    }
}

/// Apply one balance change on the given executor.
///
/// Takes a generic executor so callers can run it inside the same transaction
/// as the payment status update; the two must commit or roll back together.
pub async fn apply_change<'e, E>(executor: E, change: &BalanceChange) -> Result<(), DatabaseError>
where
    E: sqlx::PgExecutor<'e>,
{
    let sql = match change.direction {
        BalanceDirection::Credit => {
            "UPDATE accounts SET balance = balance + $2, updated_at = NOW() WHERE user_code = $1"
        }
        BalanceDirection::Debit => {
            "UPDATE accounts SET balance = balance - $2, updated_at = NOW() WHERE user_code = $1"
        }
    };

    let result = sqlx::query(sql)
        .bind(&change.user_code)
        .bind(&change.amount)
        .execute(executor)
        .await
        .map_err(DatabaseError::from_sqlx)?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::not_found(format!(
            "account {}",
            change.user_code
        )));
    }
    Ok(())
}

/// Read access to account balances.
pub struct BalanceRepository {
    pool: PgPool,
}

impl BalanceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_user_code(
        &self,
        user_code: &str,
    ) -> Result<Option<Account>, DatabaseError> {
        sqlx::query_as::<_, Account>(
            "SELECT user_code, balance, updated_at FROM accounts WHERE user_code = $1",
        )
        .bind(user_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
