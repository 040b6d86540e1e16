use crate::database::error::DatabaseError;
use bigdecimal::BigDecimal;
use sqlx::{FromRow, PgPool};

/// The slice of a course the payment core needs: who owns it and what it
/// costs. Course authoring lives outside this service.
#[derive(Debug, Clone, FromRow)]
pub struct CourseRef {
    pub code: String,
    pub owner_code: String,
    pub cost: BigDecimal,
}

pub struct CourseRepository {
    pool: PgPool,
}

impl CourseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Option<CourseRef>, DatabaseError> {
        sqlx::query_as::<_, CourseRef>(
            "SELECT code, owner_code, cost FROM courses WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
