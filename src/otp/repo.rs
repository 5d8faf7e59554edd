//! Postgres-backed challenge and rate-limit stores.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Row, postgres::PgRow};
use tracing::Instrument;
use uuid::Uuid;

use super::models::{ChallengeState, OtpChallenge, Purpose};
use super::store::{ChallengeStore, RateLimitStore, Transition};

impl<'r> FromRow<'r, PgRow> for OtpChallenge {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let purpose: String = row.try_get("purpose")?;
        let state: String = row.try_get("state")?;
        let attempts: i32 = row.try_get("attempts")?;
        Ok(Self {
            id: row.try_get("id")?,
            identity: row.try_get("email")?,
            purpose: purpose.parse().map_err(|err: String| {
                sqlx::Error::Decode(Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    err,
                )))
            })?,
            code_hash: row.try_get("code_hash")?,
            issued_at: row.try_get("issued_at")?,
            expires_at: row.try_get("expires_at")?,
            attempts: u32::try_from(attempts).unwrap_or(0),
            state: ChallengeState::from_db(&state)?,
        })
    }
}

fn db_attempts(attempts: u32) -> i32 {
    i32::try_from(attempts).unwrap_or(i32::MAX)
}

#[derive(Clone, Debug)]
pub struct PgChallengeStore {
    pool: PgPool,
}

impl PgChallengeStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChallengeStore for PgChallengeStore {
    async fn replace(&self, challenge: &OtpChallenge) -> Result<()> {
        // One row per (email, purpose): issuing again overwrites it in place.
        let query = r"
            INSERT INTO otp_challenges
                (id, email, purpose, code_hash, issued_at, expires_at, attempts, state)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (email, purpose) DO UPDATE SET
                id = EXCLUDED.id,
                code_hash = EXCLUDED.code_hash,
                issued_at = EXCLUDED.issued_at,
                expires_at = EXCLUDED.expires_at,
                attempts = EXCLUDED.attempts,
                state = EXCLUDED.state
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(challenge.id)
            .bind(&challenge.identity)
            .bind(challenge.purpose.as_str())
            .bind(&challenge.code_hash)
            .bind(challenge.issued_at)
            .bind(challenge.expires_at)
            .bind(db_attempts(challenge.attempts))
            .bind(challenge.state.as_str())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to store otp challenge")?;
        Ok(())
    }

    async fn current(&self, identity: &str, purpose: Purpose) -> Result<Option<OtpChallenge>> {
        let query = r"
            SELECT id, email, purpose, code_hash, issued_at, expires_at, attempts, state
            FROM otp_challenges
            WHERE email = $1 AND purpose = $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query_as::<_, OtpChallenge>(query)
            .bind(identity)
            .bind(purpose.as_str())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to load otp challenge")
    }

    async fn transition(&self, id: Uuid, expected_attempts: u32, next: Transition) -> Result<bool> {
        let query = r"
            UPDATE otp_challenges
            SET state = $3, attempts = $4
            WHERE id = $1 AND attempts = $2 AND state = 'active'
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .bind(db_attempts(expected_attempts))
            .bind(next.state.as_str())
            .bind(db_attempts(next.attempts))
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update otp challenge")?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(Clone, Debug)]
pub struct PgRateLimitStore {
    pool: PgPool,
}

impl PgRateLimitStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimitStore for PgRateLimitStore {
    async fn increment_below(
        &self,
        identity: &str,
        bucket: &str,
        ceiling: u32,
    ) -> Result<Option<u32>> {
        if ceiling == 0 {
            return Ok(None);
        }
        // The conditional DO UPDATE returns no row once the bucket is full.
        let query = r"
            INSERT INTO otp_rate_limits (email, bucket, count)
            VALUES ($1, $2, 1)
            ON CONFLICT (email, bucket) DO UPDATE
                SET count = otp_rate_limits.count + 1
                WHERE otp_rate_limits.count < $3
            RETURNING count
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(identity)
            .bind(bucket)
            .bind(i32::try_from(ceiling).unwrap_or(i32::MAX))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to increment otp rate limit")?;

        row.map(|row| -> Result<u32> {
            let count: i32 = row.try_get("count")?;
            Ok(u32::try_from(count).unwrap_or(u32::MAX))
        })
        .transpose()
    }
}
