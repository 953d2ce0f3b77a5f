//! Postgres implementations of the persistence ports.
//!
//! Each adapter is a newtype wrapping PgPool. All SQL is runtime-checked
//! (sqlx::query, not sqlx::query!) to avoid a compile-time DB requirement.
//! Uniqueness is enforced by the constraints in `migrations/`, so racing
//! inserts surface as `GateError::Conflict` rather than duplicate rows.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{GateError, Result};
use crate::models::{Confirmation, OneTimeToken, PolicyVersion};
use crate::ports::{ConfirmationLedger, PolicyStore, TokenStore};

const FOREIGN_KEY_VIOLATION: &str = "23503";

// ── Row types ─────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct PgPolicyRow {
    id: Uuid,
    title: String,
    text: String,
    version: i32,
    active: bool,
    for_group: Option<String>,
    published_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    confirm_checkbox: bool,
    confirm_checkbox_text: String,
    confirm_button_text: String,
}

impl TryFrom<PgPolicyRow> for PolicyVersion {
    type Error = GateError;

    fn try_from(r: PgPolicyRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            title: r.title,
            text: r.text,
            version: to_version(r.version)?,
            active: r.active,
            for_group: r.for_group,
            published_at: r.published_at,
            created_at: r.created_at,
            confirm_checkbox: r.confirm_checkbox,
            confirm_checkbox_text: r.confirm_checkbox_text,
            confirm_button_text: r.confirm_button_text,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PgConfirmationRow {
    id: Uuid,
    user_id: String,
    policy_id: Uuid,
    policy_version: i32,
    confirmed_at: DateTime<Utc>,
    second_confirmed_at: Option<DateTime<Utc>>,
}

impl TryFrom<PgConfirmationRow> for Confirmation {
    type Error = GateError;

    fn try_from(r: PgConfirmationRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            user_id: r.user_id,
            policy_id: r.policy_id,
            policy_version: to_version(r.policy_version)?,
            confirmed_at: r.confirmed_at,
            second_confirmed_at: r.second_confirmed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PgTokenRow {
    id: Uuid,
    token: String,
    created_at: DateTime<Utc>,
    confirmation_id: Uuid,
}

impl From<PgTokenRow> for OneTimeToken {
    fn from(r: PgTokenRow) -> Self {
        Self {
            id: r.id,
            token: r.token,
            created_at: r.created_at,
            confirmation_id: r.confirmation_id,
        }
    }
}

fn to_version(raw: i32) -> Result<u32> {
    u32::try_from(raw)
        .ok()
        .filter(|v| *v >= 1)
        .ok_or_else(|| GateError::LedgerUnavailable(anyhow!("invalid stored version {raw}")))
}

fn from_version(version: u32) -> Result<i32> {
    i32::try_from(version).map_err(|_| GateError::Conflict(format!("version {version} too large")))
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|d| d.code())
        .is_some_and(|code| code == FOREIGN_KEY_VIOLATION)
}

// ── PgPolicyStore ─────────────────────────────────────────────

pub struct PgPolicyStore {
    pool: PgPool,
}

impl PgPolicyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PolicyStore for PgPolicyStore {
    async fn list_active_policies(&self) -> Result<Vec<PolicyVersion>> {
        let rows = sqlx::query_as::<_, PgPolicyRow>(
            r#"
            SELECT id, title, text, version, active, for_group,
                   published_at, created_at, confirm_checkbox,
                   confirm_checkbox_text, confirm_button_text
            FROM policy_gate.policies
            WHERE active = true
            ORDER BY published_at DESC, version DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PolicyVersion::try_from).collect()
    }

    async fn get_policy(&self, id: Uuid) -> Result<Option<PolicyVersion>> {
        let row = sqlx::query_as::<_, PgPolicyRow>(
            r#"
            SELECT id, title, text, version, active, for_group,
                   published_at, created_at, confirm_checkbox,
                   confirm_checkbox_text, confirm_button_text
            FROM policy_gate.policies
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PolicyVersion::try_from).transpose()
    }

    async fn insert_policy(&self, policy: &PolicyVersion) -> Result<()> {
        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO policy_gate.policies
                (id, title, text, version, active, for_group, published_at,
                 created_at, confirm_checkbox, confirm_checkbox_text, confirm_button_text)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(policy.id)
        .bind(&policy.title)
        .bind(&policy.text)
        .bind(from_version(policy.version)?)
        .bind(policy.active)
        .bind(&policy.for_group)
        .bind(policy.published_at)
        .bind(policy.created_at)
        .bind(policy.confirm_checkbox)
        .bind(&policy.confirm_checkbox_text)
        .bind(&policy.confirm_button_text)
        .fetch_optional(&self.pool)
        .await?;
        if inserted.is_none() {
            return Err(GateError::Conflict(format!("policy {} exists", policy.id)));
        }
        info!(policy_id = %policy.id, version = policy.version, "policy inserted");
        Ok(())
    }

    async fn set_active(&self, ids: &[Uuid], active: bool) -> Result<u64> {
        let result = sqlx::query("UPDATE policy_gate.policies SET active = $1 WHERE id = ANY($2)")
            .bind(active)
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ── PgConfirmationLedger ──────────────────────────────────────

pub struct PgConfirmationLedger {
    pool: PgPool,
}

impl PgConfirmationLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfirmationLedger for PgConfirmationLedger {
    async fn find_confirmation(
        &self,
        user_id: &str,
        policy_id: Uuid,
        version: u32,
    ) -> Result<Option<Confirmation>> {
        let row = sqlx::query_as::<_, PgConfirmationRow>(
            r#"
            SELECT id, user_id, policy_id, policy_version, confirmed_at, second_confirmed_at
            FROM policy_gate.confirmations
            WHERE user_id = $1 AND policy_id = $2 AND policy_version = $3
            "#,
        )
        .bind(user_id)
        .bind(policy_id)
        .bind(from_version(version)?)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Confirmation::try_from).transpose()
    }

    async fn get_confirmation(&self, id: Uuid) -> Result<Option<Confirmation>> {
        let row = sqlx::query_as::<_, PgConfirmationRow>(
            r#"
            SELECT id, user_id, policy_id, policy_version, confirmed_at, second_confirmed_at
            FROM policy_gate.confirmations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Confirmation::try_from).transpose()
    }

    async fn create_confirmation(&self, confirmation: &Confirmation) -> Result<()> {
        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO policy_gate.confirmations
                (id, user_id, policy_id, policy_version, confirmed_at, second_confirmed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, policy_id, policy_version) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(confirmation.id)
        .bind(&confirmation.user_id)
        .bind(confirmation.policy_id)
        .bind(from_version(confirmation.policy_version)?)
        .bind(confirmation.confirmed_at)
        .bind(confirmation.second_confirmed_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                GateError::NotFound(format!("policy {}", confirmation.policy_id))
            } else {
                GateError::from(e)
            }
        })?;
        match inserted {
            Some(_) => {
                debug!(confirmation_id = %confirmation.id, "confirmation stored");
                Ok(())
            }
            None => Err(GateError::Conflict(format!(
                "user {} already confirmed policy {} v{}",
                confirmation.user_id, confirmation.policy_id, confirmation.policy_version
            ))),
        }
    }

    async fn mark_second_confirmed(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Confirmation>> {
        let row = sqlx::query_as::<_, PgConfirmationRow>(
            r#"
            UPDATE policy_gate.confirmations
            SET second_confirmed_at = COALESCE(second_confirmed_at, $2)
            WHERE id = $1
            RETURNING id, user_id, policy_id, policy_version, confirmed_at, second_confirmed_at
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Confirmation::try_from).transpose()
    }
}

// ── PgTokenStore ──────────────────────────────────────────────

pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn token_exists(&self, confirmation_id: Uuid, token: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM policy_gate.one_time_tokens
                WHERE confirmation_id = $1 AND token = $2
            )
            "#,
        )
        .bind(confirmation_id)
        .bind(token)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_token(&self, token: &OneTimeToken) -> Result<()> {
        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO policy_gate.one_time_tokens (id, token, created_at, confirmation_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (confirmation_id, token) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(token.id)
        .bind(&token.token)
        .bind(token.created_at)
        .bind(token.confirmation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                GateError::NotFound(format!("confirmation {}", token.confirmation_id))
            } else {
                GateError::from(e)
            }
        })?;
        inserted
            .map(|_| ())
            .ok_or_else(|| GateError::Conflict("token collision".into()))
    }

    async fn tokens_for(&self, confirmation_id: Uuid) -> Result<Vec<OneTimeToken>> {
        let rows = sqlx::query_as::<_, PgTokenRow>(
            r#"
            SELECT id, token, created_at, confirmation_id
            FROM policy_gate.one_time_tokens
            WHERE confirmation_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(confirmation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(OneTimeToken::from).collect())
    }

    async fn delete_token(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM policy_gate.one_time_tokens WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

// ── Bundle ────────────────────────────────────────────────────

/// All Postgres adapters sharing one pool.
pub struct PgStores {
    pub policies: PgPolicyStore,
    pub confirmations: PgConfirmationLedger,
    pub tokens: PgTokenStore,
}

impl PgStores {
    pub fn new(pool: PgPool) -> Self {
        Self {
            policies: PgPolicyStore::new(pool.clone()),
            confirmations: PgConfirmationLedger::new(pool.clone()),
            tokens: PgTokenStore::new(pool),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_version_must_be_positive() {
        assert_eq!(to_version(3).unwrap(), 3);
        assert!(to_version(0).is_err());
        assert!(to_version(-1).is_err());
    }

    #[test]
    fn oversized_version_is_rejected() {
        assert!(from_version(u32::MAX).is_err());
        assert_eq!(from_version(7).unwrap(), 7);
    }
}
