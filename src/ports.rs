//! Persistence ports.
//!
//! The gate, the token issuer and the confirmation service operate only
//! through these traits, so the same logic runs against `MemoryStore` in tests
//! and the Postgres adapters in production.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use crate::error::Result;
use crate::models::{Confirmation, OneTimeToken, PolicyVersion};

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Active policy versions in evaluation order (newest publication first,
    /// then highest version).
    async fn list_active_policies(&self) -> Result<Vec<PolicyVersion>>;

    async fn get_policy(&self, id: Uuid) -> Result<Option<PolicyVersion>>;

    async fn insert_policy(&self, policy: &PolicyVersion) -> Result<()>;

    /// Bulk activate / deactivate. Returns the number of rows changed.
    async fn set_active(&self, ids: &[Uuid], active: bool) -> Result<u64>;
}

#[async_trait]
pub trait ConfirmationLedger: Send + Sync {
    /// Exact lookup on user, policy and policy version.
    async fn find_confirmation(
        &self,
        user_id: &str,
        policy_id: Uuid,
        version: u32,
    ) -> Result<Option<Confirmation>>;

    async fn get_confirmation(&self, id: Uuid) -> Result<Option<Confirmation>>;

    /// Insert a new confirmation. A row for the same
    /// `(user_id, policy_id, policy_version)` yields `GateError::Conflict`.
    async fn create_confirmation(&self, confirmation: &Confirmation) -> Result<()>;

    /// Set `second_confirmed_at` if it is still empty and return the row.
    async fn mark_second_confirmed(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Confirmation>>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn token_exists(&self, confirmation_id: Uuid, token: &str) -> Result<bool>;

    /// Insert a token. A duplicate value within the same confirmation yields
    /// `GateError::Conflict`.
    async fn insert_token(&self, token: &OneTimeToken) -> Result<()>;

    async fn tokens_for(&self, confirmation_id: Uuid) -> Result<Vec<OneTimeToken>>;

    /// Returns whether this call removed the row. Racing deletes of the same
    /// token see `true` exactly once.
    async fn delete_token(&self, id: Uuid) -> Result<bool>;
}
