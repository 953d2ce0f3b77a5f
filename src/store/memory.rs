//! In-process store implementing every port.
//!
//! All state sits behind one `RwLock`, so check-and-insert sequences run under
//! a single write guard and uniqueness holds under concurrent callers.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{GateError, Result};
use crate::models::{sort_for_evaluation, Confirmation, OneTimeToken, PolicyVersion};
use crate::ports::{ConfirmationLedger, PolicyStore, TokenStore};

#[derive(Default)]
struct Tables {
    policies: HashMap<Uuid, PolicyVersion>,
    confirmations: HashMap<Uuid, Confirmation>,
    tokens: HashMap<Uuid, OneTimeToken>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn confirmation_count(&self) -> usize {
        self.tables.read().await.confirmations.len()
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn list_active_policies(&self) -> Result<Vec<PolicyVersion>> {
        let tables = self.tables.read().await;
        let mut active: Vec<PolicyVersion> = tables
            .policies
            .values()
            .filter(|p| p.active)
            .cloned()
            .collect();
        sort_for_evaluation(&mut active);
        Ok(active)
    }

    async fn get_policy(&self, id: Uuid) -> Result<Option<PolicyVersion>> {
        Ok(self.tables.read().await.policies.get(&id).cloned())
    }

    async fn insert_policy(&self, policy: &PolicyVersion) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.policies.contains_key(&policy.id) {
            return Err(GateError::Conflict(format!("policy {} exists", policy.id)));
        }
        tables.policies.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn set_active(&self, ids: &[Uuid], active: bool) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let mut changed = 0;
        for id in ids {
            if let Some(policy) = tables.policies.get_mut(id) {
                policy.active = active;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[async_trait]
impl ConfirmationLedger for MemoryStore {
    async fn find_confirmation(
        &self,
        user_id: &str,
        policy_id: Uuid,
        version: u32,
    ) -> Result<Option<Confirmation>> {
        let tables = self.tables.read().await;
        Ok(tables
            .confirmations
            .values()
            .find(|c| c.matches(user_id, policy_id, version))
            .cloned())
    }

    async fn get_confirmation(&self, id: Uuid) -> Result<Option<Confirmation>> {
        Ok(self.tables.read().await.confirmations.get(&id).cloned())
    }

    async fn create_confirmation(&self, confirmation: &Confirmation) -> Result<()> {
        let mut tables = self.tables.write().await;
        let duplicate = tables.confirmations.values().any(|c| {
            c.matches(
                &confirmation.user_id,
                confirmation.policy_id,
                confirmation.policy_version,
            )
        });
        if duplicate {
            return Err(GateError::Conflict(format!(
                "user {} already confirmed policy {} v{}",
                confirmation.user_id, confirmation.policy_id, confirmation.policy_version
            )));
        }
        tables
            .confirmations
            .insert(confirmation.id, confirmation.clone());
        debug!(confirmation_id = %confirmation.id, "confirmation stored");
        Ok(())
    }

    async fn mark_second_confirmed(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Confirmation>> {
        let mut tables = self.tables.write().await;
        Ok(tables.confirmations.get_mut(&id).map(|c| {
            if c.second_confirmed_at.is_none() {
                c.second_confirmed_at = Some(at);
            }
            c.clone()
        }))
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn token_exists(&self, confirmation_id: Uuid, token: &str) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .tokens
            .values()
            .any(|t| t.confirmation_id == confirmation_id && t.token == token))
    }

    async fn insert_token(&self, token: &OneTimeToken) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.confirmations.contains_key(&token.confirmation_id) {
            return Err(GateError::NotFound(format!(
                "confirmation {}",
                token.confirmation_id
            )));
        }
        let duplicate = tables
            .tokens
            .values()
            .any(|t| t.confirmation_id == token.confirmation_id && t.token == token.token);
        if duplicate {
            return Err(GateError::Conflict("token collision".into()));
        }
        tables.tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn tokens_for(&self, confirmation_id: Uuid) -> Result<Vec<OneTimeToken>> {
        let tables = self.tables.read().await;
        Ok(tables
            .tokens
            .values()
            .filter(|t| t.confirmation_id == confirmation_id)
            .cloned()
            .collect())
    }

    async fn delete_token(&self, id: Uuid) -> Result<bool> {
        Ok(self.tables.write().await.tokens.remove(&id).is_some())
    }
}
