//! Write path behind the confirmation views: recording first confirmations
//! and completing second confirmations.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{GateError, Result};
use crate::models::{Confirmation, GateUser, OneTimeToken, PolicyVersion};
use crate::policy::applicability::ApplicabilityResolver;
use crate::ports::{ConfirmationLedger, PolicyStore};
use crate::token::TokenIssuer;

pub struct ConfirmationService {
    policies: Arc<dyn PolicyStore>,
    ledger: Arc<dyn ConfirmationLedger>,
    tokens: TokenIssuer,
    resolver: ApplicabilityResolver,
    require_token: bool,
}

impl ConfirmationService {
    pub fn new(
        policies: Arc<dyn PolicyStore>,
        ledger: Arc<dyn ConfirmationLedger>,
        tokens: TokenIssuer,
        resolver: ApplicabilityResolver,
    ) -> Self {
        Self {
            policies,
            ledger,
            tokens,
            resolver,
            require_token: false,
        }
    }

    pub fn require_token(mut self, require: bool) -> Self {
        self.require_token = require;
        self
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    /// An active policy the user is bound by.
    pub async fn policy_for(&self, user: &GateUser, policy_id: Uuid) -> Result<PolicyVersion> {
        let policy = self
            .policies
            .get_policy(policy_id)
            .await?
            .filter(|p| p.active)
            .ok_or_else(|| GateError::NotFound(format!("policy {policy_id}")))?;
        if !self.resolver.applies(user, &policy) {
            return Err(GateError::Forbidden(format!(
                "policy {policy_id} does not apply to user {}",
                user.user_id
            )));
        }
        Ok(policy)
    }

    /// Record that `user` confirmed the current version of `policy_id`.
    /// Repeated or racing calls return the single stored row.
    pub async fn confirm(&self, user: &GateUser, policy_id: Uuid) -> Result<Confirmation> {
        let policy = self.policy_for(user, policy_id).await?;
        if let Some(existing) = self
            .ledger
            .find_confirmation(&user.user_id, policy.id, policy.version)
            .await?
        {
            return Ok(existing);
        }

        let confirmation = Confirmation::new(user.user_id.clone(), &policy);
        match self.ledger.create_confirmation(&confirmation).await {
            Ok(()) => {
                info!(
                    user_id = %user.user_id,
                    policy_id = %policy.id,
                    version = policy.version,
                    "policy confirmed"
                );
                Ok(confirmation)
            }
            Err(GateError::Conflict(_)) => self
                .ledger
                .find_confirmation(&user.user_id, policy.id, policy.version)
                .await?
                .ok_or_else(|| {
                    GateError::LedgerUnavailable(anyhow::anyhow!(
                        "confirmation conflict for policy {} but no row found",
                        policy.id
                    ))
                }),
            Err(e) => Err(e),
        }
    }

    /// The user's own confirmation, or `NotFound` / `Forbidden`.
    pub async fn owned_confirmation(
        &self,
        user: &GateUser,
        confirmation_id: Uuid,
    ) -> Result<Confirmation> {
        let confirmation = self
            .ledger
            .get_confirmation(confirmation_id)
            .await?
            .ok_or_else(|| GateError::NotFound(format!("confirmation {confirmation_id}")))?;
        if confirmation.user_id != user.user_id {
            warn!(
                %confirmation_id,
                user_id = %user.user_id,
                "confirmation requested by another user"
            );
            return Err(GateError::Forbidden(format!(
                "confirmation {confirmation_id} belongs to another user"
            )));
        }
        Ok(confirmation)
    }

    pub async fn begin_second_confirmation(
        &self,
        user: &GateUser,
        confirmation_id: Uuid,
    ) -> Result<(Confirmation, OneTimeToken)> {
        let confirmation = self.owned_confirmation(user, confirmation_id).await?;
        self.ensure_current(&confirmation).await?;
        let token = self.tokens.current_token(confirmation.id).await?;
        Ok((confirmation, token))
    }

    /// Sets `second_confirmed_at`. A supplied token, or any token when
    /// `require_token` is set, must validate and is consumed.
    pub async fn complete_second_confirmation(
        &self,
        user: &GateUser,
        confirmation_id: Uuid,
        token: Option<&str>,
    ) -> Result<Confirmation> {
        let confirmation = self.owned_confirmation(user, confirmation_id).await?;
        if confirmation.is_second_confirmed() {
            return Ok(confirmation);
        }
        self.ensure_current(&confirmation).await?;

        match token {
            Some(value) => {
                if !self.tokens.consume_token(confirmation.id, value).await? {
                    return Err(GateError::InvalidToken);
                }
            }
            None if self.require_token => return Err(GateError::InvalidToken),
            None => {}
        }

        let updated = self
            .ledger
            .mark_second_confirmed(confirmation.id, Utc::now())
            .await?
            .ok_or_else(|| GateError::NotFound(format!("confirmation {confirmation_id}")))?;
        info!(%confirmation_id, user_id = %user.user_id, "second confirmation completed");
        Ok(updated)
    }

    /// `NotFound` once the confirmed policy version is deactivated or replaced.
    async fn ensure_current(&self, confirmation: &Confirmation) -> Result<()> {
        let current = self
            .policies
            .get_policy(confirmation.policy_id)
            .await?
            .is_some_and(|p| p.active && p.version == confirmation.policy_version);
        if !current {
            return Err(GateError::NotFound(format!(
                "policy {} v{} is no longer active",
                confirmation.policy_id, confirmation.policy_version
            )));
        }
        Ok(())
    }
}
