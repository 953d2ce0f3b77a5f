//! GateDecisionEngine: per-request policy confirmation decisions.
//!
//! Built once at startup from `GateConfig` and the hook registry. Every
//! gating decision flows through here; the interceptor only translates the
//! result into a response.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::GateConfig;
use crate::error::Result;
use crate::hooks::{HookRegistry, RequestContext, SecondConfirmationHook, StartHook};
use crate::models::{Confirmation, GateUser, PolicyVersion};
use crate::policy::applicability::ApplicabilityResolver;
use crate::ports::{ConfirmationLedger, PolicyStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    /// `next` is the path to resume once the policy is confirmed.
    RedirectToConfirm { policy_id: Uuid, next: String },
    RedirectToSecondConfirm { confirmation_id: Uuid },
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

pub struct GateDecisionEngine {
    config: GateConfig,
    resolver: ApplicabilityResolver,
    start_hook: Option<StartHook>,
    second_confirmation_hook: Option<SecondConfirmationHook>,
    policies: Arc<dyn PolicyStore>,
    ledger: Arc<dyn ConfirmationLedger>,
}

impl GateDecisionEngine {
    /// Validates the config and resolves hook names against the registry.
    pub fn new(
        config: GateConfig,
        hooks: &HookRegistry,
        policies: Arc<dyn PolicyStore>,
        ledger: Arc<dyn ConfirmationLedger>,
    ) -> Result<Self> {
        config.validate()?;
        let start_hook = hooks.resolve_start_hook(config.start_hook.as_deref())?;
        let second_confirmation_hook =
            hooks.resolve_second_confirmation_hook(config.second_confirmation_hook.as_deref())?;
        info!(
            enabled = config.enabled,
            default_policy = config.default_policy,
            start_hook = start_hook.is_some(),
            second_confirmation_hook = second_confirmation_hook.is_some(),
            "policy gate configured"
        );
        Ok(Self {
            resolver: ApplicabilityResolver::new(config.default_policy),
            config,
            start_hook,
            second_confirmation_hook,
            policies,
            ledger,
        })
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn resolver(&self) -> ApplicabilityResolver {
        self.resolver
    }

    /// Full evaluation for one request: pre-checks, then `decide` over the
    /// currently active policies.
    pub async fn evaluate(&self, ctx: &RequestContext) -> Result<Decision> {
        if !self.config.enabled {
            return Ok(Decision::Allow);
        }
        let Some(user) = ctx.user.as_ref() else {
            return Ok(Decision::Allow);
        };
        if self.config.is_exempt(&ctx.path) {
            return Ok(Decision::Allow);
        }
        if let Some(hook) = &self.start_hook {
            if hook(ctx) == Some(false) {
                debug!(path = %ctx.path, "start hook vetoed gating");
                return Ok(Decision::Allow);
            }
        }

        let active = self.policies.list_active_policies().await?;
        if active.is_empty() {
            return Ok(Decision::Allow);
        }
        self.decide(ctx, user, &active).await
    }

    /// Walk `active_policies` in the given order. Stops at the first policy
    /// that needs user action; later policies are picked up by later requests.
    pub async fn decide(
        &self,
        ctx: &RequestContext,
        user: &GateUser,
        active_policies: &[PolicyVersion],
    ) -> Result<Decision> {
        for policy in active_policies {
            if !self.resolver.applies(user, policy) {
                continue;
            }
            let confirmation = self
                .ledger
                .find_confirmation(&user.user_id, policy.id, policy.version)
                .await?;
            match confirmation {
                None => {
                    debug!(
                        user_id = %user.user_id,
                        policy_id = %policy.id,
                        version = policy.version,
                        "policy not confirmed"
                    );
                    return Ok(Decision::RedirectToConfirm {
                        policy_id: policy.id,
                        next: ctx.path.clone(),
                    });
                }
                Some(confirmation) => {
                    if let Some(redirect) = self.second_confirmation_decision(ctx, &confirmation) {
                        debug!(confirmation_id = %confirmation.id, "second confirmation pending");
                        return Ok(redirect);
                    }
                }
            }
        }
        Ok(Decision::Allow)
    }

    /// `None` unless a hook is configured, does not opt out, and the second
    /// confirmation has not happened yet.
    pub fn second_confirmation_decision(
        &self,
        ctx: &RequestContext,
        confirmation: &Confirmation,
    ) -> Option<Decision> {
        let hook = self.second_confirmation_hook.as_ref()?;
        if hook(ctx, confirmation) == Some(false) {
            return None;
        }
        if confirmation.is_second_confirmed() {
            return None;
        }
        Some(Decision::RedirectToSecondConfirm {
            confirmation_id: confirmation.id,
        })
    }

    pub fn snapshot(&self) -> GateSnapshot {
        GateSnapshot {
            enabled: self.config.enabled,
            default_policy: self.config.default_policy,
            policy_page_url: self.config.policy_page_url.clone(),
            ignore_urls: self.config.ignore_urls.clone(),
            start_hook: self.config.start_hook.clone(),
            second_confirmation_hook: self.config.second_confirmation_hook.clone(),
        }
    }
}

impl fmt::Debug for GateDecisionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateDecisionEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GateSnapshot {
    pub enabled: bool,
    pub default_policy: bool,
    pub policy_page_url: String,
    pub ignore_urls: Vec<String>,
    pub start_hook: Option<String>,
    pub second_confirmation_hook: Option<String>,
}
