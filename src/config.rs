//! Gate configuration.
//!
//! Loaded once at startup from environment variables and passed explicitly to
//! the engine and the interceptor. Nothing reads the environment per request.

use std::time::Duration;

use serde::Serialize;

use crate::error::{GateError, Result};

pub const DEFAULT_POLICY_PAGE_URL: &str = "terms/and/conditions";
pub const DEFAULT_TOKEN_LENGTH: usize = 32;
pub const MIN_TOKEN_LENGTH: usize = 16;
pub const MAX_TOKEN_LENGTH: usize = 128;

const ENV_PREFIX: &str = "POLICY_GATE_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateConfig {
    /// Master switch. When false the interceptor passes everything through.
    pub enabled: bool,
    /// Path fragment of the confirmation pages; always exempt from gating.
    pub policy_page_url: String,
    /// Further exempt path fragments.
    pub ignore_urls: Vec<String>,
    /// Ungrouped policies apply to everyone (true) or only to users with no
    /// groups (false).
    pub default_policy: bool,
    /// Registry name of the start hook.
    pub start_hook: Option<String>,
    /// Registry name of the second-confirmation-required hook.
    pub second_confirmation_hook: Option<String>,
    pub token_length: usize,
    pub token_ttl: Option<Duration>,
    /// Completing a second confirmation must present a valid token.
    pub require_token: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policy_page_url: DEFAULT_POLICY_PAGE_URL.to_string(),
            ignore_urls: Vec::new(),
            default_policy: true,
            start_hook: None,
            second_confirmation_hook: None,
            token_length: DEFAULT_TOKEN_LENGTH,
            token_ttl: None,
            require_token: false,
        }
    }
}

impl GateConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. The lookup receives full variable names,
    /// e.g. `POLICY_GATE_ENABLED`. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let token_length = match get("TOKEN_LENGTH") {
            Some(raw) => parse_token_length(&raw)?,
            None => defaults.token_length,
        };
        let token_ttl = get("TOKEN_TTL_SECS")
            .map(|raw| {
                raw.parse::<u64>().map(Duration::from_secs).map_err(|_| {
                    GateError::Config(format!("{ENV_PREFIX}TOKEN_TTL_SECS: '{raw}' is not a number"))
                })
            })
            .transpose()?;

        let config = Self {
            enabled: env_bool(get("ENABLED"), "ENABLED", defaults.enabled)?,
            policy_page_url: get("POLICY_PAGE_URL").unwrap_or(defaults.policy_page_url),
            ignore_urls: get("IGNORE_URLS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            default_policy: env_bool(
                get("DEFAULT_POLICY"),
                "DEFAULT_POLICY",
                defaults.default_policy,
            )?,
            start_hook: get("START_HOOK"),
            second_confirmation_hook: get("SECOND_CONFIRMATION_REQUIRED_HOOK"),
            token_length,
            token_ttl,
            require_token: env_bool(get("REQUIRE_TOKEN"), "REQUIRE_TOKEN", false)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.policy_page_trimmed().is_empty() {
            return Err(GateError::Config("policy page url must not be empty".into()));
        }
        if !(MIN_TOKEN_LENGTH..=MAX_TOKEN_LENGTH).contains(&self.token_length) {
            return Err(GateError::Config(format!(
                "token length {} outside {MIN_TOKEN_LENGTH}..={MAX_TOKEN_LENGTH}",
                self.token_length
            )));
        }
        self.token_expiry()?;
        Ok(())
    }

    /// `token_ttl` as a chrono duration for timestamp arithmetic.
    pub fn token_expiry(&self) -> Result<Option<chrono::Duration>> {
        self.token_ttl
            .map(|ttl| {
                chrono::Duration::from_std(ttl).map_err(|_| {
                    GateError::Config(format!("token ttl of {}s is out of range", ttl.as_secs()))
                })
            })
            .transpose()
    }

    /// Policy page fragment without surrounding slashes.
    pub fn policy_page_trimmed(&self) -> &str {
        self.policy_page_url.trim_matches('/')
    }

    /// True when the path matches the policy page or an ignore fragment.
    pub fn is_exempt(&self, path: &str) -> bool {
        path.contains(self.policy_page_trimmed())
            || self
                .ignore_urls
                .iter()
                .any(|fragment| !fragment.is_empty() && path.contains(fragment.as_str()))
    }

    pub fn with_ignore_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    pub fn strict(mut self) -> Self {
        self.default_policy = false;
        self
    }
}

fn parse_token_length(raw: &str) -> Result<usize> {
    raw.parse::<usize>().map_err(|_| {
        GateError::Config(format!("{ENV_PREFIX}TOKEN_LENGTH: '{raw}' is not a number"))
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn env_bool(value: Option<String>, key: &str, default: bool) -> Result<bool> {
    match value {
        None => Ok(default),
        Some(v) => match v.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            other => Err(GateError::Config(format!(
                "{ENV_PREFIX}{key}: '{other}' is not a boolean"
            ))),
        },
    }
}
