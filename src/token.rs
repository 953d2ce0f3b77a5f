//! One-time tokens for the deferred second confirmation.
//!
//! Token strings come from the OS CSPRNG, encoded as URL-safe base64 without
//! padding and cut to a fixed length. Lengths below 16 characters are refused;
//! at the default 32 a token carries 192 bits, so the regenerate-on-collision
//! loop has no retry cap.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{GateConfig, MAX_TOKEN_LENGTH, MIN_TOKEN_LENGTH};
use crate::error::{GateError, Result};
use crate::models::OneTimeToken;
use crate::ports::TokenStore;

/// Generate a token string of exactly `length` URL-safe characters.
pub fn generate_token(length: usize) -> String {
    let byte_len = (length * 3).div_ceil(4);
    let mut bytes = vec![0u8; byte_len];
    OsRng.fill_bytes(&mut bytes);
    let mut encoded = URL_SAFE_NO_PAD.encode(&bytes);
    encoded.truncate(length);
    encoded
}

pub fn is_url_safe(token: &str) -> bool {
    token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub struct TokenIssuer {
    store: Arc<dyn TokenStore>,
    length: usize,
    ttl: Option<Duration>,
    generate: fn(usize) -> String,
}

impl TokenIssuer {
    /// `length` must lie within `MIN_TOKEN_LENGTH..=MAX_TOKEN_LENGTH`.
    pub fn new(store: Arc<dyn TokenStore>, length: usize) -> Result<Self> {
        if !(MIN_TOKEN_LENGTH..=MAX_TOKEN_LENGTH).contains(&length) {
            return Err(GateError::Config(format!(
                "token length {length} outside {MIN_TOKEN_LENGTH}..={MAX_TOKEN_LENGTH}"
            )));
        }
        Ok(Self {
            store,
            length,
            ttl: None,
            generate: generate_token,
        })
    }

    pub fn from_config(store: Arc<dyn TokenStore>, config: &GateConfig) -> Result<Self> {
        Ok(Self::new(store, config.token_length)?.with_ttl(config.token_expiry()?))
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    #[cfg(test)]
    fn with_generator(mut self, generate: fn(usize) -> String) -> Self {
        self.generate = generate;
        self
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Issue and persist a token unique within `confirmation_id`.
    pub async fn create_token(&self, confirmation_id: Uuid) -> Result<OneTimeToken> {
        loop {
            let candidate = (self.generate)(self.length);
            if self.store.token_exists(confirmation_id, &candidate).await? {
                debug!(%confirmation_id, "token collision, regenerating");
                continue;
            }
            let token = OneTimeToken::new(confirmation_id, candidate);
            match self.store.insert_token(&token).await {
                Ok(()) => {
                    debug!(%confirmation_id, token_id = %token.id, "one-time token issued");
                    return Ok(token);
                }
                // Lost a race against a concurrent insert of the same value.
                Err(GateError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// The newest live token of the confirmation, or a freshly issued one.
    /// Expired and older tokens are deleted, so a confirmation holds at most
    /// one live token after this returns.
    pub async fn current_token(&self, confirmation_id: Uuid) -> Result<OneTimeToken> {
        let now = Utc::now();
        let mut tokens = self.store.tokens_for(confirmation_id).await?;
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut live = None;
        for token in tokens {
            if live.is_none() && self.is_fresh(&token, now) {
                live = Some(token);
            } else {
                self.store.delete_token(token.id).await?;
            }
        }
        match live {
            Some(token) => Ok(token),
            None => self.create_token(confirmation_id).await,
        }
    }

    /// Exact match scoped to the confirmation, compared in constant time.
    /// Expired tokens never match when a TTL is configured.
    pub async fn validate_token(&self, confirmation_id: Uuid, value: &str) -> Result<bool> {
        Ok(self.find_match(confirmation_id, value).await?.is_some())
    }

    /// Validate and delete the token so it cannot be replayed.
    pub async fn consume_token(&self, confirmation_id: Uuid, value: &str) -> Result<bool> {
        let Some(token) = self.find_match(confirmation_id, value).await? else {
            warn!(%confirmation_id, "one-time token rejected");
            return Ok(false);
        };
        // Only the caller whose delete removed the row wins.
        if !self.store.delete_token(token.id).await? {
            warn!(%confirmation_id, token_id = %token.id, "one-time token already consumed");
            return Ok(false);
        }
        debug!(%confirmation_id, token_id = %token.id, "one-time token consumed");
        Ok(true)
    }

    async fn find_match(&self, confirmation_id: Uuid, value: &str) -> Result<Option<OneTimeToken>> {
        let now = Utc::now();
        let mut found = None;
        for token in self.store.tokens_for(confirmation_id).await? {
            let equal: bool = token.token.as_bytes().ct_eq(value.as_bytes()).into();
            if equal && self.is_fresh(&token, now) && found.is_none() {
                found = Some(token);
            }
        }
        Ok(found)
    }

    fn is_fresh(&self, token: &OneTimeToken, now: DateTime<Utc>) -> bool {
        self.ttl.map_or(true, |ttl| now - token.created_at <= ttl)
    }
}
