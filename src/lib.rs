//! policy-consent: gate a web application behind policy confirmation.
//!
//! Every request from an authenticated user passes through the gate. If an
//! active policy that applies to the user has not been confirmed in its
//! current version, the request is redirected to a confirmation endpoint; if a
//! deployment hook demands a second confirmation, to the second-confirmation
//! endpoint. Otherwise the request goes through untouched.
//!
//! ## Wiring
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use axum::{routing::get, Router};
//! use policy_consent::{
//!     api::{self, AppState},
//!     ApplicabilityResolver, ConfirmationService, GateConfig, GateDecisionEngine,
//!     HookRegistry, MemoryStore, TokenIssuer,
//! };
//!
//! # fn main() -> Result<(), policy_consent::GateError> {
//! let store = Arc::new(MemoryStore::new());
//! let config = GateConfig::from_env()?;
//! let engine = GateDecisionEngine::new(config.clone(), &HookRegistry::new(), store.clone(), store.clone())?;
//! let service = ConfirmationService::new(
//!     store.clone(),
//!     store.clone(),
//!     TokenIssuer::from_config(store.clone(), &config)?,
//!     ApplicabilityResolver::new(config.default_policy),
//! );
//! let state = AppState {
//!     engine: Arc::new(engine),
//!     service: Arc::new(service),
//!     policies: store,
//! };
//! let app: Router = api::protect(Router::new().route("/", get(|| async { "home" })), state);
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

pub mod config;
pub mod hooks;
pub mod models;
pub mod ports;

// Storage backends (Postgres behind the `database` feature)
pub mod store;

pub mod confirm;
pub mod policy;
pub mod token;

// HTTP surface
pub mod api;

pub use config::GateConfig;
pub use confirm::ConfirmationService;
pub use error::{GateError, Result};
pub use hooks::{HookRegistry, RequestContext, SecondConfirmationHook, StartHook};
pub use models::{Confirmation, GateUser, OneTimeToken, PolicySummary, PolicyVersion};
pub use policy::{ApplicabilityResolver, Decision, GateDecisionEngine};
pub use ports::{ConfirmationLedger, PolicyStore, TokenStore};
pub use store::MemoryStore;
#[cfg(feature = "database")]
pub use store::PgStores;
pub use token::TokenIssuer;
