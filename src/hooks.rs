//! Extension points evaluated by the gate.
//!
//! Hooks are typed callbacks registered by name at startup. `GateConfig`
//! refers to them by name and the engine resolves the names once when it is
//! built, so a typo fails at startup instead of on the first request.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{GateError, Result};
use crate::models::{Confirmation, GateUser};

/// What the gate knows about the request being evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    /// `None` when the auth layer found no valid session.
    pub user: Option<GateUser>,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>, user: Option<GateUser>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            user,
        }
    }

    pub fn get(path: impl Into<String>, user: Option<GateUser>) -> Self {
        Self::new("GET", path, user)
    }
}

/// `Some(false)` vetoes gating for the request; `Some(true)` and `None` do not.
pub type StartHook = Arc<dyn Fn(&RequestContext) -> Option<bool> + Send + Sync>;

/// `Some(false)` means no second confirmation is needed for this
/// confirmation; `Some(true)` and `None` require it.
pub type SecondConfirmationHook =
    Arc<dyn Fn(&RequestContext, &Confirmation) -> Option<bool> + Send + Sync>;

#[derive(Default, Clone)]
pub struct HookRegistry {
    start: HashMap<String, StartHook>,
    second_confirmation: HashMap<String, SecondConfirmationHook>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_start_hook<F>(mut self, name: impl Into<String>, hook: F) -> Self
    where
        F: Fn(&RequestContext) -> Option<bool> + Send + Sync + 'static,
    {
        self.start.insert(name.into(), Arc::new(hook));
        self
    }

    pub fn register_second_confirmation_hook<F>(mut self, name: impl Into<String>, hook: F) -> Self
    where
        F: Fn(&RequestContext, &Confirmation) -> Option<bool> + Send + Sync + 'static,
    {
        self.second_confirmation.insert(name.into(), Arc::new(hook));
        self
    }

    pub fn resolve_start_hook(&self, name: Option<&str>) -> Result<Option<StartHook>> {
        resolve(&self.start, name, "start")
    }

    pub fn resolve_second_confirmation_hook(
        &self,
        name: Option<&str>,
    ) -> Result<Option<SecondConfirmationHook>> {
        resolve(&self.second_confirmation, name, "second confirmation")
    }
}

fn resolve<T: Clone>(map: &HashMap<String, T>, name: Option<&str>, kind: &str) -> Result<Option<T>> {
    match name {
        None => Ok(None),
        Some(name) => map.get(name).cloned().map(Some).ok_or_else(|| {
            let mut known: Vec<&str> = map.keys().map(String::as_str).collect();
            known.sort_unstable();
            GateError::Config(format!(
                "unknown {kind} hook '{name}' (registered: [{}])",
                known.join(", ")
            ))
        }),
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut start: Vec<&String> = self.start.keys().collect();
        let mut second: Vec<&String> = self.second_confirmation.keys().collect();
        start.sort();
        second.sort();
        f.debug_struct("HookRegistry")
            .field("start", &start)
            .field("second_confirmation", &second)
            .finish()
    }
}
