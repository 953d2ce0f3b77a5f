use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Authenticated identity handed to the gate by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateUser {
    pub user_id: String,
    pub groups: BTreeSet<String>,
}

impl GateUser {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            groups: BTreeSet::new(),
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    pub fn is_member_of(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    pub fn has_groups(&self) -> bool {
        !self.groups.is_empty()
    }
}
