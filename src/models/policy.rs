//! Policy versions as read by the gate.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_POLICY_TITLE: &str = "Privacy Policy";

/// One published revision of a policy document.
///
/// Rows are authored elsewhere; the gate only reads them. Several versions of
/// the same logical policy may be active at once if the author says so.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyVersion {
    pub id: Uuid,
    pub title: String,
    pub text: String,
    pub version: u32,
    pub active: bool,
    /// Restricts the policy to members of this group.
    pub for_group: Option<String>,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub confirm_checkbox: bool,
    pub confirm_checkbox_text: String,
    pub confirm_button_text: String,
}

impl PolicyVersion {
    /// Inactive version 1 published now, applying to everyone.
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            text: text.into(),
            version: 1,
            active: false,
            for_group: None,
            published_at: now,
            created_at: now,
            confirm_checkbox: false,
            confirm_checkbox_text: String::new(),
            confirm_button_text: String::new(),
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version.max(1);
        self
    }

    pub fn for_group(mut self, group: impl Into<String>) -> Self {
        self.for_group = Some(group.into());
        self
    }

    pub fn published_at(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = at;
        self
    }

    pub fn activated(mut self) -> Self {
        self.active = true;
        self
    }
}

impl Default for PolicyVersion {
    fn default() -> Self {
        Self::new(DEFAULT_POLICY_TITLE, "")
    }
}

/// Evaluation order: newest `published_at` first, then highest `version`.
pub fn evaluation_order(a: &PolicyVersion, b: &PolicyVersion) -> Ordering {
    b.published_at
        .cmp(&a.published_at)
        .then_with(|| b.version.cmp(&a.version))
}

pub fn sort_for_evaluation(policies: &mut [PolicyVersion]) {
    policies.sort_by(evaluation_order);
}

/// Read-only projection exposed by the listing API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySummary {
    pub id: Uuid,
    pub title: String,
    pub text: String,
    pub version: u32,
    pub published_at: DateTime<Utc>,
}

impl From<&PolicyVersion> for PolicySummary {
    fn from(p: &PolicyVersion) -> Self {
        Self {
            id: p.id,
            title: p.title.clone(),
            text: p.text.clone(),
            version: p.version,
            published_at: p.published_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn newest_publication_sorts_first() {
        let now = Utc::now();
        let old = PolicyVersion::new("Terms", "v1").published_at(now - Duration::days(1));
        let new = PolicyVersion::new("Terms", "v2").published_at(now);
        let mut list = vec![old.clone(), new.clone()];
        sort_for_evaluation(&mut list);
        assert_eq!(list[0].id, new.id);
        assert_eq!(list[1].id, old.id);
    }

    #[test]
    fn same_publication_breaks_tie_on_version() {
        let now = Utc::now();
        let v1 = PolicyVersion::new("Terms", "a").published_at(now);
        let v3 = PolicyVersion::new("Terms", "b").with_version(3).published_at(now);
        let mut list = vec![v1.clone(), v3.clone()];
        sort_for_evaluation(&mut list);
        assert_eq!(list[0].version, 3);
    }

    #[test]
    fn version_zero_is_clamped() {
        assert_eq!(PolicyVersion::default().with_version(0).version, 1);
    }

    #[test]
    fn defaults_match_a_fresh_draft() {
        let p = PolicyVersion::default();
        assert_eq!(p.title, DEFAULT_POLICY_TITLE);
        assert_eq!(p.version, 1);
        assert!(!p.active);
        assert!(p.for_group.is_none());
    }
}
