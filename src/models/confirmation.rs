use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::policy::PolicyVersion;

/// A user's acknowledgement of one exact policy version.
///
/// `policy_version` is captured at creation time; bumping the version on the
/// policy row invalidates the confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub id: Uuid,
    pub user_id: String,
    pub policy_id: Uuid,
    pub policy_version: u32,
    pub confirmed_at: DateTime<Utc>,
    pub second_confirmed_at: Option<DateTime<Utc>>,
}

impl Confirmation {
    pub fn new(user_id: impl Into<String>, policy: &PolicyVersion) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            policy_id: policy.id,
            policy_version: policy.version,
            confirmed_at: Utc::now(),
            second_confirmed_at: None,
        }
    }

    pub fn is_second_confirmed(&self) -> bool {
        self.second_confirmed_at.is_some()
    }

    pub fn matches(&self, user_id: &str, policy_id: Uuid, version: u32) -> bool {
        self.user_id == user_id && self.policy_id == policy_id && self.policy_version == version
    }
}
