use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Token for a deferred second confirmation. Owned by its confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimeToken {
    pub id: Uuid,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub confirmation_id: Uuid,
}

impl OneTimeToken {
    pub fn new(confirmation_id: Uuid, token: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            token,
            created_at: Utc::now(),
            confirmation_id,
        }
    }
}
