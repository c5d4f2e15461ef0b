use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ServerId;

/// Identity of an assignment slot: one active assignment per key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignmentKey {
    pub subscriber_id: String,
    pub affinity_key: Option<String>,
}

impl AssignmentKey {
    pub fn new(subscriber_id: impl Into<String>, affinity_key: Option<String>) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            affinity_key,
        }
    }
}

impl std::fmt::Display for AssignmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.affinity_key {
            Some(key) => write!(f, "{}#{}", self.subscriber_id, key),
            None => write!(f, "{}", self.subscriber_id),
        }
    }
}

/// Binding of a subscriber (and optional affinity key) to a server
///
/// Never mutated after creation: a rotation supersedes it with a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyAssignment {
    pub id: Uuid,
    pub subscriber_id: String,
    pub affinity_key: Option<String>,
    pub server_id: ServerId,
    pub activated_at: DateTime<Utc>,
    /// Rotation deadline, if the subscriber rotates on a schedule
    pub expires_at: Option<DateTime<Utc>>,
    pub sticky: bool,
    pub sticky_until: Option<DateTime<Utc>>,
    /// Panel client created for this assignment, if provisioned
    pub client_handle: Option<String>,
}

impl ProxyAssignment {
    pub fn key(&self) -> AssignmentKey {
        AssignmentKey::new(self.subscriber_id.clone(), self.affinity_key.clone())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }

    /// Sticky and still inside its sticky window
    pub fn holds_sticky(&self, now: DateTime<Utc>) -> bool {
        self.sticky && self.sticky_until.map(|until| now < until).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn assignment(now: DateTime<Utc>) -> ProxyAssignment {
        ProxyAssignment {
            id: Uuid::new_v4(),
            subscriber_id: "sub-1".to_string(),
            affinity_key: Some("browser".to_string()),
            server_id: 1,
            activated_at: now,
            expires_at: Some(now + Duration::seconds(300)),
            sticky: true,
            sticky_until: Some(now + Duration::seconds(60)),
            client_handle: None,
        }
    }

    #[test]
    fn test_expiry_and_sticky_windows() {
        let now = Utc::now();
        let a = assignment(now);

        assert!(!a.is_expired(now));
        assert!(a.is_expired(now + Duration::seconds(300)));

        assert!(a.holds_sticky(now + Duration::seconds(59)));
        assert!(!a.holds_sticky(now + Duration::seconds(60)));

        let mut not_sticky = a.clone();
        not_sticky.sticky = false;
        assert!(!not_sticky.holds_sticky(now));
    }

    #[test]
    fn test_key_display() {
        let now = Utc::now();
        let a = assignment(now);
        assert_eq!(a.key().to_string(), "sub-1#browser");
        assert_eq!(AssignmentKey::new("sub-2", None).to_string(), "sub-2");
    }
}
