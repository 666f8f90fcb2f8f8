//! Participant identity
//!
//! Identity is owned by an external provider; this crate only holds a
//! reference to the stable user id and display fields.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A participant in a voice channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: Uuid,
    pub display_name: String,
    pub avatar_ref: Option<String>,
}

impl Participant {
    /// Create a participant with a fresh id
    pub fn new(display_name: &str) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            display_name: display_name.to_string(),
            avatar_ref: None,
        }
    }
}

/// Source of the local caller's identity
pub trait IdentityProvider: Send + Sync {
    /// The participant making calls through this engine
    fn current_user(&self) -> Participant;
}

/// Fixed identity, resolved once by the host application
pub struct StaticIdentity {
    participant: Participant,
}

impl StaticIdentity {
    pub fn new(participant: Participant) -> Arc<Self> {
        Arc::new(Self { participant })
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Participant {
        self.participant.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_identity_returns_same_user() {
        let provider = StaticIdentity::new(Participant::new("alice"));
        let a = provider.current_user();
        let b = provider.current_user();
        assert_eq!(a.user_id, b.user_id);
        assert_eq!(a.display_name, "alice");
    }
}
