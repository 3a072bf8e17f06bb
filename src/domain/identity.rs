//! Identity collaborator port
//!
//! Profile storage and auth live outside this subsystem; all we consume is
//! an opaque "current identity" provider.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The authenticated party on whose behalf an operation runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Current-identity provider. Returns `None` when nobody is signed in.
pub trait IdentityProvider: Send + Sync {
    fn current(&self) -> Option<Identity>;
}

/// Fixed identity captured at connection time (websocket auth, tests)
pub struct StaticIdentity(Option<Identity>);

impl StaticIdentity {
    pub fn signed_in(identity: Identity) -> Self {
        Self(Some(identity))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl IdentityProvider for StaticIdentity {
    fn current(&self) -> Option<Identity> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_identity() {
        let identity = Identity {
            id: Uuid::new_v4(),
            display_name: "Maya".to_string(),
            avatar_url: None,
        };

        assert_eq!(
            StaticIdentity::signed_in(identity.clone()).current(),
            Some(identity)
        );
        assert_eq!(StaticIdentity::anonymous().current(), None);
    }
}
