//! Authenticated identities and the roles that gate global settings.

use serde::{Deserialize, Serialize};
use std::sync::RwLock;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
    Owner,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub role: Role,
}

impl Identity {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    /// Admins and owners may write the global document.
    pub fn has_elevated_role(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Owner)
    }
}

/// Yields the identity the client is currently acting as, if any.
pub trait IdentityProvider: Send + Sync {
    fn current_identity(&self) -> Option<Identity>;
}

/// A sign-in slot the client owns.
#[derive(Debug, Default)]
pub struct Session {
    current: RwLock<Option<Identity>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(identity: Identity) -> Self {
        Self {
            current: RwLock::new(Some(identity)),
        }
    }

    pub fn sign_in(&self, identity: Identity) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(identity);
    }

    pub fn sign_out(&self) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl IdentityProvider for Session {
    fn current_identity(&self) -> Option<Identity> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevated_roles() {
        assert!(!Identity::new("u", Role::User).has_elevated_role());
        assert!(Identity::new("a", Role::Admin).has_elevated_role());
        assert!(Identity::new("o", Role::Owner).has_elevated_role());
    }

    #[test]
    fn test_session_sign_in_and_out() {
        let session = Session::new();
        assert!(session.current_identity().is_none());
        session.sign_in(Identity::new("alice", Role::User));
        assert_eq!(session.current_identity().unwrap().id, "alice");
        session.sign_out();
        assert!(session.current_identity().is_none());
    }
}
