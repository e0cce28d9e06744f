//! Who is making a request.
//!
//! The auth collaborator turns a bearer token into a `Caller`; everything
//! downstream only ever looks at this value.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    /// Anything that isn't exactly `admin` is treated as a regular user.
    pub fn from_claim(role: &str) -> Self {
        if role.trim().eq_ignore_ascii_case("admin") {
            Self::Admin
        } else {
            Self::User
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Caller {
    #[default]
    Anonymous,
    User {
        id: Uuid,
        role: Role,
    },
}

impl Caller {
    pub fn user(id: Uuid) -> Self {
        Self::User {
            id,
            role: Role::User,
        }
    }

    pub fn admin(id: Uuid) -> Self {
        Self::User {
            id,
            role: Role::Admin,
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::Anonymous => None,
            Self::User { id, .. } => Some(*id),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            Self::User {
                role: Role::Admin,
                ..
            }
        )
    }

    /// True if the caller is the given user.
    pub fn is(&self, user_id: Uuid) -> bool {
        self.user_id() == Some(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_claim() {
        assert_eq!(Role::from_claim("admin"), Role::Admin);
        assert_eq!(Role::from_claim("ADMIN"), Role::Admin);
        assert_eq!(Role::from_claim("user"), Role::User);
        assert_eq!(Role::from_claim("moderator"), Role::User);
        assert_eq!(Role::from_claim(""), Role::User);
    }

    #[test]
    fn test_anonymous_has_no_identity() {
        let caller = Caller::Anonymous;
        assert_eq!(caller.user_id(), None);
        assert!(!caller.is_admin());
        assert!(!caller.is(Uuid::nil()));
    }

    #[test]
    fn test_admin_and_user() {
        let id = Uuid::new_v4();
        assert!(Caller::admin(id).is_admin());
        assert!(!Caller::user(id).is_admin());
        assert!(Caller::user(id).is(id));
    }
}
