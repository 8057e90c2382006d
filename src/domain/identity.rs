use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Caller Identity
// ============================================================================
//
// Identity is established upstream. Every controller call receives the
// Principal explicitly; nothing reads ambient user state.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Buyer,
    Manager,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Buyer => "buyer",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }

    /// Managers and admins moderate requests and curate the catalog.
    pub fn is_moderator(&self) -> bool {
        matches!(self, Role::Manager | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buyer" => Ok(Role::Buyer),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn buyer(user_id: Uuid) -> Self {
        Self::new(user_id, Role::Buyer)
    }

    pub fn moderator(user_id: Uuid) -> Self {
        Self::new(user_id, Role::Manager)
    }

    pub fn is_moderator(&self) -> bool {
        self.role.is_moderator()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing_is_case_insensitive() {
        assert_eq!("Buyer".parse::<Role>().unwrap(), Role::Buyer);
        assert_eq!(" ADMIN ".parse::<Role>().unwrap(), Role::Admin);
        assert!("guest".parse::<Role>().is_err());
    }

    #[test]
    fn test_moderator_roles() {
        assert!(!Role::Buyer.is_moderator());
        assert!(Role::Manager.is_moderator());
        assert!(Role::Admin.is_moderator());
    }
}
