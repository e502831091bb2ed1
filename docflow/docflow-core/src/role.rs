use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Fixed caller categories used both for step assignment and the permission matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Expert,
    Internal,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Client, Role::Expert, Role::Internal, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Expert => "expert",
            Role::Internal => "internal",
            Role::Admin => "admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        *self == Role::Admin
    }

    /// Roles that coordinate requests on behalf of the platform.
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::Internal)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Ok(Role::Client),
            "expert" => Ok(Role::Expert),
            "internal" | "internal-review" | "internal_review" => Ok(Role::Internal),
            "admin" => Ok(Role::Admin),
            other => Err(Error::validation("role", format!("unknown role `{other}`"))),
        }
    }
}

/// Identity and role of whoever invokes an operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: String,
    pub role: Role,
}

impl Caller {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
}
