use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum UserStatus {
    #[default]
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "disabled")]
    Disabled,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Disabled => "disabled",
        }
    }

    /// Anything that is not literally `active` is treated as disabled.
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("active") {
            UserStatus::Active
        } else {
            UserStatus::Disabled
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The slice of a user account this crate consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: i64,
    pub email: String,
    pub status: UserStatus,
}

impl UserIdentity {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}
