use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Parent,
    Teacher,
    Student,
    Admin,
    #[serde(other)]
    Unknown,
}

/// The signed-in user as reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

impl Identity {
    pub fn parent(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Parent,
        }
    }

    pub fn is_parent(&self) -> bool {
        self.role == Role::Parent
    }
}
