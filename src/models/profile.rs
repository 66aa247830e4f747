use serde::{Deserialize, Serialize};

use super::conversation::Participant;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub username: Option<String>,
    pub avatar: Option<String>,
}

impl Profile {
    /// Placeholder used before any profile data is known.
    pub fn unknown(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            username: None,
            avatar: None,
        }
    }

    pub fn to_participant(&self) -> Participant {
        Participant {
            id: self.id.clone(),
            name: self.name.clone(),
            username: self.username.clone(),
            avatar: self.avatar.clone(),
        }
    }
}
