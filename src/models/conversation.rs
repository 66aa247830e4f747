use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SYNTHETIC_DM_PREFIX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Direct => "direct",
            ConversationKind::Group => "group",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(ConversationKind::Direct),
            "group" => Some(ConversationKind::Group),
            _ => None,
        }
    }
}

/// Whether a record is server-confirmed or a local placeholder awaiting
/// reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Identity {
    Canonical {
        id: String,
    },
    Pending {
        synthetic_id: String,
        since: DateTime<Utc>,
    },
}

impl Identity {
    pub fn id(&self) -> &str {
        match self {
            Identity::Canonical { id } => id,
            Identity::Pending { synthetic_id, .. } => synthetic_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub username: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub identity: Identity,
    pub kind: ConversationKind,
    pub participants: Vec<Participant>,
    pub name: String,
    pub avatar: Option<String>,
    pub last_message: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub unread_count: u32,
    pub is_archived: bool,
}

impl Conversation {
    pub fn id(&self) -> &str {
        self.identity.id()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.identity, Identity::Pending { .. })
    }

    pub fn canonical_id(&self) -> Option<&str> {
        match &self.identity {
            Identity::Canonical { id } => Some(id),
            Identity::Pending { .. } => None,
        }
    }

    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p.id == user_id)
    }

    /// True when this is a direct conversation with `target` as seen by
    /// `current`. Server payloads may or may not list the local user, so only
    /// the absence of third parties is checked.
    pub fn is_direct_with(&self, target: &str, current: &str) -> bool {
        self.kind == ConversationKind::Direct
            && self.has_participant(target)
            && self
                .participants
                .iter()
                .all(|p| p.id == target || p.id == current)
    }

    /// Merge display fields from `other` into `self`, keeping identity and
    /// local-only state (archive flag, unread count) intact.
    pub fn merge_from(&mut self, other: &Conversation) {
        if !other.participants.is_empty() {
            self.participants = other.participants.clone();
        }
        if !other.name.is_empty() {
            self.name = other.name.clone();
        }
        if other.avatar.is_some() {
            self.avatar = other.avatar.clone();
        }
        if other.last_message.is_some() && other.timestamp >= self.timestamp {
            self.last_message = other.last_message.clone();
            self.timestamp = other.timestamp;
        }
    }
}

/// Unordered user-id pair; `(a, b)` and `(b, a)` produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    low: String,
    high: String,
}

impl PairKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self {
                low: a.to_string(),
                high: b.to_string(),
            }
        } else {
            Self {
                low: b.to_string(),
                high: a.to_string(),
            }
        }
    }

    pub fn synthetic_id(&self) -> String {
        format!("{}-{}-{}", SYNTHETIC_DM_PREFIX, self.low, self.high)
    }
}

pub fn synthetic_dm_id(a: &str, b: &str) -> String {
    PairKey::new(a, b).synthetic_id()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_id_is_order_independent() {
        assert_eq!(synthetic_dm_id("u42", "u1"), "optimistic-dm-u1-u42");
        assert_eq!(synthetic_dm_id("u1", "u42"), "optimistic-dm-u1-u42");
    }

    #[test]
    fn test_direct_match_excludes_groups_and_third_parties() {
        let participant = |id: &str| Participant {
            id: id.to_string(),
            name: id.to_string(),
            username: None,
            avatar: None,
        };
        let mut conv = Conversation {
            identity: Identity::Canonical { id: "c1".into() },
            kind: ConversationKind::Direct,
            participants: vec![participant("u1"), participant("u2")],
            name: "u2".into(),
            avatar: None,
            last_message: None,
            timestamp: Utc::now(),
            unread_count: 0,
            is_archived: false,
        };
        assert!(conv.is_direct_with("u2", "u1"));
        assert!(!conv.is_direct_with("u3", "u1"));

        conv.participants.push(participant("u3"));
        assert!(!conv.is_direct_with("u2", "u1"));

        conv.participants.pop();
        conv.kind = ConversationKind::Group;
        assert!(!conv.is_direct_with("u2", "u1"));
    }
}
