use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Conversation, ConversationKind, Identity, Participant};

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

// --- Request types ---

#[derive(Debug, Clone, Serialize)]
pub struct CreateConversationRequest {
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    #[serde(rename = "participantIds")]
    pub participant_ids: Vec<String>,
}

impl CreateConversationRequest {
    pub fn direct(participant_id: &str) -> Self {
        Self {
            kind: ConversationKind::Direct,
            participant_ids: vec![participant_id.to_string()],
        }
    }
}

// --- Response types ---

#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantPayload {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationPayload {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub participants: Vec<ParticipantPayload>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl ConversationPayload {
    /// Build a canonical store record. Direct conversations without a server
    /// name take the display fields of the first participant other than
    /// `current_user`.
    pub fn into_conversation(self, current_user: &str) -> Conversation {
        let participants: Vec<Participant> = self
            .participants
            .into_iter()
            .map(|p| Participant {
                id: p.id,
                name: p.name,
                username: p.username,
                avatar: p.avatar,
            })
            .collect();

        let other = participants.iter().find(|p| p.id != current_user);
        let name = self
            .name
            .or_else(|| other.map(|p| p.name.clone()))
            .unwrap_or_default();
        let avatar = self.avatar.or_else(|| other.and_then(|p| p.avatar.clone()));

        Conversation {
            identity: Identity::Canonical { id: self.id },
            kind: self.kind,
            participants,
            name,
            avatar,
            last_message: None,
            timestamp: self.created_at,
            unread_count: 0,
            is_archived: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}
