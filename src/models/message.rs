use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    User,
    Ai,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::User => "user",
            MessageType::Ai => "ai",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageType::User),
            "ai" => Some(MessageType::Ai),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadStatus {
    Sending,
    Sent,
    Delivered,
    Read,
}

impl ReadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadStatus::Sending => "sending",
            ReadStatus::Sent => "sent",
            ReadStatus::Delivered => "delivered",
            ReadStatus::Read => "read",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sending" => Some(ReadStatus::Sending),
            "sent" => Some(ReadStatus::Sent),
            "delivered" => Some(ReadStatus::Delivered),
            "read" => Some(ReadStatus::Read),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub url: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
    #[serde(default)]
    pub media: Vec<Media>,
    pub timestamp: DateTime<Utc>,
    pub is_sent: bool,
    pub message_type: MessageType,
    pub read_status: Option<ReadStatus>,
}
