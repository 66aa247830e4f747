pub mod conversation;
pub mod message;
pub mod profile;

pub use conversation::{
    synthetic_dm_id, Conversation, ConversationKind, Identity, PairKey, Participant,
};
pub use message::{Media, Message, MessageType, ReadStatus};
pub use profile::Profile;
