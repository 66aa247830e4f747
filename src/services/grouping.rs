use crate::models::{Message, MessageType};

/// Run of consecutive messages rendered together as one bubble cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageGroup {
    pub sender_id: String,
    pub is_sent: bool,
    pub is_ai_group: bool,
    pub messages: Vec<Message>,
}

impl MessageGroup {
    fn start(message: &Message) -> Self {
        Self {
            sender_id: message.sender_id.clone(),
            is_sent: message.is_sent,
            is_ai_group: message.message_type == MessageType::Ai,
            messages: vec![message.clone()],
        }
    }

    fn accepts(&self, message: &Message) -> bool {
        self.sender_id == message.sender_id
            && self.is_ai_group == (message.message_type == MessageType::Ai)
    }
}

/// Split an ascending message list into groups. A new group starts whenever
/// the sender or the user/ai type changes. Time gaps never split a group.
pub fn group_messages(messages: &[Message]) -> Vec<MessageGroup> {
    let mut groups: Vec<MessageGroup> = Vec::new();

    for message in messages {
        match groups.last_mut() {
            Some(group) if group.accepts(message) => group.messages.push(message.clone()),
            _ => groups.push(MessageGroup::start(message)),
        }
    }

    groups
}
