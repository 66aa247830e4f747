use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::grouping::{group_messages, MessageGroup};
use crate::models::{Message, MessageType, ReadStatus};

#[derive(Debug, Default)]
struct MessagesInner {
    by_conversation: HashMap<String, Vec<Message>>,
    /// Reconciled synthetic id -> canonical id.
    aliases: HashMap<String, String>,
}

impl MessagesInner {
    fn resolve_id(&self, id: &str) -> String {
        self.aliases
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    fn insert_sorted(list: &mut Vec<Message>, message: Message) {
        if let Some(existing) = list.iter_mut().find(|m| m.id == message.id) {
            existing.read_status = message.read_status;
            return;
        }
        let index = list.partition_point(|m| m.timestamp <= message.timestamp);
        list.insert(index, message);
    }
}

/// Per-conversation message lists, each kept ascending by timestamp.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    inner: Arc<Mutex<MessagesInner>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MessagesInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a message, keeping timestamp order. A message id seen before
    /// only updates its read status; everything else is immutable.
    pub fn insert(&self, mut message: Message) {
        let mut inner = self.lock();
        message.conversation_id = inner.resolve_id(&message.conversation_id);
        let list = inner
            .by_conversation
            .entry(message.conversation_id.clone())
            .or_default();
        MessagesInner::insert_sorted(list, message);
    }

    /// Record an outgoing message right away. `conversation_id` may be a
    /// pending id; it is moved along when the conversation is reconciled.
    pub fn send_local(&self, conversation_id: &str, sender_id: &str, text: &str) -> Message {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            text: text.to_string(),
            media: Vec::new(),
            timestamp: Utc::now(),
            is_sent: true,
            message_type: MessageType::User,
            read_status: Some(ReadStatus::Sending),
        };

        let mut inner = self.lock();
        let target = inner.resolve_id(conversation_id);
        let mut stored = message.clone();
        stored.conversation_id = target.clone();
        MessagesInner::insert_sorted(inner.by_conversation.entry(target).or_default(), stored.clone());
        stored
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        let inner = self.lock();
        let id = inner.resolve_id(conversation_id);
        inner.by_conversation.get(&id).cloned().unwrap_or_default()
    }

    pub fn groups(&self, conversation_id: &str) -> Vec<MessageGroup> {
        group_messages(&self.messages(conversation_id))
    }

    pub fn set_read_status(&self, conversation_id: &str, message_id: &str, status: ReadStatus) -> bool {
        let mut inner = self.lock();
        let id = inner.resolve_id(conversation_id);
        match inner
            .by_conversation
            .get_mut(&id)
            .and_then(|list| list.iter_mut().find(|m| m.id == message_id))
        {
            Some(message) => {
                message.read_status = Some(status);
                true
            }
            None => false,
        }
    }

    /// Mark incoming messages up to `up_to` as read. Returns how many changed.
    pub fn mark_read(&self, conversation_id: &str, up_to: DateTime<Utc>) -> usize {
        let mut inner = self.lock();
        let id = inner.resolve_id(conversation_id);
        let Some(list) = inner.by_conversation.get_mut(&id) else {
            return 0;
        };

        let mut changed = 0;
        for message in list
            .iter_mut()
            .filter(|m| !m.is_sent && m.timestamp <= up_to)
        {
            if message.read_status != Some(ReadStatus::Read) {
                message.read_status = Some(ReadStatus::Read);
                changed += 1;
            }
        }
        changed
    }

    pub fn unread_count(&self, conversation_id: &str) -> usize {
        self.messages(conversation_id)
            .iter()
            .filter(|m| !m.is_sent && m.read_status != Some(ReadStatus::Read))
            .count()
    }

    /// Move every message filed under `from` to `to` and keep routing `from`
    /// to `to` afterwards. Returns the number of messages moved.
    pub fn reassociate(&self, from: &str, to: &str) -> usize {
        if from == to {
            return 0;
        }
        let mut inner = self.lock();
        inner.aliases.insert(from.to_string(), to.to_string());

        let moved = inner.by_conversation.remove(from).unwrap_or_default();
        let count = moved.len();
        let target = inner.by_conversation.entry(to.to_string()).or_default();
        for mut message in moved {
            message.conversation_id = to.to_string();
            MessagesInner::insert_sorted(target, message);
        }

        if count > 0 {
            tracing::debug!(from, to, count, "Reassociated messages");
        }
        count
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.by_conversation.clear();
        inner.aliases.clear();
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn incoming(id: &str, conversation_id: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: "them".to_string(),
            text: id.to_string(),
            media: Vec::new(),
            timestamp: at,
            is_sent: false,
            message_type: MessageType::User,
            read_status: None,
        }
    }

    #[test]
    fn test_insert_keeps_ascending_order() {
        let store = MessageStore::new();
        let t0 = Utc::now();
        store.insert(incoming("b", "c1", t0 + Duration::seconds(2)));
        store.insert(incoming("a", "c1", t0));
        store.insert(incoming("c", "c1", t0 + Duration::seconds(2)));

        let ids: Vec<String> = store.messages("c1").into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_duplicate_insert_only_updates_read_status() {
        let store = MessageStore::new();
        let t0 = Utc::now();
        store.insert(incoming("a", "c1", t0));

        let mut again = incoming("a", "c1", t0);
        again.text = "edited".to_string();
        again.read_status = Some(ReadStatus::Delivered);
        store.insert(again);

        let messages = store.messages("c1");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "a");
        assert_eq!(messages[0].read_status, Some(ReadStatus::Delivered));
    }

    #[test]
    fn test_reassociate_moves_pending_messages() {
        let store = MessageStore::new();
        let sent = store.send_local("optimistic-dm-u1-u2", "u1", "hello");
        assert_eq!(sent.read_status, Some(ReadStatus::Sending));
        store.insert(incoming("old", "c9", sent.timestamp - Duration::seconds(10)));

        assert_eq!(store.reassociate("optimistic-dm-u1-u2", "c9"), 1);

        let messages = store.messages("c9");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].id, sent.id);
        assert!(messages.iter().all(|m| m.conversation_id == "c9"));

        // Late sends against the old id land in the canonical list.
        let late = store.send_local("optimistic-dm-u1-u2", "u1", "again");
        assert_eq!(late.conversation_id, "c9");
        assert_eq!(store.messages("optimistic-dm-u1-u2").len(), 3);
    }

    #[test]
    fn test_mark_read_only_touches_incoming() {
        let store = MessageStore::new();
        let t0 = Utc::now() - Duration::minutes(5);
        store.insert(incoming("a", "c1", t0));
        store.insert(incoming("b", "c1", t0 + Duration::minutes(10)));
        store.send_local("c1", "me", "reply");

        assert_eq!(store.unread_count("c1"), 2);
        assert_eq!(store.mark_read("c1", t0 + Duration::minutes(1)), 1);
        assert_eq!(store.unread_count("c1"), 1);

        let sent: Vec<Message> = store.messages("c1").into_iter().filter(|m| m.is_sent).collect();
        assert_eq!(sent[0].read_status, Some(ReadStatus::Sending));
    }

    #[test]
    fn test_groups_for_conversation() {
        let store = MessageStore::new();
        let t0 = Utc::now() - Duration::minutes(5);
        store.insert(incoming("a", "c1", t0));
        store.insert(incoming("b", "c1", t0 + Duration::seconds(1)));
        store.send_local("c1", "me", "reply");

        let groups = store.groups("c1");
        assert_eq!(groups.len(), 2);
        assert!(groups[1].is_sent);
    }
}
