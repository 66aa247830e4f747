use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::watch;

use crate::models::{Conversation, ConversationKind, Identity};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Conversation not found: {0}")]
    NotFound(String),
}

/// A removed conversation together with the list position it held, so an
/// undo can put it back where it was.
#[derive(Debug, Clone, PartialEq)]
pub struct Tombstone {
    pub conversation: Conversation,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Merged,
    /// A pending record for the same participants was swapped for the
    /// canonical one.
    Replaced { synthetic_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Replaced,
    /// The canonical record was already present; the pending one was dropped
    /// and merged into it.
    MergedIntoExisting,
    /// Nothing pending under that id any more. No mutation was made.
    Stale,
}

#[derive(Debug, Default)]
struct StoreInner {
    /// Newest first.
    conversations: Vec<Conversation>,
    /// synthetic id -> canonical id, kept after reconciliation.
    aliases: HashMap<String, String>,
}

impl StoreInner {
    fn index_of(&self, id: &str) -> Option<usize> {
        self.conversations.iter().position(|c| c.id() == id)
    }

    /// Direct match first, then a reconciliation alias.
    fn position(&self, id: &str) -> Option<usize> {
        self.index_of(id).or_else(|| {
            self.aliases
                .get(id)
                .and_then(|canonical| self.index_of(canonical))
        })
    }

    fn pending_for(&self, canonical: &Conversation) -> Option<usize> {
        if canonical.kind != ConversationKind::Direct {
            return None;
        }
        self.conversations.iter().position(|c| {
            c.is_pending()
                && c.kind == ConversationKind::Direct
                && !c.participants.is_empty()
                && c.participants.iter().all(|p| canonical.has_participant(&p.id))
        })
    }

    /// Swap the pending record at `index` for `canonical`, carrying over the
    /// local-only state accumulated while it was pending.
    fn swap_at(&mut self, index: usize, mut canonical: Conversation) -> String {
        let pending = &self.conversations[index];
        let synthetic_id = pending.id().to_string();

        canonical.is_archived = pending.is_archived;
        canonical.unread_count = canonical.unread_count.max(pending.unread_count);
        carry_preview(&mut canonical, pending);

        self.aliases
            .insert(synthetic_id.clone(), canonical.id().to_string());
        self.conversations[index] = canonical;
        synthetic_id
    }
}

/// Keep the preview typed while pending unless `target` already has a newer
/// one. A server record without a message never wins on timestamp alone.
fn carry_preview(target: &mut Conversation, pending: &Conversation) {
    let Some(preview) = &pending.last_message else {
        return;
    };
    if target.last_message.is_none() || pending.timestamp >= target.timestamp {
        target.last_message = Some(preview.clone());
        target.timestamp = pending.timestamp;
    }
}

/// Canonical id -> conversation mapping shared by the UI and the resolver.
///
/// Every method takes the lock exactly once, so each mutation is observed by
/// readers either entirely or not at all.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    inner: Arc<Mutex<StoreInner>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(StoreInner::default())),
            revision: Arc::new(revision),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    /// Receiver that changes on every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn upsert(&self, conversation: Conversation) -> UpsertOutcome {
        let outcome = {
            let mut inner = self.lock();
            if let Some(index) = inner.index_of(conversation.id()) {
                inner.conversations[index].merge_from(&conversation);
                UpsertOutcome::Merged
            } else if let Some(index) = conversation
                .canonical_id()
                .and_then(|_| inner.pending_for(&conversation))
            {
                let synthetic_id = inner.swap_at(index, conversation);
                UpsertOutcome::Replaced { synthetic_id }
            } else {
                inner.aliases.remove(conversation.id());
                inner.conversations.insert(0, conversation);
                UpsertOutcome::Inserted
            }
        };
        tracing::debug!(?outcome, "Conversation upserted");
        self.bump();
        outcome
    }

    /// Replace the pending record `synthetic_id` with `canonical` in one step.
    pub fn replace_pending(&self, synthetic_id: &str, canonical: Conversation) -> ReplaceOutcome {
        let outcome = {
            let mut inner = self.lock();
            let pending_index = inner
                .conversations
                .iter()
                .position(|c| c.is_pending() && c.id() == synthetic_id);

            match pending_index {
                None => ReplaceOutcome::Stale,
                Some(index) => {
                    let existing = inner.index_of(canonical.id());
                    match existing {
                        Some(existing_index) => {
                            let pending = inner.conversations.remove(index);
                            let existing_index = if existing_index > index {
                                existing_index - 1
                            } else {
                                existing_index
                            };
                            let target = &mut inner.conversations[existing_index];
                            target.merge_from(&canonical);
                            carry_preview(target, &pending);
                            let canonical_id = target.id().to_string();
                            inner.aliases.insert(synthetic_id.to_string(), canonical_id);
                            ReplaceOutcome::MergedIntoExisting
                        }
                        None => {
                            inner.swap_at(index, canonical);
                            ReplaceOutcome::Replaced
                        }
                    }
                }
            }
        };

        if outcome == ReplaceOutcome::Stale {
            tracing::debug!(synthetic_id, "No pending record to replace");
        } else {
            self.bump();
        }
        outcome
    }

    pub fn get(&self, id: &str) -> Option<Conversation> {
        let inner = self.lock();
        inner.position(id).map(|i| inner.conversations[i].clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().position(id).is_some()
    }

    /// The id `id` currently resolves to, following reconciliation aliases.
    pub fn current_id(&self, id: &str) -> Option<String> {
        let inner = self.lock();
        inner
            .position(id)
            .map(|i| inner.conversations[i].id().to_string())
    }

    /// Canonical direct conversation between `current` and `target`.
    pub fn find_direct(&self, target: &str, current: &str) -> Option<Conversation> {
        self.lock()
            .conversations
            .iter()
            .find(|c| !c.is_pending() && c.is_direct_with(target, current))
            .cloned()
    }

    pub fn update<F>(&self, id: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Conversation),
    {
        {
            let mut inner = self.lock();
            let index = inner
                .position(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            f(&mut inner.conversations[index]);
        }
        self.bump();
        Ok(())
    }

    pub fn archive(&self, id: &str) -> Result<(), StoreError> {
        self.update(id, |c| c.is_archived = true)
    }

    pub fn unarchive(&self, id: &str) -> Result<(), StoreError> {
        self.update(id, |c| c.is_archived = false)
    }

    /// Local-only removal. The returned tombstone can be handed to `restore`.
    pub fn remove(&self, id: &str) -> Option<Tombstone> {
        let tombstone = {
            let mut inner = self.lock();
            let index = inner.position(id)?;
            let conversation = inner.conversations.remove(index);
            Tombstone {
                conversation,
                index,
            }
        };
        self.bump();
        Some(tombstone)
    }

    /// Put a removed conversation back at its old position. Returns `false`
    /// if a record with the same id has been added since.
    pub fn restore(&self, tombstone: Tombstone) -> bool {
        {
            let mut inner = self.lock();
            if inner.index_of(tombstone.conversation.id()).is_some() {
                return false;
            }
            let index = tombstone.index.min(inner.conversations.len());
            inner.conversations.insert(index, tombstone.conversation);
        }
        self.bump();
        true
    }

    pub fn list(&self) -> Vec<Conversation> {
        self.lock().conversations.clone()
    }

    pub fn visible(&self) -> Vec<Conversation> {
        self.lock()
            .conversations
            .iter()
            .filter(|c| !c.is_archived)
            .cloned()
            .collect()
    }

    pub fn archived(&self) -> Vec<Conversation> {
        self.lock()
            .conversations
            .iter()
            .filter(|c| c.is_archived)
            .cloned()
            .collect()
    }

    /// Canonical records only; pending ones have no server identity to
    /// persist under.
    pub fn canonical_snapshot(&self) -> Vec<Conversation> {
        self.lock()
            .conversations
            .iter()
            .filter(|c| matches!(c.identity, Identity::Canonical { .. }))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().conversations.is_empty()
    }

    pub fn clear(&self) {
        {
            let mut inner = self.lock();
            inner.conversations.clear();
            inner.aliases.clear();
        }
        self.bump();
    }
}
