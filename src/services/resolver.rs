use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::messages::MessageStore;
use super::notices::{NoticeKind, Notifier};
use super::store::{ConversationStore, ReplaceOutcome, UpsertOutcome};
use super::sync::{RemoteOp, RemoteSync};
use crate::api::{ConversationApi, CreateConversationRequest};
use crate::models::{Conversation, ConversationKind, Identity, PairKey, Profile};

/// Emitted after a pending conversation was swapped for its canonical one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub synthetic_id: String,
    pub canonical_id: String,
}

/// Reconciliation progress for one user pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairState {
    Idle,
    Resolving { synthetic_id: String },
    Resolved { canonical_id: String },
    Failed { synthetic_id: String, reason: String },
}

struct ResolverInner {
    store: ConversationStore,
    messages: MessageStore,
    api: Arc<dyn ConversationApi>,
    notifier: Notifier,
    sync: RemoteSync,
    pairs: Mutex<HashMap<PairKey, PairState>>,
    profiles: Mutex<HashMap<String, Profile>>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    reconciled: broadcast::Sender<Reconciled>,
}

/// Hands out a usable conversation id for a participant without waiting on
/// the network, and swaps in the server's conversation once it arrives.
#[derive(Clone)]
pub struct ConversationResolver {
    inner: Arc<ResolverInner>,
}

impl ConversationResolver {
    pub fn new(
        store: ConversationStore,
        messages: MessageStore,
        api: Arc<dyn ConversationApi>,
        notifier: Notifier,
        sync: RemoteSync,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                store,
                messages,
                api,
                notifier,
                sync,
                pairs: Mutex::new(HashMap::new()),
                profiles: Mutex::new(HashMap::new()),
                cancel,
                tasks: TaskTracker::new(),
                reconciled: broadcast::channel(32).0,
            }),
        }
    }

    fn pairs(&self) -> MutexGuard<'_, HashMap<PairKey, PairState>> {
        self.inner.pairs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn profiles(&self) -> MutexGuard<'_, HashMap<String, Profile>> {
        self.inner
            .profiles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe_reconciled(&self) -> broadcast::Receiver<Reconciled> {
        self.inner.reconciled.subscribe()
    }

    pub fn remember_profile(&self, profile: Profile) {
        self.profiles().insert(profile.id.clone(), profile);
    }

    pub fn cached_profile(&self, user_id: &str) -> Option<Profile> {
        self.profiles().get(user_id).cloned()
    }

    pub fn pair_state(&self, a: &str, b: &str) -> PairState {
        self.pairs()
            .get(&PairKey::new(a, b))
            .cloned()
            .unwrap_or(PairState::Idle)
    }

    fn set_state(&self, key: &PairKey, state: PairState) {
        tracing::debug!(?key, ?state, "Pair state");
        self.pairs().insert(key.clone(), state);
    }

    /// Return the conversation id to use for a direct chat with
    /// `target_user_id`. Never waits on the network; when no canonical
    /// conversation is known a pending one is returned and reconciliation
    /// runs in the background.
    pub fn resolve(&self, target_user_id: &str, current_user_id: &str) -> String {
        if let Some(existing) = self.inner.store.find_direct(target_user_id, current_user_id) {
            return existing.id().to_string();
        }

        let key = PairKey::new(target_user_id, current_user_id);
        let synthetic_id = key.synthetic_id();

        if !self.inner.store.contains(&synthetic_id) {
            let profile = self.cached_profile(target_user_id);
            let pending = self.pending_record(&synthetic_id, target_user_id, profile.as_ref());
            self.inner.store.upsert(pending);
            tracing::info!(%synthetic_id, "Inserted pending conversation");
        }

        // Check-and-set under one lock so rapid re-resolution cannot issue a
        // second request for the same pair.
        let start = {
            let mut pairs = self.pairs();
            match pairs.get(&key) {
                Some(PairState::Resolving { .. }) => false,
                _ => {
                    pairs.insert(
                        key.clone(),
                        PairState::Resolving {
                            synthetic_id: synthetic_id.clone(),
                        },
                    );
                    true
                }
            }
        };

        if start {
            let this = self.clone();
            let target = target_user_id.to_string();
            let current = current_user_id.to_string();
            let synthetic = synthetic_id.clone();
            self.inner.tasks.spawn(async move {
                this.reconcile(key, target, current, synthetic).await;
            });
        }

        synthetic_id
    }

    fn pending_record(
        &self,
        synthetic_id: &str,
        target_user_id: &str,
        profile: Option<&Profile>,
    ) -> Conversation {
        let profile = profile
            .cloned()
            .unwrap_or_else(|| Profile::unknown(target_user_id));
        let now = Utc::now();
        Conversation {
            identity: Identity::Pending {
                synthetic_id: synthetic_id.to_string(),
                since: now,
            },
            kind: ConversationKind::Direct,
            participants: vec![profile.to_participant()],
            name: profile.name.clone(),
            avatar: profile.avatar.clone(),
            last_message: None,
            timestamp: now,
            unread_count: 0,
            is_archived: false,
        }
    }

    async fn reconcile(&self, key: PairKey, target: String, current: String, synthetic_id: String) {
        let cancel = self.inner.cancel.clone();

        if self.cached_profile(&target).is_none() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.abandon(&key, &synthetic_id);
                    return;
                }
                result = self.inner.api.get_profile(&target) => match result {
                    Ok(profile) => self.hydrate_pending(&synthetic_id, profile),
                    Err(e) => tracing::warn!(user_id = %target, "Profile lookup failed: {}", e),
                }
            }
        }

        let request = CreateConversationRequest::direct(&target);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.abandon(&key, &synthetic_id);
                return;
            }
            result = self.inner.api.create_conversation(request) => result,
        };

        match result {
            Ok(payload) => {
                let canonical = payload.into_conversation(&current);
                let canonical_id = canonical.id().to_string();
                match self.inner.store.replace_pending(&synthetic_id, canonical) {
                    ReplaceOutcome::Replaced | ReplaceOutcome::MergedIntoExisting => {
                        self.complete(Some(&key), synthetic_id, canonical_id);
                    }
                    ReplaceOutcome::Stale => self.settle_stale(&key, synthetic_id),
                }
            }
            Err(e) => {
                tracing::error!(%synthetic_id, "Failed to create conversation: {}", e);
                self.inner.notifier.error(
                    NoticeKind::CreationFailed {
                        target_user_id: target.clone(),
                    },
                    format!("Couldn't start a conversation with {}", target),
                );
                self.set_state(
                    &key,
                    PairState::Failed {
                        synthetic_id,
                        reason: e.to_string(),
                    },
                );
            }
        }
    }

    /// The pending record was gone when the response arrived. If an upsert
    /// already swapped it for a canonical record, the pair is resolved.
    fn settle_stale(&self, key: &PairKey, synthetic_id: String) {
        let current = self
            .inner
            .store
            .current_id(&synthetic_id)
            .filter(|id| *id != synthetic_id);
        match current {
            Some(canonical_id) => {
                let resolved = matches!(self.pairs().get(key), Some(PairState::Resolved { .. }));
                if resolved {
                    tracing::debug!(%synthetic_id, %canonical_id, "Already reconciled");
                } else {
                    self.complete(Some(key), synthetic_id, canonical_id);
                }
            }
            None => {
                tracing::debug!(%synthetic_id, "Pending conversation gone, dropping response");
                self.set_state(key, PairState::Idle);
            }
        }
    }

    /// Bookkeeping after a pending record became `canonical_id`: messages
    /// follow it, a deferred server delete of that id is withdrawn, an
    /// archive made while pending reaches the server, and subscribers hear
    /// about it.
    fn complete(&self, key: Option<&PairKey>, synthetic_id: String, canonical_id: String) {
        let moved = self.inner.messages.reassociate(&synthetic_id, &canonical_id);
        if self.inner.sync.withdraw(&canonical_id) {
            tracing::info!(%canonical_id, "Conversation reopened, server delete withdrawn");
        }
        if let Some(conversation) = self.inner.store.get(&canonical_id) {
            if conversation.is_archived {
                self.inner
                    .sync
                    .push(RemoteOp::Archive, std::slice::from_ref(&conversation));
            }
        }

        tracing::info!(%synthetic_id, %canonical_id, moved, "Conversation reconciled");
        if let Some(key) = key {
            self.set_state(
                key,
                PairState::Resolved {
                    canonical_id: canonical_id.clone(),
                },
            );
        }
        // No subscribers is fine.
        let _ = self.inner.reconciled.send(Reconciled {
            synthetic_id,
            canonical_id,
        });
    }

    /// Pair whose pending record is `synthetic_id`, if one is tracked.
    fn key_for(&self, synthetic_id: &str) -> Option<PairKey> {
        self.pairs().iter().find_map(|(key, state)| match state {
            PairState::Resolving { synthetic_id: s } | PairState::Failed { synthetic_id: s, .. }
                if s == synthetic_id =>
            {
                Some(key.clone())
            }
            _ => None,
        })
    }

    /// Add a conversation learned outside a creation response. When it takes
    /// over a pending record the pair is reconciled the same way.
    pub fn adopt(&self, conversation: Conversation) -> UpsertOutcome {
        let canonical_id = conversation.canonical_id().map(str::to_string);
        let outcome = self.inner.store.upsert(conversation);
        match (&outcome, canonical_id) {
            (UpsertOutcome::Replaced { synthetic_id }, Some(canonical_id)) => {
                let key = self.key_for(synthetic_id);
                self.complete(key.as_ref(), synthetic_id.clone(), canonical_id);
            }
            (_, Some(canonical_id)) => {
                if self.inner.sync.withdraw(&canonical_id) {
                    tracing::info!(%canonical_id, "Conversation returned, server delete withdrawn");
                }
            }
            _ => {}
        }
        outcome
    }

    /// Fill in display fields of a pending record, if it is still pending.
    fn hydrate_pending(&self, synthetic_id: &str, profile: Profile) {
        let participant = profile.to_participant();
        let still_pending = self
            .inner
            .store
            .get(synthetic_id)
            .map(|c| c.is_pending())
            .unwrap_or(false);
        if still_pending {
            let result = self.inner.store.update(synthetic_id, |c| {
                c.name = participant.name.clone();
                c.avatar = participant.avatar.clone();
                c.participants = vec![participant];
            });
            if let Err(e) = result {
                tracing::debug!("Skipped profile hydration: {}", e);
            }
        }
        self.remember_profile(profile);
    }

    fn abandon(&self, key: &PairKey, synthetic_id: &str) {
        tracing::debug!(synthetic_id, "Reconciliation cancelled");
        self.set_state(key, PairState::Idle);
    }

    /// Wait for every reconciliation task started so far to finish.
    pub async fn settle(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }

    pub fn in_flight(&self) -> usize {
        self.inner.tasks.len()
    }
}
