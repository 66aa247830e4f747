use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::notices::{NoticeKind, Notifier};
use crate::api::{ApiError, ConversationApi};
use crate::models::Conversation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOp {
    Archive,
    Unarchive,
    Delete,
}

impl RemoteOp {
    fn as_str(&self) -> &'static str {
        match self {
            RemoteOp::Archive => "archive",
            RemoteOp::Unarchive => "unarchive",
            RemoteOp::Delete => "delete",
        }
    }
}

/// Fire-and-forget server persistence for local list mutations. Local state
/// is already applied when these run and is never rolled back.
#[derive(Clone)]
pub struct RemoteSync {
    api: Arc<dyn ConversationApi>,
    notifier: Notifier,
    cancel: CancellationToken,
    tasks: TaskTracker,
    /// Conversation id -> (sequence, token) of a call still waiting out its delay.
    deferred: Arc<Mutex<HashMap<String, (u64, CancellationToken)>>>,
    sequence: Arc<AtomicU64>,
}

impl RemoteSync {
    pub fn new(api: Arc<dyn ConversationApi>, notifier: Notifier, cancel: CancellationToken) -> Self {
        Self {
            api,
            notifier,
            cancel,
            tasks: TaskTracker::new(),
            deferred: Arc::new(Mutex::new(HashMap::new())),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    fn deferred(&self) -> MutexGuard<'_, HashMap<String, (u64, CancellationToken)>> {
        self.deferred.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push `op` for every canonical conversation in `conversations`.
    /// Pending records have no server counterpart and are skipped.
    pub fn push(&self, op: RemoteOp, conversations: &[Conversation]) {
        let ids: Vec<String> = conversations
            .iter()
            .filter_map(|c| c.canonical_id().map(str::to_string))
            .collect();
        if ids.is_empty() {
            return;
        }

        let this = self.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                biased;
                _ = this.cancel.cancelled() => {
                    tracing::debug!(op = op.as_str(), "Remote sync cancelled");
                }
                _ = this.run(op, ids) => {}
            }
        });
    }

    /// Like `push`, but waits `delay` first. The call for a conversation is
    /// dropped if `abort` is cancelled or `withdraw` names it in the meantime.
    pub fn push_after(
        &self,
        op: RemoteOp,
        conversations: &[Conversation],
        delay: Duration,
        abort: CancellationToken,
    ) {
        for id in conversations.iter().filter_map(|c| c.canonical_id()) {
            let id = id.to_string();
            let token = abort.child_token();
            let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
            self.deferred().insert(id.clone(), (seq, token.clone()));

            let this = self.clone();
            self.tasks.spawn(async move {
                let fire = tokio::select! {
                    biased;
                    _ = this.cancel.cancelled() => {
                        tracing::debug!(op = op.as_str(), "Remote sync cancelled");
                        false
                    }
                    _ = token.cancelled() => {
                        tracing::debug!(op = op.as_str(), conversation_id = %id, "Remote sync withdrawn");
                        false
                    }
                    _ = tokio::time::sleep(delay) => true,
                };
                {
                    let mut deferred = this.deferred();
                    if deferred.get(&id).is_some_and(|(s, _)| *s == seq) {
                        deferred.remove(&id);
                    }
                }
                if fire {
                    this.run(op, vec![id]).await;
                }
            });
        }
    }

    /// Drop a deferred call still waiting for `id`. Returns whether there was one.
    pub fn withdraw(&self, id: &str) -> bool {
        match self.deferred().remove(id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn run(&self, op: RemoteOp, ids: Vec<String>) {
        let calls = ids.iter().map(|id| self.call(op, id));
        let results = join_all(calls).await;

        for (id, result) in ids.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(op = op.as_str(), conversation_id = %id, "Remote sync failed: {}", e);
                self.notifier.error(
                    NoticeKind::PersistenceFailed {
                        conversation_id: id.clone(),
                    },
                    format!("Couldn't {} on the server; it may reappear later", op.as_str()),
                );
            }
        }
    }

    async fn call(&self, op: RemoteOp, id: &str) -> Result<(), ApiError> {
        match op {
            RemoteOp::Archive => self.api.archive_conversation(id).await,
            RemoteOp::Unarchive => self.api.unarchive_conversation(id).await,
            RemoteOp::Delete => self.api.delete_conversation(id).await,
        }
    }

    pub async fn settle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}
