use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::api::ConversationApi;
use crate::models::{Conversation, Message, Profile};
use crate::services::{
    ClientSettings, ConversationResolver, ConversationStore, Database, MessageGroup, MessageStore,
    Notice, Notifier, Reconciled, RemoteSync, SelectionController, UpsertOutcome,
};

/// Everything that lives between login and logout. Built once per signed-in
/// user and handed to the UI; nothing here is global.
pub struct Session {
    current_user: String,
    store: ConversationStore,
    messages: MessageStore,
    resolver: ConversationResolver,
    selection: SelectionController,
    sync: RemoteSync,
    db: Database,
    settings: ClientSettings,
    cancel: CancellationToken,
    tasks: TaskTracker,
    reconciled: Arc<Mutex<Vec<Reconciled>>>,
}

impl Session {
    pub async fn start(
        current_user: &str,
        api: Arc<dyn ConversationApi>,
        db: Database,
        settings: ClientSettings,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Notice>)> {
        let (notifier, notices) = Notifier::channel();
        let cancel = CancellationToken::new();
        let store = ConversationStore::new();
        let messages = MessageStore::new();
        let sync = RemoteSync::new(api.clone(), notifier.clone(), cancel.clone());
        let resolver = ConversationResolver::new(
            store.clone(),
            messages.clone(),
            api,
            notifier.clone(),
            sync.clone(),
            cancel.clone(),
        );
        let selection = SelectionController::new(
            store.clone(),
            sync.clone(),
            notifier,
            settings.undo_window(),
        );

        let cached = db
            .load_conversations()
            .await
            .context("Failed to load cached conversations")?;
        tracing::info!(count = cached.len(), "Loaded cached conversations");
        // The store prepends, so feed oldest first to keep the cached order.
        for conversation in cached.into_iter().rev() {
            for participant in conversation
                .participants
                .iter()
                .filter(|p| p.id != current_user)
            {
                resolver.remember_profile(Profile {
                    id: participant.id.clone(),
                    name: participant.name.clone(),
                    username: participant.username.clone(),
                    avatar: participant.avatar.clone(),
                });
            }
            store.upsert(conversation);
        }

        let session = Self {
            current_user: current_user.to_string(),
            store,
            messages,
            resolver,
            selection,
            sync,
            db,
            settings,
            cancel,
            tasks: TaskTracker::new(),
            reconciled: Arc::new(Mutex::new(Vec::new())),
        };
        session.spawn_reconciliation_listener();

        Ok((session, notices))
    }

    /// Re-file cached messages whenever a pending conversation is reconciled.
    fn spawn_reconciliation_listener(&self) {
        let mut events = self.resolver.subscribe_reconciled();
        let db = self.db.clone();
        let cancel = self.cancel.clone();
        let seen = self.reconciled.clone();

        self.tasks.spawn(async move {
            loop {
                // Drain queued events before honouring cancellation.
                let event = tokio::select! {
                    biased;
                    event = events.recv() => event,
                    _ = cancel.cancelled() => break,
                };
                match event {
                    Ok(event) => {
                        if let Err(e) = db
                            .reassign_messages(&event.synthetic_id, &event.canonical_id)
                            .await
                        {
                            tracing::error!("Failed to re-file cached messages: {}", e);
                        }
                        seen.lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Missed reconciliation events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    pub fn current_user(&self) -> &str {
        &self.current_user
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn resolver(&self) -> &ConversationResolver {
        &self.resolver
    }

    pub fn selection(&mut self) -> &mut SelectionController {
        &mut self.selection
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Conversation id for a direct chat with `target_user_id`.
    pub fn open_direct(&self, target_user_id: &str) -> String {
        self.resolver.resolve(target_user_id, &self.current_user)
    }

    /// Load cached history, mark it read and return it grouped for display.
    pub async fn open_conversation(&self, id: &str) -> Result<Vec<MessageGroup>> {
        let id = self.store.current_id(id).unwrap_or_else(|| id.to_string());

        let cached = self
            .db
            .list_messages(&id)
            .await
            .with_context(|| format!("Failed to load messages for {}", id))?;
        for message in cached {
            self.messages.insert(message);
        }

        let marked = self.messages.mark_read(&id, Utc::now());
        if marked > 0 {
            tracing::debug!(conversation_id = %id, marked, "Marked messages read");
        }
        if let Err(e) = self.store.update(&id, |c| c.unread_count = 0) {
            tracing::debug!("Opened conversation not in list: {}", e);
        }

        Ok(self.messages.groups(&id))
    }

    /// Apply a conversation pushed or listed by the server.
    pub fn receive_conversation(&self, conversation: Conversation) -> UpsertOutcome {
        self.resolver.adopt(conversation)
    }

    pub fn groups(&self, id: &str) -> Vec<MessageGroup> {
        self.messages.groups(id)
    }

    /// Record an outgoing message locally. Works against pending ids too.
    pub async fn send_message(&self, conversation_id: &str, text: &str) -> Result<Message> {
        let message = self
            .messages
            .send_local(conversation_id, &self.current_user, text);

        let preview = message.text.clone();
        let timestamp = message.timestamp;
        if let Err(e) = self.store.update(&message.conversation_id, |c| {
            c.last_message = Some(preview);
            c.timestamp = timestamp;
        }) {
            tracing::warn!("Sent into a conversation not in the list: {}", e);
        }

        self.db
            .insert_message(&message)
            .await
            .context("Failed to cache sent message")?;
        Ok(message)
    }

    /// Apply a message delivered by the transport.
    pub async fn receive_message(&self, message: Message) -> Result<()> {
        self.messages.insert(message.clone());

        let incoming = !message.is_sent;
        let preview = message.text.clone();
        let timestamp = message.timestamp;
        let result = self.store.update(&message.conversation_id, |c| {
            if timestamp >= c.timestamp {
                c.last_message = Some(preview);
                c.timestamp = timestamp;
            }
            if incoming {
                c.unread_count += 1;
            }
        });
        if let Err(e) = result {
            tracing::warn!("Message for unknown conversation: {}", e);
        }

        self.db
            .insert_message(&message)
            .await
            .context("Failed to cache received message")
    }

    /// Write canonical conversations to the local cache.
    pub async fn persist(&self) -> Result<()> {
        let reconciled: Vec<Reconciled> = self
            .reconciled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        // Catches messages cached under a pending id after the listener ran.
        for event in &reconciled {
            self.db
                .reassign_messages(&event.synthetic_id, &event.canonical_id)
                .await?;
        }

        self.db
            .save_conversations(&self.store.canonical_snapshot())
            .await
            .context("Failed to save conversations")
    }

    /// Tear the session down. In-flight responses that arrive afterwards are
    /// dropped, and the stores are emptied.
    pub async fn logout(self) -> Result<()> {
        tracing::info!(user = %self.current_user, "Logging out");
        self.cancel.cancel();
        self.resolver.settle().await;
        self.sync.settle().await;
        self.tasks.close();
        self.tasks.wait().await;

        let result = self.persist().await;
        self.store.clear();
        self.messages.clear();
        result
    }
}
