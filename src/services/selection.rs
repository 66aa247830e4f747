use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::notices::{NoticeKind, Notifier};
use super::store::{ConversationStore, Tombstone};
use super::sync::{RemoteOp, RemoteSync};
use crate::models::Conversation;

/// Horizontal drag distance, in points, that commits a swipe.
pub const SWIPE_COMMIT_DISTANCE: f32 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeAction {
    Archive,
    Delete,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwipeDirection {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwipeConfig {
    pub left: SwipeAction,
    pub right: SwipeAction,
}

impl Default for SwipeConfig {
    fn default() -> Self {
        Self {
            left: SwipeAction::Delete,
            right: SwipeAction::Archive,
        }
    }
}

impl SwipeConfig {
    pub fn action_for(&self, direction: SwipeDirection) -> SwipeAction {
        match direction {
            SwipeDirection::Left => self.left,
            SwipeDirection::Right => self.right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SwipeState {
    Resting,
    Dragging { offset: f32 },
    Executing,
}

/// Swipe affordance of one list row. Holds nothing beyond the live drag.
#[derive(Debug, Clone, PartialEq)]
pub struct SwipeRow {
    pub conversation_id: String,
    state: SwipeState,
}

impl SwipeRow {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            state: SwipeState::Resting,
        }
    }

    pub fn state(&self) -> SwipeState {
        self.state
    }

    pub fn drag_to(&mut self, offset: f32) {
        if let SwipeState::Dragging { offset: current } = &mut self.state {
            *current = offset;
        }
    }

    fn close(&mut self) {
        self.state = SwipeState::Resting;
    }

    fn committed_direction(&self) -> Option<SwipeDirection> {
        match self.state {
            SwipeState::Dragging { offset } if offset <= -SWIPE_COMMIT_DISTANCE => {
                Some(SwipeDirection::Left)
            }
            SwipeState::Dragging { offset } if offset >= SWIPE_COMMIT_DISTANCE => {
                Some(SwipeDirection::Right)
            }
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum SwipeOutcome {
    Executed {
        action: SwipeAction,
        undo: Option<UndoToken>,
    },
    /// Released short of the commit distance, or the action was `None`.
    Closed,
    /// Swipes are off while in selection mode.
    Ignored,
}

#[derive(Debug)]
pub enum UndoKind {
    Archive { ids: Vec<String> },
    /// Tombstones in removal order.
    Delete { tombstones: Vec<Tombstone> },
}

/// Inverse of one archive/delete action. The UI offers it for `window`
/// after the action; `SelectionController::undo` accepts it at any time.
#[derive(Debug)]
pub struct UndoToken {
    pub kind: UndoKind,
    offered_at: Instant,
    window: Duration,
    withdraw_remote: Option<CancellationToken>,
}

impl UndoToken {
    pub fn is_offered(&self) -> bool {
        self.offered_at.elapsed() < self.window
    }

    pub fn len(&self) -> usize {
        match &self.kind {
            UndoKind::Archive { ids } => ids.len(),
            UndoKind::Delete { tombstones } => tombstones.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct SelectionController {
    store: ConversationStore,
    sync: RemoteSync,
    notifier: Notifier,
    undo_window: Duration,
    selected: BTreeSet<String>,
}

impl SelectionController {
    pub fn new(
        store: ConversationStore,
        sync: RemoteSync,
        notifier: Notifier,
        undo_window: Duration,
    ) -> Self {
        Self {
            store,
            sync,
            notifier,
            undo_window,
            selected: BTreeSet::new(),
        }
    }

    pub fn is_selection_mode(&self) -> bool {
        !self.selected.is_empty()
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selected.contains(id)
    }

    pub fn selected(&self) -> Vec<String> {
        self.selected.iter().cloned().collect()
    }

    pub fn toggle(&mut self, id: &str) {
        if !self.selected.remove(id) {
            self.selected.insert(id.to_string());
        }
    }

    pub fn long_press(&mut self, id: &str) {
        if self.selected.is_empty() {
            self.selected.insert(id.to_string());
        } else {
            self.toggle(id);
        }
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    pub fn bulk_archive(&mut self) -> Option<UndoToken> {
        let ids = std::mem::take(&mut self.selected);
        self.archive_ids(ids.into_iter().collect())
    }

    pub fn bulk_delete(&mut self) -> Option<UndoToken> {
        let ids = std::mem::take(&mut self.selected);
        self.delete_ids(ids.into_iter().collect())
    }

    pub fn begin_swipe(&self, row: &mut SwipeRow) -> bool {
        if self.is_selection_mode() {
            return false;
        }
        row.state = SwipeState::Dragging { offset: 0.0 };
        true
    }

    /// Finish a drag. Runs the configured action at most once and always
    /// leaves the row resting.
    pub fn release_swipe(&mut self, row: &mut SwipeRow, config: &SwipeConfig) -> SwipeOutcome {
        if self.is_selection_mode() {
            row.close();
            return SwipeOutcome::Ignored;
        }
        let Some(direction) = row.committed_direction() else {
            row.close();
            return SwipeOutcome::Closed;
        };

        let action = config.action_for(direction);
        row.state = SwipeState::Executing;
        let outcome = match action {
            SwipeAction::None => SwipeOutcome::Closed,
            SwipeAction::Archive => SwipeOutcome::Executed {
                action,
                undo: self.archive_ids(vec![row.conversation_id.clone()]),
            },
            SwipeAction::Delete => SwipeOutcome::Executed {
                action,
                undo: self.delete_ids(vec![row.conversation_id.clone()]),
            },
        };
        row.close();
        outcome
    }

    fn archive_ids(&mut self, ids: Vec<String>) -> Option<UndoToken> {
        let mut archived: Vec<Conversation> = Vec::new();
        for id in ids {
            match self.store.archive(&id) {
                Ok(()) => archived.extend(self.store.get(&id)),
                Err(e) => tracing::debug!("Skipping archive: {}", e),
            }
        }
        if archived.is_empty() {
            return None;
        }

        self.sync.push(RemoteOp::Archive, &archived);
        let count = archived.len();
        tracing::info!(count, "Archived conversations");
        self.notifier.info(
            NoticeKind::Archived { count },
            format!("{} archived", plural(count)),
        );

        Some(UndoToken {
            kind: UndoKind::Archive {
                ids: archived.iter().map(|c| c.id().to_string()).collect(),
            },
            offered_at: Instant::now(),
            window: self.undo_window,
            withdraw_remote: None,
        })
    }

    fn delete_ids(&mut self, ids: Vec<String>) -> Option<UndoToken> {
        let tombstones: Vec<Tombstone> = ids.iter().filter_map(|id| self.store.remove(id)).collect();
        if tombstones.is_empty() {
            return None;
        }

        // The server delete is held back until the undo window closes.
        let withdraw = CancellationToken::new();
        let removed: Vec<Conversation> = tombstones.iter().map(|t| t.conversation.clone()).collect();
        self.sync
            .push_after(RemoteOp::Delete, &removed, self.undo_window, withdraw.clone());

        let count = tombstones.len();
        tracing::info!(count, "Deleted conversations");
        self.notifier.info(
            NoticeKind::Deleted { count },
            format!("{} deleted", plural(count)),
        );

        Some(UndoToken {
            kind: UndoKind::Delete { tombstones },
            offered_at: Instant::now(),
            window: self.undo_window,
            withdraw_remote: Some(withdraw),
        })
    }

    /// Reverse an archive or delete. Returns how many conversations came back.
    pub fn undo(&mut self, token: UndoToken) -> usize {
        if let Some(withdraw) = &token.withdraw_remote {
            withdraw.cancel();
        }

        let restored = match token.kind {
            UndoKind::Archive { ids } => {
                let mut unarchived = Vec::new();
                for id in ids {
                    match self.store.unarchive(&id) {
                        Ok(()) => unarchived.extend(self.store.get(&id)),
                        Err(e) => tracing::debug!("Skipping unarchive: {}", e),
                    }
                }
                self.sync.push(RemoteOp::Unarchive, &unarchived);
                unarchived.len()
            }
            UndoKind::Delete { tombstones } => tombstones
                .into_iter()
                .rev()
                .filter(|t| self.store.restore(t.clone()))
                .count(),
        };

        if restored > 0 {
            self.notifier.info(
                NoticeKind::Restored { count: restored },
                format!("{} restored", plural(restored)),
            );
        }
        restored
    }
}

fn plural(count: usize) -> String {
    if count == 1 {
        "1 conversation".to_string()
    } else {
        format!("{} conversations", count)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::api::mock::MockApi;
    use crate::models::{ConversationKind, Identity};

    struct Fixture {
        store: ConversationStore,
        sync: RemoteSync,
        api: Arc<MockApi>,
        controller: SelectionController,
    }

    fn conversation(id: &str) -> Conversation {
        Conversation {
            identity: Identity::Canonical { id: id.to_string() },
            kind: ConversationKind::Direct,
            participants: Vec::new(),
            name: id.to_string(),
            avatar: None,
            last_message: None,
            timestamp: Utc::now(),
            unread_count: 0,
            is_archived: false,
        }
    }

    fn fixture(ids: &[&str]) -> Fixture {
        let store = ConversationStore::new();
        for id in ids {
            store.upsert(conversation(id));
        }
        let api = Arc::new(MockApi::new("me"));
        let (notifier, _rx) = Notifier::channel();
        let sync = RemoteSync::new(api.clone(), notifier.clone(), CancellationToken::new());
        let controller = SelectionController::new(
            store.clone(),
            sync.clone(),
            notifier,
            Duration::from_secs(5),
        );
        Fixture {
            store,
            sync,
            api,
            controller,
        }
    }

    fn ids(conversations: &[Conversation]) -> Vec<String> {
        conversations.iter().map(|c| c.id().to_string()).collect()
    }

    #[test]
    fn test_toggle_twice_is_identity() {
        let mut f = fixture(&[]);
        f.controller.toggle("a");
        let before = f.controller.selected();

        f.controller.toggle("b");
        f.controller.toggle("b");
        assert_eq!(f.controller.selected(), before);

        f.controller.toggle("a");
        assert!(!f.controller.is_selection_mode());
    }

    #[test]
    fn test_long_press_seeds_then_toggles() {
        let mut f = fixture(&[]);
        f.controller.long_press("a");
        assert_eq!(f.controller.selected(), vec!["a"]);

        f.controller.long_press("b");
        assert_eq!(f.controller.selected(), vec!["a", "b"]);

        f.controller.long_press("a");
        assert_eq!(f.controller.selected(), vec!["b"]);

        f.controller.clear();
        assert!(!f.controller.is_selection_mode());
    }

    #[tokio::test]
    async fn test_bulk_archive_marks_exactly_selection() {
        let mut f = fixture(&["c1", "c2", "c3", "c4"]);
        f.controller.toggle("c1");
        f.controller.toggle("c3");
        f.controller.toggle("c4");

        let undo = f.controller.bulk_archive().unwrap();
        assert_eq!(undo.len(), 3);
        assert!(!f.controller.is_selection_mode());

        let archived = ids(&f.store.archived());
        assert_eq!(archived.len(), 3);
        assert!(archived.iter().all(|id| id != "c2"));
        assert_eq!(ids(&f.store.visible()), vec!["c2"]);

        f.sync.settle().await;
        assert_eq!(f.api.archived.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_archive_undo_restores() {
        let mut f = fixture(&["c1"]);
        f.controller.toggle("c1");
        let undo = f.controller.bulk_archive().unwrap();
        assert!(undo.is_offered());
        assert!(f.store.get("c1").unwrap().is_archived);

        assert_eq!(f.controller.undo(undo), 1);
        assert!(!f.store.get("c1").unwrap().is_archived);

        f.sync.settle().await;
        assert_eq!(*f.api.unarchived.lock().unwrap(), vec!["c1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undo_offer_expires_but_still_works() {
        let mut f = fixture(&["c1"]);
        f.controller.toggle("c1");
        let undo = f.controller.bulk_archive().unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!undo.is_offered());

        f.controller.undo(undo);
        assert!(!f.store.get("c1").unwrap().is_archived);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_delete_and_undo_withdraws_server_delete() {
        let mut f = fixture(&["c1", "c2", "c3"]);
        f.controller.toggle("c1");
        f.controller.toggle("c3");

        let undo = f.controller.bulk_delete().unwrap();
        assert!(!f.controller.is_selection_mode());
        assert_eq!(ids(&f.store.list()), vec!["c2"]);

        assert_eq!(f.controller.undo(undo), 2);
        assert_eq!(ids(&f.store.list()), vec!["c3", "c2", "c1"]);

        f.sync.settle().await;
        assert!(f.api.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_delete_reaches_server_after_window() {
        let mut f = fixture(&["c1", "c2"]);
        f.controller.toggle("c2");
        let _undo = f.controller.bulk_delete().unwrap();

        f.sync.settle().await;
        assert_eq!(*f.api.deleted.lock().unwrap(), vec!["c2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopening_deleted_chat_keeps_it_on_server() {
        use crate::models::Participant;
        use crate::services::messages::MessageStore;
        use crate::services::resolver::ConversationResolver;

        let mut f = fixture(&[]);
        f.store.upsert(Conversation {
            participants: ["me", "u2"]
                .iter()
                .map(|id| Participant {
                    id: id.to_string(),
                    name: id.to_string(),
                    username: None,
                    avatar: None,
                })
                .collect(),
            ..conversation("c-u2")
        });

        let mut row = SwipeRow::new("c-u2");
        f.controller.begin_swipe(&mut row);
        row.drag_to(-SWIPE_COMMIT_DISTANCE);
        let outcome = f.controller.release_swipe(&mut row, &SwipeConfig::default());
        assert!(matches!(
            outcome,
            SwipeOutcome::Executed {
                action: SwipeAction::Delete,
                ..
            }
        ));
        assert!(!f.store.contains("c-u2"));

        // Inside the undo window the user opens a chat with the same person.
        let (notifier, _rx) = Notifier::channel();
        let resolver = ConversationResolver::new(
            f.store.clone(),
            MessageStore::new(),
            f.api.clone(),
            notifier,
            f.sync.clone(),
            CancellationToken::new(),
        );
        resolver.resolve("u2", "me");
        resolver.settle().await;
        f.sync.settle().await;

        assert!(f.store.contains("c-u2"));
        assert!(f.api.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_swipe_none_closes_without_mutation() {
        let mut f = fixture(&["c1"]);
        let config = SwipeConfig {
            left: SwipeAction::None,
            right: SwipeAction::None,
        };
        let before = f.store.list();
        let revision = f.store.revision();

        let mut row = SwipeRow::new("c1");
        assert!(f.controller.begin_swipe(&mut row));
        row.drag_to(-120.0);
        let outcome = f.controller.release_swipe(&mut row, &config);

        assert!(matches!(outcome, SwipeOutcome::Closed));
        assert_eq!(row.state(), SwipeState::Resting);
        assert_eq!(f.store.list(), before);
        assert_eq!(f.store.revision(), revision);
    }

    #[tokio::test]
    async fn test_swipe_executes_configured_action_once() {
        let mut f = fixture(&["c1", "c2"]);
        let config = SwipeConfig::default();

        let mut row = SwipeRow::new("c1");
        f.controller.begin_swipe(&mut row);
        row.drag_to(SWIPE_COMMIT_DISTANCE + 10.0);
        let outcome = f.controller.release_swipe(&mut row, &config);

        match outcome {
            SwipeOutcome::Executed { action, undo } => {
                assert_eq!(action, SwipeAction::Archive);
                assert_eq!(undo.unwrap().len(), 1);
            }
            other => panic!("Expected Executed, got {:?}", other),
        }
        assert_eq!(row.state(), SwipeState::Resting);
        assert!(f.store.get("c1").unwrap().is_archived);

        // A second release without a new drag does nothing.
        assert!(matches!(
            f.controller.release_swipe(&mut row, &config),
            SwipeOutcome::Closed
        ));
        assert_eq!(f.store.archived().len(), 1);
    }

    #[tokio::test]
    async fn test_short_swipe_closes() {
        let mut f = fixture(&["c1"]);
        let mut row = SwipeRow::new("c1");
        f.controller.begin_swipe(&mut row);
        row.drag_to(-10.0);

        let outcome = f.controller.release_swipe(&mut row, &SwipeConfig::default());
        assert!(matches!(outcome, SwipeOutcome::Closed));
        assert!(f.store.contains("c1"));
    }

    #[tokio::test]
    async fn test_swipe_disabled_in_selection_mode() {
        let mut f = fixture(&["c1", "c2"]);
        f.controller.toggle("c2");

        let mut row = SwipeRow::new("c1");
        assert!(!f.controller.begin_swipe(&mut row));
        row.drag_to(-200.0);
        assert_eq!(row.state(), SwipeState::Resting);

        let outcome = f.controller.release_swipe(&mut row, &SwipeConfig::default());
        assert!(matches!(outcome, SwipeOutcome::Ignored));
        assert!(f.store.contains("c1"));
    }

    #[tokio::test]
    async fn test_bulk_archive_skips_stale_ids() {
        let mut f = fixture(&["c1"]);
        f.controller.toggle("c1");
        f.controller.toggle("gone");

        let undo = f.controller.bulk_archive().unwrap();
        assert_eq!(undo.len(), 1);
        assert!(f.controller.bulk_archive().is_none());
    }
}
