//! Scripted `ConversationApi` for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;

use super::traits::ConversationApi;
use super::types::*;
use crate::models::{ConversationKind, Profile};

pub struct MockApi {
    current_user: String,
    canonical_ids: Mutex<HashMap<String, String>>,
    profiles: Mutex<HashMap<String, Profile>>,
    fail_create: AtomicBool,
    fail_persistence: AtomicBool,
    /// When set, creation calls wait for a permit released by the test.
    gate: Option<Semaphore>,
    create_calls: AtomicUsize,
    profile_calls: AtomicUsize,
    pub archived: Mutex<Vec<String>>,
    pub unarchived: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
}

impl MockApi {
    pub fn new(current_user: &str) -> Self {
        Self {
            current_user: current_user.to_string(),
            canonical_ids: Mutex::new(HashMap::new()),
            profiles: Mutex::new(HashMap::new()),
            fail_create: AtomicBool::new(false),
            fail_persistence: AtomicBool::new(false),
            gate: None,
            create_calls: AtomicUsize::new(0),
            profile_calls: AtomicUsize::new(0),
            archived: Mutex::new(Vec::new()),
            unarchived: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn gated(current_user: &str) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new(current_user)
        }
    }

    pub fn with_canonical(self, participant: &str, id: &str) -> Self {
        self.canonical_ids
            .lock()
            .unwrap()
            .insert(participant.to_string(), id.to_string());
        self
    }

    pub fn with_profile(self, profile: Profile) -> Self {
        self.profiles
            .lock()
            .unwrap()
            .insert(profile.id.clone(), profile);
        self
    }

    pub fn fail_creations(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_persistence(&self, fail: bool) {
        self.fail_persistence.store(fail, Ordering::SeqCst);
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub fn create_count(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn profile_count(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }

    fn persistence_result(&self, log: &Mutex<Vec<String>>, id: &str) -> Result<(), ApiError> {
        log.lock().unwrap().push(id.to_string());
        if self.fail_persistence.load(Ordering::SeqCst) {
            Err(ApiError::Network("connection reset".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConversationApi for MockApi {
    async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<ConversationPayload, ApiError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| ApiError::Network(e.to_string()))?
                .forget();
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ApiError::Network("timed out".to_string()));
        }

        let target = request
            .participant_ids
            .first()
            .cloned()
            .ok_or_else(|| ApiError::InvalidResponse("no participants".to_string()))?;
        let id = self
            .canonical_ids
            .lock()
            .unwrap()
            .get(&target)
            .cloned()
            .unwrap_or_else(|| format!("c-{}", target));
        let name = self
            .profiles
            .lock()
            .unwrap()
            .get(&target)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| target.clone());

        Ok(ConversationPayload {
            id,
            kind: ConversationKind::Direct,
            participants: vec![
                ParticipantPayload {
                    id: self.current_user.clone(),
                    name: self.current_user.clone(),
                    username: None,
                    avatar: None,
                },
                ParticipantPayload {
                    id: target,
                    name,
                    username: None,
                    avatar: None,
                },
            ],
            name: None,
            avatar: None,
            created_at: Utc::now(),
        })
    }

    async fn get_profile(&self, user_id: &str) -> Result<Profile, ApiError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        self.profiles
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(user_id.to_string()))
    }

    async fn archive_conversation(&self, id: &str) -> Result<(), ApiError> {
        self.persistence_result(&self.archived, id)
    }

    async fn unarchive_conversation(&self, id: &str) -> Result<(), ApiError> {
        self.persistence_result(&self.unarchived, id)
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), ApiError> {
        self.persistence_result(&self.deleted, id)
    }
}
