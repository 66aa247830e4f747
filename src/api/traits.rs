use async_trait::async_trait;

use super::types::{ApiError, ConversationPayload, CreateConversationRequest};
use crate::models::Profile;

/// Server-side collaborator for conversation lifecycle calls.
#[async_trait]
pub trait ConversationApi: Send + Sync {
    /// Create a conversation, or fetch the existing one for the same
    /// participants.
    async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<ConversationPayload, ApiError>;

    async fn get_profile(&self, user_id: &str) -> Result<Profile, ApiError>;

    async fn archive_conversation(&self, id: &str) -> Result<(), ApiError>;

    async fn unarchive_conversation(&self, id: &str) -> Result<(), ApiError>;

    async fn delete_conversation(&self, id: &str) -> Result<(), ApiError>;
}
