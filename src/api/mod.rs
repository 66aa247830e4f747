pub mod http;
#[cfg(test)]
pub mod mock;
pub mod traits;
pub mod types;

pub use http::HttpConversationApi;
pub use traits::ConversationApi;
pub use types::{ApiError, ConversationPayload, CreateConversationRequest};
