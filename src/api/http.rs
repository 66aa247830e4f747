use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use url::Url;

use super::traits::ConversationApi;
use super::types::*;
use crate::models::Profile;

pub struct HttpConversationApi {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl HttpConversationApi {
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self, ApiError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if parsed.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(format!("{}: not a base URL", base_url)));
        }
        let base_url = parsed;

        Ok(Self {
            client: Client::new(),
            base_url,
            auth_token,
        })
    }

    /// Base URL with `segments` appended, each percent-encoded as one path
    /// segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn parse_error(response: Response) -> ApiError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return ApiError::NotFound(body);
        }
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.message)
            .unwrap_or_else(|_| "Request failed".to_string());
        ApiError::Http {
            status: status.as_u16(),
            message,
        }
    }

    async fn send_empty(&self, builder: reqwest::RequestBuilder) -> Result<(), ApiError> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::parse_error(response).await)
        }
    }
}

#[async_trait]
impl ConversationApi for HttpConversationApi {
    async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<ConversationPayload, ApiError> {
        let url = self.endpoint(&["conversations"])?;
        tracing::debug!(?request, "POST {}", url);

        let response = self
            .authorize(self.client.post(url).json(&request))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::parse_error(response).await);
        }

        response
            .json::<ConversationPayload>()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    async fn get_profile(&self, user_id: &str) -> Result<Profile, ApiError> {
        let url = self.endpoint(&["users", user_id, "profile"])?;

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::parse_error(response).await);
        }

        response
            .json::<Profile>()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    async fn archive_conversation(&self, id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["conversations", id, "archive"])?;
        self.send_empty(self.client.post(url)).await
    }

    async fn unarchive_conversation(&self, id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["conversations", id, "archive"])?;
        self.send_empty(self.client.delete(url)).await
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["conversations", id])?;
        self.send_empty(self.client.delete(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_keeps_base_path() {
        for base in ["https://chat.example.com/api", "https://chat.example.com/api/"] {
            let api = HttpConversationApi::new(base, None).unwrap();
            assert_eq!(
                api.endpoint(&["conversations"]).unwrap().as_str(),
                "https://chat.example.com/api/conversations"
            );
            assert_eq!(
                api.endpoint(&["users", "u1", "profile"]).unwrap().as_str(),
                "https://chat.example.com/api/users/u1/profile"
            );
        }
    }

    #[test]
    fn test_ids_are_escaped_as_single_segments() {
        let api = HttpConversationApi::new("https://chat.example.com/api", None).unwrap();
        let url = api.endpoint(&["conversations", "a/b?c#d", "archive"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://chat.example.com/api/conversations/a%2Fb%3Fc%23d/archive"
        );
        assert_eq!(url.path_segments().unwrap().count(), 4);
    }

    #[test]
    fn test_rejects_malformed_base_url() {
        assert!(HttpConversationApi::new("not a url", None).is_err());
        assert!(HttpConversationApi::new("mailto:chat@example.com", None).is_err());
    }
}
