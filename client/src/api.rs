use reqwest::{Client, Response, StatusCode, Url};
use wanderchat_shared::{
    ChatError, ConversationId, DeletedMessage, ErrorBody, Message, Role, SendMessageRequest,
};

/// HTTP client for the message store gateway.
#[derive(Debug, Clone)]
pub struct ChatApi {
    http: Client,
    base_url: String,
    token: String,
}

impl ChatApi {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET /api/conversations/{conversation_id}/messages
    pub async fn history(&self, conversation_id: &ConversationId) -> Result<Vec<Message>, ChatError> {
        let url = self.endpoint(&["api", "conversations", conversation_id.as_str(), "messages"])?;
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    /// POST /api/messages
    pub async fn send(&self, request: &SendMessageRequest) -> Result<Message, ChatError> {
        let response = self
            .http
            .post(self.endpoint(&["api", "messages"])?)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    /// DELETE /api/messages/{message_id}?role=<role>
    pub async fn delete(&self, message_id: &str, role: Role) -> Result<DeletedMessage, ChatError> {
        let response = self
            .http
            .delete(self.endpoint(&["api", "messages", message_id])?)
            .query(&[("role", role.as_str())])
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    /// Base URL with `segments` appended, each percent-encoded as one path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ChatError> {
        let invalid = || ChatError::Validation(format!("invalid server URL {}", self.base_url));
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

fn transport_error(err: reqwest::Error) -> ChatError {
    ChatError::Network(err.to_string())
}

/// Decode a success body, or turn an error response into its `ChatError`.
async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ChatError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| ChatError::Internal(format!("unexpected response body: {}", e)));
    }

    let text = response.text().await.map_err(transport_error)?;
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => Err(ChatError::from(body)),
        Err(_) => Err(status_error(status, text)),
    }
}

/// Fallback for error responses without a JSON error body (proxies, timeouts).
fn status_error(status: StatusCode, text: String) -> ChatError {
    let message = if text.is_empty() {
        status.to_string()
    } else {
        text
    };
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ChatError::Validation(message),
        StatusCode::UNAUTHORIZED => ChatError::Auth(message),
        StatusCode::FORBIDDEN => ChatError::NotAuthorized(message),
        StatusCode::NOT_FOUND => ChatError::NotFound(message),
        s if s.is_server_error() => ChatError::Network(message),
        _ => ChatError::Internal(message),
    }
}
