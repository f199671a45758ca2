//! Request/response access to the messaging service: durable writes and
//! history.

use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use async_trait::async_trait;
use dmcore::types::{Conversation, ConversationId, Message, MessageId, MessagePage, UserBrief, UserId};
use log::{debug, warn};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// The service operations the engine relies on. Each call is one request.
#[async_trait]
pub trait DmApi: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, TransportError>;

    /// A page ending just before `before`, or the newest page when `None`.
    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<MessagePage, TransportError>;

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        body: &str,
    ) -> Result<Message, TransportError>;

    /// Idempotent.
    async fn mark_read(&self, conversation_id: ConversationId) -> Result<(), TransportError>;

    /// Returns the existing conversation with `peer`, creating it if needed.
    async fn open_conversation(&self, peer: UserId) -> Result<Conversation, TransportError>;

    async fn online_friends(&self) -> Result<Vec<UserId>, TransportError>;

    async fn unread_total(&self) -> Result<u32, TransportError>;

    async fn list_friends(&self) -> Result<Vec<UserBrief>, TransportError>;
}

#[derive(Deserialize)]
struct ConversationList {
    conversations: Vec<Conversation>,
}

#[derive(Deserialize)]
struct OnlineIds {
    online_ids: Vec<UserId>,
}

#[derive(Deserialize)]
struct UnreadCount {
    unread_count: u32,
}

#[derive(Deserialize)]
struct FriendList {
    friends: Vec<Friendship>,
}

#[derive(Deserialize)]
struct Friendship {
    friend: UserBrief,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
    msg: Option<String>,
}

/// [`DmApi`] over an [`HttpClient`], authenticated with a bearer credential.
pub struct RestClient {
    http: Arc<dyn HttpClient>,
    config: ClientConfig,
    credential: String,
}

impl RestClient {
    pub fn new(http: Arc<dyn HttpClient>, config: ClientConfig, credential: impl Into<String>) -> Self {
        Self {
            http,
            config,
            credential: credential.into(),
        }
    }

    fn authorize(&self, request: HttpRequest) -> HttpRequest {
        request
            .with_header("Authorization", format!("Bearer {}", self.credential))
            .with_header("Accept", "application/json")
    }

    async fn call<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T, TransportError> {
        let method = request.method.as_str();
        let url = request.url.clone();
        debug!(target: "Rest", "{method} {url}");

        let response = self
            .http
            .execute(self.authorize(request))
            .await
            .map_err(TransportError::Network)?;

        if !response.is_success() {
            let err = status_error(&response);
            warn!(target: "Rest", "{method} {url} failed: {err}");
            return Err(err);
        }
        Ok(serde_json::from_slice(&response.body)?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        self.call(HttpRequest::get(self.config.api_url(path))).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, TransportError> {
        let mut request = HttpRequest::post(self.config.api_url(path));
        if let Some(body) = body {
            request = request.with_json(&body).map_err(TransportError::Request)?;
        }
        self.call(request).await
    }
}

fn status_error(response: &HttpResponse) -> TransportError {
    let message = serde_json::from_slice::<ErrorBody>(&response.body)
        .ok()
        .and_then(|b| b.error.or(b.message).or(b.msg))
        .or_else(|| response.body_string().ok().filter(|s| !s.trim().is_empty()))
        .unwrap_or_else(|| "no details".to_string());
    TransportError::Status {
        status: response.status_code,
        message,
    }
}

#[async_trait]
impl DmApi for RestClient {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, TransportError> {
        let list: ConversationList = self.get("dm/conversations").await?;
        Ok(list.conversations)
    }

    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<MessagePage, TransportError> {
        let mut path = format!("dm/conversations/{conversation_id}/messages?limit={limit}");
        if let Some(before) = before {
            path.push_str(&format!("&before={before}"));
        }
        self.get(&path).await
    }

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        body: &str,
    ) -> Result<Message, TransportError> {
        self.post(
            &format!("dm/conversations/{conversation_id}/messages"),
            Some(serde_json::json!({ "body": body })),
        )
        .await
    }

    async fn mark_read(&self, conversation_id: ConversationId) -> Result<(), TransportError> {
        let _: serde_json::Value = self
            .post(&format!("dm/conversations/{conversation_id}/read"), None)
            .await?;
        Ok(())
    }

    async fn open_conversation(&self, peer: UserId) -> Result<Conversation, TransportError> {
        self.post(&format!("dm/conversations/{peer}"), None).await
    }

    async fn online_friends(&self) -> Result<Vec<UserId>, TransportError> {
        let ids: OnlineIds = self.get("friends/online").await?;
        Ok(ids.online_ids)
    }

    async fn unread_total(&self) -> Result<u32, TransportError> {
        let count: UnreadCount = self.get("dm/unread-count").await?;
        Ok(count.unread_count)
    }

    async fn list_friends(&self) -> Result<Vec<UserBrief>, TransportError> {
        let list: FriendList = self.get("friends").await?;
        Ok(list.friends.into_iter().map(|f| f.friend).collect())
    }
}
