//! HTTP collaborators: login for a credential, history for backfill.

use futures::future::BoxFuture;
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use crate::common::{ConversationKey, IncomingMessage, UserId};
use crate::error::ApiError;
use crate::network::protocol::MessageFrame;

pub const HISTORY_LIMIT: usize = 50;

/// The authenticated identity a session runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: UserId,
    pub token: String,
}

/// Source of the session credential.
pub trait AuthCollaborator {
    fn token(&self) -> Option<&str>;
    fn current_user(&self) -> Option<&str>;
}

impl AuthCollaborator for Credentials {
    fn token(&self) -> Option<&str> {
        Some(self.token.as_str()).filter(|token| !token.is_empty())
    }

    fn current_user(&self) -> Option<&str> {
        Some(self.user.as_str()).filter(|user| !user.is_empty())
    }
}

/// Fetches recent messages of one conversation.
pub trait HistoryCollaborator: Send + Sync {
    fn fetch_messages(
        &self,
        conversation: &ConversationKey,
    ) -> BoxFuture<'static, Result<Vec<IncomingMessage>, ApiError>>;
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
    #[serde(default)]
    user: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryResponse {
    List(Vec<MessageFrame>),
    Wrapped { messages: Option<Vec<MessageFrame>> },
}

impl HistoryResponse {
    fn into_frames(self) -> Vec<MessageFrame> {
        match self {
            Self::List(frames) => frames,
            Self::Wrapped { messages } => messages.unwrap_or_default(),
        }
    }
}

/// reqwest client for the chat server's `/api` routes.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl HttpApi {
    pub fn new(base: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Credentials, ApiError> {
        let url = self.endpoint("api/login");
        log::info!("Logging in as {username}");
        let resp = self
            .client
            .post(url)
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let body: LoginResponse = resp.json().await?;

        // `user` is either a plain name or an object with a `username` field.
        let user = body
            .user
            .and_then(|user| match user {
                serde_json::Value::String(name) => Some(name),
                other => other.get("username")?.as_str().map(str::to_string),
            })
            .unwrap_or_else(|| username.to_string());

        Ok(Credentials {
            user,
            token: body.token,
        })
    }

    pub fn history_url(&self, conversation: &ConversationKey) -> Url {
        let mut url = self.endpoint("api/messages");
        {
            let mut query = url.query_pairs_mut();
            if let Some(peer) = conversation.peer() {
                query.append_pair("user_id", peer);
            }
            query.append_pair("limit", &HISTORY_LIMIT.to_string());
        }
        url
    }

    pub async fn messages(
        &self,
        conversation: &ConversationKey,
    ) -> Result<Vec<IncomingMessage>, ApiError> {
        let token = self.token.as_deref().ok_or(ApiError::MissingToken)?;
        let resp = self
            .client
            .get(self.history_url(conversation))
            .bearer_auth(token)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let body: HistoryResponse = resp.json().await?;
        Ok(body
            .into_frames()
            .into_iter()
            .map(MessageFrame::into_incoming)
            .collect())
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        url.set_query(None);
        url
    }
}

impl HistoryCollaborator for HttpApi {
    fn fetch_messages(
        &self,
        conversation: &ConversationKey,
    ) -> BoxFuture<'static, Result<Vec<IncomingMessage>, ApiError>> {
        let api = self.clone();
        let conversation = conversation.clone();
        Box::pin(async move { api.messages(&conversation).await })
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }
    let message = resp
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|body| body.get("message")?.as_str().map(str::to_string))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}
