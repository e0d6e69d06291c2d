//! HTTP implementation of [`ChatBackend`] against the managed backend's
//! PostgREST-style API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use coachchat_shared::backend::ChatBackend;
use coachchat_shared::constants::{DEFAULT_REQUEST_TIMEOUT_MS, MESSAGES_TABLE, TYPING_TABLE};
use coachchat_shared::error::BackendError;
use coachchat_shared::protocol::{MessageRow, NewMessageRow, TypingRow, TypingUpsertRow};
use coachchat_shared::types::{Message, MessageKind, TypingStatus, UserId};

const MESSAGE_SELECT: &str =
    "id,sender_id,content,message_type,created_at,is_read,profiles(full_name,avatar_url)";
const TYPING_SELECT: &str = "user_id,is_typing,updated_at,profiles(full_name)";

#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub api_key: String,
    /// Session token of the signed-in user; the anon key is used without one.
    pub access_token: Option<String>,
    pub timeout: Duration,
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            access_token: None,
            timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RestBackend {
    client: Client,
    config: RestConfig,
}

impl RestBackend {
    pub fn new(config: RestConfig) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn table_url(&self, table: &str) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.base_url.trim_end_matches('/'),
            table
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .config
            .access_token
            .as_deref()
            .unwrap_or(&self.config.api_key);
        request
            .header("apikey", &self.config.api_key)
            .bearer_auth(token)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, BackendError> {
        let resp = self.authorized(request).send().await?;
        let resp = check_status(resp).await?;
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

async fn check_status(resp: Response) -> Result<Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), "Backend request failed");
    Err(map_status(status, body))
}

/// Map a non-success status to the repository error.
fn map_status(status: StatusCode, body: String) -> BackendError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Unauthorized,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => BackendError::Rejected(body),
        other => BackendError::Status {
            status: other.as_u16(),
            body,
        },
    }
}

fn single<T>(mut rows: Vec<T>) -> Result<T, BackendError> {
    if rows.is_empty() {
        return Err(BackendError::Transport(
            "representation missing from write response".into(),
        ));
    }
    Ok(rows.swap_remove(0))
}

#[async_trait]
impl ChatBackend for RestBackend {
    async fn fetch_messages(&self, limit: u32, offset: u32) -> Result<Vec<Message>, BackendError> {
        let request = self.client.get(self.table_url(MESSAGES_TABLE)).query(&[
            ("select", MESSAGE_SELECT.to_string()),
            ("order", "created_at.asc,id.asc".to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ]);
        let rows: Vec<MessageRow> = self.send_json(request).await?;
        debug!(limit, offset, count = rows.len(), "Fetched messages");
        Ok(rows.into_iter().map(MessageRow::into_message).collect())
    }

    async fn fetch_message(&self, id: i64) -> Result<Option<Message>, BackendError> {
        let request = self.client.get(self.table_url(MESSAGES_TABLE)).query(&[
            ("select", MESSAGE_SELECT.to_string()),
            ("id", format!("eq.{id}")),
        ]);
        let rows: Vec<MessageRow> = self.send_json(request).await?;
        Ok(rows.into_iter().next().map(MessageRow::into_message))
    }

    async fn insert_message(
        &self,
        sender_id: &UserId,
        content: &str,
        kind: MessageKind,
    ) -> Result<Message, BackendError> {
        let body = NewMessageRow {
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            kind,
        };
        let request = self
            .client
            .post(self.table_url(MESSAGES_TABLE))
            .query(&[("select", MESSAGE_SELECT)])
            .header("Prefer", "return=representation")
            .json(&body);
        let rows: Vec<MessageRow> = self.send_json(request).await?;
        let message = single(rows)?.into_message();
        debug!(msg_id = %message.id, sender = %sender_id, "Message inserted");
        Ok(message)
    }

    async fn upsert_typing_status(
        &self,
        user_id: &UserId,
        is_typing: bool,
    ) -> Result<TypingStatus, BackendError> {
        let body = TypingUpsertRow {
            user_id: user_id.to_string(),
            is_typing,
            updated_at: Utc::now(),
        };
        let request = self
            .client
            .post(self.table_url(TYPING_TABLE))
            .query(&[("on_conflict", "user_id"), ("select", TYPING_SELECT)])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&body);
        let rows: Vec<TypingRow> = self.send_json(request).await?;
        Ok(single(rows)?.into_status())
    }
}
