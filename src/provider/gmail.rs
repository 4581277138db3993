//! Gmail API mailbox implementation.
//!
//! This module provides a [`Mailbox`] implementation using the Gmail REST API.
//!
//! # Authentication
//!
//! Gmail uses OAuth 2.0. Every request asks the [`CredentialStore`] for a
//! valid access token, which refreshes the persisted credential transparently
//! when it is close to expiry. The interactive flow is never run from here.
//!
//! # API usage
//!
//! This adapter uses exactly three Gmail API v1 endpoints:
//! - `users.messages.list` with an `is:unread after:<date>` query
//! - `users.messages.get` with `format=metadata` restricted to the Subject header
//! - `users.messages.modify` to remove the `UNREAD` label

use chrono::Local;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{Mailbox, MailboxError, MessageId, Result};
use crate::auth::CredentialStore;
use async_trait::async_trait;

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Placeholder used when a message has no Subject header.
const NO_SUBJECT: &str = "(No Subject)";

/// Gmail API message list response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    messages: Option<Vec<MessageRef>>,
    #[allow(dead_code)]
    result_size_estimate: Option<u32>,
}

/// Gmail API message reference as returned by `messages.list`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRef {
    id: String,
    #[allow(dead_code)]
    thread_id: Option<String>,
}

/// Gmail API message metadata as returned by `messages.get`.
#[derive(Debug, Deserialize)]
struct MessageMetadata {
    payload: Option<MessagePayload>,
}

/// Gmail message payload (headers only, given `format=metadata`).
#[derive(Debug, Deserialize)]
struct MessagePayload {
    headers: Option<Vec<MessageHeader>>,
}

/// Gmail message header.
#[derive(Debug, Deserialize)]
struct MessageHeader {
    name: String,
    value: String,
}

/// Gmail modify request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    add_label_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    remove_label_ids: Vec<String>,
}

/// Gmail API mailbox.
///
/// Implements [`Mailbox`] over the Gmail REST API with OAuth 2.0 credentials
/// managed by a [`CredentialStore`].
pub struct GmailMailbox {
    /// HTTP client for API requests.
    client: reqwest::Client,
    /// Credential store, refreshed lazily before each request.
    store: Mutex<CredentialStore>,
}

impl GmailMailbox {
    /// Creates a new Gmail mailbox backed by the given credential store.
    ///
    /// The store should already hold an obtained credential; see
    /// [`CredentialStore::obtain`].
    pub fn new(store: CredentialStore) -> Self {
        Self {
            client: reqwest::Client::new(),
            store: Mutex::new(store),
        }
    }

    /// Builds the unread-today search query for the local calendar day.
    fn unread_today_query() -> String {
        format!("is:unread after:{}", Local::now().format("%Y/%m/%d"))
    }

    /// Builds authorization headers, refreshing the access token if needed.
    async fn auth_headers(&self) -> Result<HeaderMap> {
        let token = self
            .store
            .lock()
            .await
            .access_token()
            .await
            .map_err(|e| MailboxError::Authentication(e.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| MailboxError::Internal(format!("invalid header: {}", e)))?,
        );
        Ok(headers)
    }

    /// Makes an authenticated GET request to the Gmail API.
    async fn get<T: for<'de> Deserialize<'de>>(&self, endpoint: &str) -> Result<T> {
        let url = format!("{}{}", GMAIL_API_BASE, endpoint);
        let headers = self.auth_headers().await?;

        let response = self
            .client
            .get(&url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| MailboxError::Connection(e.to_string()))?;

        self.handle_response(response).await
    }

    /// Makes an authenticated POST request that discards the response body.
    async fn post_no_response<B: Serialize + Sync>(&self, endpoint: &str, body: &B) -> Result<()> {
        let url = format!("{}{}", GMAIL_API_BASE, endpoint);
        let mut headers = self.auth_headers().await?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| MailboxError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        Ok(())
    }

    /// Handles an API response, checking for errors.
    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| MailboxError::Internal(format!("parse response: {}", e)))
    }

    /// Maps API error responses into the error taxonomy.
    async fn handle_error(&self, response: reqwest::Response) -> MailboxError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 => MailboxError::Authentication(format!("unauthorized: {}", body)),
            400 => MailboxError::InvalidRequest(body),
            404 => MailboxError::NotFound(body),
            429 => MailboxError::RateLimited {
                retry_after_secs: None,
            },
            _ => MailboxError::Internal(format!("API error ({}): {}", status, body)),
        }
    }

    /// Extracts the Subject header from message metadata.
    fn subject_from_metadata(metadata: &MessageMetadata) -> String {
        metadata
            .payload
            .as_ref()
            .and_then(|p| p.headers.as_ref())
            .and_then(|headers| {
                headers
                    .iter()
                    .find(|h| h.name.eq_ignore_ascii_case("Subject"))
                    .map(|h| h.value.clone())
            })
            .unwrap_or_else(|| NO_SUBJECT.to_string())
    }
}

#[async_trait]
impl Mailbox for GmailMailbox {
    async fn list_unread_today(&self) -> Result<Vec<MessageId>> {
        let query = Self::unread_today_query();
        tracing::debug!(%query, "listing unread messages");

        let endpoint = format!("/messages?q={}", urlencode(&query));
        let response: MessageListResponse = self.get(&endpoint).await?;

        let ids: Vec<MessageId> = response
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|m| MessageId(m.id))
            .collect();

        tracing::debug!(count = ids.len(), "unread messages today");
        Ok(ids)
    }

    async fn fetch_subject(&self, id: &MessageId) -> Result<String> {
        let endpoint = format!("/messages/{}?format=metadata&metadataHeaders=Subject", id.0);
        let metadata: MessageMetadata = self.get(&endpoint).await?;
        Ok(Self::subject_from_metadata(&metadata))
    }

    async fn mark_read(&self, id: &MessageId) -> Result<()> {
        let endpoint = format!("/messages/{}/modify", id.0);
        let body = ModifyRequest {
            add_label_ids: vec![],
            remove_label_ids: vec!["UNREAD".to_string()],
        };
        self.post_no_response(&endpoint, &body).await?;

        tracing::debug!(message_id = %id, "marked read");
        Ok(())
    }
}

/// Percent-encodes a Gmail search query for use in a URL query parameter.
fn urlencode(query: &str) -> String {
    url::form_urlencoded::byte_serialize(query.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unread_today_query_shape() {
        let query = GmailMailbox::unread_today_query();
        assert!(query.starts_with("is:unread after:"));

        // The date portion is YYYY/MM/DD of the local day.
        let date = query.rsplit(':').next().unwrap();
        assert_eq!(date.len(), 10);
        assert_eq!(date.matches('/').count(), 2);
    }

    #[test]
    fn query_is_urlencoded() {
        let encoded = urlencode("is:unread after:2024/06/01");
        assert!(!encoded.contains(' '));
        assert!(!encoded.contains('/'));
    }

    #[test]
    fn list_response_without_messages_is_empty() {
        let response: MessageListResponse =
            serde_json::from_str(r#"{"resultSizeEstimate": 0}"#).unwrap();
        assert!(response.messages.is_none());
    }

    #[test]
    fn list_response_parses_ids() {
        let response: MessageListResponse = serde_json::from_str(
            r#"{"messages": [{"id": "m1", "threadId": "t1"}, {"id": "m2", "threadId": "t1"}],
                "resultSizeEstimate": 2}"#,
        )
        .unwrap();

        let ids: Vec<String> = response
            .messages
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn subject_extracted_case_insensitively() {
        let metadata: MessageMetadata = serde_json::from_str(
            r#"{"payload": {"headers": [
                {"name": "subject", "value": "Quarterly report"},
                {"name": "From", "value": "a@example.com"}
            ]}}"#,
        )
        .unwrap();

        assert_eq!(
            GmailMailbox::subject_from_metadata(&metadata),
            "Quarterly report"
        );
    }

    #[test]
    fn missing_subject_uses_placeholder() {
        let metadata: MessageMetadata = serde_json::from_str(
            r#"{"payload": {"headers": [{"name": "From", "value": "a@example.com"}]}}"#,
        )
        .unwrap();
        assert_eq!(GmailMailbox::subject_from_metadata(&metadata), NO_SUBJECT);

        let empty: MessageMetadata = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(GmailMailbox::subject_from_metadata(&empty), NO_SUBJECT);
    }

    #[test]
    fn modify_request_removes_unread_only() {
        let body = ModifyRequest {
            add_label_ids: vec![],
            remove_label_ids: vec!["UNREAD".to_string()],
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"removeLabelIds":["UNREAD"]}"#);
    }
}
