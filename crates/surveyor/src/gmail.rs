//! Gmail REST inbox
//!
//! [`GmailInbox`] implements [`Inbox`] against the Gmail API v1 with a
//! caller-supplied OAuth bearer token. Token acquisition is left to the
//! caller.

use crate::inbox::{BodyFormat, Inbox, MailQuery, MessageId};
use crate::result::{SurveyorError, SurveyorResult};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use std::time::Duration;
use tracing::trace;

/// Public Gmail API endpoint
pub const GMAIL_API: &str = "https://gmail.googleapis.com/gmail/v1";

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Message {
    payload: Option<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    body: PartBody,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
struct PartBody {
    data: Option<String>,
}

impl MessagePart {
    /// Depth-first search for the first part of `mime_type` with data
    fn find(&self, mime_type: &str) -> Option<&str> {
        if self.mime_type.eq_ignore_ascii_case(mime_type) {
            if let Some(ref data) = self.body.data {
                return Some(data);
            }
        }
        self.parts.iter().find_map(|p| p.find(mime_type))
    }
}

/// Decode a Gmail body (URL-safe base64, padding optional)
///
/// # Errors
///
/// [`SurveyorError::Inbox`] for invalid base64 or UTF-8.
pub fn decode_body(data: &str) -> SurveyorResult<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .map_err(|e| SurveyorError::inbox(format!("undecodable message body: {e}")))?;
    String::from_utf8(bytes).map_err(|e| SurveyorError::inbox(format!("message body is not UTF-8: {e}")))
}

/// Provider query for `recipient`: the recipient becomes `to:` unless the
/// query names one already
#[must_use]
pub fn search_query(recipient: &str, query: &MailQuery) -> String {
    if query.to.is_some() {
        query.render()
    } else {
        query.clone().with_to(recipient).render()
    }
}

/// Gmail API client
#[derive(Debug, Clone)]
pub struct GmailInbox {
    base_url: String,
    user: String,
    token: String,
    client: reqwest::Client,
}

impl GmailInbox {
    /// Client for the authenticated user (`me`)
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            base_url: GMAIL_API.to_string(),
            user: "me".to_string(),
            token: token.into(),
            client,
        }
    }

    /// Point at another endpoint
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Read another mailbox the token has delegated access to
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Base URL in use
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> SurveyorResult<T> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .await
            .map_err(|e| SurveyorError::inbox(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if matches!(status.as_u16(), 401 | 403) {
                return Err(SurveyorError::config(format!(
                    "gmail rejected the access token ({status}): {body}"
                )));
            }
            return Err(SurveyorError::inbox(format!("gmail {status}: {body}")));
        }
        resp.json()
            .await
            .map_err(|e| SurveyorError::inbox(e.to_string()))
    }
}

#[async_trait]
impl Inbox for GmailInbox {
    async fn search(&self, recipient: &str, query: &MailQuery) -> SurveyorResult<Vec<MessageId>> {
        let q = search_query(recipient, query);
        let url = format!("{}/users/{}/messages", self.base_url, self.user);
        let list: ListResponse = self.get_json(&url, &[("q", q.as_str())]).await?;
        trace!(query = %q, count = list.messages.len(), "gmail search");
        Ok(list.messages.into_iter().map(|m| MessageId(m.id)).collect())
    }

    async fn fetch_body(&self, id: &MessageId, format: BodyFormat) -> SurveyorResult<String> {
        let url = format!("{}/users/{}/messages/{}", self.base_url, self.user, id);
        let message: Message = self.get_json(&url, &[("format", "full")]).await?;
        let payload = message.payload.unwrap_or_default();
        let data = payload.find(format.mime_type()).ok_or_else(|| {
            SurveyorError::inbox(format!("message {id} has no {} part", format.mime_type()))
        })?;
        decode_body(data)
    }
}
