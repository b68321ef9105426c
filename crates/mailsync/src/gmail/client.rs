//! Gmail API HTTP client
//!
//! Provides the history, message, attachment and watch calls the sync engine
//! needs. Uses synchronous HTTP (ureq) to be executor-agnostic; every request
//! runs under the agent's global timeout.

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use super::api::{
    AttachmentResponse, GmailMessage, HistoryResponse, ProfileResponse, WatchRequest,
    WatchResponse,
};
use super::normalize::{
    decode_base64_bytes, normalize_history, normalize_message, parse_expiration,
};
use super::{MailboxApi, TokenSource};
use crate::models::{HistoryCursor, HistoryDelta, MessageDetail, MessageId, WatchRegistration};

/// Error indicating the history ID has expired
#[derive(Debug, thiserror::Error)]
#[error("History ID expired or invalid")]
pub struct HistoryExpiredError;

/// Gmail API client acting as a delegated mailbox identity
pub struct GmailClient {
    auth: Arc<dyn TokenSource>,
    agent: ureq::Agent,
    base_url: String,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Attempts for per-message fetches
    const MESSAGE_RETRIES: u32 = 3;

    /// Create a new Gmail client
    ///
    /// # Arguments
    /// * `auth` - Source of delegated access tokens
    /// * `timeout` - Upper bound for each HTTP request, connect to last byte
    pub fn new(auth: Arc<dyn TokenSource>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        Self {
            auth,
            agent,
            base_url: Self::BASE_URL.to_string(),
        }
    }

    /// Point the client at a different API root (e.g. a local emulator)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn user_url(&self, identity: &str, path: &str) -> String {
        format!(
            "{}/users/{}{}",
            self.base_url,
            urlencoding::encode(identity),
            path
        )
    }

    fn bearer(&self) -> Result<String> {
        let token = self.auth.access_token()?;
        Ok(format!("Bearer {}", token))
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> Result<T> {
        let mut response = self
            .agent
            .get(url)
            .header("Authorization", &self.bearer()?)
            .call()
            .with_context(|| format!("Failed to send {} request", what))?;

        response
            .body_mut()
            .read_json()
            .with_context(|| format!("Failed to parse {} response", what))
    }

    // === History API ===

    /// List one page of history since a given historyId
    ///
    /// # Errors
    /// Returns `HistoryExpiredError` if the history ID is too old (404 from Gmail)
    pub fn list_history(
        &self,
        identity: &str,
        start_history_id: HistoryCursor,
        page_token: Option<&str>,
    ) -> Result<HistoryResponse> {
        let mut url = format!(
            "{}?startHistoryId={}&historyTypes=messageAdded",
            self.user_url(identity, "/history"),
            start_history_id
        );

        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        let response = self
            .agent
            .get(&url)
            .header("Authorization", &self.bearer()?)
            .call();

        match response {
            Ok(mut resp) => {
                let history: HistoryResponse = resp
                    .body_mut()
                    .read_json()
                    .context("Failed to parse history response")?;
                Ok(history)
            }
            Err(ureq::Error::StatusCode(404)) => Err(HistoryExpiredError.into()),
            Err(e) => Err(anyhow::anyhow!("Failed to fetch history: {}", e)),
        }
    }

    /// List all history pages since a given historyId
    pub fn list_history_all(
        &self,
        identity: &str,
        start_history_id: HistoryCursor,
    ) -> Result<Vec<HistoryResponse>> {
        let mut pages = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let response = self.list_history(identity, start_history_id, page_token.as_deref())?;
            let next = response.next_page_token.clone();
            pages.push(response);

            match next {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!("Fetched {} history page(s) from {}", pages.len(), start_history_id);
        Ok(pages)
    }

    /// Mailbox profile, including the current historyId
    pub fn get_profile(&self, identity: &str) -> Result<ProfileResponse> {
        self.get_json(&self.user_url(identity, "/profile"), "get profile")
    }

    // === Messages API ===

    /// Get full message details by ID
    pub fn get_message(&self, identity: &str, id: &MessageId) -> Result<GmailMessage> {
        let url = format!(
            "{}?format=full",
            self.user_url(identity, &format!("/messages/{}", urlencoding::encode(id.as_str())))
        );
        self.get_json(&url, "get message")
    }

    /// Get a message with exponential backoff retry
    ///
    /// Only transient failures are retried; a 404 or an unparseable body
    /// fails on the first attempt.
    fn get_message_with_retry(&self, identity: &str, id: &MessageId) -> Result<GmailMessage> {
        let mut delay = Duration::from_millis(100);
        let mut attempt = 1;

        loop {
            match self.get_message(identity, id) {
                Ok(msg) => return Ok(msg),
                Err(e) if attempt < Self::MESSAGE_RETRIES && is_transient(&e) => {
                    warn!("Fetching message {} failed (attempt {}): {:#}", id, attempt, e);
                    let jitter = Duration::from_millis(rand_jitter());
                    std::thread::sleep(delay + jitter);
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Get the raw (base64url) data of an attachment
    pub fn get_attachment_data(
        &self,
        identity: &str,
        message_id: &MessageId,
        attachment_id: &str,
    ) -> Result<String> {
        let url = self.user_url(
            identity,
            &format!(
                "/messages/{}/attachments/{}",
                urlencoding::encode(message_id.as_str()),
                urlencoding::encode(attachment_id)
            ),
        );
        let attachment: AttachmentResponse = self.get_json(&url, "get attachment")?;
        attachment
            .data
            .with_context(|| {
                format!("Attachment {} of message {} has no data", attachment_id, message_id)
            })
    }

    // === Watch API ===

    /// Register a push watch for the mailbox
    pub fn start_watch(&self, identity: &str, request: &WatchRequest) -> Result<WatchResponse> {
        let mut response = self
            .agent
            .post(&self.user_url(identity, "/watch"))
            .header("Authorization", &self.bearer()?)
            .send_json(request)
            .context("Failed to send watch request")?;

        response
            .body_mut()
            .read_json()
            .context("Failed to parse watch response")
    }

    /// Stop push notifications for the mailbox
    pub fn stop_watch(&self, identity: &str) -> Result<()> {
        self.agent
            .post(&self.user_url(identity, "/stop"))
            .header("Authorization", &self.bearer()?)
            .send_empty()
            .context("Failed to send stop request")?;
        Ok(())
    }
}

impl MailboxApi for GmailClient {
    fn list_history(&self, identity: &str, start: HistoryCursor) -> Result<HistoryDelta> {
        let pages = self.list_history_all(identity, start)?;
        Ok(normalize_history(pages))
    }

    fn current_cursor(&self, identity: &str) -> Result<HistoryCursor> {
        Ok(self.get_profile(identity)?.history_id)
    }

    fn get_message(&self, identity: &str, id: &MessageId) -> Result<MessageDetail> {
        let message = self.get_message_with_retry(identity, id)?;
        normalize_message(message)
    }

    fn get_attachment(
        &self,
        identity: &str,
        message_id: &MessageId,
        attachment_id: &str,
    ) -> Result<Vec<u8>> {
        let data = self.get_attachment_data(identity, message_id, attachment_id)?;
        decode_base64_bytes(&data).with_context(|| {
            format!(
                "Attachment {} of message {} is not valid base64",
                attachment_id, message_id
            )
        })
    }

    fn watch(&self, identity: &str, request: &WatchRequest) -> Result<WatchRegistration> {
        let response = self.start_watch(identity, request)?;
        Ok(WatchRegistration {
            history_id: response.history_id,
            expires_at: response.expiration.as_deref().and_then(parse_expiration),
        })
    }

    fn stop(&self, identity: &str) -> Result<()> {
        self.stop_watch(identity)
    }
}

/// Generate a random jitter value (0-100ms)
/// Throttling, server errors and transport failures are worth another try
fn is_transient(e: &anyhow::Error) -> bool {
    match e.downcast_ref::<ureq::Error>() {
        Some(ureq::Error::StatusCode(code)) => *code == 429 || *code >= 500,
        Some(
            ureq::Error::Io(_)
            | ureq::Error::Timeout(_)
            | ureq::Error::HostNotFound
            | ureq::Error::ConnectionFailed,
        ) => true,
        _ => false,
    }
}

fn rand_jitter() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    hasher.finish() % 100
}
