//! Google Cloud Storage blob sink

use anyhow::{Context, Result};
use log::info;
use std::sync::Arc;
use std::time::Duration;

use super::blob::{BlobKey, BlobSink};
use crate::gmail::TokenSource;

/// Uploads objects through the Cloud Storage JSON API (simple media upload)
///
/// A media upload replaces any existing object of the same name, which is
/// exactly the overwrite semantics the sync engine relies on.
pub struct GcsBlobSink {
    auth: Arc<dyn TokenSource>,
    agent: ureq::Agent,
    base_url: String,
}

impl GcsBlobSink {
    /// Cloud Storage upload API base URL
    const BASE_URL: &'static str = "https://storage.googleapis.com/upload/storage/v1";

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

    /// Point the sink at a different API root (e.g. fake-gcs-server)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn upload_url(&self, bucket: &str, key: &BlobKey) -> String {
        format!(
            "{}/b/{}/o?uploadType=media&name={}",
            self.base_url,
            urlencoding::encode(bucket),
            urlencoding::encode(&key.object_name())
        )
    }
}

impl BlobSink for GcsBlobSink {
    fn upload(&self, bucket: &str, key: &BlobKey, data: &[u8], content_type: &str) -> Result<()> {
        let access_token = self.auth.access_token()?;

        self.agent
            .post(&self.upload_url(bucket, key))
            .header("Authorization", &format!("Bearer {}", access_token))
            .header("Content-Type", content_type)
            .send(data)
            .with_context(|| format!("Failed to upload gs://{}/{}", bucket, key))?;

        info!("Uploaded gs://{}/{} ({} bytes)", bucket, key, data.len());
        Ok(())
    }
}
