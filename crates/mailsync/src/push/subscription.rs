//! Provider-side watch registration

use log::info;
use std::sync::Arc;

use crate::error::{SyncError, SyncResult};
use crate::gmail::MailboxApi;
use crate::gmail::api::WatchRequest;
use crate::models::WatchRegistration;
use crate::sync::HistoryReconciler;

/// Registers, renews and cancels the Gmail push watch for one mailbox
///
/// A watch lapses after about seven days, so `activate` has to be called
/// again before then (at startup and from the renewal route).
pub struct SubscriptionManager {
    api: Arc<dyn MailboxApi>,
    reconciler: Arc<HistoryReconciler>,
    identity: String,
    project: String,
    topic: String,
    label: String,
}

impl SubscriptionManager {
    pub fn new(
        api: Arc<dyn MailboxApi>,
        reconciler: Arc<HistoryReconciler>,
        identity: impl Into<String>,
        project: impl Into<String>,
        topic: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            api,
            reconciler,
            identity: identity.into(),
            project: project.into(),
            topic: topic.into(),
            label: label.into(),
        }
    }

    /// Fully-qualified Pub/Sub topic: `projects/{project}/topics/{topic}`
    pub fn topic_name(&self) -> String {
        format!("projects/{}/topics/{}", self.project, self.topic)
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Register or renew the watch
    pub fn activate(&self) -> SyncResult<WatchRegistration> {
        let request = WatchRequest::including(&self.label, self.topic_name());
        let registration = self
            .api
            .watch(&self.identity, &request)
            .map_err(SyncError::TransientProvider)?;

        info!(
            "Watching {} ({}) on {} from history {}, expires {}",
            self.identity,
            self.label,
            request.topic_name,
            registration.history_id,
            registration
                .expires_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string())
        );
        Ok(registration)
    }

    /// Cancel the watch; the stored cursor is kept
    pub fn deactivate(&self) -> SyncResult<()> {
        self.api
            .stop(&self.identity)
            .map_err(SyncError::TransientProvider)?;
        info!("Stopped watching {}", self.identity);
        Ok(())
    }

    /// Cancel the watch and forget the cursor
    ///
    /// Waits for a pass already running for this mailbox. The next
    /// notification after a later `activate` re-baselines.
    pub fn unsubscribe(&self) -> SyncResult<()> {
        self.deactivate()?;
        self.reconciler.forget(&self.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HistoryCursor, HistoryDelta, MessageDetail, MessageId};
    use crate::storage::{CursorStore, InMemoryBlobSink, InMemoryCursorStore};
    use crate::sync::ReconcileOptions;
    use anyhow::{Result, anyhow};
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    #[derive(Default)]
    struct WatchRecorder {
        requests: Mutex<Vec<(String, WatchRequest)>>,
        stops: Mutex<usize>,
        fail: bool,
    }

    impl MailboxApi for WatchRecorder {
        fn list_history(&self, _identity: &str, _start: HistoryCursor) -> Result<HistoryDelta> {
            Err(anyhow!("unexpected history call"))
        }

        fn current_cursor(&self, _identity: &str) -> Result<HistoryCursor> {
            Err(anyhow!("unexpected profile call"))
        }

        fn get_message(&self, _identity: &str, _id: &MessageId) -> Result<MessageDetail> {
            Err(anyhow!("unexpected message call"))
        }

        fn get_attachment(
            &self,
            _identity: &str,
            _message_id: &MessageId,
            _attachment_id: &str,
        ) -> Result<Vec<u8>> {
            Err(anyhow!("unexpected attachment call"))
        }

        fn watch(&self, identity: &str, request: &WatchRequest) -> Result<WatchRegistration> {
            if self.fail {
                return Err(anyhow!("403 Forbidden"));
            }
            self.requests
                .lock()
                .unwrap()
                .push((identity.to_string(), request.clone()));
            Ok(WatchRegistration {
                history_id: HistoryCursor(4242),
                expires_at: Utc.timestamp_millis_opt(1_700_000_000_000).single(),
            })
        }

        fn stop(&self, _identity: &str) -> Result<()> {
            if self.fail {
                return Err(anyhow!("403 Forbidden"));
            }
            *self.stops.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn manager(api: Arc<WatchRecorder>, cursors: Arc<InMemoryCursorStore>) -> SubscriptionManager {
        let reconciler = HistoryReconciler::new(
            api.clone(),
            cursors,
            Arc::new(InMemoryBlobSink::new()),
            ReconcileOptions::default(),
        )
        .unwrap();
        SubscriptionManager::new(
            api,
            Arc::new(reconciler),
            "ops@example.com",
            "acme-prod",
            "gmail-watch",
            "INBOX",
        )
    }

    #[test]
    fn test_topic_name() {
        let m = manager(Arc::default(), Arc::default());
        assert_eq!(m.topic_name(), "projects/acme-prod/topics/gmail-watch");
    }

    #[test]
    fn test_activate_sends_watch_request() {
        let api = Arc::new(WatchRecorder::default());
        let m = manager(api.clone(), Arc::default());

        let registration = m.activate().unwrap();

        assert_eq!(registration.history_id, HistoryCursor(4242));
        assert!(registration.expires_at.is_some());

        let requests = api.requests.lock().unwrap();
        let (identity, request) = &requests[0];
        assert_eq!(identity, "ops@example.com");
        assert_eq!(request.label_ids, vec!["INBOX".to_string()]);
        assert_eq!(request.topic_name, "projects/acme-prod/topics/gmail-watch");
        assert_eq!(request.label_filter_behavior, "INCLUDE");
    }

    #[test]
    fn test_activate_failure_is_transient() {
        let api = Arc::new(WatchRecorder {
            fail: true,
            ..Default::default()
        });
        let err = manager(api, Arc::default()).activate().unwrap_err();
        assert!(matches!(err, SyncError::TransientProvider(_)));
    }

    #[test]
    fn test_deactivate_keeps_cursor() {
        let api = Arc::new(WatchRecorder::default());
        let cursors = Arc::new(InMemoryCursorStore::new());
        cursors.set("ops@example.com", HistoryCursor(10)).unwrap();

        manager(api.clone(), cursors.clone()).deactivate().unwrap();

        assert_eq!(*api.stops.lock().unwrap(), 1);
        assert!(cursors.get("ops@example.com").unwrap().is_some());
    }

    #[test]
    fn test_unsubscribe_forgets_cursor() {
        let api = Arc::new(WatchRecorder::default());
        let cursors = Arc::new(InMemoryCursorStore::new());
        cursors.set("ops@example.com", HistoryCursor(10)).unwrap();

        manager(api.clone(), cursors.clone()).unsubscribe().unwrap();

        assert_eq!(*api.stops.lock().unwrap(), 1);
        assert!(cursors.get("ops@example.com").unwrap().is_none());
    }
}
