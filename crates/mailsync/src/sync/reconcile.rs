//! History reconciliation pass
//!
//! One pass turns a push notification's cursor into work: it reads the
//! mailbox delta since the stored cursor, uploads the attachments of every
//! message that arrived with the watched label, and commits the new cursor
//! once everything has resolved.

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use super::extract::AttachmentExtractor;
use super::locks::IdentityLocks;
use crate::error::{SyncError, SyncResult};
use crate::gmail::{HistoryExpiredError, MailboxApi};
use crate::models::{HistoryCursor, HistoryDelta, MessageId};
use crate::storage::{BlobKey, BlobSink, CursorStore};

/// Tuning for reconciliation passes
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Label a new message must carry to be processed
    pub label: String,
    /// Destination bucket for attachment payloads
    pub bucket: String,
    /// Width of the per-message worker pool
    pub parallelism: usize,
    /// Messages not started by this point fail the pass
    pub pass_deadline: Option<Duration>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            label: "INBOX".to_string(),
            bucket: String::new(),
            parallelism: 4,
            pass_deadline: None,
        }
    }
}

/// How a pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOutcome {
    /// First notification for the mailbox; cursor recorded, nothing scanned
    Baseline,
    /// Notification at or behind the stored cursor; nothing done
    Stale,
    /// Stored cursor fell out of history retention; reset to the current position
    Rebaselined,
    /// Delta scanned and cursor committed
    Reconciled,
}

/// Summary of one pass, logged once and returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassReport {
    pub outcome: PassOutcome,
    pub cursor_before: Option<HistoryCursor>,
    pub cursor_after: HistoryCursor,
    pub messages_matched: usize,
    pub messages_failed: usize,
    pub attachments_uploaded: usize,
    pub attachments_failed: usize,
    pub duration_ms: u64,
}

impl PassReport {
    fn new(outcome: PassOutcome, before: Option<HistoryCursor>, after: HistoryCursor) -> Self {
        Self {
            outcome,
            cursor_before: before,
            cursor_after: after,
            messages_matched: 0,
            messages_failed: 0,
            attachments_uploaded: 0,
            attachments_failed: 0,
            duration_ms: 0,
        }
    }
}

/// What happened to one message
#[derive(Debug, Default)]
struct MessageOutcome {
    started: bool,
    fetch_failed: bool,
    uploaded: usize,
    failed: usize,
}

/// Runs reconciliation passes for any number of mailboxes
pub struct HistoryReconciler {
    api: Arc<dyn MailboxApi>,
    cursors: Arc<dyn CursorStore>,
    blobs: Arc<dyn BlobSink>,
    extractor: AttachmentExtractor,
    locks: IdentityLocks,
    pool: rayon::ThreadPool,
    options: ReconcileOptions,
}

impl HistoryReconciler {
    pub fn new(
        api: Arc<dyn MailboxApi>,
        cursors: Arc<dyn CursorStore>,
        blobs: Arc<dyn BlobSink>,
        options: ReconcileOptions,
    ) -> anyhow::Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.parallelism.max(1))
            .thread_name(|i| format!("mailsync-worker-{}", i))
            .build()?;

        Ok(Self {
            extractor: AttachmentExtractor::new(Arc::clone(&api)),
            api,
            cursors,
            blobs,
            locks: IdentityLocks::new(),
            pool,
            options,
        })
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Bring `identity` up to the position announced by a notification
    ///
    /// Passes for one identity are serialized. The cursor is written at most
    /// once, after every matched message has been handled; any error leaves
    /// it untouched so a redelivered notification repeats the work.
    pub fn reconcile(&self, identity: &str, notified: HistoryCursor) -> SyncResult<PassReport> {
        let started = Instant::now();
        let lock = self.locks.lock_for(identity);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut report = self.run_pass(identity, notified, started)?;
        report.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            "Pass for {} {:?}: cursor {} -> {}, {} matched, {} failed, \
             {} attachments uploaded, {} failed ({}ms)",
            identity,
            report.outcome,
            report
                .cursor_before
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string()),
            report.cursor_after,
            report.messages_matched,
            report.messages_failed,
            report.attachments_uploaded,
            report.attachments_failed,
            report.duration_ms
        );
        Ok(report)
    }

    fn run_pass(
        &self,
        identity: &str,
        notified: HistoryCursor,
        started: Instant,
    ) -> SyncResult<PassReport> {
        let stored = self
            .cursors
            .get(identity)
            .map_err(SyncError::StorageUnavailable)?
            .map(|state| state.history_id);

        let Some(stored) = stored else {
            self.commit(identity, notified)?;
            return Ok(PassReport::new(PassOutcome::Baseline, None, notified));
        };

        if notified <= stored {
            debug!(
                "Notification {} for {} is not newer than stored cursor {}",
                notified, identity, stored
            );
            return Ok(PassReport::new(PassOutcome::Stale, Some(stored), stored));
        }

        let delta = match self.api.list_history(identity, stored) {
            Ok(delta) => delta,
            Err(e) if e.downcast_ref::<HistoryExpiredError>().is_some() => {
                warn!(
                    "History from {} is no longer available for {}, re-baselining",
                    stored, identity
                );
                let current = self
                    .api
                    .current_cursor(identity)
                    .map_err(SyncError::TransientProvider)?;
                self.commit(identity, current)?;
                return Ok(PassReport::new(PassOutcome::Rebaselined, Some(stored), current));
            }
            Err(e) => return Err(SyncError::TransientProvider(e)),
        };

        let message_ids = matching_messages(&delta, &self.options.label);
        // A deadline past the clock's range is no deadline
        let deadline = self
            .options
            .pass_deadline
            .and_then(|d| started.checked_add(d));

        let outcomes: Vec<MessageOutcome> = self.pool.install(|| {
            message_ids
                .par_iter()
                .map(|id| self.process_message(identity, id, deadline))
                .collect()
        });

        if outcomes.iter().any(|o| !o.started) {
            let not_started = outcomes.iter().filter(|o| !o.started).count();
            warn!(
                "Pass for {} ran out of time with {} of {} messages not started",
                identity,
                not_started,
                message_ids.len()
            );
            return Err(SyncError::DeadlineExceeded(
                self.options.pass_deadline.unwrap_or_default(),
            ));
        }

        let new_cursor = delta.new_cursor.unwrap_or(stored);
        self.commit(identity, new_cursor)?;

        let mut report = PassReport::new(PassOutcome::Reconciled, Some(stored), new_cursor);
        report.messages_matched = message_ids.len();
        for outcome in &outcomes {
            report.messages_failed += usize::from(outcome.fetch_failed);
            report.attachments_uploaded += outcome.uploaded;
            report.attachments_failed += outcome.failed;
        }
        Ok(report)
    }

    /// Drop the stored cursor so the next notification re-baselines
    ///
    /// Serialized with passes for the same identity: an in-flight pass
    /// commits first and the cursor is removed after it.
    pub fn forget(&self, identity: &str) -> SyncResult<()> {
        let lock = self.locks.lock_for(identity);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.cursors
            .delete(identity)
            .map_err(SyncError::StorageUnavailable)?;
        info!("Forgot cursor for {}", identity);
        Ok(())
    }

    fn commit(&self, identity: &str, cursor: HistoryCursor) -> SyncResult<()> {
        self.cursors
            .set(identity, cursor)
            .map_err(SyncError::StorageUnavailable)?;
        Ok(())
    }

    /// Upload every attachment of one message; failures are logged and counted
    fn process_message(
        &self,
        identity: &str,
        message_id: &MessageId,
        deadline: Option<Instant>,
    ) -> MessageOutcome {
        let mut outcome = MessageOutcome::default();
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return outcome;
        }
        outcome.started = true;

        let attachments = match self.extractor.extract(identity, message_id) {
            Ok(attachments) => attachments,
            Err(e) => {
                warn!("Skipping message {}: {:#}", message_id, e);
                outcome.fetch_failed = true;
                return outcome;
            }
        };

        for attachment in &attachments {
            info!(
                "Attachment: {} ({}) on message {}",
                attachment.filename, attachment.content_type, message_id
            );

            let key = BlobKey::attachment(
                message_id,
                attachment.part_index,
                Some(attachment.filename.as_str()),
            );
            let result = self
                .extractor
                .fetch_bytes(identity, message_id, attachment)
                .and_then(|data| {
                    self.blobs
                        .upload(&self.options.bucket, &key, &data, &attachment.content_type)
                });

            match result {
                Ok(()) => outcome.uploaded += 1,
                Err(e) => {
                    warn!("Failed to store {}: {:#}", key, e);
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }
}

/// Distinct ids of messages added with `label`, in first-seen order
pub fn matching_messages(delta: &HistoryDelta, label: &str) -> Vec<MessageId> {
    let mut seen = HashSet::new();
    delta
        .records
        .iter()
        .filter(|record| record.is_added_with_label(label))
        .filter(|record| seen.insert(record.message_id.clone()))
        .map(|record| record.message_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::api::WatchRequest;
    use crate::models::{
        ChangeKind, ChangeRecord, MessageDetail, MessagePart, PartBody, WatchRegistration,
    };
    use crate::storage::{InMemoryBlobSink, InMemoryCursorStore};
    use anyhow::{Result, anyhow};
    use std::collections::HashMap;
    use std::sync::{Barrier, Mutex};

    const ME: &str = "ops@example.com";

    /// Scripted provider: fixed delta, fixed messages, optional failures
    #[derive(Default)]
    struct FakeMailbox {
        delta: HistoryDelta,
        expired: bool,
        history_down: bool,
        current: u64,
        messages: HashMap<String, MessageDetail>,
        attachments: HashMap<String, Vec<u8>>,
        history_calls: Mutex<Vec<HistoryCursor>>,
        message_calls: Mutex<usize>,
        gate: Option<Gate>,
    }

    /// Holds `list_history` until the test releases it
    struct Gate {
        entered: Barrier,
        release: Barrier,
    }

    impl Gate {
        fn new() -> Self {
            Self {
                entered: Barrier::new(2),
                release: Barrier::new(2),
            }
        }
    }

    impl MailboxApi for FakeMailbox {
        fn list_history(&self, _identity: &str, start: HistoryCursor) -> Result<HistoryDelta> {
            self.history_calls.lock().unwrap().push(start);
            if let Some(gate) = &self.gate {
                gate.entered.wait();
                gate.release.wait();
            }
            if self.expired {
                return Err(HistoryExpiredError.into());
            }
            if self.history_down {
                return Err(anyhow!("503 Service Unavailable"));
            }
            Ok(self.delta.clone())
        }

        fn current_cursor(&self, _identity: &str) -> Result<HistoryCursor> {
            Ok(HistoryCursor(self.current))
        }

        fn get_message(&self, _identity: &str, id: &MessageId) -> Result<MessageDetail> {
            *self.message_calls.lock().unwrap() += 1;
            self.messages
                .get(id.as_str())
                .cloned()
                .ok_or_else(|| anyhow!("404 message {}", id))
        }

        fn get_attachment(
            &self,
            _identity: &str,
            _message_id: &MessageId,
            attachment_id: &str,
        ) -> Result<Vec<u8>> {
            self.attachments
                .get(attachment_id)
                .cloned()
                .ok_or_else(|| anyhow!("404 attachment {}", attachment_id))
        }

        fn watch(&self, _identity: &str, _request: &WatchRequest) -> Result<WatchRegistration> {
            unreachable!("not used by reconciliation")
        }

        fn stop(&self, _identity: &str) -> Result<()> {
            unreachable!("not used by reconciliation")
        }
    }

    fn added(id: &str, labels: &[&str]) -> ChangeRecord {
        ChangeRecord::new(
            ChangeKind::MessageAdded,
            id,
            labels.iter().map(|l| l.to_string()).collect(),
        )
    }

    fn message(id: &str, parts: &[(&str, &str)]) -> MessageDetail {
        MessageDetail {
            id: MessageId::new(id),
            label_ids: vec!["INBOX".to_string()],
            payload: MessagePart {
                mime_type: Some("multipart/mixed".to_string()),
                parts: parts
                    .iter()
                    .map(|(filename, attachment_id)| MessagePart {
                        filename: Some(filename.to_string()),
                        mime_type: Some("application/pdf".to_string()),
                        body: PartBody {
                            attachment_id: Some(attachment_id.to_string()),
                            ..Default::default()
                        },
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            },
        }
    }

    struct Harness {
        api: Arc<FakeMailbox>,
        cursors: Arc<InMemoryCursorStore>,
        blobs: Arc<InMemoryBlobSink>,
        reconciler: HistoryReconciler,
    }

    fn harness(api: FakeMailbox, stored: Option<u64>) -> Harness {
        harness_with(api, stored, ReconcileOptions {
            bucket: "bucket".to_string(),
            ..Default::default()
        })
    }

    fn harness_with(api: FakeMailbox, stored: Option<u64>, options: ReconcileOptions) -> Harness {
        let api = Arc::new(api);
        let cursors = Arc::new(InMemoryCursorStore::new());
        if let Some(value) = stored {
            cursors.set(ME, HistoryCursor(value)).unwrap();
        }
        let blobs = Arc::new(InMemoryBlobSink::new());
        let reconciler = HistoryReconciler::new(
            api.clone(),
            cursors.clone(),
            blobs.clone(),
            options,
        )
        .unwrap();
        Harness {
            api,
            cursors,
            blobs,
            reconciler,
        }
    }

    fn stored(h: &Harness) -> Option<u64> {
        h.cursors.get(ME).unwrap().map(|s| s.history_id.value())
    }

    fn single_message_mailbox() -> FakeMailbox {
        FakeMailbox {
            delta: HistoryDelta {
                new_cursor: Some(HistoryCursor(110)),
                records: vec![added("m1", &["INBOX", "UNREAD"])],
            },
            messages: HashMap::from([("m1".to_string(), message("m1", &[("report.pdf", "a1")]))]),
            attachments: HashMap::from([("a1".to_string(), b"%PDF".to_vec())]),
            ..Default::default()
        }
    }

    #[test]
    fn test_baseline_records_cursor_without_scan() {
        let h = harness(single_message_mailbox(), None);

        let report = h.reconciler.reconcile(ME, HistoryCursor(100)).unwrap();

        assert_eq!(report.outcome, PassOutcome::Baseline);
        assert_eq!(stored(&h), Some(100));
        assert!(h.api.history_calls.lock().unwrap().is_empty());
        assert_eq!(h.blobs.upload_count(), 0);
    }

    #[test]
    fn test_stale_notification_is_noop() {
        let h = harness(single_message_mailbox(), Some(200));

        for notified in [150, 200] {
            let report = h.reconciler.reconcile(ME, HistoryCursor(notified)).unwrap();
            assert_eq!(report.outcome, PassOutcome::Stale);
        }

        assert_eq!(stored(&h), Some(200));
        assert!(h.api.history_calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reconcile_uploads_and_commits() {
        let h = harness(single_message_mailbox(), Some(100));

        let report = h.reconciler.reconcile(ME, HistoryCursor(105)).unwrap();

        assert_eq!(report.outcome, PassOutcome::Reconciled);
        assert_eq!(report.cursor_before, Some(HistoryCursor(100)));
        assert_eq!(report.cursor_after, HistoryCursor(110));
        assert_eq!(report.messages_matched, 1);
        assert_eq!(report.attachments_uploaded, 1);
        assert_eq!(stored(&h), Some(110));
        assert_eq!(*h.api.history_calls.lock().unwrap(), vec![HistoryCursor(100)]);

        let blob = h.blobs.get("bucket", "m1/0_report.pdf").unwrap();
        assert_eq!(blob.data, b"%PDF");
        assert_eq!(blob.content_type, "application/pdf");
    }

    #[test]
    fn test_label_filter_and_dedup() {
        let mut api = single_message_mailbox();
        api.delta.records = vec![
            added("m1", &["INBOX"]),
            added("spam", &["SPAM"]),
            added("m1", &["INBOX"]),
            ChangeRecord::new(ChangeKind::LabelAdded, "m9", vec!["INBOX".into()]),
        ];
        let h = harness(api, Some(100));

        let report = h.reconciler.reconcile(ME, HistoryCursor(105)).unwrap();

        assert_eq!(report.messages_matched, 1);
        assert_eq!(*h.api.message_calls.lock().unwrap(), 1);
        assert_eq!(h.blobs.object_names("bucket"), vec!["m1/0_report.pdf".to_string()]);
    }

    #[test]
    fn test_empty_delta_still_commits() {
        let api = FakeMailbox {
            delta: HistoryDelta {
                new_cursor: Some(HistoryCursor(120)),
                records: vec![],
            },
            ..Default::default()
        };
        let h = harness(api, Some(100));

        let report = h.reconciler.reconcile(ME, HistoryCursor(120)).unwrap();

        assert_eq!(report.outcome, PassOutcome::Reconciled);
        assert_eq!(report.messages_matched, 0);
        assert_eq!(stored(&h), Some(120));
    }

    #[test]
    fn test_missing_delta_cursor_keeps_stored() {
        let mut api = single_message_mailbox();
        api.delta.new_cursor = None;
        let h = harness(api, Some(100));

        let report = h.reconciler.reconcile(ME, HistoryCursor(105)).unwrap();

        assert_eq!(report.cursor_after, HistoryCursor(100));
        assert_eq!(stored(&h), Some(100));
    }

    #[test]
    fn test_expired_history_rebaselines() {
        let api = FakeMailbox {
            expired: true,
            current: 5000,
            ..Default::default()
        };
        let h = harness(api, Some(100));

        let report = h.reconciler.reconcile(ME, HistoryCursor(150)).unwrap();

        assert_eq!(report.outcome, PassOutcome::Rebaselined);
        assert_eq!(stored(&h), Some(5000));
        assert_eq!(h.blobs.upload_count(), 0);
    }

    #[test]
    fn test_history_failure_keeps_cursor() {
        let api = FakeMailbox {
            history_down: true,
            ..Default::default()
        };
        let h = harness(api, Some(100));

        let err = h.reconciler.reconcile(ME, HistoryCursor(150)).unwrap_err();

        assert!(matches!(err, SyncError::TransientProvider(_)));
        assert!(err.is_retryable());
        assert_eq!(stored(&h), Some(100));
    }

    #[test]
    fn test_partial_failures_are_isolated() {
        let api = FakeMailbox {
            delta: HistoryDelta {
                new_cursor: Some(HistoryCursor(130)),
                records: vec![
                    added("m1", &["INBOX"]),
                    added("gone", &["INBOX"]),
                    added("m2", &["INBOX"]),
                ],
            },
            messages: HashMap::from([
                ("m1".to_string(), message("m1", &[("a.pdf", "a1"), ("b.pdf", "missing")])),
                ("m2".to_string(), message("m2", &[("c.pdf", "a3")])),
            ]),
            attachments: HashMap::from([
                ("a1".to_string(), b"one".to_vec()),
                ("a3".to_string(), b"three".to_vec()),
            ]),
            ..Default::default()
        };
        let h = harness(api, Some(100));

        let report = h.reconciler.reconcile(ME, HistoryCursor(130)).unwrap();

        assert_eq!(report.messages_matched, 3);
        assert_eq!(report.messages_failed, 1);
        assert_eq!(report.attachments_uploaded, 2);
        assert_eq!(report.attachments_failed, 1);
        assert_eq!(
            h.blobs.object_names("bucket"),
            vec!["m1/0_a.pdf".to_string(), "m2/0_c.pdf".to_string()]
        );
        assert_eq!(stored(&h), Some(130));
    }

    #[test]
    fn test_duplicate_filenames_get_distinct_keys() {
        let mut api = single_message_mailbox();
        api.messages.insert(
            "m1".to_string(),
            message("m1", &[("report (final)!.pdf", "a1"), ("report (final)!.pdf", "a1")]),
        );
        let h = harness(api, Some(100));

        h.reconciler.reconcile(ME, HistoryCursor(105)).unwrap();

        assert_eq!(
            h.blobs.object_names("bucket"),
            vec!["m1/0_report_final_.pdf".to_string(), "m1/1_report_final_.pdf".to_string()]
        );
    }

    #[test]
    fn test_replay_is_idempotent() {
        let h = harness(single_message_mailbox(), Some(100));

        h.reconciler.reconcile(ME, HistoryCursor(105)).unwrap();
        let replay = h.reconciler.reconcile(ME, HistoryCursor(105)).unwrap();

        assert_eq!(replay.outcome, PassOutcome::Stale);
        assert_eq!(h.blobs.object_names("bucket").len(), 1);
        assert_eq!(stored(&h), Some(110));
    }

    #[test]
    fn test_expired_deadline_fails_without_commit() {
        let options = ReconcileOptions {
            bucket: "bucket".to_string(),
            pass_deadline: Some(Duration::ZERO),
            ..Default::default()
        };
        let h = harness_with(single_message_mailbox(), Some(100), options);

        let err = h.reconciler.reconcile(ME, HistoryCursor(105)).unwrap_err();

        assert!(matches!(err, SyncError::DeadlineExceeded(_)));
        assert_eq!(stored(&h), Some(100));
        assert_eq!(h.blobs.upload_count(), 0);
    }

    #[test]
    fn test_unbounded_deadline_does_not_overflow() {
        let options = ReconcileOptions {
            bucket: "bucket".to_string(),
            pass_deadline: Some(Duration::from_secs(u64::MAX)),
            ..Default::default()
        };
        let h = harness_with(single_message_mailbox(), Some(100), options);

        let report = h.reconciler.reconcile(ME, HistoryCursor(105)).unwrap();

        assert_eq!(report.outcome, PassOutcome::Reconciled);
        assert_eq!(report.attachments_uploaded, 1);
        assert_eq!(stored(&h), Some(110));
    }

    #[test]
    fn test_forget_waits_for_in_flight_pass() {
        let h = Arc::new(harness(
            FakeMailbox {
                gate: Some(Gate::new()),
                ..single_message_mailbox()
            },
            Some(100),
        ));
        let gate = || h.api.gate.as_ref().unwrap();

        let pass = {
            let h = Arc::clone(&h);
            std::thread::spawn(move || h.reconciler.reconcile(ME, HistoryCursor(105)))
        };
        gate().entered.wait();

        let forget = {
            let h = Arc::clone(&h);
            std::thread::spawn(move || h.reconciler.forget(ME))
        };
        std::thread::sleep(Duration::from_millis(100));
        assert!(!forget.is_finished());

        gate().release.wait();
        assert_eq!(pass.join().unwrap().unwrap().cursor_after, HistoryCursor(110));
        forget.join().unwrap().unwrap();

        assert_eq!(stored(&h), None);
        assert_eq!(h.blobs.upload_count(), 1);
    }

    #[test]
    fn test_concurrent_passes_never_regress() {
        let h = Arc::new(harness(single_message_mailbox(), Some(100)));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let h = Arc::clone(&h);
                std::thread::spawn(move || h.reconciler.reconcile(ME, HistoryCursor(101 + i)))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(stored(&h), Some(110));
        assert_eq!(h.api.history_calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_matching_messages_keeps_first_seen_order() {
        let delta = HistoryDelta {
            new_cursor: None,
            records: vec![added("b", &["INBOX"]), added("a", &["INBOX"]), added("b", &["INBOX"])],
        };
        assert_eq!(
            matching_messages(&delta, "INBOX"),
            vec![MessageId::new("b"), MessageId::new("a")]
        );
    }
}
