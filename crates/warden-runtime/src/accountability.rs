//! Accountability stage: notarization with bounded retry.
//!
//! Every decision (and every wipe incident) is fingerprinted and handed to a
//! [`NotarizationSink`].  A failing sink is retried with exponential backoff
//! (`base_delay_ms * 2^(attempt-1)`) up to `max_attempts`; after that the
//! request is pushed to the durable [`DeferredQueue`] and a
//! `NotarizationDeferred` event is published.
//!
//! | Mode | Behaviour |
//! |---|---|
//! | Standard | [`Notary::dispatch`]: spawned, the run does not wait |
//! | Critical | [`Notary::notarize`]: awaited; the run may only unlock once the outcome [`is_durable`](NotarizationOutcome::is_durable) |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use warden_kernel::fingerprint::fingerprint;
use warden_kernel::policy::NotaryPolicy;
use warden_memory::DeferredQueue;
use warden_middleware::EventBus;
use warden_types::{
    Decision, Event, EventPayload, IncidentRecord, Mode, NotarizationAnchor,
    NotarizationRequest, NotarySubject, WardenError,
};

const SOURCE: &str = "warden-runtime::accountability";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    #[error("Notarization sink unreachable: {0}")]
    Unreachable(String),
    #[error("Notarization rejected: {0}")]
    Rejected(String),
}

impl From<SinkError> for WardenError {
    fn from(err: SinkError) -> Self {
        WardenError::NotarizationDeferred(err.to_string())
    }
}

/// External anchoring service.  Anchor generation is opaque to the kernel.
#[async_trait]
pub trait NotarizationSink: Send + Sync {
    async fn anchor(&self, request: &NotarizationRequest) -> Result<NotarizationAnchor, SinkError>;
}

/// Local sink that anchors by hashing the request.  Used when no external
/// notary is configured.
#[derive(Debug, Default)]
pub struct DigestSink;

#[async_trait]
impl NotarizationSink for DigestSink {
    async fn anchor(&self, request: &NotarizationRequest) -> Result<NotarizationAnchor, SinkError> {
        let mut hasher = Sha256::new();
        hasher.update(request.fingerprint.as_bytes());
        hasher.update(request.requested_at.to_rfc3339().as_bytes());
        Ok(NotarizationAnchor(format!("local:{}", hex_prefix(&hasher.finalize()))))
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().take(16).map(|b| format!("{b:02x}")).collect()
}

/// What happened to a notarization request.
#[derive(Debug, Clone, PartialEq)]
pub enum NotarizationOutcome {
    Anchored(NotarizationAnchor),
    /// Retries exhausted; the request is durably queued.
    Deferred { queue_id: i64, attempts: u32 },
    /// Retries exhausted and the queue refused the request too.
    Lost { attempts: u32, reason: String },
}

impl NotarizationOutcome {
    /// Anchored or queued.  Only a durable outcome permits a critical unlock.
    pub fn is_durable(&self) -> bool {
        !matches!(self, NotarizationOutcome::Lost { .. })
    }

    pub fn anchor(&self) -> Option<&NotarizationAnchor> {
        match self {
            NotarizationOutcome::Anchored(anchor) => Some(anchor),
            _ => None,
        }
    }
}

/// Result of replaying the deferred queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    pub anchored: usize,
    pub still_pending: usize,
}

pub struct Notary {
    sink: Arc<dyn NotarizationSink>,
    queue: Arc<dyn DeferredQueue>,
    bus: EventBus,
    max_attempts: u32,
    base_delay: Duration,
}

impl Notary {
    pub fn new(
        sink: Arc<dyn NotarizationSink>,
        queue: Arc<dyn DeferredQueue>,
        bus: EventBus,
        policy: &NotaryPolicy,
    ) -> Self {
        Self {
            sink,
            queue,
            bus,
            max_attempts: policy.max_attempts.max(1),
            base_delay: Duration::from_millis(policy.base_delay_ms),
        }
    }

    /// Package `decision` for the sink.
    pub fn decision_request(decision: &Decision) -> Result<NotarizationRequest, WardenError> {
        Ok(NotarizationRequest {
            run_id: decision.run_id,
            subject: NotarySubject::Decision,
            fingerprint: fingerprint(decision)?,
            classification: Some(decision.provenance.assessment.classification),
            mode: decision.mode,
            requested_at: Utc::now(),
        })
    }

    /// Package a wipe incident for the sink.
    pub fn incident_request(
        incident: &IncidentRecord,
        mode: Mode,
    ) -> Result<NotarizationRequest, WardenError> {
        Ok(NotarizationRequest {
            run_id: incident.run_id,
            subject: NotarySubject::Incident,
            fingerprint: fingerprint(incident)?,
            classification: None,
            mode,
            requested_at: Utc::now(),
        })
    }

    /// Delay before retry number `attempt` (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Deliver `request`, retrying with backoff, queueing on exhaustion.
    pub async fn notarize(&self, request: NotarizationRequest) -> NotarizationOutcome {
        let run_id = request.run_id;
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match self.sink.anchor(&request).await {
                Ok(anchor) => {
                    info!(%run_id, attempt, anchor = %anchor.0, "notarization anchored");
                    self.bus.emit(Event::new(
                        SOURCE,
                        EventPayload::Anchored {
                            run_id,
                            anchor: anchor.clone(),
                        },
                    ));
                    return NotarizationOutcome::Anchored(anchor);
                }
                Err(e) => {
                    warn!(%run_id, attempt, error = %e, "notarization attempt failed");
                    last_error = e.to_string();
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.backoff(attempt)).await;
                    }
                }
            }
        }

        let attempts = self.max_attempts;
        warn!(%run_id, attempts, "{}", WardenError::NotarizationDeferred(last_error.clone()));
        self.bus.emit(Event::new(
            SOURCE,
            EventPayload::NotarizationDeferred { run_id, attempts },
        ));
        match self.queue.push(&request, attempts) {
            Ok(queue_id) => NotarizationOutcome::Deferred { queue_id, attempts },
            Err(e) => {
                error!(%run_id, error = %e, "deferred notarization could not be queued");
                NotarizationOutcome::Lost {
                    attempts,
                    reason: format!("{last_error}; queue: {e}"),
                }
            }
        }
    }

    /// Fire-and-forget delivery.
    pub fn dispatch(self: &Arc<Self>, request: NotarizationRequest) -> JoinHandle<NotarizationOutcome> {
        let notary = Arc::clone(self);
        tokio::spawn(async move { notary.notarize(request).await })
    }

    /// Retry every queued request once, dropping those that anchor.
    pub async fn replay_deferred(&self) -> Result<ReplayReport, WardenError> {
        let mut report = ReplayReport::default();
        for entry in self.queue.pending()? {
            match self.sink.anchor(&entry.request).await {
                Ok(anchor) => {
                    self.queue.remove(entry.id)?;
                    info!(run_id = %entry.request.run_id, anchor = %anchor.0, "deferred notarization anchored");
                    self.bus.emit(Event::new(
                        SOURCE,
                        EventPayload::Anchored {
                            run_id: entry.request.run_id,
                            anchor,
                        },
                    ));
                    report.anchored += 1;
                }
                Err(e) => {
                    warn!(run_id = %entry.request.run_id, error = %e, "deferred notarization still failing");
                    report.still_pending += 1;
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;
    use warden_memory::{DeferredEntry, SqliteDeferredQueue};
    use warden_middleware::Topic;
    use warden_types::CriticalityIndex;

    /// Fails the first `failures` calls, then anchors.
    struct FlakySink {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakySink {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl NotarizationSink for FlakySink {
        async fn anchor(&self, request: &NotarizationRequest) -> Result<NotarizationAnchor, SinkError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(SinkError::Unreachable("down".into()))
            } else {
                Ok(NotarizationAnchor(format!("anchor-{}", &request.fingerprint[..8])))
            }
        }
    }

    struct BrokenQueue;

    impl DeferredQueue for BrokenQueue {
        fn push(&self, _: &NotarizationRequest, _: u32) -> Result<i64, WardenError> {
            Err(WardenError::Storage("disk full".into()))
        }
        fn pending(&self) -> Result<Vec<DeferredEntry>, WardenError> {
            Ok(Vec::new())
        }
        fn remove(&self, _: i64) -> Result<bool, WardenError> {
            Ok(false)
        }
    }

    fn policy(max_attempts: u32) -> NotaryPolicy {
        NotaryPolicy {
            max_attempts,
            base_delay_ms: 1,
        }
    }

    fn request() -> NotarizationRequest {
        NotarizationRequest {
            run_id: Uuid::new_v4(),
            subject: NotarySubject::Decision,
            fingerprint: "cd".repeat(32),
            classification: Some(CriticalityIndex::Ci5),
            mode: Mode::Critical,
            requested_at: Utc::now(),
        }
    }

    fn notary(sink: Arc<dyn NotarizationSink>, queue: Arc<dyn DeferredQueue>, max: u32) -> Notary {
        Notary::new(sink, queue, EventBus::default(), &policy(max))
    }

    #[test]
    fn backoff_doubles() {
        let n = Notary::new(
            Arc::new(DigestSink),
            Arc::new(SqliteDeferredQueue::open_in_memory().unwrap()),
            EventBus::default(),
            &NotaryPolicy {
                max_attempts: 4,
                base_delay_ms: 100,
            },
        );
        assert_eq!(n.backoff(1), Duration::from_millis(100));
        assert_eq!(n.backoff(2), Duration::from_millis(200));
        assert_eq!(n.backoff(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let sink = Arc::new(FlakySink::new(2));
        let queue = Arc::new(SqliteDeferredQueue::open_in_memory().unwrap());
        let n = notary(sink.clone(), queue.clone(), 3);
        let outcome = n.notarize(request()).await;
        assert!(matches!(outcome, NotarizationOutcome::Anchored(_)));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        assert!(queue.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhaustion_queues_request_and_publishes() {
        let sink = Arc::new(FlakySink::new(u32::MAX));
        let queue = Arc::new(SqliteDeferredQueue::open_in_memory().unwrap());
        let bus = EventBus::default();
        let mut lane = bus.subscribe_to(Topic::Accountability);
        let n = Notary::new(sink, queue.clone(), bus, &policy(2));

        let req = request();
        let outcome = n.notarize(req.clone()).await;
        assert!(matches!(outcome, NotarizationOutcome::Deferred { attempts: 2, .. }));
        assert!(outcome.is_durable());
        assert_eq!(queue.pending().unwrap()[0].request, req);

        let event = lane.recv().await.unwrap();
        assert!(matches!(
            event.payload,
            EventPayload::NotarizationDeferred { attempts: 2, .. }
        ));
    }

    #[tokio::test]
    async fn unqueueable_request_is_lost() {
        let n = notary(Arc::new(FlakySink::new(u32::MAX)), Arc::new(BrokenQueue), 1);
        let outcome = n.notarize(request()).await;
        assert!(!outcome.is_durable());
        assert!(outcome.anchor().is_none());
    }

    #[tokio::test]
    async fn dispatch_runs_in_background() {
        let n = Arc::new(notary(
            Arc::new(DigestSink),
            Arc::new(SqliteDeferredQueue::open_in_memory().unwrap()),
            3,
        ));
        let outcome = n.dispatch(request()).await.unwrap();
        let anchor = outcome.anchor().unwrap();
        assert!(anchor.0.starts_with("local:"));
    }

    #[tokio::test]
    async fn replay_anchors_queued_requests() {
        let queue = Arc::new(SqliteDeferredQueue::open_in_memory().unwrap());
        queue.push(&request(), 3).unwrap();
        queue.push(&request(), 3).unwrap();
        let n = notary(Arc::new(DigestSink), queue.clone(), 3);

        let report = n.replay_deferred().await.unwrap();
        assert_eq!(
            report,
            ReplayReport {
                anchored: 2,
                still_pending: 0
            }
        );
        assert!(queue.pending().unwrap().is_empty());
    }
}
