// crates/server/src/jobs/broadcast.rs
//! Live log fan-out to attached observers.
//!
//! Every observer gets its own bounded queue. Publishing never blocks: an
//! observer whose queue is full is dropped instead of stalling the producer,
//! and one whose receiver is gone is removed.
//!
//! Subscription, publishing and termination all happen under the job's lock,
//! so an observer sees the backlog followed by every later line exactly once,
//! in order, and always ends with a single `Done` event.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bidsify_core::{JobError, JobId, JobOutcome, LogRecord};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::registry::JobRegistry;
use super::state::Subscriber;
use super::types::{LogEvent, SubscriberId, Termination};

/// Per-observer queue depth.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1024;

/// How long a backed-up observer gets to accept the final `Done` event.
const DONE_GRACE: Duration = Duration::from_secs(5);

/// Routes log lines and completion events for every job.
#[derive(Clone)]
pub struct LogBroadcaster {
    registry: Arc<JobRegistry>,
    capacity: usize,
    next_id: Arc<AtomicU64>,
}

impl LogBroadcaster {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self::with_capacity(registry, DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn with_capacity(registry: Arc<JobRegistry>, capacity: usize) -> Self {
        Self {
            registry,
            capacity: capacity.max(1),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Attach an observer to a job.
    ///
    /// The subscription first yields the lines recorded so far. If the job is
    /// already finished it then yields `Done` and ends without registering a
    /// live queue; otherwise it continues with live events.
    pub fn subscribe(&self, job_id: &JobId) -> Result<LogSubscription, JobError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let capacity = self.capacity;

        let subscription = self.registry.update(job_id, |record| {
            let mut backlog: VecDeque<LogEvent> =
                record.logs().iter().cloned().map(LogEvent::Line).collect();

            if let Some(outcome) = record.outcome() {
                backlog.push_back(LogEvent::Done(outcome));
                return LogSubscription::new(id, job_id.clone(), backlog, None);
            }

            let (tx, rx) = mpsc::channel(capacity);
            record.subscribers.push(Subscriber { id, tx });
            LogSubscription::new(id, job_id.clone(), backlog, Some(rx))
        })?;

        tracing::debug!(
            job_id = %job_id,
            subscriber = id,
            backlog = subscription.backlog.len(),
            live = subscription.rx.is_some(),
            "Log observer attached"
        );
        Ok(subscription)
    }

    /// Detach an observer. Safe to call more than once.
    pub fn unsubscribe(&self, subscription: &LogSubscription) -> bool {
        let removed = self
            .registry
            .update(&subscription.job_id, |record| {
                let before = record.subscribers.len();
                record.subscribers.retain(|s| s.id != subscription.id);
                before != record.subscribers.len()
            })
            .unwrap_or(false);

        if removed {
            tracing::debug!(
                job_id = %subscription.job_id,
                subscriber = subscription.id,
                "Log observer detached"
            );
        }
        removed
    }

    /// Record a line and forward it to every attached observer.
    ///
    /// Returns `Ok(false)` when the job is already finished; the line is
    /// discarded in that case.
    pub fn publish(&self, job_id: &JobId, record: LogRecord) -> Result<bool, JobError> {
        self.registry.update(job_id, |job| {
            if !job.append_log(record.clone()) {
                return false;
            }
            if !job.subscribers.is_empty() {
                fan_out(job_id, &mut job.subscribers, LogEvent::Line(record));
            }
            true
        })
    }

    /// Move the job to its terminal status and send `Done` to every observer.
    ///
    /// Both happen in one critical section: anyone subscribing afterwards
    /// finds the job finished and gets `Done` from the backlog instead.
    pub fn terminate(
        &self,
        job_id: &JobId,
        termination: &Termination,
    ) -> Result<JobOutcome, JobError> {
        self.registry.update(job_id, |job| {
            let outcome = job.finish(job_id, termination)?;
            let subscribers = std::mem::take(&mut job.subscribers);
            deliver_done(job_id, subscribers, &outcome);
            Ok(outcome)
        })?
    }

    pub fn subscriber_count(&self, job_id: &JobId) -> Result<usize, JobError> {
        self.registry.update(job_id, |job| job.subscriber_count())
    }
}

/// Non-blocking send to each subscriber, dropping the ones that cannot keep up.
fn fan_out(job_id: &JobId, subscribers: &mut Vec<Subscriber>, event: LogEvent) {
    subscribers.retain(|sub| match sub.tx.try_send(event.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::warn!(job_id = %job_id, subscriber = sub.id, "Dropping slow log observer");
            crate::metrics::record_subscriber_dropped();
            false
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!(job_id = %job_id, subscriber = sub.id, "Log observer went away");
            false
        }
    });
}

/// Send the final event and release every queue.
///
/// A full queue gets a short grace period on a background task; the event is
/// still ordered after everything already queued.
fn deliver_done(job_id: &JobId, subscribers: Vec<Subscriber>, outcome: &JobOutcome) {
    for sub in subscribers {
        match sub.tx.try_send(LogEvent::Done(outcome.clone())) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(event)) => {
                let Ok(handle) = tokio::runtime::Handle::try_current() else {
                    crate::metrics::record_subscriber_dropped();
                    continue;
                };
                let job_id = job_id.clone();
                handle.spawn(async move {
                    let sent = tokio::time::timeout(DONE_GRACE, sub.tx.send(event)).await;
                    if !matches!(sent, Ok(Ok(()))) {
                        tracing::warn!(
                            job_id = %job_id,
                            subscriber = sub.id,
                            "Log observer never drained its queue"
                        );
                        crate::metrics::record_subscriber_dropped();
                    }
                });
            }
        }
    }
}

/// One observer's view of a job's log.
///
/// Yields the backlog captured at subscription time, then live events, and
/// returns `None` after `Done` or once the observer has been dropped.
pub struct LogSubscription {
    id: SubscriberId,
    job_id: JobId,
    backlog: VecDeque<LogEvent>,
    rx: Option<mpsc::Receiver<LogEvent>>,
    finished: bool,
}

impl LogSubscription {
    fn new(
        id: SubscriberId,
        job_id: JobId,
        backlog: VecDeque<LogEvent>,
        rx: Option<mpsc::Receiver<LogEvent>>,
    ) -> Self {
        Self {
            id,
            job_id,
            backlog,
            rx,
            finished: false,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// True once `Done` has been yielded or the stream ended.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Next event. Cancel-safe.
    pub async fn recv(&mut self) -> Option<LogEvent> {
        if self.finished {
            return None;
        }

        let event = match self.backlog.pop_front() {
            Some(event) => Some(event),
            None => match self.rx.as_mut() {
                Some(rx) => rx.recv().await,
                None => None,
            },
        };

        match &event {
            Some(LogEvent::Done(_)) | None => {
                self.finished = true;
                self.rx = None;
            }
            Some(LogEvent::Line(_)) => {}
        }
        event
    }
}
