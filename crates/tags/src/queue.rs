//! Call queue: buffers calls made before an integration is ready and
//! replays them in arrival order exactly once.

use std::collections::VecDeque;

use campaign_core::{CallRecord, TagError, TagResult};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Accepting calls until the integration becomes ready.
    Buffering,
    /// Replaying; calls made from inside a dispatch go to the tail.
    Draining,
    /// Permanently inactive; callers dispatch directly.
    Drained,
    /// The integration failed; calls are dropped.
    Closed,
}

/// What the caller should do with a call after offering it to the queue.
#[derive(Debug)]
pub enum Enqueue {
    Queued,
    /// The queue has drained; dispatch the record now.
    Bypass(CallRecord),
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub dispatched: usize,
    /// Records appended by re-entrant calls during this pass.
    pub reentrant: usize,
}

struct Inner {
    state: QueueState,
    records: VecDeque<CallRecord>,
    reentrant: usize,
}

pub struct CallQueue {
    integration: String,
    max_redrain: usize,
    inner: Mutex<Inner>,
}

impl CallQueue {
    pub fn new(integration: impl Into<String>, max_redrain: usize) -> Self {
        Self {
            integration: integration.into(),
            max_redrain,
            inner: Mutex::new(Inner {
                state: QueueState::Buffering,
                records: VecDeque::new(),
                reentrant: 0,
            }),
        }
    }

    pub fn enqueue(&self, record: CallRecord) -> Enqueue {
        let mut inner = self.inner.lock();
        match inner.state {
            QueueState::Buffering => {
                debug!(integration = %self.integration, method = %record.method(), depth = inner.records.len() + 1, "call queued");
                metrics::counter!("tags.calls.queued").increment(1);
                inner.records.push_back(record);
                Enqueue::Queued
            }
            QueueState::Draining => {
                debug!(integration = %self.integration, method = %record.method(), "re-entrant call queued during drain");
                metrics::counter!("tags.calls.queued").increment(1);
                inner.reentrant += 1;
                inner.records.push_back(record);
                Enqueue::Queued
            }
            QueueState::Drained => Enqueue::Bypass(record),
            QueueState::Closed => {
                debug!(integration = %self.integration, method = %record.method(), "call dropped on closed queue");
                metrics::counter!("tags.calls.dropped").increment(1);
                Enqueue::Dropped
            }
        }
    }

    /// Replay every queued record through `dispatch` in FIFO order, including
    /// records appended while draining, then go permanently inactive.
    ///
    /// Only the first call on a buffering queue does anything. If re-entrant
    /// dispatch appends more than `max_redrain` records the queue closes,
    /// discarding what is left, and `QueueOverflow` is returned.
    pub fn drain(&self, mut dispatch: impl FnMut(CallRecord)) -> TagResult<DrainReport> {
        {
            let mut inner = self.inner.lock();
            if inner.state != QueueState::Buffering {
                return Ok(DrainReport::default());
            }
            inner.state = QueueState::Draining;
            inner.reentrant = 0;
            debug!(integration = %self.integration, depth = inner.records.len(), "draining call queue");
        }

        let mut dispatched = 0;
        let report = loop {
            let next = {
                let mut inner = self.inner.lock();
                if inner.reentrant > self.max_redrain {
                    let discarded = inner.records.len();
                    inner.records.clear();
                    inner.state = QueueState::Closed;
                    metrics::counter!("tags.calls.dropped").increment(discarded as u64);
                    error!(
                        integration = %self.integration,
                        limit = self.max_redrain,
                        dispatched,
                        discarded,
                        "re-entrant dispatch exceeded drain bound"
                    );
                    return Err(TagError::QueueOverflow {
                        integration: self.integration.clone(),
                        limit: self.max_redrain,
                    });
                }
                match inner.records.pop_front() {
                    Some(record) => record,
                    None => {
                        inner.state = QueueState::Drained;
                        break DrainReport {
                            dispatched,
                            reentrant: inner.reentrant,
                        };
                    }
                }
            };
            dispatch(next);
            dispatched += 1;
        };
        Ok(report)
    }

    /// Drop every queued record and refuse new ones. Returns how many were
    /// discarded.
    pub fn close(&self) -> usize {
        let mut inner = self.inner.lock();
        let discarded = inner.records.len();
        inner.records.clear();
        inner.state = QueueState::Closed;
        if discarded > 0 {
            metrics::counter!("tags.calls.dropped").increment(discarded as u64);
        }
        discarded
    }

    /// Back to buffering with nothing queued.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.records.clear();
        inner.reentrant = 0;
        inner.state = QueueState::Buffering;
    }

    pub fn state(&self) -> QueueState {
        self.inner.lock().state
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
