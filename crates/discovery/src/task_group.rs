//! Concurrency-limited executor for one batch of comparison tasks.
//!
//! Tasks share a [`TaskSink`] that accumulates transfers, confirmed headers
//! and sub-ranges for the next level. The first task error cancels the
//! group: queued tasks never start and in-flight tasks are dropped at their
//! next await point.

use std::{future::Future, sync::Arc};

use eth_history_domain::{BlockNumber, BlockRange, DiscoveredHeader, Transfer};
use parking_lot::Mutex;
use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::DiscoveryError;

/// Everything tasks pushed while the group ran.
#[derive(Debug, Default)]
pub struct GroupResults {
    pub transfers: Vec<Transfer>,
    pub headers: Vec<DiscoveredHeader>,
    pub ranges: Vec<BlockRange>,
    pub start_block: Option<BlockNumber>,
}

struct SinkState {
    results: Mutex<GroupResults>,
    error: Mutex<Option<DiscoveryError>>,
    cancel: CancellationToken,
}

/// Thread-safe handle to the group's accumulator, cloned into every task.
#[derive(Clone)]
pub struct TaskSink {
    state: Arc<SinkState>,
}

impl TaskSink {
    pub fn push(&self, transfers: impl IntoIterator<Item = Transfer>) {
        self.state.results.lock().transfers.extend(transfers);
    }

    pub fn push_header(&self, header: DiscoveredHeader) {
        self.state.results.lock().headers.push(header);
    }

    pub fn push_range(&self, range: BlockRange) {
        self.state.results.lock().ranges.push(range);
    }

    /// Raises the recorded start block; lower candidates are ignored.
    pub fn raise_start_block(&self, block: BlockNumber) {
        let mut results = self.state.results.lock();
        results.start_block = Some(results.start_block.map_or(block, |current| current.max(block)));
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancel.is_cancelled()
    }

    fn fail(&self, err: DiscoveryError) {
        let mut slot = self.state.error.lock();
        if slot.is_none() {
            warn!(error = %err, "task failed, cancelling group");
            *slot = Some(err);
        }
        drop(slot);
        self.state.cancel.cancel();
    }

    fn error(&self) -> Option<DiscoveryError> {
        self.state.error.lock().clone()
    }
}

/// Runs tasks across a fixed worker budget. A budget of `0` gives every task
/// its own slot; otherwise tasks beyond the budget queue until one frees.
pub struct TaskGroup {
    tasks: JoinSet<()>,
    permits: Option<Arc<Semaphore>>,
    sink: TaskSink,
}

impl TaskGroup {
    pub fn new(thread_limit: usize) -> Self {
        Self::with_token(thread_limit, CancellationToken::new())
    }

    /// Creates a group that is also cancelled when `parent` is.
    pub fn with_cancellation(thread_limit: usize, parent: &CancellationToken) -> Self {
        Self::with_token(thread_limit, parent.child_token())
    }

    fn with_token(thread_limit: usize, cancel: CancellationToken) -> Self {
        let permits = (thread_limit > 0).then(|| Arc::new(Semaphore::new(thread_limit)));
        Self {
            tasks: JoinSet::new(),
            permits,
            sink: TaskSink {
                state: Arc::new(SinkState {
                    results: Mutex::new(GroupResults::default()),
                    error: Mutex::new(None),
                    cancel,
                }),
            },
        }
    }

    pub fn sink(&self) -> TaskSink {
        self.sink.clone()
    }

    /// Enqueues a task. It is skipped if the group is cancelled before a
    /// slot frees up for it.
    pub fn add<F, Fut>(&mut self, task: F)
    where
        F: FnOnce(TaskSink) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), DiscoveryError>> + Send + 'static,
    {
        let sink = self.sink.clone();
        let permits = self.permits.clone();
        let cancel = sink.state.cancel.clone();

        self.tasks.spawn(async move {
            let _permit = match permits {
                Some(permits) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    permit = permits.acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => return,
                    },
                },
                None => None,
            };
            if cancel.is_cancelled() {
                return;
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                outcome = task(sink.clone()) => outcome,
            };
            if let Err(err) = outcome {
                sink.fail(err);
            }
        });
    }

    pub fn push(&self, transfers: impl IntoIterator<Item = Transfer>) {
        self.sink.push(transfers);
    }

    pub fn push_header(&self, header: DiscoveredHeader) {
        self.sink.push_header(header);
    }

    pub fn push_range(&self, range: BlockRange) {
        self.sink.push_range(range);
    }

    /// Waits until every submitted task finished or was skipped. Returns the
    /// first task error, or [`DiscoveryError::Stuck`] if the group was
    /// cancelled from outside.
    pub async fn wait(&mut self) -> Result<(), DiscoveryError> {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                if err.is_panic() {
                    self.sink.fail(DiscoveryError::TaskPanicked(err.to_string()));
                }
            }
        }

        if let Some(err) = self.sink.error() {
            return Err(err);
        }
        if self.sink.is_cancelled() {
            return Err(DiscoveryError::Stuck);
        }
        Ok(())
    }

    /// First task error encountered, if any.
    pub fn error(&self) -> Option<DiscoveryError> {
        self.sink.error()
    }

    pub fn cancel(&self) {
        self.sink.state.cancel.cancel();
    }

    /// Drains the accumulator. Tasks still running are aborted.
    pub fn into_results(mut self) -> GroupResults {
        self.tasks.abort_all();
        let results = std::mem::take(&mut *self.sink.state.results.lock());
        results
    }
}
