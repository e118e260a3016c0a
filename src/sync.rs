//! Best-effort replication to the remote store.
//!
//! Local writes are authoritative and complete as soon as they are applied.
//! Each write enqueues a task on a bounded channel drained by a single
//! worker, one task at a time in enqueue order. A task that fails, or that
//! does not fit in the channel, is logged and dropped: delivery is at most
//! once and the remote copy may diverge permanently.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::models::{ActivityRecord, Lead, Reminder, StaffUser};

#[derive(Debug, Clone)]
pub enum SyncTask {
    UpsertLead(Lead),
    DeleteLead(Uuid),
    AppendActivity(ActivityRecord),
    UpsertStaff(StaffUser),
    DeleteStaff(Uuid),
    UpsertReminder(Reminder),
}

impl SyncTask {
    pub fn label(&self) -> &'static str {
        match self {
            SyncTask::UpsertLead(_) => "upsert_lead",
            SyncTask::DeleteLead(_) => "delete_lead",
            SyncTask::AppendActivity(_) => "append_activity",
            SyncTask::UpsertStaff(_) => "upsert_staff",
            SyncTask::DeleteStaff(_) => "delete_staff",
            SyncTask::UpsertReminder(_) => "upsert_reminder",
        }
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn apply(&self, task: &SyncTask) -> EngineResult<()>;
}

#[derive(Default)]
struct SyncState {
    pending: AtomicUsize,
    applied: AtomicUsize,
    failed: AtomicUsize,
    idle: Notify,
}

impl SyncState {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

pub struct SyncQueue {
    sender: mpsc::Sender<SyncTask>,
    state: Arc<SyncState>,
    worker: JoinHandle<()>,
}

impl SyncQueue {
    /// Starts the worker on the current tokio runtime.
    pub fn spawn<R: RemoteStore>(remote: R, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<SyncTask>(capacity.max(1));
        let state = Arc::new(SyncState::default());
        let worker_state = Arc::clone(&state);

        let worker = tokio::spawn(async move {
            while let Some(task) = receiver.recv().await {
                match remote.apply(&task).await {
                    Ok(()) => {
                        worker_state.applied.fetch_add(1, Ordering::SeqCst);
                        tracing::debug!(task = task.label(), "synced");
                    }
                    Err(err) => {
                        worker_state.failed.fetch_add(1, Ordering::SeqCst);
                        tracing::warn!(task = task.label(), error = %err, "sync task dropped");
                    }
                }
                worker_state.finish_one();
            }
        });

        Self {
            sender,
            state,
            worker,
        }
    }

    /// Queues a task without waiting. A full channel drops the task.
    pub fn enqueue(&self, task: SyncTask) {
        self.state.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.sender.try_send(task) {
            let label = match &err {
                mpsc::error::TrySendError::Full(task) | mpsc::error::TrySendError::Closed(task) => {
                    task.label()
                }
            };
            self.state.failed.fetch_add(1, Ordering::SeqCst);
            self.state.finish_one();
            tracing::warn!(task = label, "sync queue unavailable, task dropped");
        }
    }

    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::SeqCst)
    }

    pub fn applied(&self) -> usize {
        self.state.applied.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.state.failed.load(Ordering::SeqCst)
    }

    /// Waits until every queued task has been attempted.
    pub async fn flush(&self) {
        loop {
            let idle = self.state.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Drains the queue and stops the worker.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(err) = self.worker.await {
            tracing::warn!(error = %err, "sync worker ended abnormally");
        }
    }
}

/// Remote that records applied tasks in memory. Tasks whose label is listed
/// in `failing` are rejected.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    applied: Arc<std::sync::Mutex<Vec<SyncTask>>>,
    failing: Vec<&'static str>,
}

impl MemoryRemote {
    pub fn failing_on(labels: &[&'static str]) -> Self {
        Self {
            applied: Arc::default(),
            failing: labels.to_vec(),
        }
    }

    pub fn applied(&self) -> Vec<SyncTask> {
        self.applied
            .lock()
            .map(|applied| applied.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn apply(&self, task: &SyncTask) -> EngineResult<()> {
        if self.failing.contains(&task.label()) {
            return Err(crate::error::EngineError::Sync(format!(
                "remote rejected {}",
                task.label()
            )));
        }
        if let Ok(mut applied) = self.applied.lock() {
            applied.push(task.clone());
        }
        Ok(())
    }
}
