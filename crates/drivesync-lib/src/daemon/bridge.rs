//! Message-passing bridge to the execution context that performs sync I/O.
//!
//! The execution context is a task with an inbox of tagged [`BridgeMessage`]
//! envelopes. Replies travel back on a separate channel and are matched to
//! their request by envelope id. The context is created lazily; creation is
//! serialized so concurrent triggers share one context.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::errors::{Result, SyncError};
use crate::source::SubjectSource;
use crate::sync::{StatusBoard, SyncOrchestrator, SyncOutcome, SyncReport};

const INBOX_CAPACITY: usize = 16;

/// Requests understood by the execution context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BridgeMessage {
    ExecuteSync,
    Ping,
}

/// Counts reported back after a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub subjects: usize,
    #[serde(rename = "subjectsFailed")]
    pub subjects_failed: usize,
    #[serde(rename = "filesTotal")]
    pub files_total: usize,
    #[serde(rename = "filesSynced")]
    pub files_synced: usize,
    #[serde(rename = "filesFailed")]
    pub files_failed: usize,
    pub error: Option<String>,
}

impl From<&SyncReport> for RunSummary {
    fn from(report: &SyncReport) -> Self {
        Self {
            subjects: report.subjects.len(),
            subjects_failed: report.subjects_failed,
            files_total: report.files_total(),
            files_synced: report.files_synced(),
            files_failed: report.files_failed(),
            error: report.status.error.clone(),
        }
    }
}

/// Replies sent by the execution context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BridgeReply {
    SyncFinished { summary: RunSummary },
    SyncSkipped,
    SyncFailed {
        error: String,
        #[serde(rename = "authRequired")]
        auth_required: bool,
    },
    Pong,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: u64,
    pub body: T,
}

/// What a sync trigger led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The gate found no authorized destination; nothing ran.
    NotAuthorized,
    /// A run was already in progress.
    Skipped,
    Completed(RunSummary),
    Failed { error: String, auth_required: bool },
}

/// The work the execution context performs for `ExecuteSync`.
pub struct SyncWorker {
    orchestrator: Arc<SyncOrchestrator>,
    subjects: Arc<dyn SubjectSource>,
}

impl SyncWorker {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, subjects: Arc<dyn SubjectSource>) -> Self {
        Self {
            orchestrator,
            subjects,
        }
    }

    async fn execute(&self) -> BridgeReply {
        let subjects = match self.subjects.load_subjects().await {
            Ok(subjects) => subjects,
            Err(e) => return failed(e),
        };
        match self.orchestrator.run_full_sync(&subjects).await {
            Ok(SyncOutcome::Completed(report)) => BridgeReply::SyncFinished {
                summary: RunSummary::from(&report),
            },
            Ok(SyncOutcome::Skipped) => BridgeReply::SyncSkipped,
            Err(e) => failed(e),
        }
    }
}

fn failed(e: SyncError) -> BridgeReply {
    BridgeReply::SyncFailed {
        auth_required: e.is_auth(),
        error: e.to_string(),
    }
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<BridgeReply>>>>;

#[derive(Clone)]
struct ContextHandle {
    inbox: mpsc::Sender<Envelope<BridgeMessage>>,
    pending: Pending,
}

/// Runs in the execution context: dispatch each envelope by kind.
async fn context_loop(
    mut inbox: mpsc::Receiver<Envelope<BridgeMessage>>,
    outbox: mpsc::Sender<Envelope<BridgeReply>>,
    worker: Arc<SyncWorker>,
) {
    while let Some(Envelope { id, body }) = inbox.recv().await {
        match body {
            BridgeMessage::Ping => {
                let _ = outbox.send(Envelope { id, body: BridgeReply::Pong }).await;
            }
            BridgeMessage::ExecuteSync => {
                // Runs detached so an overlapping request is answered with
                // SyncSkipped instead of waiting behind the current run.
                let worker = worker.clone();
                let outbox = outbox.clone();
                tokio::spawn(async move {
                    // Every request gets a reply, even when the run panics.
                    let run = tokio::spawn(async move { worker.execute().await });
                    let body = match run.await {
                        Ok(body) => body,
                        Err(e) => {
                            tracing::error!("sync task {} failed: {}", id, e);
                            BridgeReply::SyncFailed {
                                error: format!("sync task failed: {e}"),
                                auth_required: false,
                            }
                        }
                    };
                    let _ = outbox.send(Envelope { id, body }).await;
                });
            }
        }
    }
    tracing::debug!("execution context inbox closed");
}

/// Delivers replies to whoever is waiting on the matching id.
async fn reply_pump(mut replies: mpsc::Receiver<Envelope<BridgeReply>>, pending: Pending) {
    while let Some(Envelope { id, body }) = replies.recv().await {
        match pending.lock().await.remove(&id) {
            Some(waiter) => {
                let _ = waiter.send(body);
            }
            None => tracing::warn!("reply {} arrived with nobody waiting", id),
        }
    }
}

pub struct ExecutionBridge {
    worker: Arc<SyncWorker>,
    board: StatusBoard,
    context: Mutex<Option<ContextHandle>>,
    next_id: AtomicU64,
    created: AtomicUsize,
}

impl ExecutionBridge {
    pub fn new(worker: SyncWorker, board: StatusBoard) -> Self {
        Self {
            worker: Arc::new(worker),
            board,
            context: Mutex::new(None),
            next_id: AtomicU64::new(1),
            created: AtomicUsize::new(0),
        }
    }

    /// How many execution contexts have been started so far.
    pub fn contexts_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Ask the execution context to run a full sync and wait for its reply.
    ///
    /// A failure reply is also written into the shared status so observers
    /// see it even when the run never reached the orchestrator.
    pub async fn execute_sync(&self) -> Result<TriggerOutcome> {
        match self.request(BridgeMessage::ExecuteSync).await? {
            BridgeReply::SyncFinished { summary } => Ok(TriggerOutcome::Completed(summary)),
            BridgeReply::SyncSkipped => Ok(TriggerOutcome::Skipped),
            BridgeReply::SyncFailed {
                error,
                auth_required,
            } => {
                self.board.record_failure(&error).await?;
                Ok(TriggerOutcome::Failed {
                    error,
                    auth_required,
                })
            }
            BridgeReply::Pong => Err(SyncError::Bridge("unexpected Pong to ExecuteSync".into())),
        }
    }

    /// Drop the current context; the next request starts a new one.
    pub async fn shutdown(&self) {
        if self.context.lock().await.take().is_some() {
            tracing::debug!("execution context released");
        }
    }

    async fn request(&self, body: BridgeMessage) -> Result<BridgeReply> {
        let handle = self.ensure_context().await?;
        self.send(&handle, body).await
    }

    async fn ensure_context(&self) -> Result<ContextHandle> {
        let mut slot = self.context.lock().await;
        if let Some(handle) = slot.as_ref() {
            if !handle.inbox.is_closed() {
                return Ok(handle.clone());
            }
        }

        let handle = self.spawn_context();
        match self.send(&handle, BridgeMessage::Ping).await? {
            BridgeReply::Pong => {}
            other => {
                return Err(SyncError::Bridge(format!(
                    "execution context answered Ping with {other:?}"
                )))
            }
        }
        *slot = Some(handle.clone());
        Ok(handle)
    }

    fn spawn_context(&self) -> ContextHandle {
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (outbox_tx, outbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(context_loop(inbox_rx, outbox_tx, self.worker.clone()));
        tokio::spawn(reply_pump(outbox_rx, pending.clone()));

        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!("execution context #{} started", n);
        ContextHandle {
            inbox: inbox_tx,
            pending,
        }
    }

    async fn send(&self, handle: &ContextHandle, body: BridgeMessage) -> Result<BridgeReply> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        handle.pending.lock().await.insert(id, tx);

        if handle.inbox.send(Envelope { id, body }).await.is_err() {
            handle.pending.lock().await.remove(&id);
            return Err(SyncError::Bridge("execution context is not running".into()));
        }
        rx.await
            .map_err(|_| SyncError::Bridge(format!("execution context dropped reply {id}")))
    }
}
