//! Job queues.
//!
//! [`JobQueue`] is the broker boundary: pull raw envelopes, acknowledge
//! them with a result. [`SpoolQueue`] is a directory-backed broker usable
//! across processes; [`MemoryQueue`] keeps everything in process.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use buildrun_core::{decode_job, Envelope, Job, JobPayload, JobResult};
use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::QueueError;

/// One message as handed out by a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    /// Queue-assigned message id.
    pub id: String,
    pub body: Vec<u8>,
    /// Where the claimed message lives, for file-backed queues.
    pub location: Option<PathBuf>,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Take the next message, waiting at most `timeout` for one to arrive.
    async fn pull(&self, timeout: Duration) -> Result<Option<QueuedMessage>, QueueError>;

    /// Acknowledge `message` with its job's terminal result.
    async fn complete(&self, message: &QueuedMessage, result: &JobResult) -> Result<(), QueueError>;

    /// Set aside a message that cannot be decoded.
    async fn reject(&self, message: &QueuedMessage, reason: &str) -> Result<(), QueueError> {
        let _ = (message, reason);
        Ok(())
    }
}

/// A decoded job together with the message it came from.
#[derive(Debug, Clone)]
pub struct Dequeued {
    pub message: QueuedMessage,
    pub job: Job,
}

/// Pull up to `max_n` jobs, skipping (and rejecting) malformed envelopes.
///
/// Stops early once a pull comes back empty. A pull error after some
/// messages were already claimed ends the batch with what was claimed;
/// it is only returned when nothing was.
pub async fn dequeue_batch(
    queue: &dyn JobQueue,
    max_n: usize,
    timeout: Duration,
) -> Result<Vec<Dequeued>, QueueError> {
    let mut batch = Vec::with_capacity(max_n);
    for _ in 0..max_n {
        let message = match queue.pull(timeout).await {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(e) if batch.is_empty() => return Err(e),
            Err(e) => {
                warn!(claimed = batch.len(), error = %e, "Queue pull failed, running partial batch");
                break;
            }
        };
        match decode_job(&message.body) {
            Ok(job) => {
                debug!(message_id = %message.id, job_id = %job.job_id, "Dequeued job");
                batch.push(Dequeued { message, job });
            }
            Err(source) => {
                let err = QueueError::Decode {
                    id: message.id.clone(),
                    source,
                };
                warn!(error = %err, "Skipping malformed envelope");
                if let Err(e) = queue.reject(&message, &err.to_string()).await {
                    warn!(message_id = %message.id, error = %e, "Failed to reject message");
                }
            }
        }
    }
    Ok(batch)
}

const PENDING: &str = "pending";
const CLAIMED: &str = "claimed";
const RESULTS: &str = "results";
const REJECTED: &str = "rejected";

/// Directory-backed queue.
///
/// ```text
/// <root>/pending/   envelopes waiting to be pulled, oldest name first
/// <root>/claimed/   envelopes being processed
/// <root>/results/   one JSON JobResult per completed message
/// <root>/rejected/  malformed envelopes plus a `.reason` file
/// ```
///
/// Claiming is a rename, so several consumers can share one spool.
#[derive(Debug, Clone)]
pub struct SpoolQueue {
    root: PathBuf,
    poll_interval: Duration,
}

impl SpoolQueue {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let root = root.into();
        for dir in [PENDING, CLAIMED, RESULTS, REJECTED] {
            tokio::fs::create_dir_all(root.join(dir)).await?;
        }
        Ok(Self {
            root,
            poll_interval: Duration::from_millis(200),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Enqueue a job; returns the path of the pending envelope.
    pub async fn submit(&self, job_id: &str, payload: &JobPayload) -> Result<PathBuf, QueueError> {
        let bytes = Envelope::encode(job_id, payload)?.to_bytes()?;
        let name = format!(
            "{}-{}.json",
            Utc::now().format("%Y%m%dT%H%M%S%.6f"),
            file_safe(job_id)
        );
        let tmp = self.dir(PENDING).join(format!(".{}.tmp", name));
        let path = self.dir(PENDING).join(&name);
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        info!(job_id, path = %path.display(), "Job submitted");
        Ok(path)
    }

    async fn oldest_pending(&self) -> Result<Option<String>, QueueError> {
        let mut entries = tokio::fs::read_dir(self.dir(PENDING)).await?;
        let mut oldest: Option<String> = None;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            if oldest.as_ref().map_or(true, |o| name < *o) {
                oldest = Some(name);
            }
        }
        Ok(oldest)
    }

    async fn try_claim(&self) -> Result<Option<QueuedMessage>, QueueError> {
        while let Some(name) = self.oldest_pending().await? {
            let claimed = self.dir(CLAIMED).join(&name);
            match tokio::fs::rename(self.dir(PENDING).join(&name), &claimed).await {
                Ok(()) => {
                    let body = tokio::fs::read(&claimed).await?;
                    return Ok(Some(QueuedMessage {
                        id: stem(&name),
                        body,
                        location: Some(claimed),
                    }));
                }
                // Another consumer got there first.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Move messages left claimed by a previous run back to pending.
    pub async fn recover_claimed(&self) -> Result<usize, QueueError> {
        let mut entries = tokio::fs::read_dir(self.dir(CLAIMED)).await?;
        let mut recovered = 0;
        while let Some(entry) = entries.next_entry().await? {
            tokio::fs::rename(entry.path(), self.dir(PENDING).join(entry.file_name())).await?;
            recovered += 1;
        }
        if recovered > 0 {
            info!(recovered, "Re-queued claimed messages from a previous run");
        }
        Ok(recovered)
    }

    /// Path of the result file written for message `id`.
    pub fn result_path(&self, id: &str) -> PathBuf {
        self.dir(RESULTS).join(format!("{}.json", id))
    }
}

#[async_trait]
impl JobQueue for SpoolQueue {
    async fn pull(&self, timeout: Duration) -> Result<Option<QueuedMessage>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = self.try_claim().await? {
                return Ok(Some(message));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn complete(&self, message: &QueuedMessage, result: &JobResult) -> Result<(), QueueError> {
        let json = serde_json::to_vec_pretty(result)?;
        tokio::fs::write(self.result_path(&message.id), json).await?;
        if let Some(claimed) = &message.location {
            match tokio::fs::remove_file(claimed).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn reject(&self, message: &QueuedMessage, reason: &str) -> Result<(), QueueError> {
        let rejected = self.dir(REJECTED);
        if let Some(claimed) = &message.location {
            let name = claimed
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| format!("{}.json", message.id).into());
            tokio::fs::rename(claimed, rejected.join(name)).await?;
        }
        tokio::fs::write(rejected.join(format!("{}.reason", message.id)), reason).await?;
        Ok(())
    }
}

fn stem(name: &str) -> String {
    name.strip_suffix(".json").unwrap_or(name).to_string()
}

fn file_safe(id: &str) -> String {
    let safe: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();
    if safe.is_empty() {
        "job".to_string()
    } else {
        safe
    }
}

/// In-process queue.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryState>,
    available: Notify,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: u64,
    pending: VecDeque<QueuedMessage>,
    completed: Vec<(String, JobResult)>,
    rejected: Vec<(String, String)>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue raw envelope bytes; returns the message id.
    pub fn push(&self, body: impl Into<Vec<u8>>) -> String {
        let id = {
            let mut state = self.lock();
            state.next_id += 1;
            let id = format!("mem-{}", state.next_id);
            state.pending.push_back(QueuedMessage {
                id: id.clone(),
                body: body.into(),
                location: None,
            });
            id
        };
        self.available.notify_one();
        id
    }

    /// Enqueue a job payload under `job_id`.
    pub fn push_job(&self, job_id: &str, payload: &JobPayload) -> Result<String, QueueError> {
        Ok(self.push(Envelope::encode(job_id, payload)?.to_bytes()?))
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Results acknowledged so far, as `(message id, result)`.
    pub fn completed(&self) -> Vec<(String, JobResult)> {
        self.lock().completed.clone()
    }

    /// Rejected messages, as `(message id, reason)`.
    pub fn rejected(&self) -> Vec<(String, String)> {
        self.lock().rejected.clone()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn pull(&self, timeout: Duration) -> Result<Option<QueuedMessage>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            let next = self.lock().pending.pop_front();
            if next.is_some() {
                return Ok(next);
            }
            if tokio::time::timeout_at(deadline, self.available.notified())
                .await
                .is_err()
            {
                return Ok(self.lock().pending.pop_front());
            }
        }
    }

    async fn complete(&self, message: &QueuedMessage, result: &JobResult) -> Result<(), QueueError> {
        self.lock()
            .completed
            .push((message.id.clone(), result.clone()));
        Ok(())
    }

    async fn reject(&self, message: &QueuedMessage, reason: &str) -> Result<(), QueueError> {
        self.lock()
            .rejected
            .push((message.id.clone(), reason.to_string()));
        Ok(())
    }
}
