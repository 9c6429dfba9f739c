//! Worker lifecycle: provision, readiness, artifact extraction and teardown.
//!
//! Every job gets its own worker instance. The [`WorkerManager`] owns the
//! registry of live workers and the pool of public port pairs, and is the
//! only component that starts or stops instances.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use buildrun_core::{JobId, WorkerId, WorkerStatus};
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::LifecycleConfig;
use crate::control::ControlConnector;
use crate::error::PipelineError;
use crate::runtime::{ContainerRuntime, WorkerSpec};
use crate::template::{TemplateParams, WorkerTemplate};

/// Directory inside the worker where saved structures land.
pub const STRUCTURE_DIR: &str = "/data/world/generated/minecraft/structures";

/// Outcome of waiting for a worker to accept commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// The readiness budget ran out while the instance was still starting.
    TimedOut,
    /// The instance stopped; carries the last observed container state.
    Exited(String),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// A provisioned worker, as seen by one job's pipeline.
#[derive(Clone)]
pub struct WorkerHandle {
    pub worker_id: WorkerId,
    pub job_id: JobId,
    pub host: String,
    /// Public game port.
    pub port: u16,
    /// Public control (RCON) port.
    pub control_port: u16,
    pub spec: WorkerSpec,
    credential: String,
    status: WorkerStatus,
}

impl WorkerHandle {
    /// Control-channel secret generated for this worker.
    pub fn credential(&self) -> &str {
        &self.credential
    }

    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    fn advance(&mut self, next: WorkerStatus) {
        match self.status.transition(next) {
            Ok(status) => self.status = status,
            Err(e) => warn!(worker_id = %self.worker_id, error = %e, "Ignoring worker transition"),
        }
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("worker_id", &self.worker_id)
            .field("job_id", &self.job_id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("control_port", &self.control_port)
            .field("credential", &"<redacted>")
            .field("status", &self.status)
            .finish()
    }
}

/// Registry view of a live worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveWorker {
    pub job_id: JobId,
    pub worker_id: WorkerId,
    pub port: u16,
    pub control_port: u16,
    pub status: WorkerStatus,
}

/// A structure file copied out of a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    /// Hex SHA-256 of the file contents.
    pub sha256: String,
    pub size: u64,
}

/// Generate a fresh control-channel credential (128 random bits, URL-safe).
pub fn generate_credential() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Directory holding one job's artifacts: the id slug plus a digest prefix,
/// so ids that sanitise alike still land apart.
pub(crate) fn artifact_subdir(job_id: &JobId) -> String {
    let digest = sha256_hex(job_id.as_str().as_bytes());
    format!("{}-{}", job_id.slug(), &digest[..8])
}

/// Pairs of public ports, one pair per slot.
///
/// Slot `s` maps to `base + 2s` (game) and `base + 2s + 1` (control), so
/// two live workers can never share a port.
#[derive(Debug)]
struct PortPool {
    base: u16,
    capacity: usize,
    used: Mutex<BTreeSet<usize>>,
}

impl PortPool {
    fn new(base: u16, capacity: usize) -> Self {
        Self {
            base,
            capacity,
            used: Mutex::new(BTreeSet::new()),
        }
    }

    fn ports(&self, slot: usize) -> Option<(u16, u16)> {
        let offset = u16::try_from(slot.checked_mul(2)?).ok()?;
        let port = self.base.checked_add(offset)?;
        Some((port, port.checked_add(1)?))
    }

    /// Claim the lowest free slot.
    fn acquire(&self) -> Option<(usize, u16, u16)> {
        let mut used = self.used.lock().unwrap_or_else(|e| e.into_inner());
        let slot = (0..self.capacity).find(|s| !used.contains(s))?;
        let (port, control_port) = self.ports(slot)?;
        used.insert(slot);
        Some((slot, port, control_port))
    }

    fn release(&self, slot: usize) {
        self.used
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&slot);
    }

    fn in_use(&self) -> usize {
        self.used.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

struct WorkerRecord {
    handle: WorkerHandle,
    slot: usize,
}

/// Creates, polls and destroys per-job worker instances.
pub struct WorkerManager {
    config: LifecycleConfig,
    template: WorkerTemplate,
    runtime: Arc<dyn ContainerRuntime>,
    connector: Arc<dyn ControlConnector>,
    workers: RwLock<HashMap<JobId, WorkerRecord>>,
    ports: PortPool,
}

impl WorkerManager {
    pub fn new(
        config: LifecycleConfig,
        template: WorkerTemplate,
        runtime: Arc<dyn ContainerRuntime>,
        connector: Arc<dyn ControlConnector>,
    ) -> Self {
        let ports = PortPool::new(config.base_port, config.max_workers);
        Self {
            config,
            template,
            runtime,
            connector,
            workers: RwLock::new(HashMap::new()),
            ports,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn connector(&self) -> &Arc<dyn ControlConnector> {
        &self.connector
    }

    /// Start a worker for `job_id` and wait until its container exists.
    ///
    /// The worker is registered before anything is started, so a failed
    /// provision still leaves an entry for [`WorkerManager::teardown`].
    pub async fn provision(&self, job_id: &JobId) -> Result<WorkerHandle, PipelineError> {
        let (slot, port, control_port) = self.ports.acquire().ok_or_else(|| {
            PipelineError::Provision(format!(
                "no free port slot ({} workers max)",
                self.config.max_workers
            ))
        })?;

        let mut handle = {
            let mut workers = self.workers.write().await;
            if workers.contains_key(job_id) {
                self.ports.release(slot);
                return Err(PipelineError::Provision(format!(
                    "job {} already has a worker",
                    job_id
                )));
            }

            let mut worker_id = WorkerId::generate();
            while workers.values().any(|r| r.handle.worker_id == worker_id) {
                worker_id = WorkerId::generate();
            }
            let spec = WorkerSpec {
                project: format!("mc-{}", worker_id),
                compose_file: self
                    .config
                    .work_dir
                    .join(format!("compose-{}.yml", worker_id)),
                container_name: format!("buildrun-{}", worker_id),
            };
            let handle = WorkerHandle {
                worker_id,
                job_id: job_id.clone(),
                host: self.config.host.clone(),
                port,
                control_port,
                spec,
                credential: generate_credential(),
                status: WorkerStatus::Provisioning,
            };
            workers.insert(
                job_id.clone(),
                WorkerRecord {
                    handle: handle.clone(),
                    slot,
                },
            );
            handle
        };

        info!(
            job_id = %job_id,
            worker_id = %handle.worker_id,
            port,
            control_port,
            "Provisioning worker"
        );

        if let Err(e) = self.start(&handle).await {
            warn!(worker_id = %handle.worker_id, error = %e, "Worker failed to start");
            self.set_status(&mut handle, WorkerStatus::Failed).await;
            return Err(e);
        }
        Ok(handle)
    }

    async fn start(&self, handle: &WorkerHandle) -> Result<(), PipelineError> {
        let worker_id = handle.worker_id.to_string();
        let definition = self.template.render(&TemplateParams {
            worker_id: &worker_id,
            container_name: &handle.spec.container_name,
            port: handle.port,
            rcon_port: handle.control_port,
            rcon_password: handle.credential(),
            image: &self.config.image,
            version: &self.config.server_version,
        });

        tokio::fs::create_dir_all(&self.config.work_dir)
            .await
            .map_err(|e| {
                PipelineError::Provision(format!(
                    "cannot create {}: {}",
                    self.config.work_dir.display(),
                    e
                ))
            })?;
        tokio::fs::write(&handle.spec.compose_file, definition)
            .await
            .map_err(|e| {
                PipelineError::Provision(format!(
                    "cannot write {}: {}",
                    handle.spec.compose_file.display(),
                    e
                ))
            })?;

        self.runtime
            .up(&handle.spec)
            .await
            .map_err(|e| PipelineError::Provision(e.to_string()))?;

        let container = &handle.spec.container_name;
        let attempts = self.config.exists_poll_attempts.max(1);
        for attempt in 1..=attempts {
            match self.runtime.exists(container).await {
                Ok(true) => {
                    debug!(container = %container, attempt, "Container is up");
                    return Ok(());
                }
                Ok(false) => debug!(container = %container, attempt, "Waiting for container to appear"),
                Err(e) => warn!(container = %container, attempt, error = %e, "Container lookup failed"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.exists_poll_interval).await;
            }
        }
        Err(PipelineError::Provision(format!(
            "container {} did not appear after {} checks",
            container, attempts
        )))
    }

    /// Poll until the worker answers control commands, it exits, or
    /// `timeout` elapses.
    ///
    /// A worker is ready once its log shows the ready marker and a `list`
    /// command over the control channel gets a non-empty reply. Never
    /// waits past the deadline by more than one readiness check.
    pub async fn wait_ready(&self, handle: &mut WorkerHandle, timeout: Duration) -> Readiness {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut attempt = 0u32;

        let readiness = loop {
            match self.check_ready(handle).await {
                Ok(()) => break Readiness::Ready,
                Err(reason) => debug!(worker_id = %handle.worker_id, attempt, %reason, "Worker not ready"),
            }

            match self.runtime.status(&handle.spec.container_name).await {
                Ok(state) if !state.is_alive() => break Readiness::Exited(state.to_string()),
                Ok(_) => {}
                Err(e) => warn!(worker_id = %handle.worker_id, error = %e, "Status check failed"),
            }

            let now = Instant::now();
            if now >= deadline {
                break Readiness::TimedOut;
            }
            let delay = self.config.ready_backoff.delay(attempt).min(deadline - now);
            attempt += 1;
            tokio::time::sleep(delay).await;
        };

        let waited = started.elapsed();
        match &readiness {
            Readiness::Ready => {
                info!(worker_id = %handle.worker_id, waited = ?waited, "Worker ready");
                self.set_status(handle, WorkerStatus::Ready).await;
            }
            Readiness::TimedOut => {
                warn!(worker_id = %handle.worker_id, waited = ?waited, "Worker readiness timed out");
                self.set_status(handle, WorkerStatus::Failed).await;
            }
            Readiness::Exited(state) => {
                warn!(worker_id = %handle.worker_id, state = %state, "Worker exited during startup");
                self.set_status(handle, WorkerStatus::Failed).await;
            }
        }
        readiness
    }

    async fn check_ready(&self, handle: &WorkerHandle) -> Result<(), String> {
        let logs = self
            .runtime
            .logs(&handle.spec.container_name, self.config.log_tail)
            .await
            .map_err(|e| e.to_string())?;
        if !logs.contains(&self.config.ready_marker) {
            return Err("ready marker not in log".to_string());
        }

        let sink = self.connector.connect(handle);
        match sink.send_command("list").await {
            Ok(reply) if !reply.trim().is_empty() => Ok(()),
            Ok(_) => Err("empty handshake reply".to_string()),
            Err(e) => Err(format!("handshake failed: {}", e)),
        }
    }

    async fn set_status(&self, handle: &mut WorkerHandle, next: WorkerStatus) {
        handle.advance(next);
        if let Some(record) = self.workers.write().await.get_mut(&handle.job_id) {
            record.handle.status = handle.status;
        }
    }

    /// Copy the saved structure `name` out of the job's worker into a
    /// per-job directory under `dest_dir`, retrying while the server
    /// finishes writing it.
    pub async fn extract_artifact(
        &self,
        job_id: &JobId,
        name: &str,
        dest_dir: &Path,
    ) -> Result<Artifact, PipelineError> {
        let container = {
            let workers = self.workers.read().await;
            let record = workers.get(job_id).ok_or_else(|| {
                PipelineError::ArtifactExtraction(format!("no worker registered for job {}", job_id))
            })?;
            record.handle.spec.container_name.clone()
        };

        let job_dir = dest_dir.join(artifact_subdir(job_id));
        tokio::fs::create_dir_all(&job_dir).await.map_err(|e| {
            PipelineError::ArtifactExtraction(format!("cannot create {}: {}", job_dir.display(), e))
        })?;

        let src = format!("{}/{}.nbt", STRUCTURE_DIR, name);
        let dest = job_dir.join(format!("{}.nbt", name));
        let attempts = self.config.save_verify_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.runtime.copy_out(&container, &src, &dest).await {
                Ok(()) => {
                    let bytes = tokio::fs::read(&dest).await.map_err(|e| {
                        PipelineError::ArtifactExtraction(format!(
                            "cannot read {}: {}",
                            dest.display(),
                            e
                        ))
                    })?;
                    let artifact = Artifact {
                        path: dest,
                        sha256: sha256_hex(&bytes),
                        size: bytes.len() as u64,
                    };
                    info!(
                        job_id = %job_id,
                        path = %artifact.path.display(),
                        size = artifact.size,
                        "Extracted structure"
                    );
                    return Ok(artifact);
                }
                Err(e) => {
                    debug!(job_id = %job_id, attempt, error = %e, "Structure file not available yet");
                    last_error = e.to_string();
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.save_verify_interval).await;
            }
        }

        Err(PipelineError::ArtifactExtraction(format!(
            "{} not found after {} attempts: {}",
            src, attempts, last_error
        )))
    }

    /// Stop and remove the job's worker, freeing its ports.
    ///
    /// Returns `false` when no worker is registered for `job_id`, which
    /// makes repeated calls harmless.
    pub async fn teardown(&self, job_id: &JobId) -> bool {
        let Some(mut record) = self.workers.write().await.remove(job_id) else {
            debug!(job_id = %job_id, "No worker to tear down");
            return false;
        };

        let handle = &mut record.handle;
        handle.advance(WorkerStatus::Stopped);

        if let Err(e) = self.runtime.down(&handle.spec).await {
            warn!(worker_id = %handle.worker_id, error = %e, "Failed to stop worker");
        }
        match tokio::fs::remove_file(&handle.spec.compose_file).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %handle.spec.compose_file.display(),
                error = %e,
                "Failed to remove instance definition"
            ),
        }
        self.ports.release(record.slot);

        info!(job_id = %job_id, worker_id = %handle.worker_id, "Worker torn down");
        true
    }

    /// Tear down every registered worker; returns how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let job_ids: Vec<JobId> = self.workers.read().await.keys().cloned().collect();
        let mut stopped = 0;
        for job_id in job_ids {
            if self.teardown(&job_id).await {
                stopped += 1;
            }
        }
        if stopped > 0 {
            info!(stopped, "Stopped all workers");
        }
        stopped
    }

    /// Snapshot of the registry, ordered by port.
    pub async fn live_workers(&self) -> Vec<LiveWorker> {
        let mut live: Vec<LiveWorker> = self
            .workers
            .read()
            .await
            .values()
            .map(|r| LiveWorker {
                job_id: r.handle.job_id.clone(),
                worker_id: r.handle.worker_id.clone(),
                port: r.handle.port,
                control_port: r.handle.control_port,
                status: r.handle.status,
            })
            .collect();
        live.sort_by_key(|w| w.port);
        live
    }

    /// Number of port slots currently claimed.
    pub fn ports_in_use(&self) -> usize {
        self.ports.in_use()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ContainerState;
    use crate::testing::{lifecycle_config, FakeConnector, FakeRuntime};
    use crate::template::DEFAULT_TEMPLATE;

    fn manager(root: &Path, runtime: Arc<FakeRuntime>) -> (WorkerManager, Arc<FakeConnector>) {
        let connector = Arc::new(FakeConnector::new());
        let manager = WorkerManager::new(
            lifecycle_config(root),
            WorkerTemplate::parse(DEFAULT_TEMPLATE).unwrap(),
            runtime,
            connector.clone(),
        );
        (manager, connector)
    }

    #[test]
    fn test_credentials_are_random_and_url_safe() {
        let a = generate_credential();
        let b = generate_credential();
        assert_ne!(a, b);
        assert_eq!(a.len(), 22);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_port_pool_reuses_lowest_slot() {
        let pool = PortPool::new(25565, 3);
        assert_eq!(pool.acquire(), Some((0, 25565, 25566)));
        assert_eq!(pool.acquire(), Some((1, 25567, 25568)));
        pool.release(0);
        assert_eq!(pool.acquire(), Some((0, 25565, 25566)));
        assert_eq!(pool.acquire(), Some((2, 25569, 25570)));
        assert_eq!(pool.acquire(), None);
    }

    #[test]
    fn test_port_pool_never_overflows() {
        let pool = PortPool::new(65534, 4);
        assert_eq!(pool.acquire(), Some((0, 65534, 65535)));
        assert_eq!(pool.acquire(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provision_and_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let (manager, _) = manager(dir.path(), runtime.clone());

        let a = manager.provision(&JobId::new("job-a")).await.unwrap();
        let b = manager.provision(&JobId::new("job-b")).await.unwrap();
        assert_ne!(a.worker_id, b.worker_id);
        assert_ne!(a.credential(), b.credential());
        assert_eq!((a.port, a.control_port), (25565, 25566));
        assert_eq!((b.port, b.control_port), (25567, 25568));
        assert_eq!(a.status(), WorkerStatus::Provisioning);

        let definition = std::fs::read_to_string(&a.spec.compose_file).unwrap();
        assert!(definition.contains(&format!("RCON_PASSWORD: \"{}\"", a.credential())));
        assert!(definition.contains("\"25566:25575\""));
        assert_eq!(manager.live_workers().await.len(), 2);

        assert!(manager.teardown(&a.job_id).await);
        assert!(!manager.teardown(&a.job_id).await);
        assert!(!a.spec.compose_file.exists());
        assert_eq!(runtime.count("down "), 1);

        // Freed slot is handed out again.
        let c = manager.provision(&JobId::new("job-c")).await.unwrap();
        assert_eq!(c.port, 25565);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_job_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager(dir.path(), Arc::new(FakeRuntime::new()));
        let job = JobId::new("job-a");
        manager.provision(&job).await.unwrap();
        let err = manager.provision(&job).await.unwrap_err();
        assert!(matches!(err, PipelineError::Provision(_)));
        assert_eq!(manager.ports_in_use(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_stays_registered_for_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new().failing_up());
        let (manager, _) = manager(dir.path(), runtime.clone());
        let job = JobId::new("job-a");

        let err = manager.provision(&job).await.unwrap_err();
        assert!(matches!(err, PipelineError::Provision(msg) if msg.contains("pull access denied")));

        let live = manager.live_workers().await;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].status, WorkerStatus::Failed);

        assert!(manager.teardown(&job).await);
        assert_eq!(runtime.count("down "), 1);
        assert_eq!(manager.ports_in_use(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_container_that_never_appears() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new().never_appearing());
        let (manager, _) = manager(dir.path(), runtime.clone());

        let started = Instant::now();
        let err = manager.provision(&JobId::new("job-a")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Provision(msg) if msg.contains("did not appear")));
        assert_eq!(runtime.exists_calls(), 10);
        assert_eq!(started.elapsed(), Duration::from_secs(27));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, connector) = manager(dir.path(), Arc::new(FakeRuntime::new()));
        let mut handle = manager.provision(&JobId::new("job-a")).await.unwrap();

        let readiness = manager.wait_ready(&mut handle, Duration::from_secs(60)).await;
        assert!(readiness.is_ready());
        assert_eq!(handle.status(), WorkerStatus::Ready);
        assert_eq!(connector.sink.commands(), vec!["list"]);
        assert_eq!(manager.live_workers().await[0].status, WorkerStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_is_bounded_by_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new().with_logs("Preparing spawn area: 42%\n"));
        let (manager, connector) = manager(dir.path(), runtime);
        let mut handle = manager.provision(&JobId::new("job-a")).await.unwrap();

        let started = Instant::now();
        let timeout = Duration::from_secs(45);
        let readiness = manager.wait_ready(&mut handle, timeout).await;
        assert_eq!(readiness, Readiness::TimedOut);
        assert_eq!(started.elapsed(), timeout);
        assert_eq!(handle.status(), WorkerStatus::Failed);
        // Never got far enough to try the control channel.
        assert!(connector.sink.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_reports_exited_worker() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(
            FakeRuntime::new()
                .with_logs("Failed to start the minecraft server\n")
                .with_state(ContainerState::Exited),
        );
        let (manager, _) = manager(dir.path(), runtime);
        let mut handle = manager.provision(&JobId::new("job-a")).await.unwrap();

        let started = Instant::now();
        let readiness = manager.wait_ready(&mut handle, Duration::from_secs(600)).await;
        assert_eq!(readiness, Readiness::Exited("exited".to_string()));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extract_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let (manager, _) = manager(dir.path(), runtime);
        let job = JobId::new("job-a");
        manager.provision(&job).await.unwrap();

        let dest = dir.path().join("artifacts");
        let artifact = manager.extract_artifact(&job, "tower", &dest).await.unwrap();
        assert_eq!(artifact.path, dest.join(artifact_subdir(&job)).join("tower.nbt"));
        assert_eq!(artifact.size, 19);
        assert_eq!(artifact.sha256, sha256_hex(b"NBT structure bytes"));
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"NBT structure bytes");
    }

    #[test]
    fn test_artifact_subdir_is_per_job() {
        let a = artifact_subdir(&JobId::new("build-request-001"));
        let b = artifact_subdir(&JobId::new("build-request-002"));
        assert!(a.starts_with("build-request-001-"));
        assert_ne!(a, b);
        assert_ne!(
            artifact_subdir(&JobId::new("req a")),
            artifact_subdir(&JobId::new("req_a"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_artifact_is_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new().copying_nothing());
        let (manager, _) = manager(dir.path(), runtime);
        let job = JobId::new("job-a");
        manager.provision(&job).await.unwrap();

        let err = manager
            .extract_artifact(&job, "tower", dir.path())
            .await
            .unwrap_err();
        match err {
            PipelineError::ArtifactExtraction(msg) => assert!(msg.contains("cannot read"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_artifact_gives_up_after_bounded_retries() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new().without_artifact());
        let (manager, _) = manager(dir.path(), runtime.clone());
        let job = JobId::new("job-a");
        manager.provision(&job).await.unwrap();

        let err = manager
            .extract_artifact(&job, "tower", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactExtraction(_)));
        assert_eq!(runtime.copy_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let (manager, _) = manager(dir.path(), runtime.clone());
        for id in ["a", "b", "c"] {
            manager.provision(&JobId::new(id)).await.unwrap();
        }
        assert_eq!(runtime.running(), 3);

        assert_eq!(manager.stop_all().await, 3);
        assert_eq!(runtime.running(), 0);
        assert!(manager.live_workers().await.is_empty());
        assert_eq!(manager.stop_all().await, 0);
    }
}
