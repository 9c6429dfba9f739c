//! In-memory fakes for the runtime and control-channel seams.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use buildrun_rcon::{CommandSink, RconError};

use crate::config::{BuildConfig, DispatcherConfig, LifecycleConfig};
use crate::control::ControlConnector;
use crate::executor::BuildExecutor;
use crate::lifecycle::{WorkerHandle, WorkerManager};
use crate::pipeline::JobPipeline;
use crate::retry::Backoff;
use crate::runtime::{ContainerRuntime, ContainerState, RuntimeError, WorkerSpec};
use crate::template::{WorkerTemplate, DEFAULT_TEMPLATE};

pub(crate) const READY_LOGS: &str =
    "[Server thread/INFO]: Done (3.481s)! For help, type \"help\"\n";

/// Lifecycle settings with short, deterministic intervals.
pub(crate) fn lifecycle_config(root: &Path) -> LifecycleConfig {
    LifecycleConfig {
        max_workers: 4,
        work_dir: root.join("workers"),
        artifact_dir: root.join("artifacts"),
        ready_timeout: Duration::from_secs(60),
        ready_backoff: Backoff::new(Duration::from_secs(10), 1.5, Duration::from_secs(30)),
        exists_poll_interval: Duration::from_secs(3),
        exists_poll_attempts: 10,
        save_verify_attempts: 3,
        save_verify_interval: Duration::from_secs(1),
        ..LifecycleConfig::default()
    }
}

struct RuntimeState {
    events: Vec<String>,
    containers: HashMap<String, ContainerState>,
    fail_up: bool,
    never_appear: bool,
    state_after_up: ContainerState,
    logs: String,
    artifact: Option<Vec<u8>>,
    copy_writes: bool,
    exists_calls: usize,
    copy_calls: usize,
}

/// A container runtime that only keeps books.
pub(crate) struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(RuntimeState {
                events: Vec::new(),
                containers: HashMap::new(),
                fail_up: false,
                never_appear: false,
                state_after_up: ContainerState::Running,
                logs: READY_LOGS.to_string(),
                artifact: Some(b"NBT structure bytes".to_vec()),
                copy_writes: true,
                exists_calls: 0,
                copy_calls: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn failing_up(self) -> Self {
        self.lock().fail_up = true;
        self
    }

    pub(crate) fn never_appearing(self) -> Self {
        self.lock().never_appear = true;
        self
    }

    pub(crate) fn with_logs(self, logs: &str) -> Self {
        self.lock().logs = logs.to_string();
        self
    }

    pub(crate) fn with_state(self, state: ContainerState) -> Self {
        self.lock().state_after_up = state;
        self
    }

    pub(crate) fn without_artifact(self) -> Self {
        self.lock().artifact = None;
        self
    }

    /// `copy_out` reports success but leaves nothing at the destination.
    pub(crate) fn copying_nothing(self) -> Self {
        self.lock().copy_writes = false;
        self
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    pub(crate) fn exists_calls(&self) -> usize {
        self.lock().exists_calls
    }

    pub(crate) fn copy_calls(&self) -> usize {
        self.lock().copy_calls
    }

    pub(crate) fn running(&self) -> usize {
        self.lock().containers.len()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn up(&self, spec: &WorkerSpec) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.events.push(format!("up {}", spec.project));
        if state.fail_up {
            return Err(RuntimeError::Failed {
                command: "compose up".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "pull access denied".to_string(),
            });
        }
        if !state.never_appear {
            let initial = state.state_after_up.clone();
            state.containers.insert(spec.container_name.clone(), initial);
        }
        Ok(())
    }

    async fn down(&self, spec: &WorkerSpec) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.events.push(format!("down {}", spec.project));
        state.containers.remove(&spec.container_name);
        Ok(())
    }

    async fn status(&self, container: &str) -> Result<ContainerState, RuntimeError> {
        Ok(self
            .lock()
            .containers
            .get(container)
            .cloned()
            .unwrap_or(ContainerState::Missing))
    }

    async fn exists(&self, container: &str) -> Result<bool, RuntimeError> {
        let mut state = self.lock();
        state.exists_calls += 1;
        Ok(state.containers.contains_key(container))
    }

    async fn logs(&self, container: &str, _tail: usize) -> Result<String, RuntimeError> {
        let state = self.lock();
        if state.containers.contains_key(container) {
            Ok(state.logs.clone())
        } else {
            Err(RuntimeError::NotFound(container.to_string()))
        }
    }

    async fn copy_out(&self, container: &str, src: &str, dest: &Path) -> Result<(), RuntimeError> {
        let bytes = {
            let mut state = self.lock();
            state.copy_calls += 1;
            match (&state.artifact, state.containers.contains_key(container)) {
                (Some(_), true) if !state.copy_writes => return Ok(()),
                (Some(bytes), true) => bytes.clone(),
                _ => {
                    return Err(RuntimeError::Failed {
                        command: format!("docker cp {}:{}", container, src),
                        status: "exit status: 1".to_string(),
                        stderr: format!("Could not find the file {} in container", src),
                    })
                }
            }
        };
        std::fs::write(dest, bytes).map_err(|source| RuntimeError::Spawn {
            program: "write".to_string(),
            source,
        })
    }
}

type FailRule = Box<dyn Fn(&str) -> Option<RconError> + Send + Sync>;

/// Records every command; answers `list` like a live server.
pub(crate) struct FakeSink {
    commands: Mutex<Vec<String>>,
    fail: Mutex<Option<FailRule>>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeSink {
    pub(crate) fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    pub(crate) fn with_latency(latency: Duration) -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            fail: Mutex::new(None),
            latency,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Fail every command for which `rule` returns an error.
    pub(crate) fn fail_when(&self, rule: impl Fn(&str) -> Option<RconError> + Send + Sync + 'static) {
        *self.fail.lock().unwrap() = Some(Box::new(rule));
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandSink for FakeSink {
    async fn send_command(&self, command: &str) -> Result<String, RconError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(rule) = self.fail.lock().unwrap().as_ref() {
            if let Some(err) = rule(command) {
                return Err(err);
            }
        }
        self.commands.lock().unwrap().push(command.to_string());
        if command == "list" {
            Ok("There are 0 of a max of 20 players online: ".to_string())
        } else {
            Ok(String::new())
        }
    }
}

/// Hands out one shared [`FakeSink`] for every worker.
pub(crate) struct FakeConnector {
    pub(crate) sink: Arc<FakeSink>,
}

impl FakeConnector {
    pub(crate) fn new() -> Self {
        Self {
            sink: Arc::new(FakeSink::new()),
        }
    }
}

impl ControlConnector for FakeConnector {
    fn connect(&self, _worker: &WorkerHandle) -> Arc<dyn CommandSink> {
        self.sink.clone()
    }
}

/// A pipeline over `runtime` and a fresh [`FakeConnector`], with a short
/// dispatch delay.
pub(crate) fn fake_pipeline(
    root: &Path,
    runtime: Arc<FakeRuntime>,
) -> (Arc<JobPipeline>, Arc<FakeConnector>) {
    let connector = Arc::new(FakeConnector::new());
    let manager = Arc::new(WorkerManager::new(
        lifecycle_config(root),
        WorkerTemplate::parse(DEFAULT_TEMPLATE).unwrap(),
        runtime,
        connector.clone(),
    ));
    let executor = BuildExecutor::new(
        BuildConfig::default(),
        DispatcherConfig {
            delay: Duration::from_millis(10),
            max_consecutive_failures: 3,
        },
        Duration::from_secs(5),
    );
    (Arc::new(JobPipeline::new(manager, executor)), connector)
}
