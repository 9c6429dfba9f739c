//! Service configuration.
//!
//! Plain structs with defaults; the binary maps its CLI/env options onto
//! these so library users and tests never touch argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use buildrun_script::Limits;

use crate::retry::Backoff;

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Maximum jobs pulled and run concurrently per cycle.
    pub batch_size: usize,

    /// Pause after a cycle that found no jobs.
    pub idle_interval: Duration,

    /// Pause after a cycle that failed.
    pub error_backoff: Duration,

    /// Bound on each individual queue pull.
    pub dequeue_timeout: Duration,

    pub lifecycle: LifecycleConfig,
    pub dispatcher: DispatcherConfig,
    pub build: BuildConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            idle_interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(5),
            dequeue_timeout: Duration::from_secs(1),
            lifecycle: LifecycleConfig::default(),
            dispatcher: DispatcherConfig::default(),
            build: BuildConfig::default(),
        }
    }
}

/// Worker provisioning and readiness settings.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Host the worker ports are published on.
    pub host: String,

    /// First public port; slot `s` uses `base_port + 2s` and `base_port + 2s + 1`.
    pub base_port: u16,

    /// Maximum simultaneously provisioned workers.
    pub max_workers: usize,

    /// Worker container image.
    pub image: String,

    /// Game server version handed to the image.
    pub server_version: String,

    /// Where rendered instance definitions are written.
    pub work_dir: PathBuf,

    /// Where extracted structure files are stored.
    pub artifact_dir: PathBuf,

    /// Instance definition template; the built-in one when `None`.
    pub template: Option<PathBuf>,

    /// Overall readiness budget per worker.
    pub ready_timeout: Duration,

    /// Delay schedule between readiness checks.
    pub ready_backoff: Backoff,

    /// Log line fragment printed by a started server.
    pub ready_marker: String,

    /// How many log lines are inspected for the ready marker.
    pub log_tail: usize,

    pub exists_poll_interval: Duration,
    pub exists_poll_attempts: u32,

    /// Bounded wait for the saved structure file to appear.
    pub save_verify_attempts: u32,
    pub save_verify_interval: Duration,

    pub control_connect_timeout: Duration,
    pub control_command_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            base_port: 25565,
            max_workers: 16,
            image: "itzg/minecraft-server:latest".to_string(),
            server_version: "1.20.4".to_string(),
            work_dir: PathBuf::from("workers"),
            artifact_dir: PathBuf::from("artifacts"),
            template: None,
            ready_timeout: Duration::from_secs(600),
            ready_backoff: Backoff::new(Duration::from_secs(10), 1.5, Duration::from_secs(30)),
            ready_marker: "Done".to_string(),
            log_tail: 50,
            exists_poll_interval: Duration::from_secs(3),
            exists_poll_attempts: 10,
            save_verify_attempts: 30,
            save_verify_interval: Duration::from_secs(2),
            control_connect_timeout: Duration::from_secs(5),
            control_command_timeout: Duration::from_secs(5),
        }
    }
}

/// Per-worker command throttling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Minimum spacing between two dispatched commands.
    pub delay: Duration,

    /// Consecutive transport failures after which the worker is considered lost.
    pub max_consecutive_failures: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(1000),
            max_consecutive_failures: 5,
        }
    }
}

/// Build execution settings.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Half-width of the cleared build area around the origin.
    pub area_size: u32,

    /// Spacing between build-area preparation commands.
    pub prepare_spacing: Duration,

    /// Attempts for the build-area preparation sequence.
    pub prepare_attempts: u32,
    pub prepare_backoff: Backoff,

    /// Poll interval while waiting for the dispatcher to drain.
    pub drain_poll: Duration,

    /// Fixed slack added to the expected drain time.
    pub drain_slack: Duration,

    pub limits: Limits,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            area_size: 50,
            prepare_spacing: Duration::from_millis(100),
            prepare_attempts: 3,
            prepare_backoff: Backoff::new(Duration::from_secs(2), 2.0, Duration::from_secs(10)),
            drain_poll: Duration::from_millis(100),
            drain_slack: Duration::from_secs(60),
            limits: Limits::default(),
        }
    }
}
