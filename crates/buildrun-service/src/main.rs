//! BuildRun service binary.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use buildrun_core::{JobId, JobPayload};
use buildrun_service::{
    dry_run, BuildConfig, BuildService, ComposeRuntime, DispatcherConfig, LifecycleConfig,
    ServiceConfig, SpoolQueue,
};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Builds structures from scripts on short-lived game server workers.
#[derive(Parser, Debug)]
#[command(name = "buildrun", version, about)]
struct Cli {
    /// Default to debug logging (RUST_LOG still applies)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Append logs to this file instead of writing to stderr
    #[arg(long, global = true, env = "BUILDRUN_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume jobs from the queue until interrupted
    Run(RunArgs),
    /// Put a job on the queue
    Submit(SubmitArgs),
    /// Parse and dry-run a build script without a worker
    Check(CheckArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Spool directory acting as the job broker
    #[arg(long, env = "BUILDRUN_QUEUE_DIR", default_value = "queue")]
    queue_dir: PathBuf,

    /// Jobs pulled and run concurrently per cycle
    #[arg(long, env = "BUILDRUN_BATCH_SIZE", default_value_t = 1)]
    batch_size: usize,

    /// First public port handed to workers
    #[arg(long, env = "BUILDRUN_BASE_PORT", default_value_t = 25565)]
    base_port: u16,

    /// Maximum simultaneously provisioned workers
    #[arg(long, env = "BUILDRUN_MAX_WORKERS", default_value_t = 16)]
    max_workers: usize,

    /// Host the worker ports are published on
    #[arg(long, env = "BUILDRUN_WORKER_HOST", default_value = "127.0.0.1")]
    worker_host: String,

    /// How long a worker may take to become ready
    #[arg(long, env = "BUILDRUN_READY_TIMEOUT_SECS", default_value_t = 600)]
    ready_timeout_secs: u64,

    /// Minimum spacing between two commands sent to one worker
    #[arg(long, env = "BUILDRUN_COMMAND_DELAY_MS", default_value_t = 1000)]
    command_delay_ms: u64,

    /// Game server version run by workers
    #[arg(long, env = "BUILDRUN_SERVER_VERSION", default_value = "1.20.4")]
    server_version: String,

    /// Worker container image
    #[arg(long, env = "BUILDRUN_IMAGE", default_value = "itzg/minecraft-server:latest")]
    image: String,

    /// Where extracted structure files are written
    #[arg(long, env = "BUILDRUN_ARTIFACT_DIR", default_value = "artifacts")]
    artifact_dir: PathBuf,

    /// Where worker instance definitions are rendered
    #[arg(long, env = "BUILDRUN_WORK_DIR", default_value = "workers")]
    work_dir: PathBuf,

    /// Instance definition template (built-in when omitted)
    #[arg(long, env = "BUILDRUN_TEMPLATE")]
    template: Option<PathBuf>,

    /// Compose invocation
    #[arg(long, env = "BUILDRUN_COMPOSE_BIN", default_value = "docker compose")]
    compose_bin: String,

    #[arg(long, env = "BUILDRUN_DOCKER_BIN", default_value = "docker")]
    docker_bin: String,

    /// Pause after a cycle that found no jobs
    #[arg(long, env = "BUILDRUN_IDLE_INTERVAL_SECS", default_value_t = 5)]
    idle_interval_secs: u64,

    /// Bound on each queue pull
    #[arg(long, env = "BUILDRUN_DEQUEUE_TIMEOUT_MS", default_value_t = 1000)]
    dequeue_timeout_ms: u64,

    /// Half-width of the area cleared before each build
    #[arg(long, env = "BUILDRUN_BUILD_AREA_SIZE", default_value_t = 50)]
    build_area_size: u32,
}

impl RunArgs {
    fn into_config(self) -> ServiceConfig {
        let defaults = ServiceConfig::default();
        ServiceConfig {
            batch_size: self.batch_size,
            idle_interval: Duration::from_secs(self.idle_interval_secs),
            dequeue_timeout: Duration::from_millis(self.dequeue_timeout_ms),
            lifecycle: LifecycleConfig {
                host: self.worker_host,
                base_port: self.base_port,
                max_workers: self.max_workers,
                image: self.image,
                server_version: self.server_version,
                work_dir: self.work_dir,
                artifact_dir: self.artifact_dir,
                template: self.template,
                ready_timeout: Duration::from_secs(self.ready_timeout_secs),
                ..defaults.lifecycle
            },
            dispatcher: DispatcherConfig {
                delay: Duration::from_millis(self.command_delay_ms),
                ..defaults.dispatcher
            },
            build: BuildConfig {
                area_size: self.build_area_size,
                ..defaults.build
            },
            ..defaults
        }
    }
}

#[derive(Args, Debug)]
struct SubmitArgs {
    #[arg(long, env = "BUILDRUN_QUEUE_DIR", default_value = "queue")]
    queue_dir: PathBuf,

    /// Build script file
    #[arg(long)]
    script: PathBuf,

    /// Metadata entry, repeatable
    #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    meta: Vec<(String, String)>,

    /// Job id (random when omitted)
    #[arg(long)]
    id: Option<String>,
}

#[derive(Args, Debug)]
struct CheckArgs {
    /// Build script file
    #[arg(long)]
    script: PathBuf,

    /// Include every command in the output
    #[arg(long)]
    commands: bool,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{}`", s))?;
    if key.is_empty() {
        return Err(format!("empty key in `{}`", s));
    }
    Ok((key.to_string(), value.to_string()))
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let directive = if verbose { "buildrun=debug" } else { "buildrun=info" };
    let filter = EnvFilter::from_default_env().add_directive(directive.parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_file.as_deref())?;

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Submit(args) => submit(args).await,
        Command::Check(args) => check(args).await,
    }
}

async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let queue = SpoolQueue::open(&args.queue_dir).await?;
    queue.recover_claimed().await?;
    let runtime = Arc::new(ComposeRuntime::new(&args.compose_bin, args.docker_bin.clone()));
    let config = args.into_config();

    info!(
        queue = %queue.root().display(),
        batch_size = config.batch_size,
        base_port = config.lifecycle.base_port,
        image = %config.lifecycle.image,
        version = %config.lifecycle.server_version,
        "Starting BuildRun"
    );

    let service = BuildService::from_config(config, Arc::new(queue), runtime).await?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received");
                signal.cancel();
            }
            Err(e) => error!(error = %e, "Cannot listen for interrupts"),
        }
    });

    service.run(shutdown).await;
    Ok(())
}

async fn submit(args: SubmitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let script = tokio::fs::read_to_string(&args.script).await?;
    let mut payload = JobPayload::new(script);
    for (key, value) in args.meta {
        payload = payload.with_metadata(key, value);
    }
    let id = args
        .id
        .unwrap_or_else(|| JobId::generate().into_inner());

    let queue = SpoolQueue::open(&args.queue_dir).await?;
    let path = queue.submit(&id, &payload).await?;
    println!("{}", json!({ "job_id": id, "path": path }));
    Ok(())
}

async fn check(args: CheckArgs) -> Result<(), Box<dyn std::error::Error>> {
    let source = tokio::fs::read_to_string(&args.script).await?;
    let limits = ServiceConfig::default().build.limits;
    let plan = dry_run(&source, &limits)?;

    let mut summary = BTreeMap::new();
    summary.insert("primitives", json!(plan.stats.primitives));
    summary.insert("steps", json!(plan.stats.steps));
    summary.insert("dimensions", json!(plan.dimensions));
    summary.insert("region", json!(plan.region));
    if args.commands {
        summary.insert("commands", json!(plan.commands));
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_shape() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args_into_config() {
        let cli = Cli::parse_from([
            "buildrun",
            "run",
            "--batch-size",
            "3",
            "--ready-timeout-secs",
            "120",
            "--command-delay-ms",
            "250",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let config = args.into_config();
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.lifecycle.ready_timeout, Duration::from_secs(120));
        assert_eq!(config.dispatcher.delay, Duration::from_millis(250));
        assert_eq!(config.dispatcher.max_consecutive_failures, 5);
        assert_eq!(config.lifecycle.log_tail, 50);
    }

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("name=Simple House").unwrap(),
            ("name".to_string(), "Simple House".to_string())
        );
        assert_eq!(parse_key_val("k=a=b").unwrap().1, "a=b");
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }
}
