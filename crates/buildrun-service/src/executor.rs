//! Build execution on a ready worker.
//!
//! The executor clears the build area, runs the job's script against a
//! [`BuildContext`] that turns primitives into dispatched commands, waits
//! for the backlog to drain and finally saves the tracked region as a
//! structure.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use buildrun_core::{
    structure_save_command, BoundingRegion, CoordinateTracker, Dimensions, Fill, Job, Place,
};
use buildrun_rcon::CommandSink;
use buildrun_script::{Host, Limits, RunStats, Script, ScriptError};
use tracing::{debug, info, warn};

use crate::config::{BuildConfig, DispatcherConfig};
use crate::dispatcher::{DispatchStats, Dispatcher, Faulted};
use crate::error::PipelineError;
use crate::retry::RetryPolicy;

/// Administrative commands that reset the area around the origin.
///
/// Every command is idempotent, so the whole sequence can be retried.
pub fn prepare_area_commands(size: u32) -> Vec<String> {
    vec![
        format!("fill ~-{s} ~-1 ~-{s} ~{s} ~50 ~{s} air", s = size),
        format!("fill ~-{s} ~-1 ~-{s} ~{s} ~-1 ~{s} smooth_stone", s = size),
        format!("fill ~-{s} ~-1 ~0 ~{s} ~-1 ~0 gray_concrete", s = size),
        format!("fill ~0 ~-1 ~-{s} ~0 ~-1 ~{s} gray_concrete", s = size),
        format!("setblock ~{s} ~0 ~{s} red_concrete", s = size),
        format!("setblock ~-{s} ~0 ~{s} blue_concrete", s = size),
        format!("setblock ~{s} ~0 ~-{s} green_concrete", s = size),
        format!("setblock ~-{s} ~0 ~-{s} yellow_concrete", s = size),
        "time set day".to_string(),
        "weather clear".to_string(),
        "gamerule doWeatherCycle false".to_string(),
        "gamerule doDaylightCycle false".to_string(),
    ]
}

/// Script host that dispatches every primitive to one worker.
pub struct BuildContext {
    dispatcher: Dispatcher,
    tracker: CoordinateTracker,
}

impl BuildContext {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            tracker: CoordinateTracker::new(),
        }
    }

    pub fn tracker(&self) -> &CoordinateTracker {
        &self.tracker
    }
}

impl Host for BuildContext {
    type Error = Faulted;

    fn place(&mut self, place: Place) -> Result<(), Faulted> {
        self.dispatcher.submit(place.to_command())?;
        self.tracker.track_point(place.pos);
        Ok(())
    }

    fn fill(&mut self, fill: Fill) -> Result<(), Faulted> {
        self.dispatcher.submit(fill.to_command())?;
        for corner in fill.region().corners() {
            self.tracker.track_point(corner);
        }
        Ok(())
    }
}

/// Script host that only records, for offline checks.
#[derive(Debug, Default)]
pub struct PlanRecorder {
    pub commands: Vec<String>,
    pub tracker: CoordinateTracker,
}

impl Host for PlanRecorder {
    type Error = Infallible;

    fn place(&mut self, place: Place) -> Result<(), Infallible> {
        self.commands.push(place.to_command());
        self.tracker.track_point(place.pos);
        Ok(())
    }

    fn fill(&mut self, fill: Fill) -> Result<(), Infallible> {
        self.commands.push(fill.to_command());
        for corner in fill.region().corners() {
            self.tracker.track_point(corner);
        }
        Ok(())
    }
}

/// Result of a dry run.
#[derive(Debug)]
pub struct Plan {
    pub commands: Vec<String>,
    pub region: Option<BoundingRegion>,
    pub dimensions: Option<Dimensions>,
    pub stats: RunStats,
}

/// Parse and run `source` without a worker, collecting the commands it
/// would dispatch.
pub fn dry_run(source: &str, limits: &Limits) -> Result<Plan, ScriptError> {
    let script = Script::parse(source)?;
    let mut recorder = PlanRecorder::default();
    let stats = script.run(&mut recorder, limits)?;
    Ok(Plan {
        region: recorder.tracker.bounding_region(),
        dimensions: recorder.tracker.dimensions(),
        commands: recorder.commands,
        stats,
    })
}

/// What a build left behind on its worker.
#[derive(Debug)]
pub struct BuildOutcome {
    pub structure_name: String,
    pub region: Option<BoundingRegion>,
    pub dimensions: Option<Dimensions>,
    /// The structure save command was delivered.
    pub saved: bool,
    pub primitives: u64,
    pub dispatch: DispatchStats,
    /// First error that ended or spoiled the build.
    pub error: Option<PipelineError>,
}

impl BuildOutcome {
    fn failed(structure_name: String, error: PipelineError) -> Self {
        Self {
            structure_name,
            region: None,
            dimensions: None,
            saved: false,
            primitives: 0,
            dispatch: DispatchStats::default(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.saved
    }
}

/// Runs builds against a worker's control channel.
#[derive(Debug, Clone)]
pub struct BuildExecutor {
    build: BuildConfig,
    dispatcher: DispatcherConfig,
    command_timeout: Duration,
}

impl BuildExecutor {
    pub fn new(build: BuildConfig, dispatcher: DispatcherConfig, command_timeout: Duration) -> Self {
        Self {
            build,
            dispatcher,
            command_timeout,
        }
    }

    /// Clear and flatten the build area, retrying transient control errors.
    pub async fn prepare_area(&self, sink: &dyn CommandSink) -> Result<(), PipelineError> {
        let commands = prepare_area_commands(self.build.area_size);
        let policy = RetryPolicy::new(self.build.prepare_attempts, self.build.prepare_backoff.clone());
        let mut attempt = 1;
        loop {
            match sink.send_batch(&commands, self.build.prepare_spacing).await {
                Ok(replies) => {
                    for (command, reply) in commands.iter().zip(&replies) {
                        debug!(command = %command, reply = %reply.trim(), "Prepared");
                    }
                    return Ok(());
                }
                Err(e) if e.is_transient() && policy.should_retry(attempt) => {
                    let delay = policy.backoff.delay(attempt - 1);
                    warn!(attempt, error = %e, delay = ?delay, "Build area preparation failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Run `job`'s script on the worker behind `sink` and save the result.
    ///
    /// Never fails outright: errors are carried in [`BuildOutcome::error`]
    /// next to whatever was tracked before them, so the caller can still
    /// report dimensions and tear the worker down.
    pub async fn execute(&self, sink: Arc<dyn CommandSink>, job: &Job) -> BuildOutcome {
        let structure_name = job.structure_name();
        let script = match Script::parse(&job.script) {
            Ok(script) => script,
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "Build script rejected");
                return BuildOutcome::failed(structure_name, e.into());
            }
        };

        let dispatcher = Dispatcher::new(sink, self.dispatcher.clone());
        let mut context = BuildContext::new(dispatcher.clone());
        let limits = self.build.limits.clone();

        // The interpreter is synchronous; keep it off the async workers.
        let joined = tokio::task::spawn_blocking(move || {
            let run = script.run(&mut context, &limits);
            (context, run)
        })
        .await;
        let (context, run) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                return BuildOutcome::failed(
                    structure_name,
                    PipelineError::Task(format!("script task failed: {}", e)),
                )
            }
        };

        let mut error = None;
        let mut primitives = 0;
        match run {
            Ok(stats) => {
                primitives = stats.primitives;
                debug!(job_id = %job.job_id, steps = stats.steps, primitives, "Script finished");
            }
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "Build script aborted");
                error = Some(PipelineError::from(e));
            }
        }

        if !self.drain(&dispatcher).await {
            error.get_or_insert(PipelineError::DrainTimeout(self.drain_budget(&dispatcher)));
        }
        if let Some(fault) = dispatcher.fault() {
            error.get_or_insert(PipelineError::ControlLost(fault));
        }

        let region = context.tracker().bounding_region();
        let dimensions = context.tracker().dimensions();
        let mut saved = false;

        match region {
            None => {
                error.get_or_insert(PipelineError::EmptyBuild);
            }
            Some(region) if !dispatcher.is_faulted() => {
                saved = self.save(&dispatcher, &structure_name, &region).await;
                if !saved {
                    error.get_or_insert(PipelineError::Control(
                        buildrun_rcon::RconError::Protocol(format!(
                            "structure save for {} was not delivered",
                            structure_name
                        )),
                    ));
                }
            }
            Some(_) => {}
        }

        let dispatch = dispatcher.stats();
        info!(
            job_id = %job.job_id,
            structure = %structure_name,
            dimensions = ?dimensions,
            dispatched = dispatch.dispatched,
            failed = dispatch.failed,
            saved,
            "Build finished"
        );

        BuildOutcome {
            structure_name,
            region,
            dimensions,
            saved,
            primitives,
            dispatch,
            error,
        }
    }

    async fn save(&self, dispatcher: &Dispatcher, name: &str, region: &BoundingRegion) -> bool {
        let failed_before = dispatcher.stats().failed;
        if dispatcher.submit(structure_save_command(name, region)).is_err() {
            return false;
        }
        self.drain(dispatcher).await && dispatcher.stats().failed == failed_before
    }

    async fn drain(&self, dispatcher: &Dispatcher) -> bool {
        let budget = self.drain_budget(dispatcher);
        dispatcher.wait_drained(self.build.drain_poll, budget).await
    }

    /// Slack plus one delay and one command timeout per outstanding command.
    fn drain_budget(&self, dispatcher: &Dispatcher) -> Duration {
        let pending = u32::try_from(dispatcher.stats().pending()).unwrap_or(u32::MAX);
        let per_command = self.dispatcher.delay + self.command_timeout;
        self.build
            .drain_slack
            .saturating_add(per_command.saturating_mul(pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Backoff;
    use crate::testing::FakeSink;
    use buildrun_core::Point3;
    use buildrun_rcon::RconError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor() -> BuildExecutor {
        BuildExecutor::new(
            BuildConfig {
                prepare_backoff: Backoff::fixed(Duration::from_secs(1)),
                ..BuildConfig::default()
            },
            DispatcherConfig {
                delay: Duration::from_millis(100),
                max_consecutive_failures: 3,
            },
            Duration::from_secs(5),
        )
    }

    fn job(script: &str) -> Job {
        Job::new("3f2a91bc-0000", script)
    }

    #[test]
    fn test_prepare_area_commands() {
        let commands = prepare_area_commands(50);
        assert_eq!(commands.len(), 12);
        assert_eq!(commands[0], "fill ~-50 ~-1 ~-50 ~50 ~50 ~50 air");
        assert_eq!(commands[1], "fill ~-50 ~-1 ~-50 ~50 ~-1 ~50 smooth_stone");
        assert_eq!(commands[4], "setblock ~50 ~0 ~50 red_concrete");
        assert_eq!(commands[11], "gamerule doDaylightCycle false");
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_area_retries_transient_errors() {
        let sink = FakeSink::new();
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        sink.fail_when(move |cmd| {
            (cmd.ends_with(" air") && seen.fetch_add(1, Ordering::SeqCst) == 0)
                .then(|| RconError::Timeout("command reply"))
        });

        executor().prepare_area(&sink).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(sink.commands().len(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_area_gives_up_on_auth_failure() {
        let sink = FakeSink::new();
        sink.fail_when(|_| Some(RconError::AuthFailure));
        let err = executor().prepare_area(&sink).await.unwrap_err();
        assert!(matches!(err, PipelineError::Control(RconError::AuthFailure)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_dispatches_and_saves() {
        let sink = Arc::new(FakeSink::new());
        let script = r#"
            fill(0, 0, 0, 4, 0, 4, "stone");
            place(2, 3, 2, "glowstone");
        "#;
        let outcome = executor().execute(sink.clone(), &job(script)).await;

        assert!(outcome.is_success(), "{:?}", outcome.error);
        assert_eq!(outcome.structure_name, "structure_3f2a91bc-0000");
        assert_eq!(
            outcome.dimensions,
            Some(Dimensions {
                width: 5,
                height: 4,
                depth: 5
            })
        );
        assert_eq!(outcome.primitives, 2);
        assert_eq!(
            sink.commands(),
            vec![
                "fill 0 0 0 4 0 4 minecraft:stone",
                "setblock 2 3 2 minecraft:glowstone",
                "structure save structure_3f2a91bc-0000 0 0 0 4 3 4",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_mode_aborts_without_dispatching() {
        let sink = Arc::new(FakeSink::new());
        let script = r#"place(0, 0, 0, "stone", {mode: "teleport"});"#;
        let outcome = executor().execute(sink.clone(), &job(script)).await;

        match outcome.error {
            Some(PipelineError::Script(e)) => assert!(e.is_invalid_argument()),
            other => panic!("unexpected {:?}", other),
        }
        assert!(sink.commands().is_empty());
        assert_eq!(outcome.dimensions, None);
        assert!(!outcome.saved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_script_error_after_blocks_still_saves() {
        let sink = Arc::new(FakeSink::new());
        let script = r#"
            place(1, 1, 1, "stone");
            fill(0, 0, 0, 2, 2, 2, "stone", {mode: "sideways"});
        "#;
        let outcome = executor().execute(sink.clone(), &job(script)).await;

        assert!(matches!(outcome.error, Some(PipelineError::Script(_))));
        assert!(outcome.saved);
        assert_eq!(
            outcome.dimensions,
            Some(Dimensions {
                width: 1,
                height: 1,
                depth: 1
            })
        );
        assert_eq!(sink.commands().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_build() {
        let sink = Arc::new(FakeSink::new());
        let outcome = executor().execute(sink.clone(), &job("let x = 1;")).await;
        assert!(matches!(outcome.error, Some(PipelineError::EmptyBuild)));
        assert!(sink.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_syntax_error() {
        let sink = Arc::new(FakeSink::new());
        let outcome = executor().execute(sink, &job("place(0, 0")).await;
        assert!(matches!(
            outcome.error,
            Some(PipelineError::Script(ScriptError::Syntax { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_channel_aborts_script() {
        let sink = Arc::new(FakeSink::new());
        sink.fail_when(|_| Some(RconError::ConnectionRefused("127.0.0.1:25566".to_string())));
        let script = r#"
            for i in range(0, 1000) {
                place(i, 0, 0, "stone");
            }
        "#;
        let outcome = executor().execute(sink, &job(script)).await;

        assert!(outcome.error.is_some());
        assert!(!outcome.saved);
        assert!(outcome.dispatch.dispatched == 0);
    }

    #[test]
    fn test_dry_run() {
        let plan = dry_run(
            r#"
            for y in range(0, 3) {
                place(0, y, 0, "oak_log", {states: {axis: "y"}});
            }
            "#,
            &Limits::default(),
        )
        .unwrap();
        assert_eq!(plan.commands.len(), 3);
        assert_eq!(plan.commands[0], "setblock 0 0 0 minecraft:oak_log[axis=y]");
        assert_eq!(
            plan.region,
            Some(BoundingRegion::from_corners(Point3::new(0, 0, 0), Point3::new(0, 2, 0)))
        );
        assert_eq!(plan.stats.primitives, 3);
    }
}
