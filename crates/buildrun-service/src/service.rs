//! The long-running service loop.

use std::sync::Arc;
use std::time::Duration;

use buildrun_core::JobId;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServiceConfig;
use crate::control::RconConnector;
use crate::error::{PipelineError, QueueError};
use crate::executor::BuildExecutor;
use crate::lifecycle::WorkerManager;
use crate::pipeline::{BatchRunner, JobPipeline};
use crate::queue::{dequeue_batch, JobQueue, QueuedMessage};
use crate::runtime::ContainerRuntime;
use crate::template::WorkerTemplate;

/// Pulls batches off a queue and runs them until shut down.
pub struct BuildService {
    config: ServiceConfig,
    queue: Arc<dyn JobQueue>,
    runner: BatchRunner,
}

impl BuildService {
    pub fn new(config: ServiceConfig, queue: Arc<dyn JobQueue>, runner: BatchRunner) -> Self {
        Self {
            config,
            queue,
            runner,
        }
    }

    /// Wire a service to `runtime` with RCON control channels.
    pub async fn from_config(
        config: ServiceConfig,
        queue: Arc<dyn JobQueue>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self, PipelineError> {
        let lifecycle = &config.lifecycle;
        let template = WorkerTemplate::load(lifecycle.template.as_deref()).await?;
        let connector = Arc::new(RconConnector::new(
            lifecycle.control_connect_timeout,
            lifecycle.control_command_timeout,
        ));
        let manager = Arc::new(WorkerManager::new(
            lifecycle.clone(),
            template,
            runtime,
            connector,
        ));
        let executor = BuildExecutor::new(
            config.build.clone(),
            config.dispatcher.clone(),
            lifecycle.control_command_timeout,
        );
        let runner = BatchRunner::new(Arc::new(JobPipeline::new(manager, executor)));
        Ok(Self::new(config, queue, runner))
    }

    pub fn manager(&self) -> &Arc<WorkerManager> {
        self.runner.pipeline().manager()
    }

    /// Dequeue one batch, run it and acknowledge every message.
    ///
    /// Returns the number of jobs run.
    pub async fn run_once(&self) -> Result<usize, QueueError> {
        let batch = dequeue_batch(
            self.queue.as_ref(),
            self.config.batch_size.max(1),
            self.config.dequeue_timeout,
        )
        .await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.len();
        info!(jobs = count, "Running batch");
        let mut unacked: Vec<Option<(JobId, QueuedMessage)>> = Vec::with_capacity(count);
        let mut jobs = Vec::with_capacity(count);
        for item in batch {
            unacked.push(Some((item.job.job_id.clone(), item.message)));
            jobs.push(item.job);
        }

        for result in self.runner.run_batch(jobs).await {
            let slot = unacked
                .iter_mut()
                .find(|slot| matches!(slot, Some((id, _)) if *id == result.job_id));
            let Some((_, message)) = slot.and_then(Option::take) else {
                warn!(job_id = %result.job_id, "Result without a pending message");
                continue;
            };
            if let Err(e) = self.queue.complete(&message, &result).await {
                error!(job_id = %result.job_id, error = %e, "Failed to acknowledge job");
            }
        }
        Ok(count)
    }

    /// Loop until `shutdown` fires, then tear down every remaining worker.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            batch_size = self.config.batch_size,
            "Build service started"
        );

        loop {
            let pause = tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = self.run_once() => match outcome {
                    Ok(0) => self.config.idle_interval,
                    Ok(jobs) => {
                        debug!(jobs, "Batch complete");
                        Duration::ZERO
                    }
                    Err(e) => {
                        error!(error = %e, "Batch cycle failed");
                        self.config.error_backoff
                    }
                },
            };
            if !pause.is_zero() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        info!("Shutting down, stopping workers");
        let stopped = self.manager().stop_all().await;
        info!(stopped, "Build service stopped");
    }
}
