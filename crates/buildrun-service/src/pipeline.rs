//! One job, start to finish, and batches of them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use buildrun_core::{Job, JobResult, JobStatus};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::executor::BuildExecutor;
use crate::lifecycle::{Readiness, WorkerManager};

/// Provision, build, extract, tear down.
pub struct JobPipeline {
    manager: Arc<WorkerManager>,
    executor: BuildExecutor,
}

impl JobPipeline {
    pub fn new(manager: Arc<WorkerManager>, executor: BuildExecutor) -> Self {
        Self { manager, executor }
    }

    pub fn manager(&self) -> &Arc<WorkerManager> {
        &self.manager
    }

    /// Run `job` to its terminal result.
    ///
    /// The job's worker is torn down exactly once, whichever stage failed.
    pub async fn run_job(&self, job: &Job) -> JobResult {
        info!(job_id = %job.job_id, "Starting job");
        let result = match self.drive(job).await {
            Ok(result) => result,
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "Job failed");
                JobResult::error(job, e.to_string())
            }
        };
        self.manager.teardown(&job.job_id).await;
        info!(
            job_id = %job.job_id,
            status = %result.status,
            structure = ?result.structure_name,
            "Job finished"
        );
        result
    }

    async fn drive(&self, job: &Job) -> Result<JobResult, PipelineError> {
        let mut handle = self.manager.provision(&job.job_id).await?;

        let timeout = self.manager.config().ready_timeout;
        match self.manager.wait_ready(&mut handle, timeout).await {
            Readiness::Ready => {}
            Readiness::TimedOut => {
                return Err(PipelineError::ReadinessTimeout {
                    worker_id: handle.worker_id,
                    waited: timeout,
                })
            }
            Readiness::Exited(status) => {
                return Err(PipelineError::WorkerExited {
                    worker_id: handle.worker_id,
                    status,
                })
            }
        }

        let sink = self.manager.connector().connect(&handle);
        self.executor.prepare_area(sink.as_ref()).await?;
        let outcome = self.executor.execute(sink, job).await;

        let mut result = match &outcome.error {
            None => JobResult::success(job),
            Some(e) => JobResult::error(job, e.to_string()),
        }
        .with_structure_name(outcome.structure_name.clone())
        .with_dimensions(outcome.dimensions);

        if outcome.saved {
            let artifact_dir = &self.manager.config().artifact_dir;
            match self
                .manager
                .extract_artifact(&job.job_id, &outcome.structure_name, artifact_dir)
                .await
            {
                Ok(artifact) => result = result.with_artifact(artifact.path, artifact.sha256),
                Err(e) if result.is_success() => {
                    warn!(job_id = %job.job_id, error = %e, "Build succeeded but extraction failed");
                    result.status = JobStatus::Error;
                    result.error = Some(e.to_string());
                }
                Err(e) => warn!(job_id = %job.job_id, error = %e, "Extraction after failed build"),
            }
        }
        Ok(result)
    }
}

/// Runs every job of a batch concurrently.
#[derive(Clone)]
pub struct BatchRunner {
    pipeline: Arc<JobPipeline>,
}

impl BatchRunner {
    pub fn new(pipeline: Arc<JobPipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Arc<JobPipeline> {
        &self.pipeline
    }

    /// One result per job, in completion order; match them by `job_id`.
    ///
    /// A failing or panicking pipeline never affects its siblings.
    pub async fn run_batch(&self, jobs: Vec<Job>) -> Vec<JobResult> {
        let mut results = Vec::with_capacity(jobs.len());
        let mut tasks = JoinSet::new();
        let mut running = HashMap::new();
        let mut seen = HashSet::new();

        for job in jobs {
            if !seen.insert(job.job_id.clone()) {
                warn!(job_id = %job.job_id, "Duplicate job id in batch");
                results.push(JobResult::error(&job, "duplicate job id in batch"));
                continue;
            }
            let pipeline = self.pipeline.clone();
            let task_job = job.clone();
            let task = tasks.spawn(async move { pipeline.run_job(&task_job).await });
            running.insert(task.id(), job);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, result)) => {
                    running.remove(&id);
                    results.push(result);
                }
                Err(e) => {
                    let Some(job) = running.remove(&e.id()) else {
                        error!(error = %e, "Unknown pipeline task failed");
                        continue;
                    };
                    error!(job_id = %job.job_id, error = %e, "Pipeline task panicked");
                    self.pipeline.manager().teardown(&job.job_id).await;
                    let err = PipelineError::Task(e.to_string());
                    results.push(JobResult::error(&job, err.to_string()));
                }
            }
        }
        results
    }
}
