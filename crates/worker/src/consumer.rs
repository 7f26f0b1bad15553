//! Job consumption loop.
//!
//! Takes deliveries off a [`JobQueue`] one at a time, executes them and
//! publishes exactly one [`JobOutcome`] per delivery to an
//! [`OutcomeSink`]. Jobs never overlap: the ComfyUI session accepts a
//! single pending prompt and the output directory is shared.

use std::sync::Arc;

use async_trait::async_trait;
use likeness_core::job::{JobRequest, JobResult};
use likeness_pipeline::job::{JobError, JobPipeline};
use tokio_util::sync::CancellationToken;

use crate::messages::JobOutcome;
use crate::transport::{Delivery, JobQueue, OutcomeSink, TransportError};

/// Something that can run a job to completion.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(
        &self,
        request: &JobRequest,
        cancel: &CancellationToken,
    ) -> Result<JobResult, JobError>;
}

#[async_trait]
impl JobExecutor for JobPipeline {
    async fn execute(
        &self,
        request: &JobRequest,
        cancel: &CancellationToken,
    ) -> Result<JobResult, JobError> {
        JobPipeline::execute(self, request, cancel).await
    }
}

#[async_trait]
impl<T: JobExecutor + ?Sized> JobExecutor for Arc<T> {
    async fn execute(
        &self,
        request: &JobRequest,
        cancel: &CancellationToken,
    ) -> Result<JobResult, JobError> {
        (**self).execute(request, cancel).await
    }
}

/// Counts of the outcomes published by one [`JobConsumer::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub succeeded: u64,
    pub failed: u64,
}

pub struct JobConsumer<E> {
    executor: E,
}

impl<E: JobExecutor> JobConsumer<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    /// Consume until the queue is exhausted or `cancel` fires.
    ///
    /// A job already taken off the queue when `cancel` fires still gets
    /// its (failed) outcome published before this returns.
    pub async fn run<Q, S>(
        &self,
        queue: &mut Q,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<ConsumerStats, TransportError>
    where
        Q: JobQueue + ?Sized,
        S: OutcomeSink + ?Sized,
    {
        let mut stats = ConsumerStats::default();

        loop {
            let delivery = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Consumer cancelled");
                    break;
                }
                delivery = queue.next() => delivery?,
            };
            let Some(delivery) = delivery else {
                tracing::info!("Job queue exhausted");
                break;
            };

            let outcome = self.process(delivery, cancel).await;
            if outcome.success {
                stats.succeeded += 1;
            } else {
                stats.failed += 1;
            }
            sink.publish(&outcome).await?;
        }

        tracing::info!(
            succeeded = stats.succeeded,
            failed = stats.failed,
            "Consumer stopped",
        );
        Ok(stats)
    }

    /// Turn one delivery into its outcome. Never fails.
    pub async fn process(&self, delivery: Delivery, cancel: &CancellationToken) -> JobOutcome {
        let request = match delivery {
            Delivery::Job(request) => request,
            Delivery::Malformed { job_id, reason } => {
                tracing::warn!(job_id = %job_id, reason = %reason, "Rejecting malformed job");
                return JobOutcome::failed(job_id, reason);
            }
        };

        tracing::info!(job_id = %request.job_id, "Job received");
        match self.executor.execute(&request, cancel).await {
            Ok(result) => JobOutcome::succeeded(result),
            Err(e) => {
                tracing::error!(job_id = %request.job_id, step = %e.step, error = %e, "Job failed");
                JobOutcome::failed(request.job_id, e)
            }
        }
    }
}
