/// Job worker: claims due jobs and dispatches them to their handlers

use crate::{
    flow::FlowStorage,
    membership::MembershipStorage,
    runtime::jobs::{Job, JobQueue, JobStatus},
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;

/// Executes one job; must be idempotent since delivery is at-least-once
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<()>;
}

/// Routes each job kind to the storage operation that performs it
#[derive(Debug, Clone)]
pub struct DomainJobHandler {
    flows: FlowStorage,
    memberships: MembershipStorage,
}

impl DomainJobHandler {
    pub fn new(flows: FlowStorage, memberships: MembershipStorage) -> Self {
        Self { flows, memberships }
    }
}

#[async_trait]
impl JobHandler for DomainJobHandler {
    async fn handle(&self, job: &Job) -> Result<()> {
        match job {
            Job::SeedDefaultStates { flow_id } => {
                self.flows.seed_default_states(flow_id).await?;
            }
            Job::GenerateInvoice { payment_id } => {
                self.memberships.generate_invoice(payment_id).await?;
            }
            Job::MembershipExpiryCheck { membership_id } => {
                self.memberships.check_expiry(membership_id).await?;
            }
        }
        Ok(())
    }
}

/// Counts from one worker pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
}

pub struct JobWorker {
    queue: JobQueue,
    handler: Arc<dyn JobHandler>,
    batch_size: i64,
    lease: Duration,
}

impl JobWorker {
    pub fn new(queue: JobQueue, handler: Arc<dyn JobHandler>, batch_size: i64, lease_secs: i64) -> Self {
        Self {
            queue,
            handler,
            batch_size: batch_size.max(1),
            lease: Duration::seconds(lease_secs.max(1)),
        }
    }

    /// Recover expired leases, then run every job that is due right now
    pub async fn run_once(&self) -> Result<RunSummary> {
        self.queue.recover_stale(self.lease).await?;

        let mut summary = RunSummary::default();
        loop {
            let claimed = self.queue.claim_due(self.batch_size).await?;
            if claimed.is_empty() {
                break;
            }

            for job in claimed {
                tracing::debug!("⚙️ Running job {} ({}), attempt {}", job.id, job.job.kind(), job.attempts);
                match self.handler.handle(&job.job).await {
                    Ok(()) => {
                        self.queue.complete(&job.id).await?;
                        summary.completed += 1;
                    }
                    Err(e) => match self.queue.fail(&job, &format!("{:#}", e)).await? {
                        JobStatus::Failed => summary.failed += 1,
                        _ => summary.retried += 1,
                    },
                }
            }
        }

        if summary != RunSummary::default() {
            tracing::info!(
                "📊 Job pass: {} completed, {} retried, {} failed",
                summary.completed, summary.retried, summary.failed
            );
        }
        Ok(summary)
    }
}
