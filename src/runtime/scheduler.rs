/// Background job scheduler service
///
/// Drives the job worker on a cron schedule using tokio-cron-scheduler. Each
/// tick recovers expired leases and drains every due job.

use crate::{config::JobConfig, runtime::worker::JobWorker};
use anyhow::Result;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use uuid::Uuid;

pub struct JobSchedulerService {
    scheduler: Arc<RwLock<JobScheduler>>,
    worker: Arc<JobWorker>,
    schedule: String,
    /// Set while a worker pass is in flight so ticks never overlap
    busy: Arc<AtomicBool>,
}

/// Holds the busy flag for one worker pass and clears it on drop, even when
/// the pass panics
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(BusyGuard(Arc::clone(flag)))
        }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl JobSchedulerService {
    pub async fn new(worker: Arc<JobWorker>, config: &JobConfig) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            worker,
            schedule: config.schedule.clone(),
            busy: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Register the worker tick and start the scheduler
    pub async fn start(&self) -> Result<Uuid> {
        tracing::info!("⏰ Starting job scheduler ({})", self.schedule);

        let worker = Arc::clone(&self.worker);
        let busy = Arc::clone(&self.busy);

        let job = CronJob::new_async(self.schedule.as_str(), move |_uuid, _l| {
            let worker = Arc::clone(&worker);
            let busy = Arc::clone(&busy);

            Box::pin(async move {
                let Some(_guard) = BusyGuard::acquire(&busy) else {
                    tracing::debug!("⏭️ Previous job pass still running, skipping tick");
                    return;
                };
                if let Err(e) = worker.run_once().await {
                    tracing::error!("❌ Job pass failed: {:#}", e);
                }
            })
        })?;

        let job_uuid = {
            let scheduler = self.scheduler.write().await;
            let uuid = scheduler.add(job).await?;
            scheduler.start().await?;
            uuid
        };

        tracing::info!("✅ Job scheduler started");
        Ok(job_uuid)
    }

    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping job scheduler");
        let mut scheduler = self.scheduler.write().await;
        scheduler.shutdown().await?;
        Ok(())
    }
}
