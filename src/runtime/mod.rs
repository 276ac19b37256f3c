/// Background job runtime
///
/// Replaces fire-and-forget side effects with durable jobs:
/// - SQLite-backed queue with retries and lease recovery
/// - Worker dispatching jobs to idempotent handlers
/// - Cron-driven scheduler that runs the worker in the background

// Durable job queue stored in the jobs table
pub mod jobs;

// Job dispatch and execution
pub mod worker;

// Background cron scheduler driving the worker
pub mod scheduler;

pub use jobs::{Job, JobQueue, JobRecord, JobStatus};
pub use scheduler::JobSchedulerService;
pub use worker::{DomainJobHandler, JobHandler, JobWorker, RunSummary};
