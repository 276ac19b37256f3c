/// Docflow: document workflow backend
///
/// Organisations define flows of ordered states, track documents (instances)
/// through them, gate state changes behind approvers, and pay for plan
/// memberships. Side effects run as durable background jobs.

// Core configuration and setup
pub mod config;

// Error types shared by every layer
pub mod error;

// SQLite pool and schema
pub mod database;

// Organisations and their users
pub mod organisation;

// Flows and their ordered states
pub mod flow;

// Content types and instances with human readable ids
pub mod content;

// Approval systems gating instance state changes
pub mod approval;

// Plans, memberships and payments
pub mod membership;

// Durable job queue, worker and scheduler
pub mod runtime;

// HTTP API layer - REST endpoints over the storages
pub mod api;

// Server setup and initialization
pub mod server;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types for external consumers
pub use database::Database;
pub use error::{AppError, Result};
pub use server::start_server;
