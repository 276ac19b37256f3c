/// Flow and state management
///
/// This module handles workflow definitions for content:
/// - Type definitions (Flow, State)
/// - SQLite persistence with transactional state reordering
/// - Default state seeding for controlled and uncontrolled flows

// Core flow type definitions
pub mod types;

// SQLite persistence layer for flows and their states
pub mod storage;

pub use storage::FlowStorage;
pub use types::{Flow, FlowWithStates, NewFlow, NewState, State, UpdateFlow, UpdateState};
