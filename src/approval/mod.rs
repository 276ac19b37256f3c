/// Approval systems
///
/// An approval system gates one instance's move between two states of its
/// flow behind a designated approver. Approving checks the approver and the
/// instance's current state and performs the move in a single transaction.

pub mod storage;
pub mod types;

pub use storage::ApprovalStorage;
pub use types::{
    is_approver, is_in_pre_state, Approval, ApprovalStatus, ApprovalSystem, NewApprovalSystem,
    UpdateApprovalSystem,
};
