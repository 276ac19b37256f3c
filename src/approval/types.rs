/// Approval system definitions and the approval preconditions

use crate::{
    content::Instance,
    error::{AppError, Result},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Binds the move of one instance from `pre_state_id` to `post_state_id` to an approver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalSystem {
    pub id: String,
    pub instance_id: String,
    pub pre_state_id: String,
    pub post_state_id: String,
    pub approver_id: String,
    pub approved: bool,
    /// When the approval happened
    pub approved_log: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewApprovalSystem {
    pub instance_id: String,
    pub pre_state_id: String,
    pub post_state_id: String,
    pub approver_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateApprovalSystem {
    pub pre_state_id: Option<String>,
    pub post_state_id: Option<String>,
    pub approver_id: Option<String>,
}

/// Result of a successful approval
#[derive(Debug, Clone, Serialize)]
pub struct Approval {
    pub approval_system: ApprovalSystem,
    pub instance: Instance,
}

impl ApprovalSystem {
    pub fn status(&self) -> ApprovalStatus {
        if self.approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Pending
        }
    }

    /// Check every precondition of `approve` against freshly loaded rows
    pub fn check_approvable(&self, user_id: &str, instance: &Instance) -> Result<()> {
        if !is_approver(user_id, self) {
            return Err(AppError::InvalidUser);
        }
        if self.approved {
            return Err(AppError::AlreadyApproved);
        }
        if !is_in_pre_state(instance, self) {
            return Err(AppError::UnprocessableState);
        }
        Ok(())
    }
}

pub fn is_approver(user_id: &str, system: &ApprovalSystem) -> bool {
    system.approver_id == user_id
}

pub fn is_in_pre_state(instance: &Instance, system: &ApprovalSystem) -> bool {
    instance.id == system.instance_id && instance.state_id == system.pre_state_id
}

pub(crate) fn validate_transition(pre_state_id: &str, post_state_id: &str) -> Result<()> {
    if pre_state_id == post_state_id {
        return Err(AppError::Validation("pre-state and post-state must differ".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn system() -> ApprovalSystem {
        ApprovalSystem {
            id: "as1".into(),
            instance_id: "i1".into(),
            pre_state_id: "draft".into(),
            post_state_id: "review".into(),
            approver_id: "alice".into(),
            approved: false,
            approved_log: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn instance(state_id: &str) -> Instance {
        Instance {
            id: "i1".into(),
            instance_id: "INV0001".into(),
            sequence: 1,
            content_type_id: "ct".into(),
            state_id: state_id.into(),
            creator_id: "bob".into(),
            serialized: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn both_preconditions_are_required() {
        let system = system();
        assert!(system.check_approvable("alice", &instance("draft")).is_ok());
        assert!(matches!(
            system.check_approvable("bob", &instance("draft")),
            Err(AppError::InvalidUser)
        ));
        assert!(matches!(
            system.check_approvable("alice", &instance("publish")),
            Err(AppError::UnprocessableState)
        ));
    }

    #[test]
    fn approved_systems_are_not_approvable_again() {
        let system = ApprovalSystem { approved: true, ..system() };
        assert_eq!(system.status(), ApprovalStatus::Approved);
        assert!(matches!(
            system.check_approvable("alice", &instance("draft")),
            Err(AppError::AlreadyApproved)
        ));
    }
}
