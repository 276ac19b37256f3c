/// Flow and state definitions
///
/// A flow is an ordered sequence of named states. Content moves through the
/// states of its content type's flow, optionally gated by approval systems.

use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// States seeded into an uncontrolled flow
pub const UNCONTROLLED_STATES: &[&str] = &["Draft", "Publish"];

/// States seeded into a controlled flow; the extra step is where approvals happen
pub const CONTROLLED_STATES: &[&str] = &["Draft", "Review", "Publish"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub name: String,
    /// Controlled flows route content through an approval step
    pub controlled: bool,
    pub organisation_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named step of a flow
///
/// `order` starts at 1 and is unique within the flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub id: String,
    pub flow_id: String,
    pub state: String,
    pub order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A flow together with its states in order
#[derive(Debug, Clone, Serialize)]
pub struct FlowWithStates {
    #[serde(flatten)]
    pub flow: Flow,
    pub states: Vec<State>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFlow {
    pub name: String,
    #[serde(default)]
    pub controlled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateFlow {
    pub name: Option<String>,
    pub controlled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewState {
    pub state: String,
    /// Insert at this position; appended after the last state when absent
    pub order: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateState {
    pub state: String,
}

impl Flow {
    pub fn default_states(&self) -> &'static [&'static str] {
        default_states(self.controlled)
    }
}

pub fn default_states(controlled: bool) -> &'static [&'static str] {
    if controlled {
        CONTROLLED_STATES
    } else {
        UNCONTROLLED_STATES
    }
}

pub(crate) fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(AppError::Validation(format!("{} name can't be blank", kind)));
    }
    if name.len() > 120 {
        return Err(AppError::Validation(format!("{} name is too long", kind)));
    }
    Ok(())
}

impl NewFlow {
    pub fn validate(&self) -> Result<()> {
        validate_name("flow", &self.name)
    }
}

impl UpdateFlow {
    pub fn validate(&self) -> Result<()> {
        match &self.name {
            Some(name) => validate_name("flow", name),
            None => Ok(()),
        }
    }
}

impl NewState {
    pub fn validate(&self) -> Result<()> {
        validate_name("state", &self.state)?;
        if matches!(self.order, Some(order) if order < 1) {
            return Err(AppError::Validation("state order must be at least 1".into()));
        }
        Ok(())
    }
}
