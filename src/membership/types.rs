/// Plans, memberships and payments
///
/// Amounts are integers in the currency's minor unit (paise, cents).

use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};

pub const MONTHLY_DURATION_DAYS: i64 = 30;
pub const YEARLY_DURATION_DAYS: i64 = 365;
pub const TRIAL_DURATION_DAYS: i64 = 14;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub description: String,
    pub monthly_amount: i64,
    pub yearly_amount: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPlan {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub monthly_amount: i64,
    pub yearly_amount: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePlan {
    pub name: Option<String>,
    pub description: Option<String>,
    pub monthly_amount: Option<i64>,
    pub yearly_amount: Option<i64>,
}

/// An organisation's subscription to a plan for a date range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub id: String,
    pub organisation_id: String,
    pub plan_id: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Length of the paid period in days
    pub plan_duration: i64,
    pub is_expired: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Created,
    Authorized,
    Captured,
    Refunded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentAction {
    Upgrade,
    Downgrade,
    Renew,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    /// Gateway payment id
    pub transaction_id: String,
    pub amount: i64,
    pub status: PaymentStatus,
    pub action: Option<PaymentAction>,
    pub organisation_id: String,
    pub creator_id: String,
    pub membership_id: String,
    pub from_plan_id: String,
    pub to_plan_id: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub invoice_number: Option<String>,
    /// Raw gateway payload
    pub meta: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A payment as reported by the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub transaction_id: String,
    pub amount: i64,
    pub status: PaymentStatus,
    #[serde(default)]
    pub meta: Value,
}

/// What `update_membership` did
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// Payment captured and membership extended
    Applied { membership: Membership, payment: Payment },
    /// Gateway reported an unsettled payment; only the payment was recorded
    Failed { payment: Payment },
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Created => "created",
            PaymentStatus::Authorized => "authorized",
            PaymentStatus::Captured => "captured",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Failed => "failed",
        }
    }

    /// Money actually moved: only these statuses extend a membership
    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentStatus::Authorized | PaymentStatus::Captured)
    }

    pub fn is_failure(&self) -> bool {
        !self.is_settled()
    }
}

impl FromStr for PaymentStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(PaymentStatus::Created),
            "authorized" => Ok(PaymentStatus::Authorized),
            "captured" => Ok(PaymentStatus::Captured),
            "refunded" => Ok(PaymentStatus::Refunded),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(AppError::Validation(format!("unknown payment status: {}", other))),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PaymentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentAction::Upgrade => "upgrade",
            PaymentAction::Downgrade => "downgrade",
            PaymentAction::Renew => "renew",
        }
    }
}

impl FromStr for PaymentAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "upgrade" => Ok(PaymentAction::Upgrade),
            "downgrade" => Ok(PaymentAction::Downgrade),
            "renew" => Ok(PaymentAction::Renew),
            other => Err(AppError::Validation(format!("unknown payment action: {}", other))),
        }
    }
}

impl NewPlan {
    pub fn validate(&self) -> Result<()> {
        crate::flow::types::validate_name("plan", &self.name)?;
        validate_prices(self.monthly_amount, self.yearly_amount)
    }
}

/// Prices must be positive and distinct, otherwise a payment can't identify its duration
pub(crate) fn validate_prices(monthly_amount: i64, yearly_amount: i64) -> Result<()> {
    if monthly_amount <= 0 || yearly_amount <= 0 {
        return Err(AppError::Validation("plan prices must be positive".into()));
    }
    if monthly_amount == yearly_amount {
        return Err(AppError::Validation("monthly and yearly prices must differ".into()));
    }
    Ok(())
}

/// Days of membership bought by `amount` on `plan`
pub fn plan_duration(amount: i64, plan: &Plan) -> Result<i64> {
    if amount == plan.monthly_amount {
        Ok(MONTHLY_DURATION_DAYS)
    } else if amount == plan.yearly_amount {
        Ok(YEARLY_DURATION_DAYS)
    } else {
        Err(AppError::WrongAmount)
    }
}

/// Classify a plan change by comparing yearly prices
pub fn payment_action(old_plan: &Plan, new_plan: &Plan) -> PaymentAction {
    match new_plan.yearly_amount.cmp(&old_plan.yearly_amount) {
        std::cmp::Ordering::Greater => PaymentAction::Upgrade,
        std::cmp::Ordering::Less => PaymentAction::Downgrade,
        std::cmp::Ordering::Equal => PaymentAction::Renew,
    }
}
