/// Membership and payment management
///
/// This module handles billing for organisations:
/// - Plan definitions served through a hot-reload catalog
/// - Membership periods derived from the amount paid
/// - Payment records, invoice numbering and expiry checks
/// - Gateway lookup of payments by transaction id

pub mod catalog;
pub mod gateway;
pub mod storage;
pub mod types;

pub use catalog::{PlanCatalog, PlanRegistry};
pub use gateway::{HttpPaymentGateway, PaymentGateway};
pub use storage::MembershipStorage;
pub use types::{
    payment_action, plan_duration, Membership, NewPlan, Payment, PaymentAction, PaymentNotification,
    PaymentOutcome, PaymentStatus, Plan, UpdatePlan,
};
