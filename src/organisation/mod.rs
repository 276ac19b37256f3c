/// Organisation and user management
///
/// Organisations own flows, content types and a membership. Users belong to one
/// organisation and act as content creators, approvers and payers.

pub mod storage;
pub mod types;

pub use storage::OrganisationStorage;
pub use types::{NewOrganisation, NewUser, Organisation, User};
