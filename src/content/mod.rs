/// Content types and their instances
///
/// Each instance belongs to a content type, sits in one state of the content
/// type's flow and carries a sequential human readable id.

pub mod storage;
pub mod types;

pub use storage::ContentStorage;
pub use types::{generate_instance_id, ContentType, Instance, NewContentType, NewInstance, UpdateInstance};
