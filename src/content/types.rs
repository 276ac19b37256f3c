/// Content type and instance definitions

use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Width the instance sequence is zero padded to
pub const INSTANCE_ID_WIDTH: usize = 4;

/// A kind of document, tracked through the states of one flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentType {
    pub id: String,
    pub name: String,
    /// Prefix of the human readable instance ids (e.g. "INV")
    pub prefix: String,
    pub flow_id: String,
    pub organisation_id: String,
    pub created_at: DateTime<Utc>,
}

/// A concrete document of a content type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    /// Human readable id, prefix plus padded sequence (e.g. "INV0007")
    pub instance_id: String,
    pub sequence: i64,
    pub content_type_id: String,
    pub state_id: String,
    pub creator_id: String,
    /// Document body
    pub serialized: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewContentType {
    pub name: String,
    pub prefix: String,
    pub flow_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewInstance {
    #[serde(default)]
    pub serialized: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateInstance {
    pub serialized: Value,
}

impl NewContentType {
    pub fn validate(&self) -> Result<()> {
        crate::flow::types::validate_name("content type", &self.name)?;

        let valid_prefix = (1..=6).contains(&self.prefix.len())
            && self
                .prefix
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
        if !valid_prefix {
            return Err(AppError::Validation(format!(
                "prefix must be 1-6 uppercase letters or digits, got '{}'",
                self.prefix
            )));
        }
        Ok(())
    }
}

/// Build the human readable id of the `sequence`-th instance of a content type
///
/// `generate_instance_id("INV", 7)` is `"INV0007"`; sequences past 9999 simply
/// grow wider.
pub fn generate_instance_id(prefix: &str, sequence: i64) -> String {
    format!("{}{:0width$}", prefix, sequence, width = INSTANCE_ID_WIDTH)
}
