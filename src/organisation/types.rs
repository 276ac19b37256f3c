use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tenant owning flows, content types and a membership
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organisation {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub organisation_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrganisation {
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub organisation_id: String,
}

impl NewOrganisation {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::Validation("organisation name can't be blank".into()));
        }
        Ok(())
    }
}

impl NewUser {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::Validation("user name can't be blank".into()));
        }
        // Deliberately loose: something@something
        match self.email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
            _ => Err(AppError::Validation(format!("invalid email: {}", self.email))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_emails() {
        let user = NewUser {
            name: "Ada".into(),
            email: "ada.example.com".into(),
            organisation_id: "org".into(),
        };
        assert!(matches!(user.validate(), Err(AppError::Validation(_))));

        let user = NewUser { email: "ada@example.com".into(), ..user };
        assert!(user.validate().is_ok());
    }
}
