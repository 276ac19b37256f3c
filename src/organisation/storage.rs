/// SQLite persistence for organisations and users

use crate::{
    database::Database,
    error::{AppError, Result},
    organisation::types::{NewOrganisation, NewUser, Organisation, User},
};
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OrganisationStorage {
    pool: SqlitePool,
}

impl OrganisationStorage {
    pub fn new(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }

    pub async fn create_organisation(&self, new: NewOrganisation) -> Result<Organisation> {
        new.validate()?;

        let organisation = Organisation {
            id: Uuid::new_v4().to_string(),
            name: new.name.trim().to_string(),
            email: new.email,
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO organisations (id, name, email, created_at) VALUES (?, ?, ?, ?)")
            .bind(&organisation.id)
            .bind(&organisation.name)
            .bind(&organisation.email)
            .bind(organisation.created_at)
            .execute(&self.pool)
            .await?;

        tracing::info!("🏢 Created organisation: {} ({})", organisation.name, organisation.id);
        Ok(organisation)
    }

    pub async fn get_organisation(&self, id: &str) -> Result<Organisation> {
        let row = sqlx::query("SELECT id, name, email, created_at FROM organisations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound("organisation"))?;

        Ok(Organisation {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            created_at: row.try_get("created_at")?,
        })
    }

    pub async fn list_organisations(&self) -> Result<Vec<Organisation>> {
        let rows = sqlx::query("SELECT id, name, email, created_at FROM organisations ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        let mut organisations = Vec::with_capacity(rows.len());
        for row in rows {
            organisations.push(Organisation {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                email: row.try_get("email")?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(organisations)
    }

    pub async fn create_user(&self, new: NewUser) -> Result<User> {
        new.validate()?;
        // Surface a missing organisation as 404 rather than a foreign key failure
        self.get_organisation(&new.organisation_id).await?;

        let user = User {
            id: Uuid::new_v4().to_string(),
            name: new.name.trim().to_string(),
            email: new.email.trim().to_lowercase(),
            organisation_id: new.organisation_id,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO users (id, name, email, organisation_id, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.organisation_id)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        tracing::info!("👤 Created user: {} in organisation {}", user.email, user.organisation_id);
        Ok(user)
    }

    pub async fn get_user(&self, id: &str) -> Result<User> {
        let row = sqlx::query(
            "SELECT id, name, email, organisation_id, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound("user"))?;

        user_from_row(&row)
    }
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        organisation_id: row.try_get("organisation_id")?,
        created_at: row.try_get("created_at")?,
    })
}
