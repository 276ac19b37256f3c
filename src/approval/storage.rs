/// SQLite persistence for approval systems and the approval transition

use crate::{
    approval::types::{
        validate_transition, Approval, ApprovalSystem, NewApprovalSystem, UpdateApprovalSystem,
    },
    content::storage::{fetch_content_type, fetch_instance, transition_instance},
    database::Database,
    error::{AppError, Result},
    flow::storage::fetch_state,
};
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ApprovalStorage {
    pool: SqlitePool,
}

impl ApprovalStorage {
    pub fn new(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }

    pub async fn create(&self, new: NewApprovalSystem) -> Result<ApprovalSystem> {
        let mut tx = self.pool.begin().await?;
        validate_targets(&mut tx, &new.instance_id, &new.pre_state_id, &new.post_state_id, &new.approver_id)
            .await?;

        let now = Utc::now();
        let system = ApprovalSystem {
            id: Uuid::new_v4().to_string(),
            instance_id: new.instance_id,
            pre_state_id: new.pre_state_id,
            post_state_id: new.post_state_id,
            approver_id: new.approver_id,
            approved: false,
            approved_log: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO approval_systems
                (id, instance_id, pre_state_id, post_state_id, approver_id, approved, approved_log, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&system.id)
        .bind(&system.instance_id)
        .bind(&system.pre_state_id)
        .bind(&system.post_state_id)
        .bind(&system.approver_id)
        .bind(system.approved)
        .bind(system.approved_log)
        .bind(system.created_at)
        .bind(system.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            "🛂 Created approval system {} for instance {} (approver {})",
            system.id, system.instance_id, system.approver_id
        );
        Ok(system)
    }

    pub async fn get(&self, id: &str) -> Result<ApprovalSystem> {
        let mut conn = self.pool.acquire().await?;
        fetch_system(&mut conn, id).await
    }

    /// Approval systems assigned to an approver, newest first
    pub async fn list_for_approver(&self, approver_id: &str, pending_only: bool) -> Result<Vec<ApprovalSystem>> {
        let sql = if pending_only {
            format!("{} WHERE approver_id = ? AND approved = 0 ORDER BY created_at DESC", SELECT_SYSTEM)
        } else {
            format!("{} WHERE approver_id = ? ORDER BY created_at DESC", SELECT_SYSTEM)
        };

        let rows = sqlx::query(&sql).bind(approver_id).fetch_all(&self.pool).await?;
        rows.iter().map(system_from_row).collect()
    }

    /// Re-target a pending approval system
    pub async fn update(&self, id: &str, update: UpdateApprovalSystem) -> Result<ApprovalSystem> {
        let mut tx = self.pool.begin().await?;
        let mut system = fetch_system(&mut tx, id).await?;
        if system.approved {
            return Err(AppError::AlreadyApproved);
        }

        if let Some(pre_state_id) = update.pre_state_id {
            system.pre_state_id = pre_state_id;
        }
        if let Some(post_state_id) = update.post_state_id {
            system.post_state_id = post_state_id;
        }
        if let Some(approver_id) = update.approver_id {
            system.approver_id = approver_id;
        }
        validate_targets(&mut tx, &system.instance_id, &system.pre_state_id, &system.post_state_id, &system.approver_id)
            .await?;
        system.updated_at = Utc::now();

        sqlx::query(
            r#"
            UPDATE approval_systems
            SET pre_state_id = ?, post_state_id = ?, approver_id = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&system.pre_state_id)
        .bind(&system.post_state_id)
        .bind(&system.approver_id)
        .bind(system.updated_at)
        .bind(&system.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(system)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM approval_systems WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("approval system"));
        }
        Ok(())
    }

    /// Approve on behalf of `user_id`
    ///
    /// The approver and state checks run against rows read inside the same
    /// transaction as the mutation. Both writes are conditional, so a
    /// concurrent approval or state change makes this call fail instead of
    /// moving the instance twice. On any error the instance is untouched.
    pub async fn approve(&self, user_id: &str, system_id: &str) -> Result<Approval> {
        let mut tx = self.pool.begin().await?;

        let mut system = fetch_system(&mut tx, system_id).await?;
        let mut instance = fetch_instance(&mut tx, &system.instance_id).await?;
        system.check_approvable(user_id, &instance)?;

        let moved = transition_instance(&mut tx, &instance.id, &system.pre_state_id, &system.post_state_id).await?;
        if !moved {
            return Err(AppError::UnprocessableState);
        }

        let now = Utc::now();
        let stamped = sqlx::query(
            r#"
            UPDATE approval_systems SET approved = 1, approved_log = ?, updated_at = ?
            WHERE id = ? AND approved = 0
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(&system.id)
        .execute(&mut *tx)
        .await?;
        if stamped.rows_affected() == 0 {
            return Err(AppError::AlreadyApproved);
        }

        tx.commit().await?;

        system.approved = true;
        system.approved_log = Some(now);
        system.updated_at = now;
        instance.state_id = system.post_state_id.clone();
        instance.updated_at = now;

        tracing::info!(
            "✅ Approval system {} approved by {}: instance {} moved to state {}",
            system.id, user_id, instance.instance_id, system.post_state_id
        );
        Ok(Approval { approval_system: system, instance })
    }
}

/// Both states must be distinct steps of the instance's flow and the approver must exist
async fn validate_targets(
    conn: &mut SqliteConnection,
    instance_id: &str,
    pre_state_id: &str,
    post_state_id: &str,
    approver_id: &str,
) -> Result<()> {
    validate_transition(pre_state_id, post_state_id)?;

    let instance = fetch_instance(conn, instance_id).await?;
    let content_type = fetch_content_type(conn, &instance.content_type_id).await?;

    for state_id in [pre_state_id, post_state_id] {
        let state = fetch_state(conn, state_id).await?;
        if state.flow_id != content_type.flow_id {
            return Err(AppError::Validation(format!(
                "state '{}' is not part of the instance's flow",
                state.state
            )));
        }
    }

    let approver: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE id = ?")
        .bind(approver_id)
        .fetch_optional(&mut *conn)
        .await?;
    if approver.is_none() {
        return Err(AppError::NotFound("user"));
    }
    Ok(())
}

const SELECT_SYSTEM: &str = r#"
    SELECT id, instance_id, pre_state_id, post_state_id, approver_id, approved, approved_log, created_at, updated_at
    FROM approval_systems
"#;

async fn fetch_system(conn: &mut SqliteConnection, id: &str) -> Result<ApprovalSystem> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_SYSTEM))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound("approval system"))?;
    system_from_row(&row)
}

fn system_from_row(row: &SqliteRow) -> Result<ApprovalSystem> {
    Ok(ApprovalSystem {
        id: row.try_get("id")?,
        instance_id: row.try_get("instance_id")?,
        pre_state_id: row.try_get("pre_state_id")?,
        post_state_id: row.try_get("post_state_id")?,
        approver_id: row.try_get("approver_id")?,
        approved: row.try_get("approved")?,
        approved_log: row.try_get("approved_log")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
