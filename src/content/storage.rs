/// SQLite persistence for content types and instances

use crate::{
    content::types::{
        generate_instance_id, ContentType, Instance, NewContentType, NewInstance, UpdateInstance,
    },
    database::Database,
    error::{AppError, Result},
    flow::storage::fetch_flow,
};
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ContentStorage {
    pool: SqlitePool,
}

impl ContentStorage {
    pub fn new(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }

    pub async fn create_content_type(
        &self,
        organisation_id: &str,
        new: NewContentType,
    ) -> Result<ContentType> {
        new.validate()?;

        let mut conn = self.pool.acquire().await?;
        let flow = fetch_flow(&mut conn, &new.flow_id).await?;
        if flow.organisation_id != organisation_id {
            return Err(AppError::Validation(
                "flow belongs to a different organisation".into(),
            ));
        }

        let content_type = ContentType {
            id: Uuid::new_v4().to_string(),
            name: new.name.trim().to_string(),
            prefix: new.prefix,
            flow_id: flow.id,
            organisation_id: organisation_id.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO content_types (id, name, prefix, flow_id, organisation_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&content_type.id)
        .bind(&content_type.name)
        .bind(&content_type.prefix)
        .bind(&content_type.flow_id)
        .bind(&content_type.organisation_id)
        .bind(content_type.created_at)
        .execute(&mut *conn)
        .await?;

        tracing::info!("📄 Created content type: {} ({})", content_type.name, content_type.prefix);
        Ok(content_type)
    }

    pub async fn get_content_type(&self, id: &str) -> Result<ContentType> {
        let mut conn = self.pool.acquire().await?;
        fetch_content_type(&mut conn, id).await
    }

    pub async fn list_content_types(&self, organisation_id: &str) -> Result<Vec<ContentType>> {
        let rows = sqlx::query(&format!("{} WHERE organisation_id = ? ORDER BY name", SELECT_CONTENT_TYPE))
            .bind(organisation_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(content_type_from_row).collect()
    }

    /// Create an instance in the first state of the content type's flow
    ///
    /// The sequence is allocated inside the insert transaction, so concurrent
    /// creations can't hand out the same instance id.
    pub async fn create_instance(
        &self,
        content_type_id: &str,
        creator_id: &str,
        new: NewInstance,
    ) -> Result<Instance> {
        let mut tx = self.pool.begin().await?;
        let content_type = fetch_content_type(&mut tx, content_type_id).await?;

        let first_state: Option<String> = sqlx::query_scalar(
            "SELECT id FROM states WHERE flow_id = ? ORDER BY state_order LIMIT 1",
        )
        .bind(&content_type.flow_id)
        .fetch_optional(&mut *tx)
        .await?;
        let state_id = first_state.ok_or_else(|| {
            AppError::Validation(format!("flow {} has no states yet", content_type.flow_id))
        })?;

        let sequence: i64 = sqlx::query_scalar(
            "UPDATE content_types SET last_sequence = last_sequence + 1 WHERE id = ? RETURNING last_sequence",
        )
        .bind(&content_type.id)
        .fetch_one(&mut *tx)
        .await?;

        let now = Utc::now();
        let instance = Instance {
            id: Uuid::new_v4().to_string(),
            instance_id: generate_instance_id(&content_type.prefix, sequence),
            sequence,
            content_type_id: content_type.id.clone(),
            state_id,
            creator_id: creator_id.to_string(),
            serialized: new.serialized,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO instances
                (id, instance_id, sequence, content_type_id, state_id, creator_id, serialized, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&instance.id)
        .bind(&instance.instance_id)
        .bind(instance.sequence)
        .bind(&instance.content_type_id)
        .bind(&instance.state_id)
        .bind(&instance.creator_id)
        .bind(serde_json::to_string(&instance.serialized)?)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!("📝 Created instance {} of {}", instance.instance_id, content_type.name);
        Ok(instance)
    }

    pub async fn get_instance(&self, id: &str) -> Result<Instance> {
        let mut conn = self.pool.acquire().await?;
        fetch_instance(&mut conn, id).await
    }

    pub async fn list_instances(&self, content_type_id: &str) -> Result<Vec<Instance>> {
        let rows = sqlx::query(&format!("{} WHERE content_type_id = ? ORDER BY sequence", SELECT_INSTANCE))
            .bind(content_type_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(instance_from_row).collect()
    }

    pub async fn update_instance(&self, id: &str, update: UpdateInstance) -> Result<Instance> {
        let mut tx = self.pool.begin().await?;
        let mut instance = fetch_instance(&mut tx, id).await?;
        instance.serialized = update.serialized;
        instance.updated_at = Utc::now();

        sqlx::query("UPDATE instances SET serialized = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(&instance.serialized)?)
            .bind(instance.updated_at)
            .bind(&instance.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(instance)
    }

    pub async fn delete_instance(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM instances WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("instance"));
        }
        tracing::info!("🗑️ Deleted instance: {}", id);
        Ok(())
    }
}

/// Move an instance to `to_state` only if it is still in `from_state`
///
/// Returns whether the instance moved.
pub(crate) async fn transition_instance(
    conn: &mut SqliteConnection,
    instance_id: &str,
    from_state: &str,
    to_state: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE instances SET state_id = ?, updated_at = ? WHERE id = ? AND state_id = ?",
    )
    .bind(to_state)
    .bind(Utc::now())
    .bind(instance_id)
    .bind(from_state)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

const SELECT_CONTENT_TYPE: &str =
    "SELECT id, name, prefix, flow_id, organisation_id, created_at FROM content_types";

const SELECT_INSTANCE: &str = r#"
    SELECT id, instance_id, sequence, content_type_id, state_id, creator_id, serialized, created_at, updated_at
    FROM instances
"#;

pub(crate) async fn fetch_content_type(conn: &mut SqliteConnection, id: &str) -> Result<ContentType> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_CONTENT_TYPE))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound("content type"))?;
    content_type_from_row(&row)
}

pub(crate) async fn fetch_instance(conn: &mut SqliteConnection, id: &str) -> Result<Instance> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_INSTANCE))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound("instance"))?;
    instance_from_row(&row)
}

fn content_type_from_row(row: &SqliteRow) -> Result<ContentType> {
    Ok(ContentType {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        prefix: row.try_get("prefix")?,
        flow_id: row.try_get("flow_id")?,
        organisation_id: row.try_get("organisation_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn instance_from_row(row: &SqliteRow) -> Result<Instance> {
    let serialized: String = row.try_get("serialized")?;
    Ok(Instance {
        id: row.try_get("id")?,
        instance_id: row.try_get("instance_id")?,
        sequence: row.try_get("sequence")?,
        content_type_id: row.try_get("content_type_id")?,
        state_id: row.try_get("state_id")?,
        creator_id: row.try_get("creator_id")?,
        serialized: serde_json::from_str(&serialized)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;
    use serde_json::json;

    #[tokio::test]
    async fn instance_ids_increase_per_content_type() {
        let fx = Fixture::new(false).await;
        let invoices = fx.content_type("Invoice", "INV").await;
        let contracts = fx.content_type("Contract", "CTR").await;

        let mut ids = Vec::new();
        for _ in 0..3 {
            let instance = fx
                .content
                .create_instance(&invoices.id, &fx.user.id, NewInstance { serialized: json!({}) })
                .await
                .unwrap();
            ids.push(instance.instance_id);
        }
        assert_eq!(ids, vec!["INV0001", "INV0002", "INV0003"]);

        let contract = fx
            .content
            .create_instance(&contracts.id, &fx.user.id, NewInstance { serialized: json!({}) })
            .await
            .unwrap();
        assert_eq!(contract.instance_id, "CTR0001");
    }

    #[tokio::test]
    async fn ids_keep_increasing_after_deletes() {
        let fx = Fixture::new(false).await;
        let invoices = fx.content_type("Invoice", "INV").await;
        let new = || NewInstance { serialized: json!({ "total": 10 }) };

        fx.content.create_instance(&invoices.id, &fx.user.id, new()).await.unwrap();
        let second = fx.content.create_instance(&invoices.id, &fx.user.id, new()).await.unwrap();
        fx.content.delete_instance(&second.id).await.unwrap();

        let third = fx.content.create_instance(&invoices.id, &fx.user.id, new()).await.unwrap();
        assert_eq!(third.instance_id, "INV0003");
    }

    #[tokio::test]
    async fn new_instances_start_in_the_first_state() {
        let fx = Fixture::new(true).await;
        let invoices = fx.content_type("Invoice", "INV").await;

        let instance = fx
            .content
            .create_instance(&invoices.id, &fx.user.id, NewInstance { serialized: json!({ "a": 1 }) })
            .await
            .unwrap();
        assert_eq!(instance.state_id, fx.states[0].id);

        let loaded = fx.content.get_instance(&instance.id).await.unwrap();
        assert_eq!(loaded.serialized, json!({ "a": 1 }));
    }

    #[tokio::test]
    async fn unseeded_flows_reject_instances() {
        let fx = Fixture::new(false).await;
        let bare = fx.flows.create_flow(&fx.org.id, crate::flow::NewFlow {
            name: "Bare".into(),
            controlled: false,
        })
        .await
        .unwrap();
        let content_type = fx
            .content
            .create_content_type(&fx.org.id, NewContentType {
                name: "Memo".into(),
                prefix: "MEM".into(),
                flow_id: bare.id,
            })
            .await
            .unwrap();

        let result = fx
            .content
            .create_instance(&content_type.id, &fx.user.id, NewInstance { serialized: json!({}) })
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn transition_requires_the_expected_state() {
        let fx = Fixture::new(true).await;
        let invoices = fx.content_type("Invoice", "INV").await;
        let instance = fx
            .content
            .create_instance(&invoices.id, &fx.user.id, NewInstance { serialized: json!({}) })
            .await
            .unwrap();

        let mut conn = fx.db.pool().acquire().await.unwrap();
        let wrong = transition_instance(&mut conn, &instance.id, &fx.states[1].id, &fx.states[2].id)
            .await
            .unwrap();
        assert!(!wrong);
        let moved = transition_instance(&mut conn, &instance.id, &fx.states[0].id, &fx.states[1].id)
            .await
            .unwrap();
        assert!(moved);
        drop(conn);

        let loaded = fx.content.get_instance(&instance.id).await.unwrap();
        assert_eq!(loaded.state_id, fx.states[1].id);
    }
}
