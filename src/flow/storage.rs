/// SQLite persistence layer for flows and states
///
/// Every operation that touches more than one state row runs inside a single
/// transaction, so a failed reorder never leaves a gap or a duplicate order.

use crate::{
    database::Database,
    error::{AppError, Result},
    flow::types::{Flow, FlowWithStates, NewFlow, NewState, State, UpdateFlow, UpdateState},
    runtime::jobs::{Job, JobQueue},
};
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct FlowStorage {
    pool: SqlitePool,
    jobs: JobQueue,
}

impl FlowStorage {
    pub fn new(db: &Database, jobs: JobQueue) -> Self {
        Self { pool: db.pool().clone(), jobs }
    }

    /// Create a flow and enqueue seeding of its default states
    ///
    /// The seeding job is written in the same transaction as the flow, so a
    /// committed flow always has its states seeded eventually.
    pub async fn create_flow(&self, organisation_id: &str, new: NewFlow) -> Result<Flow> {
        new.validate()?;

        let now = Utc::now();
        let flow = Flow {
            id: Uuid::new_v4().to_string(),
            name: new.name.trim().to_string(),
            controlled: new.controlled,
            organisation_id: organisation_id.to_string(),
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool.begin().await?;

        let org_exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM organisations WHERE id = ?")
            .bind(organisation_id)
            .fetch_optional(&mut *tx)
            .await?;
        if org_exists.is_none() {
            return Err(AppError::NotFound("organisation"));
        }

        sqlx::query(
            r#"
            INSERT INTO flows (id, name, controlled, organisation_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&flow.id)
        .bind(&flow.name)
        .bind(flow.controlled)
        .bind(&flow.organisation_id)
        .bind(flow.created_at)
        .bind(flow.updated_at)
        .execute(&mut *tx)
        .await?;

        self.jobs
            .enqueue_with(&mut tx, organisation_id, &Job::SeedDefaultStates { flow_id: flow.id.clone() }, now)
            .await?;

        tx.commit().await?;

        tracing::info!("🔀 Created flow: {} ({}, controlled: {})", flow.name, flow.id, flow.controlled);
        Ok(flow)
    }

    /// Insert the default states of a flow unless it already has states
    ///
    /// Idempotent, so redelivery of the seeding job is harmless.
    pub async fn seed_default_states(&self, flow_id: &str) -> Result<Vec<State>> {
        let mut tx = self.pool.begin().await?;
        let flow = fetch_flow(&mut tx, flow_id).await?;

        let existing = fetch_states(&mut tx, flow_id).await?;
        if !existing.is_empty() {
            tracing::debug!("⏭️ Flow {} already has {} states, skipping seed", flow_id, existing.len());
            return Ok(existing);
        }

        let now = Utc::now();
        let mut states = Vec::new();
        for (index, name) in flow.default_states().iter().enumerate() {
            let state = State {
                id: Uuid::new_v4().to_string(),
                flow_id: flow.id.clone(),
                state: name.to_string(),
                order: index as i64 + 1,
                created_at: now,
                updated_at: now,
            };
            insert_state(&mut tx, &state).await?;
            states.push(state);
        }

        tx.commit().await?;

        tracing::info!("🌱 Seeded {} default states for flow {}", states.len(), flow_id);
        Ok(states)
    }

    pub async fn get_flow(&self, id: &str) -> Result<Flow> {
        let mut conn = self.pool.acquire().await?;
        fetch_flow(&mut conn, id).await
    }

    /// Load a flow with its states in order
    pub async fn get_flow_with_states(&self, id: &str) -> Result<FlowWithStates> {
        let mut conn = self.pool.acquire().await?;
        let flow = fetch_flow(&mut conn, id).await?;
        let states = fetch_states(&mut conn, id).await?;
        Ok(FlowWithStates { flow, states })
    }

    pub async fn list_flows(&self, organisation_id: &str) -> Result<Vec<Flow>> {
        let rows = sqlx::query(&format!(
            "{} WHERE organisation_id = ? ORDER BY created_at DESC",
            SELECT_FLOW
        ))
        .bind(organisation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(flow_from_row).collect()
    }

    pub async fn update_flow(&self, id: &str, update: UpdateFlow) -> Result<Flow> {
        update.validate()?;

        let mut tx = self.pool.begin().await?;
        let mut flow = fetch_flow(&mut tx, id).await?;

        if let Some(name) = update.name {
            flow.name = name.trim().to_string();
        }
        if let Some(controlled) = update.controlled {
            flow.controlled = controlled;
        }
        flow.updated_at = Utc::now();

        sqlx::query("UPDATE flows SET name = ?, controlled = ?, updated_at = ? WHERE id = ?")
            .bind(&flow.name)
            .bind(flow.controlled)
            .bind(flow.updated_at)
            .bind(&flow.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(flow)
    }

    /// Delete a flow and its states
    ///
    /// Fails while content types still use the flow.
    pub async fn delete_flow(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM flows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("flow"));
        }
        tracing::info!("🗑️ Deleted flow: {}", id);
        Ok(())
    }

    /// Add a state to a flow
    ///
    /// Without an explicit order the state goes after the last one. With an
    /// order, the states at or above it move up by one first.
    pub async fn create_state(&self, flow_id: &str, new: NewState) -> Result<State> {
        new.validate()?;

        let mut tx = self.pool.begin().await?;
        fetch_flow(&mut tx, flow_id).await?;

        let max_order: Option<i64> =
            sqlx::query_scalar("SELECT MAX(state_order) FROM states WHERE flow_id = ?")
                .bind(flow_id)
                .fetch_one(&mut *tx)
                .await?;
        let next = max_order.unwrap_or(0) + 1;

        let order = match new.order {
            None => next,
            Some(order) if order > next => {
                return Err(AppError::Validation(format!(
                    "state order must be between 1 and {}",
                    next
                )));
            }
            Some(order) => {
                shift_orders_above(&mut tx, flow_id, order - 1, 1).await?;
                order
            }
        };

        let now = Utc::now();
        let state = State {
            id: Uuid::new_v4().to_string(),
            flow_id: flow_id.to_string(),
            state: new.state.trim().to_string(),
            order,
            created_at: now,
            updated_at: now,
        };
        insert_state(&mut tx, &state).await?;

        tx.commit().await?;

        tracing::info!("➕ Added state '{}' at order {} to flow {}", state.state, state.order, flow_id);
        Ok(state)
    }

    pub async fn get_state(&self, id: &str) -> Result<State> {
        let mut conn = self.pool.acquire().await?;
        fetch_state(&mut conn, id).await
    }

    /// States of a flow ordered by `order`
    pub async fn list_states(&self, flow_id: &str) -> Result<Vec<State>> {
        let mut conn = self.pool.acquire().await?;
        fetch_flow(&mut conn, flow_id).await?;
        fetch_states(&mut conn, flow_id).await
    }

    pub async fn update_state(&self, id: &str, update: UpdateState) -> Result<State> {
        super::types::validate_name("state", &update.state)?;

        let mut tx = self.pool.begin().await?;
        let mut state = fetch_state(&mut tx, id).await?;
        state.state = update.state.trim().to_string();
        state.updated_at = Utc::now();

        sqlx::query("UPDATE states SET state = ?, updated_at = ? WHERE id = ?")
            .bind(&state.state)
            .bind(state.updated_at)
            .bind(&state.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(state)
    }

    /// Delete a state and close the gap it leaves
    pub async fn delete_state(&self, id: &str) -> Result<State> {
        let mut tx = self.pool.begin().await?;
        let state = fetch_state(&mut tx, id).await?;

        sqlx::query("DELETE FROM states WHERE id = ?")
            .bind(&state.id)
            .execute(&mut *tx)
            .await?;
        shift_orders_above(&mut tx, &state.flow_id, state.order, -1).await?;

        tx.commit().await?;

        tracing::info!("🗑️ Deleted state '{}' from flow {}", state.state, state.flow_id);
        Ok(state)
    }

    /// Add `additive` to the order of every state above `state_id` in its flow
    ///
    /// Runs as one transaction. Returns the flow's states after the shift.
    pub async fn shuffle_order(&self, state_id: &str, additive: i64) -> Result<Vec<State>> {
        let mut tx = self.pool.begin().await?;
        let state = fetch_state(&mut tx, state_id).await?;

        let moved = shift_orders_above(&mut tx, &state.flow_id, state.order, additive).await?;
        let states = fetch_states(&mut tx, &state.flow_id).await?;

        tx.commit().await?;

        tracing::debug!("🔃 Shuffled {} states above order {} by {}", moved, state.order, additive);
        Ok(states)
    }
}

/// Shift every state of `flow_id` with order above `pivot` by `additive`
///
/// Rejects shifts that would collide with the states at or below the pivot or
/// push an order below 1. The rows pass through negative orders so the
/// `(flow_id, state_order)` unique index holds after every single row update.
async fn shift_orders_above(
    conn: &mut SqliteConnection,
    flow_id: &str,
    pivot: i64,
    additive: i64,
) -> Result<u64> {
    if additive == 0 {
        return Ok(0);
    }

    let (lowest_moving, highest_moving): (Option<i64>, Option<i64>) = sqlx::query_as(
        "SELECT MIN(state_order), MAX(state_order) FROM states WHERE flow_id = ? AND state_order > ?",
    )
    .bind(flow_id)
    .bind(pivot)
    .fetch_one(&mut *conn)
    .await?;

    let (Some(lowest_moving), Some(highest_moving)) = (lowest_moving, highest_moving) else {
        return Ok(0);
    };

    let highest_fixed: Option<i64> = sqlx::query_scalar(
        "SELECT MAX(state_order) FROM states WHERE flow_id = ? AND state_order <= ?",
    )
    .bind(flow_id)
    .bind(pivot)
    .fetch_one(&mut *conn)
    .await?;

    let out_of_range = || {
        AppError::Validation(format!("shifting states above order {} by {} is out of range", pivot, additive))
    };
    let new_lowest = lowest_moving.checked_add(additive).ok_or_else(out_of_range)?;
    highest_moving.checked_add(additive).ok_or_else(out_of_range)?;

    if new_lowest < 1 || highest_fixed.is_some_and(|fixed| new_lowest <= fixed) {
        return Err(AppError::Validation(format!(
            "shifting states above order {} by {} would collide with existing orders",
            pivot, additive
        )));
    }

    let moved = sqlx::query(
        "UPDATE states SET state_order = -(state_order + ?) WHERE flow_id = ? AND state_order > ?",
    )
    .bind(additive)
    .bind(flow_id)
    .bind(pivot)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    sqlx::query(
        "UPDATE states SET state_order = -state_order, updated_at = ? WHERE flow_id = ? AND state_order < 0",
    )
    .bind(Utc::now())
    .bind(flow_id)
    .execute(&mut *conn)
    .await?;

    Ok(moved)
}

const SELECT_FLOW: &str =
    "SELECT id, name, controlled, organisation_id, created_at, updated_at FROM flows";

const SELECT_STATE: &str =
    "SELECT id, flow_id, state, state_order, created_at, updated_at FROM states";

pub(crate) async fn fetch_flow(conn: &mut SqliteConnection, id: &str) -> Result<Flow> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_FLOW))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound("flow"))?;
    flow_from_row(&row)
}

pub(crate) async fn fetch_state(conn: &mut SqliteConnection, id: &str) -> Result<State> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_STATE))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound("state"))?;
    state_from_row(&row)
}

pub(crate) async fn fetch_states(conn: &mut SqliteConnection, flow_id: &str) -> Result<Vec<State>> {
    let rows = sqlx::query(&format!("{} WHERE flow_id = ? ORDER BY state_order", SELECT_STATE))
        .bind(flow_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(state_from_row).collect()
}

async fn insert_state(conn: &mut SqliteConnection, state: &State) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO states (id, flow_id, state, state_order, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&state.id)
    .bind(&state.flow_id)
    .bind(&state.state)
    .bind(state.order)
    .bind(state.created_at)
    .bind(state.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn flow_from_row(row: &SqliteRow) -> Result<Flow> {
    Ok(Flow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        controlled: row.try_get("controlled")?,
        organisation_id: row.try_get("organisation_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn state_from_row(row: &SqliteRow) -> Result<State> {
    Ok(State {
        id: row.try_get("id")?,
        flow_id: row.try_get("flow_id")?,
        state: row.try_get("state")?,
        order: row.try_get("state_order")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
