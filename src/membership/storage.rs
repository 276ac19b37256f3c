/// SQLite persistence for plans, memberships and payments
///
/// `update_membership` is the one multi-record write: the membership change,
/// the payment row and the follow-up jobs commit together or not at all.

use crate::{
    database::Database,
    error::{AppError, Result},
    membership::{
        catalog::PlanCatalog,
        types::{
            payment_action, plan_duration, validate_prices, Membership, NewPlan, Payment,
            PaymentNotification, PaymentOutcome, PaymentStatus, Plan, UpdatePlan, TRIAL_DURATION_DAYS,
        },
    },
    runtime::jobs::{Job, JobQueue},
};
use chrono::{Datelike, Duration, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct MembershipStorage {
    pool: SqlitePool,
    jobs: JobQueue,
}

impl MembershipStorage {
    pub fn new(db: &Database, jobs: JobQueue) -> Self {
        Self { pool: db.pool().clone(), jobs }
    }

    pub async fn create_plan(&self, new: NewPlan) -> Result<Plan> {
        new.validate()?;

        let plan = Plan {
            id: Uuid::new_v4().to_string(),
            name: new.name.trim().to_string(),
            description: new.description,
            monthly_amount: new.monthly_amount,
            yearly_amount: new.yearly_amount,
        };
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO plans (id, name, description, monthly_amount, yearly_amount, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&plan.id)
        .bind(&plan.name)
        .bind(&plan.description)
        .bind(plan.monthly_amount)
        .bind(plan.yearly_amount)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::info!("💳 Created plan: {} ({}/{})", plan.name, plan.monthly_amount, plan.yearly_amount);
        Ok(plan)
    }

    pub async fn get_plan(&self, id: &str) -> Result<Plan> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_PLAN))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound("plan"))?;
        plan_from_row(&row)
    }

    pub async fn list_plans(&self) -> Result<Vec<Plan>> {
        let rows = sqlx::query(&format!("{} ORDER BY monthly_amount", SELECT_PLAN))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(plan_from_row).collect()
    }

    pub async fn update_plan(&self, id: &str, update: UpdatePlan) -> Result<Plan> {
        let mut plan = self.get_plan(id).await?;

        if let Some(name) = update.name {
            crate::flow::types::validate_name("plan", &name)?;
            plan.name = name.trim().to_string();
        }
        if let Some(description) = update.description {
            plan.description = description;
        }
        plan.monthly_amount = update.monthly_amount.unwrap_or(plan.monthly_amount);
        plan.yearly_amount = update.yearly_amount.unwrap_or(plan.yearly_amount);
        validate_prices(plan.monthly_amount, plan.yearly_amount)?;

        sqlx::query(
            r#"
            UPDATE plans SET name = ?, description = ?, monthly_amount = ?, yearly_amount = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&plan.name)
        .bind(&plan.description)
        .bind(plan.monthly_amount)
        .bind(plan.yearly_amount)
        .bind(Utc::now())
        .bind(&plan.id)
        .execute(&self.pool)
        .await?;

        Ok(plan)
    }

    /// Start an organisation on a trial period of `plan_id`
    pub async fn create_membership(&self, organisation_id: &str, plan_id: &str) -> Result<Membership> {
        self.get_plan(plan_id).await?;

        let now = Utc::now();
        let membership = Membership {
            id: Uuid::new_v4().to_string(),
            organisation_id: organisation_id.to_string(),
            plan_id: plan_id.to_string(),
            start_date: now,
            end_date: now + Duration::days(TRIAL_DURATION_DAYS),
            plan_duration: TRIAL_DURATION_DAYS,
            is_expired: false,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO memberships
                (id, organisation_id, plan_id, start_date, end_date, plan_duration, is_expired, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&membership.id)
        .bind(&membership.organisation_id)
        .bind(&membership.plan_id)
        .bind(membership.start_date)
        .bind(membership.end_date)
        .bind(membership.plan_duration)
        .bind(membership.is_expired)
        .bind(membership.created_at)
        .bind(membership.updated_at)
        .execute(&mut *tx)
        .await?;

        self.jobs
            .enqueue_with(
                &mut tx,
                organisation_id,
                &Job::MembershipExpiryCheck { membership_id: membership.id.clone() },
                membership.end_date,
            )
            .await?;
        tx.commit().await?;

        tracing::info!("🎟️ Created trial membership {} for organisation {}", membership.id, organisation_id);
        Ok(membership)
    }

    pub async fn get_membership(&self, id: &str) -> Result<Membership> {
        let mut conn = self.pool.acquire().await?;
        fetch_membership(&mut conn, id).await
    }

    pub async fn get_payment(&self, id: &str) -> Result<Payment> {
        let mut conn = self.pool.acquire().await?;
        fetch_payment(&mut conn, id).await
    }

    pub async fn list_payments(&self, membership_id: &str) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!("{} WHERE membership_id = ? ORDER BY created_at DESC", SELECT_PAYMENT))
            .bind(membership_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(payment_from_row).collect()
    }

    /// Apply a gateway payment to a membership
    ///
    /// A failed payment is recorded and nothing else changes. Otherwise the
    /// amount must match one of the new plan's prices; the membership is moved
    /// to the new plan for the paid period, the payment is recorded and
    /// invoice generation plus the expiry check are enqueued, all in one
    /// transaction.
    pub async fn update_membership(
        &self,
        catalog: &dyn PlanCatalog,
        user_id: &str,
        membership_id: &str,
        plan_id: &str,
        notification: PaymentNotification,
    ) -> Result<PaymentOutcome> {
        let membership = self.get_membership(membership_id).await?;
        let new_plan = catalog.require_plan(plan_id)?;
        let old_plan = catalog.require_plan(&membership.plan_id)?;

        let user_organisation: Option<String> = sqlx::query_scalar("SELECT organisation_id FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        match user_organisation {
            None => return Err(AppError::NotFound("user")),
            Some(org) if org != membership.organisation_id => {
                return Err(AppError::Validation(
                    "user does not belong to the membership's organisation".into(),
                ));
            }
            Some(_) => {}
        }

        let now = Utc::now();
        let mut payment = Payment {
            id: Uuid::new_v4().to_string(),
            transaction_id: notification.transaction_id,
            amount: notification.amount,
            status: notification.status,
            action: Some(payment_action(&old_plan, &new_plan)),
            organisation_id: membership.organisation_id.clone(),
            creator_id: user_id.to_string(),
            membership_id: membership.id.clone(),
            from_plan_id: old_plan.id.clone(),
            to_plan_id: new_plan.id.clone(),
            start_date: None,
            end_date: None,
            invoice_number: None,
            meta: notification.meta,
            created_at: now,
            updated_at: now,
        };

        if payment.status.is_failure() {
            let mut conn = self.pool.acquire().await?;
            insert_payment(&mut conn, &payment).await?;
            tracing::warn!(
                "💸 Recorded {} payment {} for membership {} without applying it",
                payment.status, payment.transaction_id, membership.id
            );
            return Ok(PaymentOutcome::Failed { payment });
        }

        let duration = plan_duration(payment.amount, &new_plan)?;
        let end_date = now + Duration::days(duration);
        payment.start_date = Some(now);
        payment.end_date = Some(end_date);

        let updated = Membership {
            plan_id: new_plan.id.clone(),
            start_date: now,
            end_date,
            plan_duration: duration,
            is_expired: false,
            updated_at: now,
            ..membership
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE memberships
            SET plan_id = ?, start_date = ?, end_date = ?, plan_duration = ?, is_expired = 0, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&updated.plan_id)
        .bind(updated.start_date)
        .bind(updated.end_date)
        .bind(updated.plan_duration)
        .bind(updated.updated_at)
        .bind(&updated.id)
        .execute(&mut *tx)
        .await?;

        insert_payment(&mut tx, &payment).await?;

        self.jobs
            .enqueue_with(
                &mut tx,
                &updated.organisation_id,
                &Job::GenerateInvoice { payment_id: payment.id.clone() },
                now,
            )
            .await?;
        self.jobs
            .enqueue_with(
                &mut tx,
                &updated.organisation_id,
                &Job::MembershipExpiryCheck { membership_id: updated.id.clone() },
                end_date,
            )
            .await?;

        tx.commit().await?;

        tracing::info!(
            "🎟️ Membership {} moved to plan {} for {} days ({:?})",
            updated.id, new_plan.name, duration, payment.action
        );
        Ok(PaymentOutcome::Applied { membership: updated, payment })
    }

    /// Assign the next invoice number to a payment, once
    pub async fn generate_invoice(&self, payment_id: &str) -> Result<Payment> {
        let mut tx = self.pool.begin().await?;
        let mut payment = fetch_payment(&mut tx, payment_id).await?;

        if payment.invoice_number.is_some() {
            return Ok(payment);
        }
        if payment.status.is_failure() {
            return Err(AppError::Validation("unsettled payments are not invoiced".into()));
        }

        let now = Utc::now();
        let sequence = next_invoice_sequence(&mut tx, now.year()).await?;
        let invoice_number = format_invoice_number(now.year(), sequence);

        sqlx::query("UPDATE payments SET invoice_number = ?, updated_at = ? WHERE id = ?")
            .bind(&invoice_number)
            .bind(now)
            .bind(&payment.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!("🧾 Issued invoice {} for payment {}", invoice_number, payment.transaction_id);
        payment.invoice_number = Some(invoice_number);
        payment.updated_at = now;
        Ok(payment)
    }

    /// Mark a membership expired once its end date has passed
    ///
    /// A renewed membership has a later end date by the time the check runs,
    /// so stale checks are no-ops.
    pub async fn check_expiry(&self, membership_id: &str) -> Result<Membership> {
        let mut membership = self.get_membership(membership_id).await?;
        let now = Utc::now();

        if membership.is_expired || membership.end_date > now {
            return Ok(membership);
        }

        sqlx::query("UPDATE memberships SET is_expired = 1, updated_at = ? WHERE id = ? AND end_date <= ?")
            .bind(now)
            .bind(&membership.id)
            .bind(now)
            .execute(&self.pool)
            .await?;

        tracing::info!("⌛ Membership {} expired", membership.id);
        membership.is_expired = true;
        membership.updated_at = now;
        Ok(membership)
    }
}

pub fn format_invoice_number(year: i32, sequence: i64) -> String {
    format!("INV-{}-{:05}", year, sequence)
}

/// Bump the invoice counter of `year`; numbering restarts at 1 each year
async fn next_invoice_sequence(conn: &mut SqliteConnection, year: i32) -> Result<i64> {
    let sequence = sqlx::query_scalar(
        r#"
        INSERT INTO invoice_counters (year, last_sequence) VALUES (?, 1)
        ON CONFLICT(year) DO UPDATE SET last_sequence = last_sequence + 1
        RETURNING last_sequence
        "#,
    )
    .bind(year)
    .fetch_one(conn)
    .await?;
    Ok(sequence)
}

async fn insert_payment(conn: &mut SqliteConnection, payment: &Payment) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO payments
            (id, transaction_id, amount, status, action, organisation_id, creator_id, membership_id,
             from_plan_id, to_plan_id, start_date, end_date, invoice_number, meta, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&payment.id)
    .bind(&payment.transaction_id)
    .bind(payment.amount)
    .bind(payment.status.as_str())
    .bind(payment.action.map(|action| action.as_str()))
    .bind(&payment.organisation_id)
    .bind(&payment.creator_id)
    .bind(&payment.membership_id)
    .bind(&payment.from_plan_id)
    .bind(&payment.to_plan_id)
    .bind(payment.start_date)
    .bind(payment.end_date)
    .bind(&payment.invoice_number)
    .bind(serde_json::to_string(&payment.meta)?)
    .bind(payment.created_at)
    .bind(payment.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

const SELECT_PLAN: &str = "SELECT id, name, description, monthly_amount, yearly_amount FROM plans";

const SELECT_MEMBERSHIP: &str = r#"
    SELECT id, organisation_id, plan_id, start_date, end_date, plan_duration, is_expired, created_at, updated_at
    FROM memberships
"#;

const SELECT_PAYMENT: &str = r#"
    SELECT id, transaction_id, amount, status, action, organisation_id, creator_id, membership_id,
           from_plan_id, to_plan_id, start_date, end_date, invoice_number, meta, created_at, updated_at
    FROM payments
"#;

async fn fetch_membership(conn: &mut SqliteConnection, id: &str) -> Result<Membership> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_MEMBERSHIP))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound("membership"))?;

    Ok(Membership {
        id: row.try_get("id")?,
        organisation_id: row.try_get("organisation_id")?,
        plan_id: row.try_get("plan_id")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        plan_duration: row.try_get("plan_duration")?,
        is_expired: row.try_get("is_expired")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn fetch_payment(conn: &mut SqliteConnection, id: &str) -> Result<Payment> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_PAYMENT))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound("payment"))?;
    payment_from_row(&row)
}

fn plan_from_row(row: &SqliteRow) -> Result<Plan> {
    Ok(Plan {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        monthly_amount: row.try_get("monthly_amount")?,
        yearly_amount: row.try_get("yearly_amount")?,
    })
}

fn payment_from_row(row: &SqliteRow) -> Result<Payment> {
    let status: String = row.try_get("status")?;
    let action: Option<String> = row.try_get("action")?;
    let meta: String = row.try_get("meta")?;

    Ok(Payment {
        id: row.try_get("id")?,
        transaction_id: row.try_get("transaction_id")?,
        amount: row.try_get("amount")?,
        status: status.parse::<PaymentStatus>()?,
        action: action.map(|a| a.parse()).transpose()?,
        organisation_id: row.try_get("organisation_id")?,
        creator_id: row.try_get("creator_id")?,
        membership_id: row.try_get("membership_id")?,
        from_plan_id: row.try_get("from_plan_id")?,
        to_plan_id: row.try_get("to_plan_id")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        invoice_number: row.try_get("invoice_number")?,
        meta: serde_json::from_str(&meta)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
