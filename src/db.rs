use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::EngineResult;
use crate::models::{ActivityRecord, Lead, Reminder, StaffUser};
use crate::sync::{RemoteStore, SyncTask};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres replica of the local store, written by the sync worker.
#[derive(Clone)]
pub struct PgRemote {
    pool: PgPool,
}

impl PgRemote {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert_lead(&self, lead: &Lead) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO admissions.leads
            (id, name, email, phone, program_id, programs_of_interest, status, assigned_to,
             created_at, first_contact_at, next_contact_at, exam_date, closed_at,
             last_whatsapp_at, enrolled, rejected, new_interest, new_interest_at, queued,
             created_by, created_by_name, created_by_role, channel, notes, reactivated_from)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23, $24, $25)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                email = EXCLUDED.email,
                phone = EXCLUDED.phone,
                program_id = EXCLUDED.program_id,
                programs_of_interest = EXCLUDED.programs_of_interest,
                status = EXCLUDED.status,
                assigned_to = EXCLUDED.assigned_to,
                first_contact_at = EXCLUDED.first_contact_at,
                next_contact_at = EXCLUDED.next_contact_at,
                exam_date = EXCLUDED.exam_date,
                closed_at = EXCLUDED.closed_at,
                last_whatsapp_at = EXCLUDED.last_whatsapp_at,
                enrolled = EXCLUDED.enrolled,
                rejected = EXCLUDED.rejected,
                new_interest = EXCLUDED.new_interest,
                new_interest_at = EXCLUDED.new_interest_at,
                queued = EXCLUDED.queued,
                notes = EXCLUDED.notes
            "#,
        )
        .bind(lead.id)
        .bind(&lead.name)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(&lead.program_id)
        .bind(&lead.programs_of_interest)
        .bind(lead.status.as_str())
        .bind(lead.assigned_to)
        .bind(lead.created_at)
        .bind(lead.first_contact_at)
        .bind(lead.next_contact_at)
        .bind(lead.exam_date)
        .bind(lead.closed_at)
        .bind(lead.last_whatsapp_at)
        .bind(lead.enrolled)
        .bind(lead.rejected)
        .bind(lead.new_interest)
        .bind(lead.new_interest_at)
        .bind(lead.queued)
        .bind(lead.created_by)
        .bind(&lead.created_by_name)
        .bind(lead.created_by_role.map(|role| role.as_str()))
        .bind(lead.channel.as_str())
        .bind(&lead.notes)
        .bind(lead.reactivated_from)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_lead(&self, lead_id: uuid::Uuid) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;
        for statement in [
            "DELETE FROM admissions.activity WHERE lead_id = $1",
            "DELETE FROM admissions.reminders WHERE lead_id = $1",
            "DELETE FROM admissions.leads WHERE id = $1",
        ] {
            sqlx::query(statement).bind(lead_id).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn append_activity(&self, record: &ActivityRecord) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO admissions.activity (id, lead_id, user_id, kind, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.lead_id)
        .bind(record.user_id)
        .bind(record.kind.as_str())
        .bind(&record.description)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_staff(&self, user: &StaffUser) -> EngineResult<()> {
        let metrics = user.metrics.clone().unwrap_or_default();
        sqlx::query(
            r#"
            INSERT INTO admissions.staff_users
            (id, name, email, role, active, leads_received, leads_contacted, leads_enrolled,
             avg_first_contact_hours, conversion_rate, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                email = EXCLUDED.email,
                role = EXCLUDED.role,
                active = EXCLUDED.active,
                leads_received = EXCLUDED.leads_received,
                leads_contacted = EXCLUDED.leads_contacted,
                leads_enrolled = EXCLUDED.leads_enrolled,
                avg_first_contact_hours = EXCLUDED.avg_first_contact_hours,
                conversion_rate = EXCLUDED.conversion_rate
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(user.active)
        .bind(metrics.leads_received as i32)
        .bind(metrics.leads_contacted as i32)
        .bind(metrics.leads_enrolled as i32)
        .bind(metrics.avg_first_contact_hours)
        .bind(metrics.conversion_rate)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_staff(&self, staff_id: uuid::Uuid) -> EngineResult<()> {
        sqlx::query("DELETE FROM admissions.staff_users WHERE id = $1")
            .bind(staff_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_reminder(&self, reminder: &Reminder) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO admissions.reminders
            (id, lead_id, user_id, kind, description, fire_at, fired, outcome, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE
            SET fired = EXCLUDED.fired, outcome = EXCLUDED.outcome
            "#,
        )
        .bind(reminder.id)
        .bind(reminder.lead_id)
        .bind(reminder.user_id)
        .bind(reminder.kind.as_str())
        .bind(&reminder.description)
        .bind(reminder.fire_at)
        .bind(reminder.fired)
        .bind(&reminder.outcome)
        .bind(reminder.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for PgRemote {
    async fn apply(&self, task: &SyncTask) -> EngineResult<()> {
        match task {
            SyncTask::UpsertLead(lead) => self.upsert_lead(lead).await,
            SyncTask::DeleteLead(lead_id) => self.delete_lead(*lead_id).await,
            SyncTask::AppendActivity(record) => self.append_activity(record).await,
            SyncTask::UpsertStaff(user) => self.upsert_staff(user).await,
            SyncTask::DeleteStaff(staff_id) => self.delete_staff(*staff_id).await,
            SyncTask::UpsertReminder(reminder) => self.upsert_reminder(reminder).await,
        }
    }
}
