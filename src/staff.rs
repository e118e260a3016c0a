use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::capability::Session;
use crate::engine::LeadEngine;
use crate::error::{EngineError, EngineResult};
use crate::models::{Lead, Role, StaffMetrics, StaffUser};
use crate::store::Store;
use crate::sync::SyncTask;

const METRICS_WINDOW_DAYS: i64 = 30;

/// Metrics for one staff member over the leads they received since `since`.
/// `None` when nothing was received in the window.
pub fn compute_metrics(store: &Store, staff_id: Uuid, since: DateTime<Utc>) -> Option<StaffMetrics> {
    let received: Vec<&Lead> = store
        .leads_assigned_to(staff_id)
        .filter(|lead| lead.created_at >= since)
        .collect();
    if received.is_empty() {
        return None;
    }

    let latencies: Vec<f64> = received
        .iter()
        .filter_map(|lead| lead.first_contact_at.map(|at| at - lead.created_at))
        .map(|latency| latency.num_seconds() as f64 / 3600.0)
        .collect();
    let enrolled = received.iter().filter(|lead| lead.enrolled).count();

    let avg_first_contact_hours = if latencies.is_empty() {
        None
    } else {
        Some(latencies.iter().sum::<f64>() / latencies.len() as f64)
    };

    Some(StaffMetrics {
        leads_received: received.len() as u32,
        leads_contacted: latencies.len() as u32,
        leads_enrolled: enrolled as u32,
        avg_first_contact_hours,
        conversion_rate: Some(enrolled as f64 / received.len() as f64),
    })
}

impl LeadEngine {
    pub fn add_staff(
        &mut self,
        session: &Session,
        name: &str,
        email: &str,
        role: Role,
    ) -> EngineResult<StaffUser> {
        session.require(session.capabilities.can_manage_users, "add staff")?;
        let name = name.trim();
        let email = email.trim().to_lowercase();
        if name.is_empty() {
            return Err(EngineError::InvalidInput("staff name is required".to_string()));
        }
        if !email.contains('@') {
            return Err(EngineError::InvalidInput(format!("invalid email `{email}`")));
        }
        if self.store.staff_by_email(&email).is_some() {
            return Err(EngineError::InvalidInput(format!(
                "a staff user with email {email} already exists"
            )));
        }

        let user = StaffUser {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email,
            role,
            active: true,
            metrics: None,
            created_at: self.now(),
        };
        self.store.insert_staff(user.clone());
        self.replicate(SyncTask::UpsertStaff(user.clone()));
        tracing::info!(staff = %user.id, role = role.as_str(), "staff user added");
        self.commit()?;
        Ok(user)
    }

    /// Inactive staff keep their leads but leave the assignment pool.
    pub fn set_staff_active(
        &mut self,
        session: &Session,
        staff_id: Uuid,
        active: bool,
    ) -> EngineResult<StaffUser> {
        session.require(session.capabilities.can_manage_users, "update staff")?;
        let mut user = self.store.require_staff(staff_id)?.clone();
        user.active = active;
        self.store.replace_staff(user.clone())?;
        self.replicate(SyncTask::UpsertStaff(user.clone()));
        self.commit()?;
        Ok(user)
    }

    /// Fails while the user still owns leads; migrate them first. Nobody
    /// removes their own account, and admin-tier accounts are removed only
    /// by a super admin.
    pub fn remove_staff(&mut self, session: &Session, staff_id: Uuid) -> EngineResult<StaffUser> {
        session.require(session.capabilities.can_manage_users, "remove staff")?;
        session.require(session.user_id != Some(staff_id), "remove own account")?;
        let target = self.store.require_staff(staff_id)?.role;
        if matches!(target, Role::SuperAdmin | Role::KeyMaster) {
            let by_super_admin = session.role.map_or(true, |role| role == Role::SuperAdmin);
            session.require(by_super_admin, "remove admin account")?;
        }
        let user = self.store.remove_staff(staff_id)?;
        self.replicate(SyncTask::DeleteStaff(staff_id));
        tracing::info!(staff = %staff_id, "staff user removed");
        self.commit()?;
        Ok(user)
    }

    /// Recomputes case worker metrics over the trailing 30 days.
    pub fn refresh_staff_metrics(&mut self) -> EngineResult<Vec<StaffUser>> {
        let since = self.now() - Duration::days(METRICS_WINDOW_DAYS);
        let workers: Vec<StaffUser> = self
            .store
            .staff_with_role(Role::CaseWorker)
            .cloned()
            .collect();

        let mut refreshed = Vec::with_capacity(workers.len());
        for mut user in workers {
            user.metrics = compute_metrics(&self.store, user.id, since);
            self.store.replace_staff(user.clone())?;
            self.replicate(SyncTask::UpsertStaff(user.clone()));
            refreshed.push(user);
        }
        tracing::debug!(staff = refreshed.len(), "staff metrics refreshed");
        self.commit()?;
        Ok(refreshed)
    }
}
