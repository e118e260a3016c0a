//! Stalled-lead sweep. Invoked on a schedule from outside; flags open leads
//! whose last activity (or creation) is at least the configured number of
//! whole days old.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::engine::LeadEngine;
use crate::error::EngineResult;
use crate::models::{Lead, ReminderKind};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StalledLead {
    pub lead_id: Uuid,
    pub name: String,
    pub assigned_to: Option<Uuid>,
    pub idle_days: i64,
}

fn last_touch(store: &Store, lead: &Lead) -> DateTime<Utc> {
    store
        .latest_activity(lead.id)
        .map(|record| record.created_at)
        .unwrap_or(lead.created_at)
}

/// Open leads idle for at least `threshold_days` full days.
pub fn stalled_leads(now: DateTime<Utc>, store: &Store, threshold_days: i64) -> Vec<StalledLead> {
    store
        .open_leads()
        .filter_map(|lead| {
            let idle_days = (now - last_touch(store, lead)).num_days();
            (idle_days >= threshold_days).then(|| StalledLead {
                lead_id: lead.id,
                name: lead.name.clone(),
                assigned_to: lead.assigned_to,
                idle_days,
            })
        })
        .collect()
}

impl LeadEngine {
    /// Creates an immediate no-progress reminder for each stalled lead that
    /// does not already have one pending. Returns the leads that got one.
    pub fn sweep_stalled_leads(&mut self) -> EngineResult<Vec<StalledLead>> {
        let now = self.now();
        let threshold = self.config.org.days_without_progress_alert_threshold;
        let flagged: Vec<StalledLead> = stalled_leads(now, &self.store, threshold)
            .into_iter()
            .filter(|stalled| {
                !self
                    .store
                    .has_pending_reminder(stalled.lead_id, ReminderKind::NoProgress)
            })
            .collect();

        for stalled in &flagged {
            self.add_reminder(
                stalled.lead_id,
                stalled.assigned_to,
                ReminderKind::NoProgress,
                format!("No progress for {} days", stalled.idle_days),
                now,
            );
        }

        tracing::info!(
            flagged = flagged.len(),
            threshold_days = threshold,
            "stalled lead sweep finished"
        );
        self.commit()?;
        Ok(flagged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Session;
    use crate::lifecycle::StatusChange;
    use crate::models::{LeadStatus, Role};
    use crate::test_support::Harness;
    use chrono::Duration;

    #[test]
    fn leads_become_stalled_after_whole_days() {
        let mut h = Harness::new();
        let lead = h.create("Ana Soto", None);

        h.clock.advance(Duration::days(3) - Duration::seconds(1));
        assert!(stalled_leads(h.engine.now(), h.engine.store(), 3).is_empty());

        h.clock.advance(Duration::seconds(1));
        let stalled = stalled_leads(h.engine.now(), h.engine.store(), 3);
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].lead_id, lead.id);
        assert_eq!(stalled[0].idle_days, 3);
    }

    #[test]
    fn sweep_creates_one_pending_reminder_per_lead() {
        let mut h = Harness::new();
        let owner = h.add_staff("Jules Moreno", Role::CaseWorker);
        let stale = h.create("Ana Soto", None);
        let closed = h.create("Avery Lee", None);
        h.engine
            .change_status(&Session::system(), closed.id, StatusChange::to(LeadStatus::Enrolled))
            .unwrap();

        h.clock.advance(Duration::days(4));
        let fresh = h.create("Kiara Patel", None);

        let flagged = h.engine.sweep_stalled_leads().unwrap();
        let ids: Vec<Uuid> = flagged.iter().map(|s| s.lead_id).collect();
        assert_eq!(ids, vec![stale.id]);
        assert!(!ids.contains(&fresh.id));

        let reminder = h.engine.store().reminders_for(stale.id).next().unwrap();
        assert_eq!(reminder.kind, ReminderKind::NoProgress);
        assert_eq!(reminder.fire_at, h.engine.now());
        assert_eq!(reminder.user_id, Some(owner.id));
        assert_eq!(reminder.description, "No progress for 4 days");

        assert!(h.engine.sweep_stalled_leads().unwrap().is_empty());
        assert_eq!(h.engine.store().reminders_for(stale.id).count(), 1);
    }
}
