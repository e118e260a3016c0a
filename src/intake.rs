//! Lead intake: creation with automatic assignment, the duplicate decision
//! point, merge into an existing lead, and reactivation of rejected leads.

use serde::Serialize;
use uuid::Uuid;

use crate::assignment::{choose_assignee, AssignmentOutcome};
use crate::capability::Session;
use crate::dedup::{detect, resolve, DuplicateAction, DuplicateMatch, DuplicateQuery, Resolution};
use crate::engine::LeadEngine;
use crate::error::{EngineError, EngineResult};
use crate::models::{
    ActivityKind, EntryChannel, Lead, LeadStatus, NewLead, NotificationKind, QueueEntry, Role,
};
use crate::sync::SyncTask;

#[derive(Debug, Clone, Serialize)]
pub struct Created {
    pub lead: Lead,
    /// `None` when the caller picked the assignee.
    pub assignment: Option<AssignmentOutcome>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IntakeOutcome {
    Created(Created),
    Merged { lead: Lead },
    Duplicates { matches: Vec<DuplicateMatch> },
    Cancelled,
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

impl LeadEngine {
    /// Creates a lead without looking for duplicates.
    pub fn create_lead(&mut self, session: &Session, new: NewLead) -> EngineResult<Created> {
        let created = self.insert_new_lead(session, new, None)?;
        self.commit()?;
        Ok(created)
    }

    pub(crate) fn insert_new_lead(
        &mut self,
        session: &Session,
        new: NewLead,
        reactivated_from: Option<Uuid>,
    ) -> EngineResult<Created> {
        session.require(session.capabilities.can_create_leads, "create lead")?;
        let name = new.name.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidInput("lead name is required".to_string()));
        }
        if let Some(staff_id) = new.assigned_to {
            self.store.require_staff(staff_id)?;
        }

        let channel = if session.role == Some(Role::DataEntry) {
            EntryChannel::StaffEntry
        } else {
            new.channel.unwrap_or(EntryChannel::Manual)
        };
        let assignment = match new.assigned_to {
            Some(_) => None,
            None => Some(choose_assignee(&self.store, &self.config)),
        };
        let assigned_to = new
            .assigned_to
            .or_else(|| assignment.as_ref().and_then(AssignmentOutcome::staff_id));

        let now = self.now();
        let mut lead = Lead {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: clean(new.email.as_deref()).map(|email| email.to_lowercase()),
            phone: clean(new.phone.as_deref()),
            program_id: clean(new.program_id.as_deref()),
            programs_of_interest: Vec::new(),
            status: LeadStatus::New,
            assigned_to,
            created_at: now,
            first_contact_at: None,
            next_contact_at: Some(now),
            exam_date: None,
            closed_at: None,
            last_whatsapp_at: None,
            enrolled: false,
            rejected: false,
            new_interest: false,
            new_interest_at: None,
            queued: assigned_to.is_none(),
            created_by: session.user_id,
            created_by_name: session.name.clone(),
            created_by_role: session.role,
            channel,
            notes: new.notes.unwrap_or_default(),
            reactivated_from,
        };
        if let Some(program_id) = lead.program_id.clone() {
            lead.add_interest(&program_id);
        }

        self.store.insert_lead(lead.clone());
        self.replicate(SyncTask::UpsertLead(lead.clone()));
        self.log_activity(
            lead.id,
            session,
            ActivityKind::Creation,
            format!("Lead created via {} by {}", channel.as_str(), session.name),
        );

        match (&assignment, assigned_to) {
            (Some(AssignmentOutcome::Deferred { reason }), _) => {
                self.store.enqueue(QueueEntry {
                    lead_id: lead.id,
                    priority: 0,
                    enqueued_at: now,
                });
                let message = format!(
                    "Lead {} is waiting for assignment ({})",
                    lead.name,
                    reason.as_str()
                );
                self.notify_admins(NotificationKind::QueueBacklog, &message, Some(lead.id));
                tracing::info!(lead = %lead.id, reason = reason.as_str(), "lead queued");
            }
            (_, Some(staff_id)) => {
                self.notify(
                    staff_id,
                    NotificationKind::NewLead,
                    format!("New lead assigned: {}", lead.name),
                    Some(lead.id),
                );
                tracing::info!(lead = %lead.id, staff = %staff_id, "lead created and assigned");
            }
            (_, None) => {}
        }

        Ok(Created { lead, assignment })
    }

    /// Existing leads that look like the same person as `new`.
    pub fn check_duplicates(&self, new: &NewLead) -> Vec<DuplicateMatch> {
        let query = DuplicateQuery {
            name: new.name.trim(),
            email: new.email.as_deref(),
            phone: new.phone.as_deref(),
        };
        detect(&self.store, &query, &self.config.tuning)
    }

    /// Runs the duplicate check, then applies the operator's choice. With no
    /// choice and at least one match, nothing is written and the matches are
    /// returned for the operator to decide.
    pub fn intake(
        &mut self,
        session: &Session,
        new: NewLead,
        action: Option<DuplicateAction>,
    ) -> EngineResult<IntakeOutcome> {
        session.require(session.capabilities.can_create_leads, "create lead")?;
        let matches = self.check_duplicates(&new);
        if matches.is_empty() {
            return self.create_lead(session, new).map(IntakeOutcome::Created);
        }
        let Some(action) = action else {
            return Ok(IntakeOutcome::Duplicates { matches });
        };

        match resolve(&matches, action)? {
            Resolution::Create => self.create_lead(session, new).map(IntakeOutcome::Created),
            Resolution::MergeInto(lead_id) => {
                let program_id = new.program_id.as_deref().unwrap_or_default();
                let lead = self.merge_into(session, lead_id, program_id)?;
                Ok(IntakeOutcome::Merged { lead })
            }
            Resolution::Abort => Ok(IntakeOutcome::Cancelled),
        }
    }

    /// Records a repeat inquiry on an existing lead. The primary program is
    /// kept; both it and the new program join the interest set. A rejected
    /// lead is reopened in place.
    pub fn merge_into(
        &mut self,
        session: &Session,
        lead_id: Uuid,
        program_id: &str,
    ) -> EngineResult<Lead> {
        session.require(session.capabilities.can_create_leads, "merge lead")?;
        let mut lead = self.store.require_lead(lead_id)?.clone();
        let program_id = program_id.trim();

        if let Some(primary) = lead.program_id.clone() {
            lead.add_interest(&primary);
        }
        if !program_id.is_empty() {
            lead.add_interest(program_id);
        }
        let primary = self.store.program_name(lead.program_id.as_deref());
        let description = if program_id.is_empty() {
            format!("Repeat contact merged (interested in {primary})")
        } else {
            format!(
                "Added interest in {} (already interested in {primary})",
                self.store.program_name(Some(program_id))
            )
        };
        self.log_activity(lead_id, session, ActivityKind::Merge, description);

        if lead.rejected {
            lead.rejected = false;
            lead.closed_at = None;
            lead.status = LeadStatus::New;
            self.log_activity(
                lead_id,
                session,
                ActivityKind::Reactivated,
                "Lead reactivated by a new inquiry",
            );
        }

        tracing::info!(
            lead = %lead_id,
            interests = lead.programs_of_interest.len(),
            "inquiry merged into existing lead"
        );
        self.save_lead(lead.clone())?;
        self.commit()?;
        Ok(lead)
    }

    /// Starts a fresh lead from a rejected one. The new record points back at
    /// the original, which is left untouched.
    pub fn reactivate(&mut self, session: &Session, lead_id: Uuid) -> EngineResult<Created> {
        let original = self.store.require_lead(lead_id)?.clone();
        if !original.rejected {
            return Err(EngineError::InvalidInput(
                "only rejected leads can be reactivated".to_string(),
            ));
        }
        let previous_notes = if original.notes.is_empty() {
            "-"
        } else {
            original.notes.as_str()
        };
        let new = NewLead {
            name: original.name.clone(),
            email: original.email.clone(),
            phone: original.phone.clone(),
            program_id: original.program_id.clone(),
            notes: Some(format!("Reactivated. Previous notes: {previous_notes}")),
            channel: Some(original.channel),
            assigned_to: None,
        };

        let created = self.insert_new_lead(session, new, Some(lead_id))?;
        self.log_activity(
            created.lead.id,
            session,
            ActivityKind::Reactivated,
            format!("Reactivated from earlier lead ({})", original.name),
        );
        self.commit()?;
        Ok(created)
    }

    /// Re-runs assignment over queued leads in queue order, stopping at the
    /// first lead that would be deferred again.
    pub fn drain_queue(&mut self, session: &Session) -> EngineResult<Vec<Lead>> {
        session.require(session.capabilities.can_reassign, "drain queue")?;
        let waiting: Vec<Uuid> = self
            .store
            .queue_ordered()
            .iter()
            .map(|entry| entry.lead_id)
            .collect();

        let mut assigned = Vec::new();
        for lead_id in waiting {
            let Some(staff_id) = choose_assignee(&self.store, &self.config).staff_id() else {
                break;
            };
            let Some(lead) = self.store.lead(lead_id) else {
                self.store.dequeue(lead_id);
                continue;
            };
            let mut lead = lead.clone();
            let description = format!(
                "Reassigned from {} to {}",
                self.staff_name(lead.assigned_to),
                self.staff_name(Some(staff_id))
            );
            self.apply_assignment(session, &mut lead, staff_id, description);
            self.save_lead(lead.clone())?;
            assigned.push(lead);
        }

        if !assigned.is_empty() {
            tracing::info!(
                assigned = assigned.len(),
                remaining = self.store.queue_len(),
                "queue drained"
            );
        }
        self.commit()?;
        Ok(assigned)
    }

    /// Age of the oldest queued lead in hours, if any are waiting.
    pub fn oldest_queue_wait_hours(&self) -> Option<i64> {
        let now = self.now();
        self.store
            .queue_ordered()
            .iter()
            .map(|entry| (now - entry.enqueued_at).num_hours())
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::DeferReason;
    use crate::config::Config;
    use crate::dedup::MatchSignal;
    use crate::lifecycle::StatusChange;
    use crate::models::StaffMetrics;
    use crate::test_support::Harness;

    fn inquiry(name: &str, email: Option<&str>) -> NewLead {
        NewLead {
            name: name.to_string(),
            email: email.map(str::to_string),
            program_id: Some("piano".to_string()),
            ..NewLead::default()
        }
    }

    #[test]
    fn ana_soto_moves_from_intake_to_enrollment() {
        let mut h = Harness::new();
        h.add_staff("Jules Moreno", Role::CaseWorker);
        let mut strong = h.add_staff("Kiara Patel", Role::CaseWorker);
        strong.metrics = Some(StaffMetrics {
            conversion_rate: Some(0.4),
            avg_first_contact_hours: Some(2.0),
            ..StaffMetrics::default()
        });
        h.engine.store.replace_staff(strong.clone()).unwrap();
        let admin = Session::system();

        let first = match h
            .engine
            .intake(&admin, inquiry("Ana Soto", Some("ana@x.com")), None)
            .unwrap()
        {
            IntakeOutcome::Created(created) => created.lead,
            other => panic!("expected creation, got {other:?}"),
        };
        assert_eq!(first.assigned_to, Some(strong.id));

        let matches = h.engine.check_duplicates(&inquiry("Ana B", Some("ANA@x.com")));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].score, 100);
        assert!(matches[0].signals.contains(&MatchSignal::Email));
        assert!(matches!(
            h.engine
                .intake(&admin, inquiry("Ana B", Some("ana@x.com")), None)
                .unwrap(),
            IntakeOutcome::Duplicates { .. }
        ));
        assert_eq!(h.engine.store().leads().len(), 1);

        let contacted = h
            .engine
            .change_status(&admin, first.id, StatusChange::to(LeadStatus::Contacted))
            .unwrap();
        assert!(contacted.first_contact_at.is_some());
        let status_changes = h
            .engine
            .store()
            .activity_for(first.id)
            .iter()
            .filter(|record| record.kind == ActivityKind::StatusChange)
            .count();
        assert_eq!(status_changes, 1);

        let enrolled = h
            .engine
            .change_status(&admin, first.id, StatusChange::to(LeadStatus::Enrolled))
            .unwrap();
        assert!(enrolled.enrolled && enrolled.closed_at.is_some());
        assert!(h
            .engine
            .store()
            .reminders_for(first.id)
            .all(|reminder| reminder.fired));
    }

    #[test]
    fn third_lead_is_deferred_when_the_only_worker_is_full() {
        let mut config = Config::default();
        config.org.max_daily_leads_per_staff = 2;
        let mut h = Harness::with_config(config);
        let worker = h.add_staff("Jules Moreno", Role::CaseWorker);
        let admin = h.add_staff("Carolina Vasquez", Role::KeyMaster);

        assert_eq!(h.create("Ana Soto", None).assigned_to, Some(worker.id));
        assert_eq!(h.create("Avery Lee", None).assigned_to, Some(worker.id));

        let third = h
            .engine
            .create_lead(&Session::system(), inquiry("Kiara Patel", None))
            .unwrap();
        assert_eq!(
            third.assignment,
            Some(AssignmentOutcome::Deferred {
                reason: DeferReason::AllAtCapacity
            })
        );
        assert!(third.lead.queued && third.lead.assigned_to.is_none());
        assert!(h.engine.store().is_enqueued(third.lead.id));
        assert_eq!(
            h.engine.store().unread_notifications_for(admin.id)[0].kind,
            NotificationKind::QueueBacklog
        );
    }

    #[test]
    fn creation_without_case_workers_queues_with_no_staff() {
        let mut h = Harness::new();
        let created = h
            .engine
            .create_lead(&Session::system(), inquiry("Ana Soto", None))
            .unwrap();
        assert_eq!(
            created.assignment,
            Some(AssignmentOutcome::Deferred {
                reason: DeferReason::NoStaff
            })
        );
        assert_eq!(created.lead.programs_of_interest, vec!["piano".to_string()]);
        assert_eq!(created.lead.next_contact_at, Some(created.lead.created_at));
    }

    #[test]
    fn data_entry_sessions_record_staff_entry_channel() {
        let mut h = Harness::new();
        let clerk = h.add_staff("Avery Lee", Role::DataEntry);
        let mut new = inquiry("Ana Soto", None);
        new.channel = Some(EntryChannel::Form);

        let created = h.engine.create_lead(&Session::for_user(&clerk), new).unwrap();
        assert_eq!(created.lead.channel, EntryChannel::StaffEntry);
        assert_eq!(created.lead.created_by, Some(clerk.id));
        assert_eq!(created.lead.created_by_role, Some(Role::DataEntry));
    }

    #[test]
    fn invalid_intake_writes_nothing() {
        let mut h = Harness::new();
        let viewer = h.add_staff("Avery Lee", Role::ReportsOnly);

        assert!(matches!(
            h.engine.create_lead(&Session::system(), inquiry("   ", None)),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            h.engine.create_lead(&Session::for_user(&viewer), inquiry("Ana Soto", None)),
            Err(EngineError::PermissionDenied { .. })
        ));
        let mut orphan = inquiry("Ana Soto", None);
        orphan.assigned_to = Some(Uuid::new_v4());
        assert!(matches!(
            h.engine.create_lead(&Session::system(), orphan),
            Err(EngineError::NotFound { .. })
        ));
        assert!(h.engine.store().leads().is_empty());
        assert!(h.engine.store().activity().is_empty());
    }

    #[test]
    fn merging_reopens_a_rejected_lead_in_place() {
        let mut h = Harness::new();
        let existing = h.create("Ana Soto", Some("ana@x.com"));
        let admin = Session::system();
        h.engine
            .change_status(&admin, existing.id, StatusChange::reject("no budget"))
            .unwrap();

        let outcome = h
            .engine
            .intake(
                &admin,
                inquiry("Ana Soto", Some("ana@x.com")),
                Some(DuplicateAction::Merge {
                    lead_id: existing.id,
                }),
            )
            .unwrap();
        let IntakeOutcome::Merged { lead } = outcome else {
            panic!("expected merge");
        };
        assert_eq!(lead.id, existing.id);
        assert_eq!(lead.status, LeadStatus::New);
        assert!(!lead.rejected && lead.closed_at.is_none());
        assert_eq!(lead.program_id.as_deref(), Some("guitar"));
        assert_eq!(lead.programs_of_interest, vec!["guitar", "piano"]);
        assert_eq!(h.engine.store().leads().len(), 1);
        let description = &h.engine.store().activity_for(lead.id)[1].description;
        assert_eq!(description, "Added interest in Piano (already interested in Jazz Guitar)");
    }

    #[test]
    fn merging_an_inquiry_without_a_program_logs_a_repeat_contact() {
        let mut h = Harness::new();
        let existing = h.create("Ana Soto", Some("ana@x.com"));
        let admin = Session::system();

        let outcome = h
            .engine
            .intake(
                &admin,
                NewLead {
                    name: "Ana Soto".to_string(),
                    email: Some("ana@x.com".to_string()),
                    ..NewLead::default()
                },
                Some(DuplicateAction::Merge {
                    lead_id: existing.id,
                }),
            )
            .unwrap();
        let IntakeOutcome::Merged { lead } = outcome else {
            panic!("expected merge");
        };
        assert_eq!(lead.programs_of_interest, vec!["guitar"]);
        let latest = h.engine.store().latest_activity(lead.id).unwrap();
        assert_eq!(latest.kind, ActivityKind::Merge);
        assert_eq!(latest.description, "Repeat contact merged (interested in Jazz Guitar)");
    }

    #[test]
    fn cancelled_or_create_anyway_choices_are_honoured() {
        let mut h = Harness::new();
        h.create("Ana Soto", Some("ana@x.com"));
        let admin = Session::system();

        let cancelled = h
            .engine
            .intake(
                &admin,
                inquiry("Ana Soto", Some("ana@x.com")),
                Some(DuplicateAction::Cancel),
            )
            .unwrap();
        assert!(matches!(cancelled, IntakeOutcome::Cancelled));
        assert_eq!(h.engine.store().leads().len(), 1);

        h.engine
            .intake(
                &admin,
                inquiry("Ana Soto", Some("ana@x.com")),
                Some(DuplicateAction::CreateAnyway),
            )
            .unwrap();
        assert_eq!(h.engine.store().leads().len(), 2);

        let stranger = Uuid::new_v4();
        assert!(h
            .engine
            .intake(
                &admin,
                inquiry("Ana Soto", Some("ana@x.com")),
                Some(DuplicateAction::Merge { lead_id: stranger }),
            )
            .is_err());
    }

    #[test]
    fn reactivation_clones_into_a_new_lead() {
        let mut h = Harness::new();
        let admin = Session::system();
        let original = h.create("Ana Soto", Some("ana@x.com"));
        h.engine.update_notes(&admin, original.id, "call after 6pm").unwrap();
        assert!(h.engine.reactivate(&admin, original.id).is_err());
        h.engine
            .change_status(&admin, original.id, StatusChange::reject("timing"))
            .unwrap();

        let revived = h.engine.reactivate(&admin, original.id).unwrap().lead;
        assert_ne!(revived.id, original.id);
        assert_eq!(revived.reactivated_from, Some(original.id));
        assert_eq!(revived.notes, "Reactivated. Previous notes: call after 6pm");
        assert_eq!(revived.status, LeadStatus::New);
        assert!(h.lead(original.id).rejected);
        assert_eq!(
            h.engine.store().latest_activity(revived.id).unwrap().kind,
            ActivityKind::Reactivated
        );
    }

    #[test]
    fn draining_assigns_waiting_leads_once_staff_exists() {
        let mut h = Harness::new();
        let first = h.create("Ana Soto", None);
        let second = h.create("Avery Lee", None);
        assert_eq!(h.engine.store().queue_len(), 2);
        assert!(h.engine.drain_queue(&Session::system()).unwrap().is_empty());

        let worker = h.add_staff("Jules Moreno", Role::CaseWorker);
        let assigned = h.engine.drain_queue(&Session::system()).unwrap();
        let ids: Vec<Uuid> = assigned.iter().map(|lead| lead.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert_eq!(h.engine.store().queue_len(), 0);
        assert!(assigned
            .iter()
            .all(|lead| lead.assigned_to == Some(worker.id) && !lead.queued));
    }
}
