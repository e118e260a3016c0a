//! Lead transitions. Any status may move to any other; the controller
//! applies the consequences of each move uniformly and is the only writer
//! of status, assignment and interest fields.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::Session;
use crate::engine::LeadEngine;
use crate::error::{EngineError, EngineResult};
use crate::models::{
    ActivityKind, Lead, LeadStatus, NotificationKind, QueueEntry, Reminder, ReminderKind,
    REMINDER_CANCELLED,
};
use crate::report::StatusCounts;
use crate::sync::SyncTask;

const NOTE_PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: Option<LeadStatus>,
    pub exam_date: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

impl StatusChange {
    pub fn to(status: LeadStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn exam(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(LeadStatus::ExamScheduled),
            exam_date: Some(at),
            rejection_reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            status: Some(LeadStatus::Rejected),
            exam_date: None,
            rejection_reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactChannel {
    Call,
    Whatsapp,
    Email,
    CopyPhone,
    CopyEmail,
}

impl FromStr for ContactChannel {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "call" => Ok(ContactChannel::Call),
            "whatsapp" => Ok(ContactChannel::Whatsapp),
            "email" => Ok(ContactChannel::Email),
            "copy_phone" => Ok(ContactChannel::CopyPhone),
            "copy_email" => Ok(ContactChannel::CopyEmail),
            other => Err(EngineError::InvalidInput(format!(
                "unknown contact channel `{other}`"
            ))),
        }
    }
}

impl ContactChannel {
    fn describe(self) -> &'static str {
        match self {
            ContactChannel::Call => "Called the lead",
            ContactChannel::Whatsapp => "Opened WhatsApp conversation",
            ContactChannel::Email => "Opened email draft",
            ContactChannel::CopyPhone => "Copied phone number",
            ContactChannel::CopyEmail => "Copied email address",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    pub from: Uuid,
    pub to: Uuid,
    pub lead_ids: Vec<Uuid>,
    pub counts: StatusCounts,
    pub migrated_at: DateTime<Utc>,
}

fn note_preview(notes: &str) -> String {
    if notes.is_empty() {
        return "(empty)".to_string();
    }
    let mut preview: String = notes.chars().take(NOTE_PREVIEW_CHARS).collect();
    if notes.chars().count() > NOTE_PREVIEW_CHARS {
        preview.push_str("...");
    }
    preview
}

impl LeadEngine {
    /// Closed leads keep no pending reminders and leave the wait queue.
    fn close_out(&mut self, lead: &mut Lead) {
        let cancelled = self.store.cancel_pending_reminders(lead.id);
        self.replicate_reminders(cancelled);
        if self.store.dequeue(lead.id) {
            lead.queued = false;
        }
    }

    /// Sessions without `can_view_all` may only edit leads they own.
    fn editable_lead(&self, session: &Session, lead_id: Uuid) -> EngineResult<Lead> {
        session.require(session.capabilities.can_edit, "edit lead")?;
        let lead = self.store.require_lead(lead_id)?;
        session.require(session.can_see(lead.assigned_to), "edit lead")?;
        Ok(lead.clone())
    }

    /// Sets the exam date and replaces any pending confirmation reminder.
    fn schedule_exam(
        &mut self,
        session: &Session,
        lead: &mut Lead,
        exam_date: DateTime<Utc>,
        verb: &str,
    ) {
        let stale = self.store.resolve_pending_reminders(
            lead.id,
            Some(ReminderKind::ExamConfirmation),
            REMINDER_CANCELLED,
        );
        self.replicate_reminders(stale);

        lead.exam_date = Some(exam_date);
        self.log_activity(
            lead.id,
            session,
            ActivityKind::ExamScheduled,
            format!("Exam {verb} for {}", exam_date.format("%Y-%m-%d %H:%M")),
        );
        let fire_at = exam_date - Duration::days(self.config.org.days_before_exam_reminder);
        self.add_reminder(
            lead.id,
            lead.assigned_to,
            ReminderKind::ExamConfirmation,
            "Confirm exam attendance",
            fire_at,
        );
    }

    /// Moves a lead to a new status. Same-status calls change nothing,
    /// except that an exam-scheduled lead given a different exam date is
    /// rescheduled.
    pub fn change_status(
        &mut self,
        session: &Session,
        lead_id: Uuid,
        change: StatusChange,
    ) -> EngineResult<Lead> {
        let mut lead = self.editable_lead(session, lead_id)?;
        let Some(next) = change.status else {
            return Err(EngineError::InvalidInput("target status is required".to_string()));
        };
        if lead.status == next {
            let moved = change
                .exam_date
                .filter(|at| next == LeadStatus::ExamScheduled && lead.exam_date != Some(*at));
            let Some(exam_date) = moved else {
                return Ok(lead);
            };
            self.schedule_exam(session, &mut lead, exam_date, "rescheduled");
            tracing::info!(lead = %lead_id, %exam_date, "exam rescheduled");
            self.save_lead(lead.clone())?;
            self.commit()?;
            return Ok(lead);
        }

        let now = self.now();
        let previous = lead.status;
        lead.status = next;
        self.log_activity(
            lead_id,
            session,
            ActivityKind::StatusChange,
            format!("Status: {previous} -> {next}"),
        );

        if lead.first_contact_at.is_none() && next != LeadStatus::New {
            lead.first_contact_at = Some(now);
        }

        if previous.is_terminal() && !next.is_terminal() {
            lead.enrolled = false;
            lead.rejected = false;
            lead.closed_at = None;
            if lead.assigned_to.is_none() {
                self.store.enqueue(QueueEntry {
                    lead_id,
                    priority: 0,
                    enqueued_at: now,
                });
                lead.queued = true;
            }
            self.log_activity(
                lead_id,
                session,
                ActivityKind::Reactivated,
                format!("Lead reopened from {previous}"),
            );
        }

        match next {
            LeadStatus::Enrolled => {
                lead.enrolled = true;
                lead.rejected = false;
                lead.closed_at.get_or_insert(now);
                self.log_activity(lead_id, session, ActivityKind::Enrolled, "Lead enrolled");
                self.close_out(&mut lead);
            }
            LeadStatus::Rejected => {
                lead.rejected = true;
                lead.enrolled = false;
                lead.closed_at.get_or_insert(now);
                let reason = change
                    .rejection_reason
                    .as_deref()
                    .map(str::trim)
                    .filter(|reason| !reason.is_empty())
                    .unwrap_or("unspecified");
                self.log_activity(
                    lead_id,
                    session,
                    ActivityKind::Rejected,
                    format!("Lead rejected: {reason}"),
                );
                self.close_out(&mut lead);
            }
            LeadStatus::ExamScheduled => {
                if let Some(exam_date) = change.exam_date {
                    self.schedule_exam(session, &mut lead, exam_date, "scheduled");
                }
            }
            LeadStatus::New | LeadStatus::Contacted | LeadStatus::FollowingUp => {}
        }

        tracing::info!(lead = %lead_id, from = %previous, to = %next, "lead status changed");
        self.save_lead(lead.clone())?;
        self.commit()?;
        Ok(lead)
    }

    /// Switches the primary program. Flags the lead for attention until a
    /// staff member confirms the follow-up contact.
    pub fn change_interest(
        &mut self,
        session: &Session,
        lead_id: Uuid,
        program_id: &str,
    ) -> EngineResult<Lead> {
        let mut lead = self.editable_lead(session, lead_id)?;
        let program_id = program_id.trim();
        if program_id.is_empty() {
            return Err(EngineError::InvalidInput("program is required".to_string()));
        }
        if lead.program_id.as_deref() == Some(program_id) {
            return Ok(lead);
        }

        let now = self.now();
        let previous = lead.program_id.clone();
        self.log_activity(
            lead_id,
            session,
            ActivityKind::InterestChange,
            format!(
                "New interest: {} (previously: {})",
                self.store.program_name(Some(program_id)),
                self.store.program_name(previous.as_deref())
            ),
        );
        if let Some(previous) = previous.as_deref() {
            lead.add_interest(previous);
        }
        lead.add_interest(program_id);
        lead.program_id = Some(program_id.to_string());
        lead.new_interest = true;
        lead.new_interest_at = Some(now);

        tracing::info!(lead = %lead_id, program = program_id, "lead interest changed");
        self.save_lead(lead.clone())?;
        self.commit()?;
        Ok(lead)
    }

    /// Clears the new-interest flag after the follow-up contact happened.
    pub fn confirm_interest_contacted(
        &mut self,
        session: &Session,
        lead_id: Uuid,
    ) -> EngineResult<Lead> {
        let mut lead = self.editable_lead(session, lead_id)?;
        if !lead.new_interest {
            return Err(EngineError::InvalidInput(
                "lead has no unconfirmed interest change".to_string(),
            ));
        }
        lead.new_interest = false;
        self.log_activity(
            lead_id,
            session,
            ActivityKind::InterestConfirmed,
            "Confirmed contact about the new interest",
        );
        self.save_lead(lead.clone())?;
        self.commit()?;
        Ok(lead)
    }

    pub(crate) fn apply_assignment(
        &mut self,
        session: &Session,
        lead: &mut Lead,
        staff_id: Uuid,
        description: String,
    ) {
        self.log_activity(lead.id, session, ActivityKind::Reassignment, description);
        lead.assigned_to = Some(staff_id);
        lead.queued = false;
        self.store.dequeue(lead.id);
        self.notify(
            staff_id,
            NotificationKind::Reassignment,
            format!("You were assigned lead {}", lead.name),
            Some(lead.id),
        );
    }

    /// Hands a lead to another staff member and takes it out of the queue.
    pub fn reassign(&mut self, session: &Session, lead_id: Uuid, to: Uuid) -> EngineResult<Lead> {
        session.require(session.capabilities.can_reassign, "reassign lead")?;
        let mut lead = self.store.require_lead(lead_id)?.clone();
        let target = self.store.require_staff(to)?.name.clone();
        if lead.assigned_to == Some(to) {
            return Ok(lead);
        }

        let description = format!(
            "Reassigned from {} to {}",
            self.staff_name(lead.assigned_to),
            target
        );
        self.apply_assignment(session, &mut lead, to, description);

        tracing::info!(lead = %lead_id, staff = %to, "lead reassigned");
        self.save_lead(lead.clone())?;
        self.commit()?;
        Ok(lead)
    }

    /// Assigns a waiting lead to a chosen staff member.
    pub fn assign_from_queue(
        &mut self,
        session: &Session,
        lead_id: Uuid,
        to: Uuid,
    ) -> EngineResult<Lead> {
        let queued = self.store.require_lead(lead_id)?.queued;
        if !queued {
            return Err(EngineError::InvalidInput("lead is not waiting in the queue".to_string()));
        }
        self.reassign(session, lead_id, to)
    }

    /// Overwrites the notes, logging a short preview when they change.
    pub fn update_notes(
        &mut self,
        session: &Session,
        lead_id: Uuid,
        notes: &str,
    ) -> EngineResult<Lead> {
        let mut lead = self.editable_lead(session, lead_id)?;
        if lead.notes == notes {
            return Ok(lead);
        }
        self.log_activity(
            lead_id,
            session,
            ActivityKind::Note,
            format!("Note: \"{}\"", note_preview(notes)),
        );
        lead.notes = notes.to_string();
        self.save_lead(lead.clone())?;
        self.commit()?;
        Ok(lead)
    }

    pub fn schedule_next_contact(
        &mut self,
        session: &Session,
        lead_id: Uuid,
        at: DateTime<Utc>,
    ) -> EngineResult<Lead> {
        let mut lead = self.editable_lead(session, lead_id)?;
        lead.next_contact_at = Some(at);
        self.save_lead(lead.clone())?;
        self.commit()?;
        Ok(lead)
    }

    /// Logs an outreach attempt. WhatsApp attempts schedule a follow-up
    /// reminder to record how the conversation went.
    pub fn record_contact_attempt(
        &mut self,
        session: &Session,
        lead_id: Uuid,
        channel: ContactChannel,
    ) -> EngineResult<Lead> {
        let mut lead = self.editable_lead(session, lead_id)?;
        let now = self.now();
        self.log_activity(lead_id, session, ActivityKind::ContactAttempt, channel.describe());

        if channel == ContactChannel::Whatsapp {
            lead.last_whatsapp_at = Some(now);
            let fire_at =
                now + Duration::hours(self.config.org.hours_before_whatsapp_followup_reminder);
            self.add_reminder(
                lead_id,
                session.user_id.or(lead.assigned_to),
                ReminderKind::WhatsappFollowup,
                "Record the WhatsApp contact result",
                fire_at,
            );
        }

        self.save_lead(lead.clone())?;
        self.commit()?;
        Ok(lead)
    }

    /// Logs the outcome of an outreach and settles open WhatsApp follow-ups.
    pub fn record_contact_result(
        &mut self,
        session: &Session,
        lead_id: Uuid,
        result: &str,
    ) -> EngineResult<Vec<Reminder>> {
        self.editable_lead(session, lead_id)?;
        let result = result.trim();
        if result.is_empty() {
            return Err(EngineError::InvalidInput("contact result is required".to_string()));
        }
        self.log_activity(
            lead_id,
            session,
            ActivityKind::ContactResult,
            format!("Contact result: {result}"),
        );
        let settled = self.store.resolve_pending_reminders(
            lead_id,
            Some(ReminderKind::WhatsappFollowup),
            result,
        );
        self.replicate_reminders(settled.clone());
        self.commit()?;
        Ok(settled)
    }

    pub fn respond_reminder(
        &mut self,
        session: &Session,
        reminder_id: Uuid,
        outcome: &str,
    ) -> EngineResult<Reminder> {
        let lead_id = self
            .store
            .reminder(reminder_id)
            .ok_or_else(|| EngineError::reminder_not_found(reminder_id))?
            .lead_id;
        self.editable_lead(session, lead_id)?;

        let reminder = self.store.fire_reminder(reminder_id, outcome)?;
        self.log_activity(
            lead_id,
            session,
            ActivityKind::Reminder,
            format!("Reminder answered: {outcome}"),
        );
        self.replicate(SyncTask::UpsertReminder(reminder.clone()));
        self.commit()?;
        Ok(reminder)
    }

    /// Moves every lead owned by `from` to `to`, e.g. before removing a
    /// staff account.
    pub fn migrate_leads(
        &mut self,
        session: &Session,
        from: Uuid,
        to: Uuid,
    ) -> EngineResult<MigrationReport> {
        session.require(session.capabilities.can_reassign, "migrate leads")?;
        if from == to {
            return Err(EngineError::InvalidInput(
                "cannot migrate leads to the same staff member".to_string(),
            ));
        }
        let from_name = self.store.require_staff(from)?.name.clone();
        let to_name = self.store.require_staff(to)?.name.clone();

        let leads: Vec<Lead> = self.store.leads_assigned_to(from).cloned().collect();
        let counts = StatusCounts::tally(leads.iter());
        let mut lead_ids = Vec::with_capacity(leads.len());
        for mut lead in leads {
            lead.assigned_to = Some(to);
            self.log_activity(
                lead.id,
                session,
                ActivityKind::Migration,
                format!("Lead migrated from {from_name} to {to_name}"),
            );
            lead_ids.push(lead.id);
            self.save_lead(lead)?;
        }

        if !lead_ids.is_empty() {
            self.notify(
                to,
                NotificationKind::LeadMigration,
                format!("{} leads from {from_name} were assigned to you", lead_ids.len()),
                None,
            );
        }
        tracing::info!(from = %from, to = %to, count = lead_ids.len(), "leads migrated");
        self.commit()?;

        Ok(MigrationReport {
            from,
            to,
            lead_ids,
            counts,
            migrated_at: self.now(),
        })
    }

    /// Deletes a lead with its activity, reminders and queue entry.
    pub fn purge_lead(&mut self, session: &Session, lead_id: Uuid) -> EngineResult<Lead> {
        session.require(session.capabilities.can_purge, "purge lead")?;
        let lead = self.store.remove_lead(lead_id)?;
        self.replicate(SyncTask::DeleteLead(lead_id));
        tracing::info!(lead = %lead_id, "lead purged");
        self.commit()?;
        Ok(lead)
    }
}
