//! Entity store: the single source of truth for leads, staff, activity,
//! reminders and the wait queue.
//!
//! The store does not enforce references between collections; callers keep
//! them consistent. When opened on a path, `commit` persists a snapshot by
//! writing a sibling temp file and renaming it into place.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{
    ActivityRecord, ImportRecord, Lead, LeadStatus, Notification, Program, QueueEntry, Reminder,
    ReminderKind, Role, StaffUser, REMINDER_CANCELLED,
};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Store {
    #[serde(default)]
    leads: Vec<Lead>,
    #[serde(default)]
    staff: Vec<StaffUser>,
    #[serde(default)]
    activity: Vec<ActivityRecord>,
    #[serde(default)]
    reminders: Vec<Reminder>,
    #[serde(default)]
    queue: Vec<QueueEntry>,
    #[serde(default)]
    programs: Vec<Program>,
    #[serde(default)]
    notifications: Vec<Notification>,
    #[serde(default)]
    imports: VecDeque<ImportRecord>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl Store {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the snapshot at `path`, or starts empty when none exists yet.
    pub fn open(path: &Path) -> EngineResult<Self> {
        let mut store = if path.exists() {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str::<Store>(&text)?
        } else {
            Store::default()
        };
        store.path = Some(path.to_path_buf());
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn commit(&self) -> EngineResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    // Leads

    pub fn insert_lead(&mut self, lead: Lead) {
        self.leads.push(lead);
    }

    pub fn lead(&self, id: Uuid) -> Option<&Lead> {
        self.leads.iter().find(|lead| lead.id == id)
    }

    pub fn require_lead(&self, id: Uuid) -> EngineResult<&Lead> {
        self.lead(id).ok_or_else(|| EngineError::lead_not_found(id))
    }

    pub fn replace_lead(&mut self, lead: Lead) -> EngineResult<()> {
        let slot = self
            .leads
            .iter_mut()
            .find(|existing| existing.id == lead.id)
            .ok_or_else(|| EngineError::lead_not_found(lead.id))?;
        *slot = lead;
        Ok(())
    }

    /// Removes a lead together with its activity, reminders and queue entry.
    pub fn remove_lead(&mut self, id: Uuid) -> EngineResult<Lead> {
        let index = self
            .leads
            .iter()
            .position(|lead| lead.id == id)
            .ok_or_else(|| EngineError::lead_not_found(id))?;
        let lead = self.leads.remove(index);
        self.activity.retain(|record| record.lead_id != id);
        self.reminders.retain(|reminder| reminder.lead_id != id);
        self.queue.retain(|entry| entry.lead_id != id);
        Ok(lead)
    }

    pub fn leads(&self) -> &[Lead] {
        &self.leads
    }

    pub fn leads_assigned_to(&self, staff_id: Uuid) -> impl Iterator<Item = &Lead> + '_ {
        self.leads
            .iter()
            .filter(move |lead| lead.assigned_to == Some(staff_id))
    }

    pub fn leads_with_status(&self, status: LeadStatus) -> impl Iterator<Item = &Lead> + '_ {
        self.leads.iter().filter(move |lead| lead.status == status)
    }

    pub fn open_leads(&self) -> impl Iterator<Item = &Lead> + '_ {
        self.leads.iter().filter(|lead| lead.is_open())
    }

    pub fn closed_leads(&self) -> impl Iterator<Item = &Lead> + '_ {
        self.leads.iter().filter(|lead| !lead.is_open())
    }

    /// Open leads currently owned by `staff_id`.
    pub fn active_load(&self, staff_id: Uuid) -> usize {
        self.leads_assigned_to(staff_id)
            .filter(|lead| lead.is_open())
            .count()
    }

    // Staff

    pub fn insert_staff(&mut self, user: StaffUser) {
        self.staff.push(user);
    }

    pub fn staff(&self, id: Uuid) -> Option<&StaffUser> {
        self.staff.iter().find(|user| user.id == id)
    }

    pub fn require_staff(&self, id: Uuid) -> EngineResult<&StaffUser> {
        self.staff(id).ok_or_else(|| EngineError::staff_not_found(id))
    }

    pub fn staff_by_email(&self, email: &str) -> Option<&StaffUser> {
        self.staff
            .iter()
            .find(|user| user.email.eq_ignore_ascii_case(email.trim()))
    }

    pub fn replace_staff(&mut self, user: StaffUser) -> EngineResult<()> {
        let slot = self
            .staff
            .iter_mut()
            .find(|existing| existing.id == user.id)
            .ok_or_else(|| EngineError::staff_not_found(user.id))?;
        *slot = user;
        Ok(())
    }

    /// Refuses while any lead is still assigned to the user.
    pub fn remove_staff(&mut self, id: Uuid) -> EngineResult<StaffUser> {
        let assigned = self.leads_assigned_to(id).count();
        if assigned > 0 {
            return Err(EngineError::InvalidInput(format!(
                "staff user still has {assigned} assigned leads"
            )));
        }
        let index = self
            .staff
            .iter()
            .position(|user| user.id == id)
            .ok_or_else(|| EngineError::staff_not_found(id))?;
        Ok(self.staff.remove(index))
    }

    pub fn staff_members(&self) -> &[StaffUser] {
        &self.staff
    }

    pub fn staff_with_role(&self, role: Role) -> impl Iterator<Item = &StaffUser> + '_ {
        self.staff.iter().filter(move |user| user.role == role)
    }

    /// Active staff with `role`, in insertion order.
    pub fn active_staff_with_role(&self, role: Role) -> impl Iterator<Item = &StaffUser> + '_ {
        self.staff_with_role(role).filter(|user| user.active)
    }

    // Activity

    pub fn append_activity(&mut self, record: ActivityRecord) {
        self.activity.push(record);
    }

    pub fn activity(&self) -> &[ActivityRecord] {
        &self.activity
    }

    /// Activity for a lead, newest first. Records sharing a timestamp keep
    /// reverse append order.
    pub fn activity_for(&self, lead_id: Uuid) -> Vec<&ActivityRecord> {
        let mut records: Vec<&ActivityRecord> = self
            .activity
            .iter()
            .rev()
            .filter(|record| record.lead_id == lead_id)
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub fn latest_activity(&self, lead_id: Uuid) -> Option<&ActivityRecord> {
        self.activity_for(lead_id).into_iter().next()
    }

    // Reminders

    pub fn insert_reminder(&mut self, reminder: Reminder) {
        self.reminders.push(reminder);
    }

    pub fn reminder(&self, id: Uuid) -> Option<&Reminder> {
        self.reminders.iter().find(|reminder| reminder.id == id)
    }

    pub fn reminders(&self) -> &[Reminder] {
        &self.reminders
    }

    pub fn reminders_for(&self, lead_id: Uuid) -> impl Iterator<Item = &Reminder> + '_ {
        self.reminders
            .iter()
            .filter(move |reminder| reminder.lead_id == lead_id)
    }

    pub fn has_pending_reminder(&self, lead_id: Uuid, kind: ReminderKind) -> bool {
        self.reminders_for(lead_id)
            .any(|reminder| reminder.kind == kind && !reminder.fired)
    }

    /// Unfired reminders whose fire time has passed.
    pub fn due_reminders(&self, now: DateTime<Utc>, user: Option<Uuid>) -> Vec<&Reminder> {
        self.reminders
            .iter()
            .filter(|reminder| !reminder.fired && reminder.fire_at <= now)
            .filter(|reminder| user.is_none() || reminder.user_id == user)
            .collect()
    }

    /// Unfired reminders still in the future, soonest first.
    pub fn upcoming_reminders(&self, now: DateTime<Utc>, user: Option<Uuid>) -> Vec<&Reminder> {
        let mut upcoming: Vec<&Reminder> = self
            .reminders
            .iter()
            .filter(|reminder| !reminder.fired && reminder.fire_at > now)
            .filter(|reminder| user.is_none() || reminder.user_id == user)
            .collect();
        upcoming.sort_by(|a, b| a.fire_at.cmp(&b.fire_at));
        upcoming
    }

    /// Marks a reminder fired with `outcome` and returns the updated copy.
    pub fn fire_reminder(&mut self, id: Uuid, outcome: &str) -> EngineResult<Reminder> {
        let reminder = self
            .reminders
            .iter_mut()
            .find(|reminder| reminder.id == id)
            .ok_or_else(|| EngineError::reminder_not_found(id))?;
        reminder.fired = true;
        reminder.outcome = Some(outcome.to_string());
        Ok(reminder.clone())
    }

    /// Fires every pending reminder for the lead (optionally of one kind)
    /// with `outcome`. Returns the reminders that changed.
    pub fn resolve_pending_reminders(
        &mut self,
        lead_id: Uuid,
        kind: Option<ReminderKind>,
        outcome: &str,
    ) -> Vec<Reminder> {
        let mut changed = Vec::new();
        for reminder in self.reminders.iter_mut() {
            if reminder.lead_id != lead_id || reminder.fired {
                continue;
            }
            if kind.is_some_and(|kind| reminder.kind != kind) {
                continue;
            }
            reminder.fired = true;
            reminder.outcome = Some(outcome.to_string());
            changed.push(reminder.clone());
        }
        changed
    }

    pub fn cancel_pending_reminders(&mut self, lead_id: Uuid) -> Vec<Reminder> {
        self.resolve_pending_reminders(lead_id, None, REMINDER_CANCELLED)
    }

    // Queue

    /// Adds or replaces the queue entry for the entry's lead.
    pub fn enqueue(&mut self, entry: QueueEntry) {
        self.queue.retain(|existing| existing.lead_id != entry.lead_id);
        self.queue.push(entry);
    }

    pub fn dequeue(&mut self, lead_id: Uuid) -> bool {
        let before = self.queue.len();
        self.queue.retain(|entry| entry.lead_id != lead_id);
        self.queue.len() != before
    }

    pub fn is_enqueued(&self, lead_id: Uuid) -> bool {
        self.queue.iter().any(|entry| entry.lead_id == lead_id)
    }

    /// Priority descending, then oldest first.
    pub fn queue_ordered(&self) -> Vec<&QueueEntry> {
        let mut entries: Vec<&QueueEntry> = self.queue.iter().collect();
        entries.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.enqueued_at.cmp(&b.enqueued_at))
        });
        entries
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    // Programs

    pub fn upsert_program(&mut self, program: Program) {
        match self.programs.iter_mut().find(|p| p.id == program.id) {
            Some(existing) => *existing = program,
            None => self.programs.push(program),
        }
    }

    pub fn programs(&self) -> &[Program] {
        &self.programs
    }

    pub fn program(&self, id: &str) -> Option<&Program> {
        self.programs.iter().find(|program| program.id == id)
    }

    pub fn program_name(&self, id: Option<&str>) -> String {
        id.and_then(|id| self.program(id))
            .map(|program| program.name.clone())
            .unwrap_or_else(|| "none".to_string())
    }

    // Notifications

    pub fn push_notification(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    pub fn notifications_for(&self, user: Uuid) -> Vec<&Notification> {
        let mut found: Vec<&Notification> = self
            .notifications
            .iter()
            .rev()
            .filter(|n| n.recipient == user)
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found
    }

    pub fn unread_notifications_for(&self, user: Uuid) -> Vec<&Notification> {
        self.notifications_for(user)
            .into_iter()
            .filter(|n| !n.read)
            .collect()
    }

    pub fn mark_notification_read(&mut self, id: Uuid) -> bool {
        match self.notifications.iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.read = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_notifications_read(&mut self, user: Uuid) {
        for notification in self.notifications.iter_mut().filter(|n| n.recipient == user) {
            notification.read = true;
        }
    }

    // Import history

    /// Newest first; older records beyond `limit` are discarded.
    pub fn record_import(&mut self, record: ImportRecord, limit: usize) {
        self.imports.push_front(record);
        self.imports.truncate(limit.max(1));
    }

    pub fn import_history(&self, limit: usize) -> Vec<&ImportRecord> {
        self.imports.iter().take(limit).collect()
    }

    pub fn import_record(&self, id: Uuid) -> Option<&ImportRecord> {
        self.imports.iter().find(|record| record.id == id)
    }

    pub fn remove_import_record(&mut self, id: Uuid) -> bool {
        let before = self.imports.len();
        self.imports.retain(|record| record.id != id);
        self.imports.len() != before
    }
}
