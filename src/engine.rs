use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::capability::Session;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::EngineResult;
use crate::models::{
    ActivityKind, ActivityRecord, Lead, Notification, NotificationKind, Reminder, ReminderKind,
    Role,
};
use crate::notify::{LogNotifier, Notifier};
use crate::store::Store;
use crate::sync::{SyncQueue, SyncTask};

/// Owns a store instance and applies every lead mutation through it.
///
/// All writers take `&mut self`, so a single engine never interleaves two
/// read-modify-write sequences. Services that share an engine across tasks
/// must put it behind a mutex.
pub struct LeadEngine {
    pub(crate) store: Store,
    pub(crate) config: Config,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    sync: Option<SyncQueue>,
}

impl LeadEngine {
    pub fn new(store: Store, config: Config) -> Self {
        Self {
            store,
            config,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(LogNotifier),
            sync: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_sync(mut self, sync: SyncQueue) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn sync(&self) -> Option<&SyncQueue> {
        self.sync.as_ref()
    }

    /// Detaches the replication queue so the caller can flush and stop it.
    pub fn take_sync(&mut self) -> Option<SyncQueue> {
        self.sync.take()
    }

    /// Persists the local snapshot, if the store has a path.
    pub(crate) fn commit(&self) -> EngineResult<()> {
        self.store.commit()
    }

    pub(crate) fn replicate(&self, task: SyncTask) {
        if let Some(sync) = &self.sync {
            sync.enqueue(task);
        }
    }

    pub(crate) fn save_lead(&mut self, lead: Lead) -> EngineResult<()> {
        self.replicate(SyncTask::UpsertLead(lead.clone()));
        self.store.replace_lead(lead)
    }

    pub(crate) fn log_activity(
        &mut self,
        lead_id: Uuid,
        session: &Session,
        kind: ActivityKind,
        description: impl Into<String>,
    ) {
        let record = ActivityRecord {
            id: Uuid::new_v4(),
            lead_id,
            user_id: session.user_id,
            kind,
            description: description.into(),
            created_at: self.clock.now(),
        };
        self.replicate(SyncTask::AppendActivity(record.clone()));
        self.store.append_activity(record);
    }

    pub(crate) fn add_reminder(
        &mut self,
        lead_id: Uuid,
        user_id: Option<Uuid>,
        kind: ReminderKind,
        description: impl Into<String>,
        fire_at: DateTime<Utc>,
    ) -> Reminder {
        let reminder = Reminder {
            id: Uuid::new_v4(),
            lead_id,
            user_id,
            kind,
            description: description.into(),
            fire_at,
            fired: false,
            outcome: None,
            created_at: self.clock.now(),
        };
        self.replicate(SyncTask::UpsertReminder(reminder.clone()));
        self.store.insert_reminder(reminder.clone());
        reminder
    }

    pub(crate) fn replicate_reminders(&self, reminders: Vec<Reminder>) {
        for reminder in reminders {
            self.replicate(SyncTask::UpsertReminder(reminder));
        }
    }

    pub(crate) fn notify(
        &mut self,
        recipient: Uuid,
        kind: NotificationKind,
        message: impl Into<String>,
        lead_id: Option<Uuid>,
    ) {
        let notification = Notification {
            id: Uuid::new_v4(),
            recipient,
            kind,
            message: message.into(),
            lead_id,
            read: false,
            created_at: self.clock.now(),
        };
        self.notifier.deliver(&notification);
        self.store.push_notification(notification);
    }

    /// Notifies every admin-tier staff member.
    pub(crate) fn notify_admins(
        &mut self,
        kind: NotificationKind,
        message: &str,
        lead_id: Option<Uuid>,
    ) {
        let admins: Vec<Uuid> = self
            .store
            .staff_members()
            .iter()
            .filter(|user| user.active && user.role == Role::KeyMaster)
            .map(|user| user.id)
            .collect();
        for admin in admins {
            self.notify(admin, kind, message, lead_id);
        }
    }

    pub(crate) fn staff_name(&self, id: Option<Uuid>) -> String {
        id.and_then(|id| self.store.staff(id))
            .map(|user| user.name.clone())
            .unwrap_or_else(|| "unassigned".to_string())
    }
}
