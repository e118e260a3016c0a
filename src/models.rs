use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    FollowingUp,
    ExamScheduled,
    Enrolled,
    Rejected,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 6] = [
        LeadStatus::New,
        LeadStatus::Contacted,
        LeadStatus::FollowingUp,
        LeadStatus::ExamScheduled,
        LeadStatus::Enrolled,
        LeadStatus::Rejected,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, LeadStatus::Enrolled | LeadStatus::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::FollowingUp => "following_up",
            LeadStatus::ExamScheduled => "exam_scheduled",
            LeadStatus::Enrolled => "enrolled",
            LeadStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        LeadStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown status `{value}`")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryChannel {
    Form,
    Manual,
    StaffEntry,
    Import,
}

impl EntryChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryChannel::Form => "form",
            EntryChannel::Manual => "manual",
            EntryChannel::StaffEntry => "staff_entry",
            EntryChannel::Import => "import",
        }
    }
}

impl FromStr for EntryChannel {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "form" => Ok(EntryChannel::Form),
            "manual" => Ok(EntryChannel::Manual),
            "staff_entry" => Ok(EntryChannel::StaffEntry),
            "import" => Ok(EntryChannel::Import),
            other => Err(EngineError::InvalidInput(format!("unknown channel `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    KeyMaster,
    CaseWorker,
    DataEntry,
    ReportsOnly,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::KeyMaster => "key_master",
            Role::CaseWorker => "case_worker",
            Role::DataEntry => "data_entry",
            Role::ReportsOnly => "reports_only",
        }
    }
}

impl FromStr for Role {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "super_admin" => Ok(Role::SuperAdmin),
            "key_master" => Ok(Role::KeyMaster),
            "case_worker" => Ok(Role::CaseWorker),
            "data_entry" => Ok(Role::DataEntry),
            "reports_only" => Ok(Role::ReportsOnly),
            other => Err(EngineError::InvalidInput(format!("unknown role `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub program_id: Option<String>,
    #[serde(default)]
    pub programs_of_interest: Vec<String>,
    pub status: LeadStatus,
    pub assigned_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub first_contact_at: Option<DateTime<Utc>>,
    pub next_contact_at: Option<DateTime<Utc>>,
    pub exam_date: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub last_whatsapp_at: Option<DateTime<Utc>>,
    pub enrolled: bool,
    pub rejected: bool,
    pub new_interest: bool,
    pub new_interest_at: Option<DateTime<Utc>>,
    pub queued: bool,
    pub created_by: Option<Uuid>,
    pub created_by_name: String,
    pub created_by_role: Option<Role>,
    pub channel: EntryChannel,
    pub notes: String,
    pub reactivated_from: Option<Uuid>,
}

impl Lead {
    pub fn is_open(&self) -> bool {
        !self.enrolled && !self.rejected
    }

    /// Adds a program to the interest set, keeping it free of repeats.
    pub fn add_interest(&mut self, program_id: &str) {
        if !self.programs_of_interest.iter().any(|p| p == program_id) {
            self.programs_of_interest.push(program_id.to_string());
        }
    }
}

/// Intake payload for a lead that does not exist yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewLead {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub program_id: Option<String>,
    pub notes: Option<String>,
    pub channel: Option<EntryChannel>,
    pub assigned_to: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaffMetrics {
    pub leads_received: u32,
    pub leads_contacted: u32,
    pub leads_enrolled: u32,
    pub avg_first_contact_hours: Option<f64>,
    pub conversion_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub active: bool,
    pub metrics: Option<StaffMetrics>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Creation,
    StatusChange,
    Reassignment,
    Note,
    ContactAttempt,
    ContactResult,
    ExamScheduled,
    Enrolled,
    Rejected,
    Reactivated,
    InterestChange,
    InterestConfirmed,
    Merge,
    Migration,
    Reminder,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::Creation => "creation",
            ActivityKind::StatusChange => "status_change",
            ActivityKind::Reassignment => "reassignment",
            ActivityKind::Note => "note",
            ActivityKind::ContactAttempt => "contact_attempt",
            ActivityKind::ContactResult => "contact_result",
            ActivityKind::ExamScheduled => "exam_scheduled",
            ActivityKind::Enrolled => "enrolled",
            ActivityKind::Rejected => "rejected",
            ActivityKind::Reactivated => "reactivated",
            ActivityKind::InterestChange => "interest_change",
            ActivityKind::InterestConfirmed => "interest_confirmed",
            ActivityKind::Merge => "merge",
            ActivityKind::Migration => "migration",
            ActivityKind::Reminder => "reminder",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub user_id: Option<Uuid>,
    pub kind: ActivityKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    ExamConfirmation,
    WhatsappFollowup,
    #[serde(rename = "sin_avance")]
    NoProgress,
}

impl ReminderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReminderKind::ExamConfirmation => "exam_confirmation",
            ReminderKind::WhatsappFollowup => "whatsapp_followup",
            ReminderKind::NoProgress => "sin_avance",
        }
    }
}

pub const REMINDER_CANCELLED: &str = "cancelled";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub user_id: Option<Uuid>,
    pub kind: ReminderKind,
    pub description: String,
    pub fire_at: DateTime<Utc>,
    pub fired: bool,
    pub outcome: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub lead_id: Uuid,
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub id: String,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewLead,
    Reassignment,
    QueueBacklog,
    LeadMigration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    pub lead_id: Option<Uuid>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RowOutcome {
    Imported { lead_id: Uuid, name: String },
    Duplicate { reason: String },
    Error { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRowResult {
    pub line: usize,
    #[serde(flatten)]
    pub outcome: RowOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRecord {
    pub id: Uuid,
    pub imported_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub actor_name: String,
    pub rows_processed: usize,
    pub imported: usize,
    pub duplicates: usize,
    pub errors: usize,
    pub error_preview: Vec<String>,
    pub rows: Vec<ImportRowResult>,
}
