use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::Session;
use crate::config::Tuning;
use crate::models::{ActivityRecord, Lead, LeadStatus};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionReason {
    NewInterest,
    Uncontacted,
    NoActivity,
    Stale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttentionItem {
    pub lead_id: Uuid,
    pub name: String,
    pub status: LeadStatus,
    pub assigned_to: Option<Uuid>,
    pub reason: AttentionReason,
    pub last_touch: DateTime<Utc>,
    pub overdue: bool,
}

fn latest_by_lead(activity: &[ActivityRecord]) -> HashMap<Uuid, DateTime<Utc>> {
    let mut latest: HashMap<Uuid, DateTime<Utc>> = HashMap::new();
    for record in activity {
        latest
            .entry(record.lead_id)
            .and_modify(|seen| {
                if record.created_at > *seen {
                    *seen = record.created_at;
                }
            })
            .or_insert(record.created_at);
    }
    latest
}

/// Open leads that need contact today, oldest touch first.
///
/// New-interest and never-contacted leads always qualify; others qualify
/// when their latest activity is older than the attention window. Overdue
/// is judged separately against the overdue window, falling back to the
/// creation time when a lead has no activity.
pub fn attention_queue(
    now: DateTime<Utc>,
    leads: &[Lead],
    activity: &[ActivityRecord],
    staff: Option<Uuid>,
    tuning: &Tuning,
) -> Vec<AttentionItem> {
    let latest = latest_by_lead(activity);
    let attention_cutoff = now - Duration::hours(tuning.attention_window_hours);
    let overdue_cutoff = now - Duration::hours(tuning.overdue_window_hours);

    let mut items: Vec<AttentionItem> = leads
        .iter()
        .filter(|lead| lead.is_open())
        .filter(|lead| staff.is_none() || lead.assigned_to == staff)
        .filter_map(|lead| {
            let last_activity = latest.get(&lead.id).copied();
            let reason = if lead.new_interest {
                AttentionReason::NewInterest
            } else if lead.status == LeadStatus::New {
                AttentionReason::Uncontacted
            } else {
                match last_activity {
                    None => AttentionReason::NoActivity,
                    Some(at) if at < attention_cutoff => AttentionReason::Stale,
                    Some(_) => return None,
                }
            };
            let last_touch = last_activity.unwrap_or(lead.created_at);
            Some(AttentionItem {
                lead_id: lead.id,
                name: lead.name.clone(),
                status: lead.status,
                assigned_to: lead.assigned_to,
                reason,
                last_touch,
                overdue: last_touch < overdue_cutoff,
            })
        })
        .collect();

    items.sort_by(|a, b| a.last_touch.cmp(&b.last_touch));
    items
}

/// Attention queue limited to what the session may see.
pub fn attention_for_session(
    now: DateTime<Utc>,
    store: &Store,
    session: &Session,
    tuning: &Tuning,
) -> Vec<AttentionItem> {
    attention_queue(now, store.leads(), store.activity(), None, tuning)
        .into_iter()
        .filter(|item| session.can_see(item.assigned_to))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityKind, EntryChannel};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 10, 12, 0, 0).unwrap()
    }

    fn lead(status: LeadStatus, created_at: DateTime<Utc>) -> Lead {
        Lead {
            id: Uuid::new_v4(),
            name: "Kiara Patel".to_string(),
            email: None,
            phone: None,
            program_id: None,
            programs_of_interest: Vec::new(),
            status,
            assigned_to: None,
            created_at,
            first_contact_at: None,
            next_contact_at: None,
            exam_date: None,
            closed_at: None,
            last_whatsapp_at: None,
            enrolled: status == LeadStatus::Enrolled,
            rejected: status == LeadStatus::Rejected,
            new_interest: false,
            new_interest_at: None,
            queued: false,
            created_by: None,
            created_by_name: "System".to_string(),
            created_by_role: None,
            channel: EntryChannel::Form,
            notes: String::new(),
            reactivated_from: None,
        }
    }

    fn touch(lead_id: Uuid, at: DateTime<Utc>) -> ActivityRecord {
        ActivityRecord {
            id: Uuid::new_v4(),
            lead_id,
            user_id: None,
            kind: ActivityKind::ContactAttempt,
            description: "called".to_string(),
            created_at: at,
        }
    }

    #[test]
    fn one_second_past_the_window_is_included() {
        let tuning = Tuning::default();
        let stale = lead(LeadStatus::Contacted, now() - Duration::days(5));
        let fresh = lead(LeadStatus::Contacted, now() - Duration::days(5));
        let activity = vec![
            touch(stale.id, now() - Duration::hours(24) - Duration::seconds(1)),
            touch(fresh.id, now() - Duration::hours(24)),
        ];
        let leads = vec![stale.clone(), fresh];

        let items = attention_queue(now(), &leads, &activity, None, &tuning);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].lead_id, stale.id);
        assert_eq!(items[0].reason, AttentionReason::Stale);
        assert!(!items[0].overdue);
    }

    #[test]
    fn new_and_new_interest_leads_always_qualify() {
        let tuning = Tuning::default();
        let uncontacted = lead(LeadStatus::New, now() - Duration::hours(1));
        let mut switched = lead(LeadStatus::FollowingUp, now() - Duration::days(3));
        switched.new_interest = true;
        let activity = vec![
            touch(uncontacted.id, now() - Duration::minutes(5)),
            touch(switched.id, now() - Duration::minutes(5)),
        ];
        let leads = vec![uncontacted, switched];

        let items = attention_queue(now(), &leads, &activity, None, &tuning);
        let reasons: Vec<_> = items.iter().map(|item| item.reason).collect();
        assert_eq!(items.len(), 2);
        assert!(reasons.contains(&AttentionReason::Uncontacted));
        assert!(reasons.contains(&AttentionReason::NewInterest));
        assert!(items.iter().all(|item| !item.overdue));
    }

    #[test]
    fn overdue_falls_back_to_creation_time() {
        let tuning = Tuning::default();
        let old = lead(LeadStatus::Contacted, now() - Duration::hours(49));
        let items = attention_queue(now(), &[old], &[], None, &tuning);
        assert_eq!(items[0].reason, AttentionReason::NoActivity);
        assert!(items[0].overdue);
    }

    #[test]
    fn closed_leads_and_other_staff_are_skipped() {
        let tuning = Tuning::default();
        let staff = Uuid::new_v4();
        let closed = lead(LeadStatus::Rejected, now() - Duration::days(9));
        let mut mine = lead(LeadStatus::New, now() - Duration::days(1));
        mine.assigned_to = Some(staff);
        let theirs = lead(LeadStatus::New, now() - Duration::days(1));
        let leads = vec![closed, mine.clone(), theirs];

        let items = attention_queue(now(), &leads, &[], Some(staff), &tuning);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].lead_id, mine.id);
    }

    #[test]
    fn oldest_touch_comes_first() {
        let tuning = Tuning::default();
        let recent = lead(LeadStatus::New, now() - Duration::hours(2));
        let older = lead(LeadStatus::New, now() - Duration::hours(60));
        let items = attention_queue(now(), &[recent, older.clone()], &[], None, &tuning);
        assert_eq!(items[0].lead_id, older.id);
        assert!(items[0].overdue);
        assert!(!items[1].overdue);
    }
}
