//! Greedy lead assignment. Each call reads a snapshot of current loads and
//! reserves nothing, so concurrent callers can push a case worker past
//! capacity. Capacity is guidance here, not a hard limit.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{Config, Tuning};
use crate::models::{Role, StaffMetrics, StaffUser};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferReason {
    NoStaff,
    AllAtCapacity,
}

impl DeferReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DeferReason::NoStaff => "no_staff",
            DeferReason::AllAtCapacity => "all_at_capacity",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub staff_id: Uuid,
    pub name: String,
    pub active_load: usize,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AssignmentOutcome {
    Assigned { staff_id: Uuid, score: f64 },
    Deferred { reason: DeferReason },
}

impl AssignmentOutcome {
    pub fn staff_id(&self) -> Option<Uuid> {
        match self {
            AssignmentOutcome::Assigned { staff_id, .. } => Some(*staff_id),
            AssignmentOutcome::Deferred { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityStatus {
    pub staff_id: Uuid,
    pub name: String,
    pub active_load: usize,
    pub capacity: u32,
    pub occupancy_percent: u32,
    pub available: bool,
}

fn score_candidate(metrics: Option<&StaffMetrics>, remaining: u32, tuning: &Tuning) -> f64 {
    let conversion_rate = metrics
        .and_then(|m| m.conversion_rate)
        .filter(|rate| *rate > 0.0)
        .unwrap_or(tuning.default_conversion_rate);
    let first_contact_hours = metrics
        .and_then(|m| m.avg_first_contact_hours)
        .filter(|hours| *hours > 0.0)
        .unwrap_or(tuning.default_first_contact_hours);

    f64::from(remaining) * tuning.capacity_weight
        + conversion_rate * tuning.conversion_weight
        + (1.0 / first_contact_hours) * tuning.speed_weight
}

fn candidate_pool(store: &Store) -> Vec<&StaffUser> {
    store.active_staff_with_role(Role::CaseWorker).collect()
}

/// Scores every active case worker. Workers at capacity score zero.
pub fn score_candidates(store: &Store, config: &Config) -> Vec<CandidateScore> {
    let capacity = config.org.max_daily_leads_per_staff;
    candidate_pool(store)
        .into_iter()
        .map(|staff| {
            let active_load = store.active_load(staff.id);
            let score = if active_load >= capacity as usize {
                0.0
            } else {
                let remaining = capacity - active_load as u32;
                score_candidate(staff.metrics.as_ref(), remaining, &config.tuning)
            };
            CandidateScore {
                staff_id: staff.id,
                name: staff.name.clone(),
                active_load,
                score,
            }
        })
        .collect()
}

/// Picks the best case worker, or defers. Ties go to the earlier candidate
/// in pool order.
pub fn choose_assignee(store: &Store, config: &Config) -> AssignmentOutcome {
    let scores = score_candidates(store, config);
    if scores.is_empty() {
        tracing::info!("no active case workers, deferring lead to queue");
        return AssignmentOutcome::Deferred {
            reason: DeferReason::NoStaff,
        };
    }

    let mut best: Option<&CandidateScore> = None;
    for candidate in scores.iter().filter(|c| c.score > 0.0) {
        match best {
            Some(current) if candidate.score <= current.score => {}
            _ => best = Some(candidate),
        }
    }

    match best {
        Some(winner) => {
            tracing::debug!(
                staff = %winner.staff_id,
                score = winner.score,
                load = winner.active_load,
                "assignment candidate selected"
            );
            AssignmentOutcome::Assigned {
                staff_id: winner.staff_id,
                score: winner.score,
            }
        }
        None => {
            tracing::info!(candidates = scores.len(), "all case workers at capacity");
            AssignmentOutcome::Deferred {
                reason: DeferReason::AllAtCapacity,
            }
        }
    }
}

/// Load overview for the active case workers.
pub fn capacity_overview(store: &Store, config: &Config) -> Vec<CapacityStatus> {
    let capacity = config.org.max_daily_leads_per_staff;
    candidate_pool(store)
        .into_iter()
        .map(|staff| {
            let active_load = store.active_load(staff.id);
            let occupancy_percent = if capacity == 0 {
                100
            } else {
                ((active_load as f64 / f64::from(capacity)) * 100.0).round() as u32
            };
            CapacityStatus {
                staff_id: staff.id,
                name: staff.name.clone(),
                active_load,
                capacity,
                occupancy_percent,
                available: active_load < capacity as usize,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryChannel, Lead, LeadStatus};
    use chrono::Utc;

    fn staff(name: &str, role: Role, metrics: Option<StaffMetrics>) -> StaffUser {
        StaffUser {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
            role,
            active: true,
            metrics,
            created_at: Utc::now(),
        }
    }

    fn open_lead(assigned_to: Uuid, status: LeadStatus) -> Lead {
        Lead {
            id: Uuid::new_v4(),
            name: "Avery Lee".to_string(),
            email: None,
            phone: None,
            program_id: None,
            programs_of_interest: Vec::new(),
            status,
            assigned_to: Some(assigned_to),
            created_at: Utc::now(),
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
            channel: EntryChannel::Manual,
            notes: String::new(),
            reactivated_from: None,
        }
    }

    fn config_with_capacity(capacity: u32) -> Config {
        let mut config = Config::default();
        config.org.max_daily_leads_per_staff = capacity;
        config
    }

    #[test]
    fn empty_pool_defers_with_no_staff() {
        let mut store = Store::in_memory();
        store.insert_staff(staff("Carolina Vasquez", Role::KeyMaster, None));
        assert_eq!(
            choose_assignee(&store, &Config::default()),
            AssignmentOutcome::Deferred { reason: DeferReason::NoStaff }
        );
    }

    #[test]
    fn inactive_case_workers_are_not_candidates() {
        let mut store = Store::in_memory();
        let mut away = staff("Jules Moreno", Role::CaseWorker, None);
        away.active = false;
        store.insert_staff(away);
        assert_eq!(
            choose_assignee(&store, &Config::default()),
            AssignmentOutcome::Deferred { reason: DeferReason::NoStaff }
        );
    }

    #[test]
    fn default_metrics_produce_baseline_score() {
        let mut store = Store::in_memory();
        store.insert_staff(staff("Jules Moreno", Role::CaseWorker, None));
        let scores = score_candidates(&store, &Config::default());
        // 15 * 10 + 0.1 * 100 + (1 / 5) * 50
        assert!((scores[0].score - 170.0).abs() < 1e-9);
    }

    #[test]
    fn better_metrics_win() {
        let mut store = Store::in_memory();
        let slow = staff("Jules Moreno", Role::CaseWorker, None);
        let fast = staff(
            "Kiara Patel",
            Role::CaseWorker,
            Some(StaffMetrics {
                conversion_rate: Some(0.3),
                avg_first_contact_hours: Some(1.0),
                ..StaffMetrics::default()
            }),
        );
        let fast_id = fast.id;
        store.insert_staff(slow);
        store.insert_staff(fast);
        assert_eq!(choose_assignee(&store, &Config::default()).staff_id(), Some(fast_id));
    }

    #[test]
    fn ties_go_to_first_in_pool_and_are_deterministic() {
        let mut store = Store::in_memory();
        let first = staff("Jules Moreno", Role::CaseWorker, None);
        let first_id = first.id;
        store.insert_staff(first);
        store.insert_staff(staff("Kiara Patel", Role::CaseWorker, None));
        let config = Config::default();

        let one = choose_assignee(&store, &config);
        let two = choose_assignee(&store, &config);
        assert_eq!(one, two);
        assert_eq!(one.staff_id(), Some(first_id));
    }

    #[test]
    fn full_case_worker_defers_with_all_at_capacity() {
        let mut store = Store::in_memory();
        let only = staff("Jules Moreno", Role::CaseWorker, None);
        let only_id = only.id;
        store.insert_staff(only);
        store.insert_lead(open_lead(only_id, LeadStatus::New));
        store.insert_lead(open_lead(only_id, LeadStatus::Contacted));

        let config = config_with_capacity(2);
        assert_eq!(
            choose_assignee(&store, &config),
            AssignmentOutcome::Deferred { reason: DeferReason::AllAtCapacity }
        );
    }

    #[test]
    fn closed_leads_do_not_count_toward_load() {
        let mut store = Store::in_memory();
        let only = staff("Jules Moreno", Role::CaseWorker, None);
        let only_id = only.id;
        store.insert_staff(only);
        store.insert_lead(open_lead(only_id, LeadStatus::Enrolled));
        store.insert_lead(open_lead(only_id, LeadStatus::Rejected));
        store.insert_lead(open_lead(only_id, LeadStatus::FollowingUp));

        let config = config_with_capacity(2);
        assert_eq!(choose_assignee(&store, &config).staff_id(), Some(only_id));
        let overview = capacity_overview(&store, &config);
        assert_eq!(overview[0].active_load, 1);
        assert_eq!(overview[0].occupancy_percent, 50);
        assert!(overview[0].available);
    }
}
