use std::collections::HashMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attention::AttentionItem;
use crate::models::{Lead, LeadStatus, Role};
use crate::store::Store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub new: usize,
    pub contacted: usize,
    pub following_up: usize,
    pub exam_scheduled: usize,
    pub enrolled: usize,
    pub rejected: usize,
}

impl StatusCounts {
    pub fn tally<'a>(leads: impl IntoIterator<Item = &'a Lead>) -> Self {
        let mut counts = Self::default();
        for lead in leads {
            *counts.slot(lead.status) += 1;
        }
        counts
    }

    fn slot(&mut self, status: LeadStatus) -> &mut usize {
        match status {
            LeadStatus::New => &mut self.new,
            LeadStatus::Contacted => &mut self.contacted,
            LeadStatus::FollowingUp => &mut self.following_up,
            LeadStatus::ExamScheduled => &mut self.exam_scheduled,
            LeadStatus::Enrolled => &mut self.enrolled,
            LeadStatus::Rejected => &mut self.rejected,
        }
    }

    pub fn get(&self, status: LeadStatus) -> usize {
        match status {
            LeadStatus::New => self.new,
            LeadStatus::Contacted => self.contacted,
            LeadStatus::FollowingUp => self.following_up,
            LeadStatus::ExamScheduled => self.exam_scheduled,
            LeadStatus::Enrolled => self.enrolled,
            LeadStatus::Rejected => self.rejected,
        }
    }

    pub fn total(&self) -> usize {
        LeadStatus::ALL.iter().map(|status| self.get(*status)).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub counts: StatusCounts,
    pub total: usize,
    pub open: usize,
    pub conversion_percent: f64,
    pub avg_first_response_hours: Option<f64>,
    pub avg_days_to_close: Option<f64>,
    pub queue_length: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StaffBreakdown {
    pub staff_id: Uuid,
    pub name: String,
    pub assigned: usize,
    pub open: usize,
    pub enrolled: usize,
    pub conversion_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelSummary {
    pub channel: String,
    pub count: usize,
    pub enrolled: usize,
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn pipeline_summary(store: &Store) -> PipelineSummary {
    let leads = store.leads();
    let counts = StatusCounts::tally(leads);

    let first_response: Vec<f64> = leads
        .iter()
        .filter_map(|lead| lead.first_contact_at.map(|at| at - lead.created_at))
        .map(|gap| gap.num_seconds() as f64 / 3600.0)
        .collect();
    let to_close: Vec<f64> = leads
        .iter()
        .filter_map(|lead| lead.closed_at.map(|at| at - lead.created_at))
        .map(|gap| gap.num_seconds() as f64 / 86_400.0)
        .collect();

    PipelineSummary {
        counts,
        total: leads.len(),
        open: store.open_leads().count(),
        conversion_percent: percent(counts.enrolled, leads.len()),
        avg_first_response_hours: mean(&first_response),
        avg_days_to_close: mean(&to_close),
        queue_length: store.queue_len(),
    }
}

pub fn staff_breakdown(store: &Store) -> Vec<StaffBreakdown> {
    let mut rows: Vec<StaffBreakdown> = store
        .staff_with_role(Role::CaseWorker)
        .map(|user| {
            let assigned: Vec<&Lead> = store.leads_assigned_to(user.id).collect();
            let enrolled = assigned.iter().filter(|lead| lead.enrolled).count();
            StaffBreakdown {
                staff_id: user.id,
                name: user.name.clone(),
                assigned: assigned.len(),
                open: assigned.iter().filter(|lead| lead.is_open()).count(),
                enrolled,
                conversion_percent: percent(enrolled, assigned.len()),
            }
        })
        .collect();

    rows.sort_by(|a, b| b.assigned.cmp(&a.assigned));
    rows
}

pub fn channel_breakdown(leads: &[Lead]) -> Vec<ChannelSummary> {
    let mut map: HashMap<&'static str, (usize, usize)> = HashMap::new();

    for lead in leads {
        let entry = map.entry(lead.channel.as_str()).or_insert((0, 0));
        entry.0 += 1;
        if lead.enrolled {
            entry.1 += 1;
        }
    }

    let mut summaries: Vec<ChannelSummary> = map
        .into_iter()
        .map(|(channel, (count, enrolled))| ChannelSummary {
            channel: channel.to_string(),
            count,
            enrolled,
        })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.channel.cmp(&b.channel)));
    summaries
}

fn hours_label(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(value) => format!("{value:.1} {unit}"),
        None => "n/a".to_string(),
    }
}

pub fn build_report(store: &Store, now: DateTime<Utc>, attention: &[AttentionItem]) -> String {
    let summary = pipeline_summary(store);
    let staff = staff_breakdown(store);
    let channels = channel_breakdown(store.leads());

    let mut output = String::new();

    let _ = writeln!(output, "# Admissions Pipeline Report");
    let _ = writeln!(output, "Generated {}", now.format("%Y-%m-%d %H:%M UTC"));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Pipeline");

    if summary.total == 0 {
        let _ = writeln!(output, "No leads recorded yet.");
    } else {
        for status in LeadStatus::ALL {
            let _ = writeln!(output, "- {}: {}", status, summary.counts.get(status));
        }
        let _ = writeln!(
            output,
            "- conversion: {:.1}% of {} leads ({} open, {} waiting in queue)",
            summary.conversion_percent, summary.total, summary.open, summary.queue_length
        );
        let _ = writeln!(
            output,
            "- average first response: {}",
            hours_label(summary.avg_first_response_hours, "hours")
        );
        let _ = writeln!(
            output,
            "- average time to close: {}",
            hours_label(summary.avg_days_to_close, "days")
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Case Workers");

    if staff.is_empty() {
        let _ = writeln!(output, "No case workers on staff.");
    } else {
        for row in staff.iter() {
            let _ = writeln!(
                output,
                "- {}: {} assigned, {} open, {} enrolled ({:.1}% conversion)",
                row.name, row.assigned, row.open, row.enrolled, row.conversion_percent
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Entry Channels");

    if channels.is_empty() {
        let _ = writeln!(output, "No leads recorded yet.");
    } else {
        for channel in channels.iter() {
            let _ = writeln!(
                output,
                "- {}: {} leads, {} enrolled",
                channel.channel, channel.count, channel.enrolled
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Needs Attention");

    if attention.is_empty() {
        let _ = writeln!(output, "Nothing waiting on staff right now.");
    } else {
        for item in attention.iter().take(15) {
            let _ = writeln!(
                output,
                "- {} ({}){} last touched {}",
                item.name,
                item.status,
                if item.overdue { " OVERDUE," } else { "," },
                item.last_touch.format("%Y-%m-%d %H:%M")
            );
        }
    }

    let mut recent: Vec<_> = store.activity().iter().collect();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Activity");

    if recent.is_empty() {
        let _ = writeln!(output, "No activity recorded yet.");
    } else {
        for record in recent.iter().take(10) {
            let lead_name = store
                .lead(record.lead_id)
                .map(|lead| lead.name.as_str())
                .unwrap_or("deleted lead");
            let _ = writeln!(
                output,
                "- {} {} ({}): {}",
                record.created_at.format("%Y-%m-%d %H:%M"),
                lead_name,
                record.kind.as_str(),
                record.description
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attention::attention_queue;
    use crate::capability::Session;
    use crate::lifecycle::StatusChange;
    use crate::test_support::Harness;
    use chrono::Duration;

    #[test]
    fn counts_follow_statuses() {
        let mut h = Harness::new();
        let admin = Session::system();
        let a = h.create("Ana Soto", None);
        let b = h.create("Avery Lee", None);
        h.create("Kiara Patel", None);
        h.engine
            .change_status(&admin, a.id, StatusChange::to(LeadStatus::Enrolled))
            .unwrap();
        h.engine
            .change_status(&admin, b.id, StatusChange::reject("distance"))
            .unwrap();

        let counts = StatusCounts::tally(h.engine.store().leads());
        assert_eq!(counts.enrolled, 1);
        assert_eq!(counts.rejected, 1);
        assert_eq!(counts.new, 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn summary_averages_response_and_close_times() {
        let mut h = Harness::new();
        let admin = Session::system();
        let lead = h.create("Ana Soto", None);
        h.create("Avery Lee", None);

        h.clock.advance(Duration::hours(6));
        h.engine
            .change_status(&admin, lead.id, StatusChange::to(LeadStatus::Contacted))
            .unwrap();
        h.clock.advance(Duration::hours(42));
        h.engine
            .change_status(&admin, lead.id, StatusChange::to(LeadStatus::Enrolled))
            .unwrap();

        let summary = pipeline_summary(h.engine.store());
        assert_eq!(summary.total, 2);
        assert_eq!(summary.open, 1);
        assert_eq!(summary.conversion_percent, 50.0);
        assert_eq!(summary.avg_first_response_hours, Some(6.0));
        assert_eq!(summary.avg_days_to_close, Some(2.0));
        assert_eq!(summary.queue_length, 1);
    }

    #[test]
    fn report_lists_every_section() {
        let mut h = Harness::new();
        h.add_staff("Jules Moreno", crate::models::Role::CaseWorker);
        h.create("Ana Soto", None);
        let now = h.engine.now();
        let store = h.engine.store();
        let attention = attention_queue(
            now,
            store.leads(),
            store.activity(),
            None,
            &h.engine.config().tuning,
        );

        let report = build_report(store, now, &attention);
        assert!(report.starts_with("# Admissions Pipeline Report"));
        assert!(report.contains("- new: 1"));
        assert!(report.contains("- Jules Moreno: 1 assigned, 1 open, 0 enrolled"));
        assert!(report.contains("- manual: 1 leads, 0 enrolled"));
        assert!(report.contains("- Ana Soto (new), last touched"));
        assert!(report.contains("(creation): Lead created via manual by System"));
    }

    #[test]
    fn empty_store_renders_placeholders() {
        let h = Harness::new();
        let report = build_report(h.engine.store(), h.engine.now(), &[]);
        assert!(report.contains("No leads recorded yet."));
        assert!(report.contains("No case workers on staff."));
        assert!(report.contains("No activity recorded yet."));
    }
}
