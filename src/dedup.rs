//! Duplicate detection. Scores are biased toward precision: only matches at
//! or above the configured threshold are reported, and the operator can
//! always create the lead anyway.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Tuning;
use crate::error::{EngineError, EngineResult};
use crate::models::Lead;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSignal {
    Email,
    Phone,
    Name,
}

#[derive(Debug, Clone, Copy)]
pub struct DuplicateQuery<'a> {
    pub name: &'a str,
    pub email: Option<&'a str>,
    pub phone: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub lead_id: Uuid,
    pub name: String,
    pub score: u32,
    pub signals: Vec<MatchSignal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DuplicateAction {
    CreateAnyway,
    Merge { lead_id: Uuid },
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Create,
    MergeInto(Uuid),
    Abort,
}

pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn ratio_score(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        return 0;
    }
    ((part as f64 / whole as f64) * 100.0).round() as u32
}

/// Similarity of two names on a 0..=100 scale.
pub fn name_similarity(a: &str, b: &str) -> u32 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    if a == b {
        return 100;
    }

    if a.contains(b.as_str()) || b.contains(a.as_str()) {
        let (a_len, b_len) = (a.chars().count(), b.chars().count());
        return ratio_score(a_len.min(b_len), a_len.max(b_len));
    }

    let a_tokens: Vec<&str> = a.split_whitespace().collect();
    let b_tokens: Vec<&str> = b.split_whitespace().collect();
    let shared = a_tokens
        .iter()
        .filter(|token| b_tokens.contains(token))
        .count();
    ratio_score(shared, a_tokens.len().max(b_tokens.len()))
}

fn email_matches(candidate: Option<&str>, lead: &Lead) -> bool {
    match (candidate, lead.email.as_deref()) {
        (Some(candidate), Some(existing)) => {
            let candidate = normalize_email(candidate);
            !candidate.is_empty() && candidate == normalize_email(existing)
        }
        _ => false,
    }
}

fn phone_matches(candidate: Option<&str>, lead: &Lead, min_digits: usize) -> bool {
    match (candidate, lead.phone.as_deref()) {
        (Some(candidate), Some(existing)) => {
            let candidate = normalize_phone(candidate);
            candidate.len() >= min_digits && candidate == normalize_phone(existing)
        }
        _ => false,
    }
}

fn score_lead(query: &DuplicateQuery<'_>, lead: &Lead, tuning: &Tuning) -> DuplicateMatch {
    let mut score = 0;
    let mut signals = Vec::new();

    if email_matches(query.email, lead) {
        score = 100;
        signals.push(MatchSignal::Email);
    }
    if phone_matches(query.phone, lead, tuning.min_phone_digits) {
        score = 100;
        signals.push(MatchSignal::Phone);
    }
    let name_score = name_similarity(query.name, &lead.name);
    if name_score >= tuning.duplicate_threshold {
        score = score.max(name_score);
        signals.push(MatchSignal::Name);
    }

    DuplicateMatch {
        lead_id: lead.id,
        name: lead.name.clone(),
        score,
        signals,
    }
}

/// Existing leads that plausibly are the same person, best match first.
pub fn detect(store: &Store, query: &DuplicateQuery<'_>, tuning: &Tuning) -> Vec<DuplicateMatch> {
    let mut matches: Vec<DuplicateMatch> = store
        .leads()
        .iter()
        .map(|lead| score_lead(query, lead, tuning))
        .filter(|found| found.score >= tuning.duplicate_threshold)
        .collect();
    matches.sort_by(|a, b| b.score.cmp(&a.score));
    tracing::debug!(
        candidate = query.name,
        matches = matches.len(),
        "duplicate detection finished"
    );
    matches
}

/// Exact email or normalized phone collision, used by bulk import.
pub fn exact_contact_match<'s>(
    store: &'s Store,
    email: Option<&str>,
    phone: Option<&str>,
    tuning: &Tuning,
) -> Option<(&'s Lead, MatchSignal)> {
    let email = email.filter(|e| !e.trim().is_empty());
    if let Some(lead) = store.leads().iter().find(|lead| email_matches(email, lead)) {
        return Some((lead, MatchSignal::Email));
    }
    store
        .leads()
        .iter()
        .find(|lead| phone_matches(phone, lead, tuning.min_phone_digits))
        .map(|lead| (lead, MatchSignal::Phone))
}

/// Turns the operator's choice into an effect. Merging requires a lead that
/// was actually offered as a match.
pub fn resolve(matches: &[DuplicateMatch], action: DuplicateAction) -> EngineResult<Resolution> {
    match action {
        DuplicateAction::CreateAnyway => Ok(Resolution::Create),
        DuplicateAction::Cancel => Ok(Resolution::Abort),
        DuplicateAction::Merge { lead_id } => {
            if matches.iter().any(|found| found.lead_id == lead_id) {
                Ok(Resolution::MergeInto(lead_id))
            } else {
                Err(EngineError::lead_not_found(lead_id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryChannel, LeadStatus};
    use chrono::Utc;

    fn lead(name: &str, email: Option<&str>, phone: Option<&str>) -> Lead {
        Lead {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.map(str::to_string),
            phone: phone.map(str::to_string),
            program_id: None,
            programs_of_interest: Vec::new(),
            status: LeadStatus::New,
            assigned_to: None,
            created_at: Utc::now(),
            first_contact_at: None,
            next_contact_at: None,
            exam_date: None,
            closed_at: None,
            last_whatsapp_at: None,
            enrolled: false,
            rejected: false,
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

    fn query<'a>(name: &'a str, email: Option<&'a str>, phone: Option<&'a str>) -> DuplicateQuery<'a> {
        DuplicateQuery { name, email, phone }
    }

    #[test]
    fn substring_similarity_uses_length_ratio() {
        // 10 / 17 = 58.8
        assert_eq!(name_similarity("Juan Perez", "Juan Perez Garcia"), 59);
        assert_eq!(name_similarity("  ANA SOTO ", "ana soto"), 100);
    }

    #[test]
    fn token_similarity_divides_by_longer_name() {
        assert_eq!(name_similarity("Soto Ana", "Ana Maria Soto"), 67);
        assert_eq!(name_similarity("Kiara Patel", "Avery Lee"), 0);
    }

    #[test]
    fn threshold_boundary_includes_95_and_excludes_94() {
        let mut store = Store::in_memory();
        store.insert_lead(lead("Ana Maria Rodrigueza", None, None));
        let tuning = Tuning::default();

        // 19 / 20 = 95
        let found = detect(&store, &query("Ana Maria Rodriguez", None, None), &tuning);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].score, 95);
        assert_eq!(found[0].signals, vec![MatchSignal::Name]);

        let mut store = Store::in_memory();
        store.insert_lead(lead("Ana Maria Rodrigu", None, None));
        // 16 / 17 = 94.1
        assert_eq!(name_similarity("Ana Maria Rodrig", "Ana Maria Rodrigu"), 94);
        assert!(detect(&store, &query("Ana Maria Rodrig", None, None), &tuning).is_empty());
    }

    #[test]
    fn email_match_is_case_insensitive_and_reports_all_signals() {
        let mut store = Store::in_memory();
        store.insert_lead(lead("Ana Soto", Some("Ana@X.com"), None));
        let found = detect(
            &store,
            &query("Ana Soto", Some(" ana@x.com"), None),
            &Tuning::default(),
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].score, 100);
        assert_eq!(found[0].signals, vec![MatchSignal::Email, MatchSignal::Name]);
    }

    #[test]
    fn short_phone_numbers_never_match() {
        let mut store = Store::in_memory();
        store.insert_lead(lead("Avery Lee", None, Some("555-1234")));
        store.insert_lead(lead("Jules Moreno", None, Some("+56 9 1234 5678")));
        let tuning = Tuning::default();

        assert!(detect(&store, &query("Someone", None, Some("5551234")), &tuning).is_empty());
        let found = detect(&store, &query("Someone", None, Some("56912345678")), &tuning);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Jules Moreno");
        assert_eq!(found[0].signals, vec![MatchSignal::Phone]);
    }

    #[test]
    fn results_are_sorted_by_score() {
        let mut store = Store::in_memory();
        store.insert_lead(lead("Ana Maria Rodrigueza", None, None));
        store.insert_lead(lead("Someone Else", Some("ana@x.com"), None));
        let found = detect(
            &store,
            &query("Ana Maria Rodriguez", Some("ana@x.com"), None),
            &Tuning::default(),
        );
        let scores: Vec<_> = found.iter().map(|m| m.score).collect();
        assert_eq!(scores, vec![100, 95]);
    }

    #[test]
    fn exact_contact_match_ignores_names() {
        let mut store = Store::in_memory();
        store.insert_lead(lead("Avery Lee", Some("avery@example.com"), Some("+1 (555) 123-4567")));
        let tuning = Tuning::default();

        let (found, signal) =
            exact_contact_match(&store, None, Some("15551234567"), &tuning).unwrap();
        assert_eq!(found.name, "Avery Lee");
        assert_eq!(signal, MatchSignal::Phone);
        assert!(exact_contact_match(&store, Some(""), None, &tuning).is_none());
    }

    #[test]
    fn resolve_maps_actions_to_effects() {
        let offered = DuplicateMatch {
            lead_id: Uuid::new_v4(),
            name: "Ana Soto".to_string(),
            score: 100,
            signals: vec![MatchSignal::Email],
        };
        let matches = vec![offered.clone()];
        assert_eq!(
            resolve(&matches, DuplicateAction::CreateAnyway).unwrap(),
            Resolution::Create
        );
        assert_eq!(resolve(&matches, DuplicateAction::Cancel).unwrap(), Resolution::Abort);
        assert_eq!(
            resolve(&matches, DuplicateAction::Merge { lead_id: offered.lead_id }).unwrap(),
            Resolution::MergeInto(offered.lead_id)
        );
        assert!(resolve(&matches, DuplicateAction::Merge { lead_id: Uuid::new_v4() }).is_err());
    }
}
