use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

/// Organisation settings, loaded once and never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrgConfig {
    pub max_daily_leads_per_staff: u32,
    pub days_before_exam_reminder: i64,
    pub hours_before_whatsapp_followup_reminder: i64,
    pub days_without_progress_alert_threshold: i64,
    pub import_history_limit: usize,
}

impl Default for OrgConfig {
    fn default() -> Self {
        Self {
            max_daily_leads_per_staff: 15,
            days_before_exam_reminder: 2,
            hours_before_whatsapp_followup_reminder: 2,
            days_without_progress_alert_threshold: 3,
            import_history_limit: 20,
        }
    }
}

/// Scoring constants and thresholds used by detection, assignment and the
/// attention queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub duplicate_threshold: u32,
    pub min_phone_digits: usize,
    pub capacity_weight: f64,
    pub conversion_weight: f64,
    pub speed_weight: f64,
    pub default_conversion_rate: f64,
    pub default_first_contact_hours: f64,
    pub attention_window_hours: i64,
    pub overdue_window_hours: i64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            duplicate_threshold: 95,
            min_phone_digits: 8,
            capacity_weight: 10.0,
            conversion_weight: 100.0,
            speed_weight: 50.0,
            default_conversion_rate: 0.1,
            default_first_contact_hours: 5.0,
            attention_window_hours: 24,
            overdue_window_hours: 48,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub org: OrgConfig,
    pub tuning: Tuning,
}

impl Config {
    pub fn from_json(text: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads the config file when one is given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                Self::from_json(&text)
            }
            None => Ok(Self::default()),
        }
    }
}
