//! Driver control record and scanner checkpoints.
//!
//! Both live in the property store as JSON documents: the control record
//! under [`CONTROL_PROPERTY`], each scanner checkpoint under
//! [`checkpoint_property`].

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Property key holding the driver control record.
pub const CONTROL_PROPERTY: &str = "control";

/// Property key holding the checkpoint of scanner `name`.
pub fn checkpoint_property(name: &str) -> String {
    format!("checkpoint.{name}")
}

/// Operator-editable switches and bookkeeping for the queue driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlRecord {
    pub enabled: bool,
    pub next_run_at: Option<NaiveDateTime>,
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
    pub peak_interval_minutes: u32,
    pub off_peak_interval_minutes: u32,
    pub last_check_start: Option<NaiveDateTime>,
    pub last_check_end: Option<NaiveDateTime>,
    pub verbose: bool,
    pub discreet: bool,
    pub batch_size: usize,
    /// Queue row to resume from after a quota-interrupted run.
    pub resume_row: Option<usize>,
}

impl Default for ControlRecord {
    fn default() -> Self {
        Self {
            enabled: true,
            next_run_at: None,
            window_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
            window_end: NaiveTime::from_hms_opt(20, 0, 0).unwrap_or_default(),
            peak_interval_minutes: 5,
            off_peak_interval_minutes: 30,
            last_check_start: None,
            last_check_end: None,
            verbose: false,
            discreet: false,
            batch_size: 50,
            resume_row: None,
        }
    }
}

impl ControlRecord {
    /// Whether `now` falls inside the operating (peak) window.
    ///
    /// A window whose end precedes its start wraps past midnight.
    pub fn in_window(&self, now: NaiveDateTime) -> bool {
        let t = now.time();
        if self.window_start <= self.window_end {
            t >= self.window_start && t < self.window_end
        } else {
            t >= self.window_start || t < self.window_end
        }
    }

    /// Delay before the next regular run, chosen by the operating window.
    pub fn interval_at(&self, now: NaiveDateTime) -> Duration {
        let minutes = if self.in_window(now) {
            self.peak_interval_minutes
        } else {
            self.off_peak_interval_minutes
        };
        Duration::minutes(i64::from(minutes.max(1)))
    }

    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        self.next_run_at.map(|at| now >= at).unwrap_or(true)
    }

    /// A run stamped its start, has not stamped its end, and started less
    /// than `max_age` ago.
    pub fn run_in_progress(&self, now: NaiveDateTime, max_age: Duration) -> bool {
        let Some(start) = self.last_check_start else {
            return false;
        };
        let open = match self.last_check_end {
            Some(end) => start > end,
            None => true,
        };
        open && now.signed_duration_since(start) < max_age
    }
}

/// Durable resumption marker for a checkpointed scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub table_index: usize,
    pub row_index: usize,
    pub dataset_id: String,
    #[serde(default)]
    pub flags: BTreeMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 5, 4)
            .and_then(|d| d.and_hms_opt(h, m, 0))
            .unwrap()
    }

    #[test]
    fn window_selects_peak_interval() {
        let control = ControlRecord::default();
        assert_eq!(control.interval_at(at(9, 0)), Duration::minutes(5));
        assert_eq!(control.interval_at(at(22, 0)), Duration::minutes(30));
    }

    #[test]
    fn window_wraps_midnight() {
        let control = ControlRecord {
            window_start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            window_end: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            ..ControlRecord::default()
        };
        assert!(control.in_window(at(23, 30)));
        assert!(control.in_window(at(2, 0)));
        assert!(!control.in_window(at(12, 0)));
    }

    #[test]
    fn due_when_next_run_unset_or_passed() {
        let mut control = ControlRecord::default();
        assert!(control.is_due(at(9, 0)));
        control.next_run_at = Some(at(9, 30));
        assert!(!control.is_due(at(9, 0)));
        assert!(control.is_due(at(9, 30)));
    }

    #[test]
    fn in_progress_expires_after_max_age() {
        let control = ControlRecord {
            last_check_start: Some(at(9, 0)),
            last_check_end: Some(at(8, 0)),
            ..ControlRecord::default()
        };
        assert!(control.run_in_progress(at(9, 5), Duration::minutes(15)));
        assert!(!control.run_in_progress(at(9, 20), Duration::minutes(15)));
    }

    #[test]
    fn checkpoint_json_uses_camel_case() {
        let cp = Checkpoint {
            table_index: 1,
            row_index: 200,
            dataset_id: "live".to_string(),
            flags: BTreeMap::new(),
        };
        let json = serde_json::to_string(&cp).unwrap();
        assert_eq!(
            json,
            r#"{"tableIndex":1,"rowIndex":200,"datasetId":"live","flags":{}}"#
        );
    }

    #[test]
    fn control_record_tolerates_missing_fields() {
        let control: ControlRecord = serde_json::from_str(r#"{"enabled":false}"#).unwrap();
        assert!(!control.enabled);
        assert_eq!(control.batch_size, 50);
    }
}
