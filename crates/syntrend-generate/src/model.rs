use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary of one object's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReport {
    pub object: String,
    /// `stream` or `collection`.
    pub mode: String,
    pub format: String,
    /// Output directory, `-` for the console.
    pub destination: String,
    pub records_requested: u64,
    pub records_generated: u64,
    /// Candidates regenerated because their timestamp did not advance.
    pub time_retries: u64,
}

/// Report for a series run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesReport {
    pub run_id: String,
    pub seed: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub records_total: u64,
    pub objects: Vec<ObjectReport>,
}

impl SeriesReport {
    pub fn new(seed: u64) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            seed,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: 0,
            records_total: 0,
            objects: Vec::new(),
        }
    }

    pub fn finish(&mut self, elapsed: Duration) {
        self.finished_at = Some(Utc::now());
        self.duration_ms = elapsed.as_millis() as u64;
    }

    pub fn object(&self, name: &str) -> Option<&ObjectReport> {
        self.objects.iter().find(|report| report.object == name)
    }
}
