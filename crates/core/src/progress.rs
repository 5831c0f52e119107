//! Batch build progress tracking and build results

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Cap on the number of error strings kept in progress and results
pub const MAX_TRACKED_ERRORS: usize = 50;

/// Progress snapshot for a running batch build.
///
/// Mutated only by the batch builder's reporting path; observers receive
/// clones of this snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProgress {
    pub total_items: usize,
    pub processed_items: usize,
    pub successful_items: usize,
    pub failed_items: usize,
    pub start_time: DateTime<Utc>,
    /// Error messages, capped at [`MAX_TRACKED_ERRORS`]
    #[serde(default)]
    pub errors: Vec<String>,
}

impl BatchProgress {
    pub fn new(total_items: usize) -> Self {
        Self {
            total_items,
            processed_items: 0,
            successful_items: 0,
            failed_items: 0,
            start_time: Utc::now(),
            errors: Vec::new(),
        }
    }

    pub fn record_success(&mut self) {
        self.processed_items += 1;
        self.successful_items += 1;
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.processed_items += 1;
        self.failed_items += 1;
        if self.errors.len() < MAX_TRACKED_ERRORS {
            self.errors.push(error.into());
        }
    }

    /// Percent of items processed, 0-100
    pub fn progress_percentage(&self) -> f64 {
        if self.total_items == 0 {
            return 100.0;
        }
        (self.processed_items as f64 / self.total_items as f64) * 100.0
    }

    /// Fraction of processed items that succeeded
    pub fn success_rate(&self) -> f64 {
        if self.processed_items == 0 {
            return 0.0;
        }
        self.successful_items as f64 / self.processed_items as f64
    }

    pub fn elapsed_seconds(&self) -> f64 {
        let elapsed = Utc::now().signed_duration_since(self.start_time);
        elapsed.num_milliseconds() as f64 / 1000.0
    }

    /// Linear extrapolation from throughput so far; None until the first
    /// item completes
    pub fn estimated_completion(&self) -> Option<DateTime<Utc>> {
        if self.processed_items == 0 || self.processed_items >= self.total_items {
            return None;
        }
        let elapsed = self.elapsed_seconds();
        let per_item = elapsed / self.processed_items as f64;
        let remaining = (self.total_items - self.processed_items) as f64 * per_item;
        Some(Utc::now() + Duration::milliseconds((remaining * 1000.0) as i64))
    }
}

/// Outcome of a batch build
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    /// Every document succeeded
    Success,
    /// At least one document failed, but the batch completed
    PartialSuccess,
    /// The build could not run at all
    Error,
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStatus::Success => write!(f, "success"),
            BuildStatus::PartialSuccess => write!(f, "partial_success"),
            BuildStatus::Error => write!(f, "error"),
        }
    }
}

/// Final result of a batch build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    pub status: BuildStatus,
    pub graph_name: String,
    pub total_documents: usize,
    pub successful_documents: usize,
    pub failed_documents: usize,
    pub entities_created: usize,
    pub relationships_created: usize,
    pub elapsed_seconds: f64,
    /// Error messages, capped at [`MAX_TRACKED_ERRORS`]
    #[serde(default)]
    pub errors: Vec<String>,
}
