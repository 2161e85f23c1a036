//! Stage-weighted progress accounting and status reporting.
//!
//! A [`ProgressTracker`] owns the per-task progress state and emits one
//! [`StatusReport`] per sub-step through a [`StatusSink`]. Reports are
//! best-effort, fire-and-forget: a non-2xx response or transport failure is
//! logged and swallowed, never raised, and never aborts the surrounding
//! task. Losing a progress update is tolerable; losing the document is not.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::ChunkPayload;

/// Fixed fraction of total progress attributed to each ingestion stage.
const INGESTION_STAGE_WEIGHTS: &[(&str, f64)] = &[
    ("parsing", 0.2),
    ("chunking", 0.3),
    ("embedding", 0.3),
    ("storage", 0.2),
];

/// Deletion is a single stage carrying the whole weight.
const DELETION_STAGE_WEIGHTS: &[(&str, f64)] = &[("deletion", 1.0)];

/// Which task a tracker reports for; picks stage weights and status names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Ingestion,
    Deletion,
}

impl Operation {
    fn stage_weights(self) -> &'static [(&'static str, f64)] {
        match self {
            Operation::Ingestion => INGESTION_STAGE_WEIGHTS,
            Operation::Deletion => DELETION_STAGE_WEIGHTS,
        }
    }

    fn in_progress_status(self) -> &'static str {
        match self {
            Operation::Ingestion => "processing",
            Operation::Deletion => "deleting",
        }
    }

    fn final_status(self, succeeded: bool) -> &'static str {
        match (self, succeeded) {
            (Operation::Ingestion, true) => "completed",
            (Operation::Ingestion, false) => "failed",
            (Operation::Deletion, true) => "deletion_completed",
            (Operation::Deletion, false) => "deletion_failed",
        }
    }
}

/// One progress/status report, serialized as a single JSON object per call.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub task_id: String,
    pub document_id: String,
    pub status: String,
    /// Percentage for the reported step, 0-100.
    pub progress: u32,
    pub stage: String,
    pub message: String,
    pub current: u64,
    pub total: u64,
    pub stage_progress: f64,
    pub total_progress: f64,
    /// Full chunk payload, populated only on the final `completed` report.
    pub chunks: Vec<ChunkPayload>,
    pub error: Option<String>,
}

/// Delivery target for status reports.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Deliver one report. Implementations must swallow their own failures.
    async fn send(&self, report: &StatusReport);
}

/// POSTs each report to `{base_url}/worker/status` with a short timeout.
pub struct HttpStatusSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpStatusSink {
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: format!("{}/worker/status", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl StatusSink for HttpStatusSink {
    async fn send(&self, report: &StatusReport) {
        match self.client.post(&self.endpoint).json(report).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(stage = %report.stage, "status report delivered");
            }
            Ok(response) => {
                tracing::warn!(
                    status = %response.status(),
                    document_id = %report.document_id,
                    "status endpoint rejected report"
                );
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    document_id = %report.document_id,
                    "failed to deliver status report"
                );
            }
        }
    }
}

/// No-op sink for runs without a configured status endpoint.
pub struct NullSink;

#[async_trait]
impl StatusSink for NullSink {
    async fn send(&self, _report: &StatusReport) {}
}

struct TrackerState {
    current_stage: String,
    stage_progress: f64,
    total_progress: f64,
    stage_started_at: HashMap<String, DateTime<Utc>>,
}

/// Per-task progress state, reporting every sub-step through the sink.
///
/// Overall progress is the weighted sum over the configured stage weights:
/// completed stages contribute their full weight, the active stage
/// contributes `weight * (stage_progress / 100)`.
pub struct ProgressTracker {
    sink: Arc<dyn StatusSink>,
    document_id: String,
    task_id: String,
    operation: Operation,
    started_at: DateTime<Utc>,
    state: Mutex<TrackerState>,
}

impl ProgressTracker {
    pub fn new(
        sink: Arc<dyn StatusSink>,
        document_id: impl Into<String>,
        task_id: impl Into<String>,
        operation: Operation,
    ) -> Self {
        Self {
            sink,
            document_id: document_id.into(),
            task_id: task_id.into(),
            operation,
            started_at: Utc::now(),
            state: Mutex::new(TrackerState {
                current_stage: "initialized".to_string(),
                stage_progress: 0.0,
                total_progress: 0.0,
                stage_started_at: HashMap::new(),
            }),
        }
    }

    /// Time since the task started.
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }

    /// Begin a new stage: stage progress resets to 0 and an initial 0%
    /// report is emitted.
    pub async fn start_stage(&self, stage: &str) {
        {
            let mut state = self.state.lock().expect("tracker state poisoned");
            state.current_stage = stage.to_string();
            state.stage_progress = 0.0;
            state.stage_started_at.insert(stage.to_string(), Utc::now());
        }
        tracing::info!(stage, document_id = %self.document_id, "started stage");
        self.send_progress(&format!("Started {stage}"), 0, 100).await;
    }

    /// Update progress within the current stage and recompute the weighted
    /// total. A zero total reports 0% rather than dividing by zero.
    pub async fn update_stage_progress(&self, message: &str, current: u64, total: u64) {
        if total > 0 {
            let mut state = self.state.lock().expect("tracker state poisoned");
            state.stage_progress = current as f64 / total as f64 * 100.0;
            Self::recompute_total(&mut state, self.operation);
        }
        self.send_progress(message, current, total).await;
    }

    /// Mark a stage complete (100%) and report its duration.
    pub async fn complete_stage(&self, stage: &str) {
        let duration = {
            let mut state = self.state.lock().expect("tracker state poisoned");
            state.stage_progress = 100.0;
            Self::recompute_total(&mut state, self.operation);
            state
                .stage_started_at
                .get(stage)
                .map(|started| Utc::now() - *started)
                .unwrap_or_else(chrono::Duration::zero)
        };
        let secs = duration.num_milliseconds() as f64 / 1000.0;
        tracing::info!(stage, elapsed_secs = secs, document_id = %self.document_id, "completed stage");
        self.send_progress(&format!("Completed {stage} in {secs:.1}s"), 100, 100)
            .await;
    }

    /// Report the in-progress status without stage detail (emitted once
    /// when a task is picked up).
    pub async fn report_started(&self) {
        let status = self.operation.in_progress_status();
        let report = self.build_report(
            status,
            0,
            status,
            &format!("Document processing {status}"),
            0,
            0,
        );
        self.sink.send(&report).await;
    }

    /// Emit one 100%/0% progress report followed by the final status report
    /// carrying the chunk payload (success) or the error string (failure).
    pub async fn report_final(
        &self,
        succeeded: bool,
        chunks: Vec<ChunkPayload>,
        error: Option<String>,
    ) {
        let status = self.operation.final_status(succeeded);
        let stage = if succeeded { "completed" } else { "failed" };

        self.send_progress(&format!("Document processing {status}"), 1, 1)
            .await;

        let mut report = self.build_report(
            status,
            if succeeded { 100 } else { 0 },
            stage,
            &format!("Document processing {status}"),
            1,
            1,
        );
        report.chunks = chunks;
        report.error = error;
        self.sink.send(&report).await;
    }

    fn recompute_total(state: &mut TrackerState, operation: Operation) {
        let mut total = 0.0;
        for (stage, weight) in operation.stage_weights() {
            if state.stage_started_at.contains_key(*stage) {
                if *stage == state.current_stage {
                    total += state.stage_progress / 100.0 * weight;
                } else {
                    total += weight;
                }
            }
        }
        // Sub-steps report nested counters (per unit, then per node within
        // a level), so the raw stage percentage can swing backwards; the
        // overall figure must not.
        state.total_progress = (total * 100.0).max(state.total_progress);
    }

    async fn send_progress(&self, message: &str, current: u64, total: u64) {
        let progress = if total > 0 {
            (current as f64 / total as f64 * 100.0) as u32
        } else {
            0
        };
        let stage = {
            let state = self.state.lock().expect("tracker state poisoned");
            state.current_stage.clone()
        };
        let report = self.build_report(
            self.operation.in_progress_status(),
            progress,
            &stage,
            message,
            current,
            total,
        );
        self.sink.send(&report).await;
    }

    fn build_report(
        &self,
        status: &str,
        progress: u32,
        stage: &str,
        message: &str,
        current: u64,
        total: u64,
    ) -> StatusReport {
        let state = self.state.lock().expect("tracker state poisoned");
        StatusReport {
            task_id: self.task_id.clone(),
            document_id: self.document_id.clone(),
            status: status.to_string(),
            progress,
            stage: stage.to_string(),
            message: message.to_string(),
            current,
            total,
            stage_progress: state.stage_progress,
            total_progress: state.total_progress,
            chunks: Vec::new(),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Captures every report for assertions.
    pub struct RecordingSink {
        pub reports: Mutex<Vec<StatusReport>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self {
                reports: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StatusSink for RecordingSink {
        async fn send(&self, report: &StatusReport) {
            self.reports.lock().unwrap().push(report.clone());
        }
    }

    fn tracker(sink: Arc<RecordingSink>, operation: Operation) -> ProgressTracker {
        ProgressTracker::new(sink, "doc-1", "task-1", operation)
    }

    #[tokio::test]
    async fn total_progress_is_monotone_and_reaches_100() {
        let sink = Arc::new(RecordingSink::new());
        let t = tracker(sink.clone(), Operation::Ingestion);

        for stage in ["parsing", "chunking", "embedding", "storage"] {
            t.start_stage(stage).await;
            t.update_stage_progress("halfway", 1, 2).await;
            t.complete_stage(stage).await;
        }

        let reports = sink.reports.lock().unwrap();
        let mut last = 0.0;
        for report in reports.iter() {
            assert!(
                report.total_progress >= last - 1e-9,
                "total_progress regressed: {} < {}",
                report.total_progress,
                last
            );
            last = report.total_progress;
        }
        assert!(
            (last - 100.0).abs() < 1e-9,
            "final total_progress was {last}"
        );
    }

    #[tokio::test]
    async fn weighted_sum_uses_active_stage_fraction() {
        let sink = Arc::new(RecordingSink::new());
        let t = tracker(sink.clone(), Operation::Ingestion);

        t.start_stage("parsing").await;
        t.complete_stage("parsing").await;
        t.start_stage("chunking").await;
        t.update_stage_progress("half of chunking", 50, 100).await;

        let reports = sink.reports.lock().unwrap();
        let last = reports.last().unwrap();
        // parsing complete (0.2) + half of chunking (0.15) = 35%.
        assert!((last.total_progress - 35.0).abs() < 1e-9);
        assert!((last.stage_progress - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn zero_total_reports_zero_percent() {
        let sink = Arc::new(RecordingSink::new());
        let t = tracker(sink.clone(), Operation::Ingestion);

        t.start_stage("parsing").await;
        t.update_stage_progress("nothing to do", 0, 0).await;

        let reports = sink.reports.lock().unwrap();
        assert_eq!(reports.last().unwrap().progress, 0);
    }

    #[tokio::test]
    async fn deletion_uses_single_stage_weighting_and_statuses() {
        let sink = Arc::new(RecordingSink::new());
        let t = tracker(sink.clone(), Operation::Deletion);

        t.start_stage("deletion").await;
        t.update_stage_progress("deleting vectors", 1, 2).await;
        t.complete_stage("deletion").await;
        t.report_final(true, Vec::new(), None).await;

        let reports = sink.reports.lock().unwrap();
        assert!(reports.iter().any(|r| r.status == "deleting"));
        let mid = reports
            .iter()
            .find(|r| r.message == "deleting vectors")
            .unwrap();
        assert!((mid.total_progress - 50.0).abs() < 1e-9);
        assert_eq!(reports.last().unwrap().status, "deletion_completed");
    }

    #[tokio::test]
    async fn final_report_carries_chunks_then_error_variant_carries_error() {
        let sink = Arc::new(RecordingSink::new());
        let t = tracker(sink.clone(), Operation::Ingestion);

        t.report_final(false, Vec::new(), Some("parse error: boom".into()))
            .await;

        let reports = sink.reports.lock().unwrap();
        // Progress report first, then the final status report.
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].status, "failed");
        assert_eq!(reports[1].progress, 0);
        assert_eq!(reports[1].error.as_deref(), Some("parse error: boom"));
    }
}
