use chrono::{DateTime, Utc};
use incstorage::IncidentStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use trafikfetcher::{transform, IncidentQuery, IncidentSource};

/// Pipeline stages in execution order. A cycle that fails records the
/// stage it died in; there is no automatic re-run beyond the client's own
/// per-page retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetching,
    Transforming,
    Reconciling,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Fetching => "fetching",
            Stage::Transforming => "transforming",
            Stage::Reconciling => "reconciling",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum CycleOutcome {
    Completed,
    Failed { stage: Stage, message: String },
}

/// Structured summary of one cycle, success or failure.
///
/// `errored` counts records that were part of a batch thrown away by a
/// failed stage (the rolled-back upsert batch); `skipped` counts records
/// rejected individually during normalization.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub fetched: usize,
    pub transformed: usize,
    pub skipped: usize,
    pub inserted: u64,
    pub updated: u64,
    pub errored: usize,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl CycleReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            outcome: CycleOutcome::Completed,
            fetched: 0,
            transformed: 0,
            skipped: 0,
            inserted: 0,
            updated: 0,
            errored: 0,
            started_at,
            duration_ms: 0,
        }
    }

    pub fn upserted(&self) -> u64 {
        self.inserted + self.updated
    }

    pub fn is_success(&self) -> bool {
        self.outcome == CycleOutcome::Completed
    }

    fn fail(mut self, stage: Stage, message: String, timer: Instant) -> Self {
        self.outcome = CycleOutcome::Failed { stage, message };
        self.finish_in_place(timer);
        self
    }

    fn finish_in_place(&mut self, timer: Instant) {
        self.duration_ms = timer.elapsed().as_millis() as u64;
    }
}

/// Drives one fetch → transform → reconcile cycle against a single store.
///
/// Strictly sequential; all fetched pages are merged into one batch and
/// written in one transaction, so a failure anywhere leaves the store at
/// its last committed state.
pub struct Pipeline {
    source: Arc<dyn IncidentSource>,
    store: Arc<IncidentStore>,
}

impl Pipeline {
    pub fn new(source: Arc<dyn IncidentSource>, store: Arc<IncidentStore>) -> Self {
        Self { source, store }
    }

    /// Runs one cycle. Failures are absorbed into the report rather than
    /// returned, so the caller always gets the full counts.
    pub async fn run_cycle(&self, query: &IncidentQuery) -> CycleReport {
        let started_at = Utc::now();
        let timer = Instant::now();
        let mut report = CycleReport::new(started_at);

        tracing::info!(since = %query.since, "cycle started");

        let situations = match self.source.fetch(query).await {
            Ok(situations) => situations,
            Err(err) => {
                tracing::error!(stage = %Stage::Fetching, error = %err, "cycle failed");
                return report.fail(Stage::Fetching, err.to_string(), timer);
            }
        };
        report.fetched = situations.iter().map(|s| s.deviations.len()).sum();

        let normalized = transform::normalize(&situations, started_at);
        report.transformed = normalized.incidents.len();
        report.skipped = normalized.skipped.len();
        for skip in &normalized.skipped {
            tracing::warn!(record = %skip.provider_ref, reason = %skip.reason, "record skipped");
        }

        match self.store.upsert_many(&normalized.incidents, started_at) {
            Ok(upsert) => {
                report.inserted = upsert.inserted;
                report.updated = upsert.updated;
            }
            Err(err) => {
                tracing::error!(stage = %Stage::Reconciling, error = %err, "cycle failed");
                report.errored = report.transformed;
                return report.fail(Stage::Reconciling, err.to_string(), timer);
            }
        }

        report.finish_in_place(timer);
        tracing::info!(
            fetched = report.fetched,
            transformed = report.transformed,
            skipped = report.skipped,
            inserted = report.inserted,
            updated = report.updated,
            duration_ms = report.duration_ms,
            "cycle completed"
        );
        report
    }
}
