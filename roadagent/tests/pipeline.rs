use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use incstorage::{IncidentFilter, IncidentStore, StorageConfig};
use roadagent::pipeline::{CycleOutcome, Pipeline, Stage};
use tempfile::tempdir;
use trafikfetcher::error::{FetcherError, Result as FetchResult};
use trafikfetcher::raw::{RawDeviation, RawSituation};
use trafikfetcher::{IncidentQuery, IncidentSource};

struct StaticSource {
    situations: Vec<RawSituation>,
}

#[async_trait]
impl IncidentSource for StaticSource {
    async fn fetch(&self, _query: &IncidentQuery) -> FetchResult<Vec<RawSituation>> {
        Ok(self.situations.clone())
    }
}

struct FailingSource;

#[async_trait]
impl IncidentSource for FailingSource {
    async fn fetch(&self, _query: &IncidentQuery) -> FetchResult<Vec<RawSituation>> {
        Err(FetcherError::Transient {
            attempts: 3,
            message: "connection refused".to_string(),
        })
    }
}

fn query() -> IncidentQuery {
    IncidentQuery::looking_back(Utc::now(), 1, Some(14))
}

fn deviation(id: &str) -> RawDeviation {
    let now = Utc::now();
    RawDeviation {
        id: Some(id.to_string()),
        message: Some(format!("Roadworks near exit {id}")),
        message_type: Some("Vägarbete".to_string()),
        location_descriptor: None,
        road_number: Some("E6".to_string()),
        county_no: vec!["14".to_string()],
        start_time: Some((now - Duration::hours(1)).to_rfc3339()),
        end_time: Some((now + Duration::hours(4)).to_rfc3339()),
        geometry: None,
    }
}

fn situation(id: &str, deviations: Vec<RawDeviation>) -> RawSituation {
    RawSituation {
        id: Some(id.to_string()),
        modified_time: Some(Utc::now().to_rfc3339()),
        deviations,
    }
}

fn open_store(dir: &tempfile::TempDir) -> Arc<IncidentStore> {
    let store = IncidentStore::open(&StorageConfig::new(dir.path())).unwrap();
    store.ensure_schema().unwrap();
    Arc::new(store)
}

#[tokio::test]
async fn full_cycle_completes_with_counts() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let source = StaticSource {
        situations: vec![
            situation("sit-1", vec![deviation("a"), deviation("b")]),
            situation("sit-2", vec![deviation("c")]),
        ],
    };
    let pipeline = Pipeline::new(Arc::new(source), store.clone());

    let report = pipeline.run_cycle(&query()).await;
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.fetched, 3);
    assert_eq!(report.transformed, 3);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.inserted, 3);
    assert_eq!(report.updated, 0);
    assert_eq!(store.count().unwrap(), 3);
}

#[tokio::test]
async fn malformed_records_are_counted_not_fatal() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);

    let mut deviations: Vec<RawDeviation> = (0..8).map(|i| deviation(&format!("ok-{i}"))).collect();
    for i in 0..2 {
        let mut bad = deviation(&format!("bad-{i}"));
        bad.start_time = Some("not a timestamp".to_string());
        deviations.push(bad);
    }
    let source = StaticSource {
        situations: vec![situation("sit-1", deviations)],
    };
    let pipeline = Pipeline::new(Arc::new(source), store.clone());

    let report = pipeline.run_cycle(&query()).await;
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.fetched, 10);
    assert_eq!(report.transformed, 8);
    assert_eq!(report.skipped, 2);
    assert_eq!(store.count().unwrap(), 8);
}

#[tokio::test]
async fn fetch_failure_reports_the_stage_and_leaves_store_untouched() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let pipeline = Pipeline::new(Arc::new(FailingSource), store.clone());

    let report = pipeline.run_cycle(&query()).await;
    match &report.outcome {
        CycleOutcome::Failed { stage, message } => {
            assert_eq!(*stage, Stage::Fetching);
            assert!(message.contains("connection refused"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(report.fetched, 0);
    assert_eq!(report.upserted(), 0);
    assert_eq!(store.count().unwrap(), 0);
}

#[tokio::test]
async fn rerunning_the_same_cycle_is_idempotent() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let source = Arc::new(StaticSource {
        situations: vec![situation("sit-1", vec![deviation("a"), deviation("b")])],
    });
    let pipeline = Pipeline::new(source, store.clone());

    let first = pipeline.run_cycle(&query()).await;
    assert_eq!(first.inserted, 2);
    let before = store.read(&IncidentFilter::default()).unwrap();

    let second = pipeline.run_cycle(&query()).await;
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 2);

    let after = store.read(&IncidentFilter::default()).unwrap();
    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(after.iter()) {
        assert_eq!(b.incident_id, a.incident_id);
        assert_eq!(b.description, a.description);
        assert_eq!(b.fetched_at, a.fetched_at);
        assert!(a.last_seen_at >= b.last_seen_at);
    }
}

#[tokio::test]
async fn records_missing_from_the_next_cycle_go_stale_but_remain() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);

    let both = Pipeline::new(
        Arc::new(StaticSource {
            situations: vec![situation("sit-1", vec![deviation("a"), deviation("b")])],
        }),
        store.clone(),
    );
    both.run_cycle(&query()).await;
    let b_before = store.get("b").unwrap().unwrap();

    let only_a = Pipeline::new(
        Arc::new(StaticSource {
            situations: vec![situation("sit-1", vec![deviation("a")])],
        }),
        store.clone(),
    );
    only_a.run_cycle(&query()).await;

    let a = store.get("a").unwrap().unwrap();
    let b = store.get("b").unwrap().unwrap();
    assert_eq!(store.count().unwrap(), 2);
    assert!(a.last_seen_at > b.last_seen_at);
    assert_eq!(b.last_seen_at, b_before.last_seen_at);
}
