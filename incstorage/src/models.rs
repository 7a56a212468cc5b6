use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle classification of an incident, derived from its start and end
/// times relative to the fetch time of the observing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Ongoing,
    Upcoming,
    Ended,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Ongoing => "ongoing",
            IncidentStatus::Upcoming => "upcoming",
            IncidentStatus::Ended => "ended",
        }
    }
}

impl std::str::FromStr for IncidentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ongoing" => Ok(IncidentStatus::Ongoing),
            "upcoming" => Ok(IncidentStatus::Upcoming),
            "ended" => Ok(IncidentStatus::Ended),
            other => Err(format!("unknown incident status '{other}'")),
        }
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical incident record, independent of the provider wire format.
///
/// `incident_id` is the upsert key. `fetched_at` is set on first ingestion
/// and never overwritten; `last_seen_at` advances on every cycle that
/// re-observes the record, so consumers can treat records whose
/// `last_seen_at` stops moving as implicitly closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub incident_id: String,
    pub status: IncidentStatus,
    pub county_no: Option<u32>,
    pub county: Option<String>,
    pub road_number: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub modified_time: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub description: String,
    pub message_type: Option<String>,
    pub location: Option<String>,
    pub last_seen_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
}

/// Query filter for [`crate::store::IncidentStore::read`].
///
/// All criteria are conjunctive; `None` means "no constraint".
#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    pub status: Option<IncidentStatus>,
    pub county: Option<String>,
    pub road_number: Option<String>,
    /// Keep incidents whose `start_time` is at or after this instant.
    pub start_after: Option<DateTime<Utc>>,
    /// Keep incidents whose `start_time` is before this instant.
    pub start_before: Option<DateTime<Utc>>,
    /// Case-insensitive substring match on the description text.
    pub search: Option<String>,
    pub limit: Option<u32>,
}

/// Outcome of one batch upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertReport {
    pub inserted: u64,
    pub updated: u64,
}

impl UpsertReport {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated
    }
}
