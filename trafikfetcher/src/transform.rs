use crate::raw::{RawDeviation, RawSituation};
use chrono::{DateTime, NaiveDateTime, Utc};
use incstorage::models::{Incident, IncidentStatus};
use std::collections::HashMap;
use uuid::Uuid;

/// Why a raw record was rejected instead of normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MalformedTimestamp { field: &'static str, value: String },
    MissingDescription,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MalformedTimestamp { field, value } => {
                write!(f, "malformed {field} '{value}'")
            }
            SkipReason::MissingDescription => write!(f, "empty message text"),
        }
    }
}

/// A rejected raw record, reported by identifier and reason but never
/// allowed to abort the batch.
#[derive(Debug, Clone)]
pub struct SkippedRecord {
    pub provider_ref: String,
    pub reason: SkipReason,
}

/// Result of normalizing one fetched batch.
#[derive(Debug, Default)]
pub struct TransformReport {
    pub incidents: Vec<Incident>,
    pub skipped: Vec<SkippedRecord>,
}

/// Derives the lifecycle status from the record's own timestamps relative
/// to fetch time. A missing start counts as already started; a missing end
/// as still open.
pub fn classify(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> IncidentStatus {
    match (start, end) {
        (Some(s), _) if s > now => IncidentStatus::Upcoming,
        (_, Some(e)) if e <= now => IncidentStatus::Ended,
        _ => IncidentStatus::Ongoing,
    }
}

/// Normalizes a fetched batch into canonical incidents, one per deviation.
///
/// Pure: `now` is the fetch time of the cycle and the only clock used.
/// Duplicate `incident_id`s inside the batch (the provider re-sends whole
/// situations, and page windows can overlap) collapse to the occurrence
/// with the latest provider modification time.
pub fn normalize(situations: &[RawSituation], now: DateTime<Utc>) -> TransformReport {
    let mut report = TransformReport::default();
    let mut index_by_id: HashMap<String, usize> = HashMap::new();

    for situation in situations {
        let situation_id = text(&situation.id).unwrap_or_default();
        let modified_time = parse_time(&situation.modified_time).unwrap_or(None);

        for deviation in &situation.deviations {
            match normalize_deviation(deviation, &situation_id, modified_time, now) {
                Ok(incident) => match index_by_id.get(&incident.incident_id) {
                    Some(&at) => {
                        let existing = &report.incidents[at];
                        if incident.modified_time > existing.modified_time {
                            report.incidents[at] = incident;
                        }
                    }
                    None => {
                        index_by_id.insert(incident.incident_id.clone(), report.incidents.len());
                        report.incidents.push(incident);
                    }
                },
                Err(skip) => {
                    log::debug!("skipping record {}: {}", skip.provider_ref, skip.reason);
                    report.skipped.push(skip);
                }
            }
        }
    }
    report
}

fn normalize_deviation(
    deviation: &RawDeviation,
    situation_id: &str,
    modified_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Incident, SkippedRecord> {
    let provider_ref = text(&deviation.id)
        .or_else(|| (!situation_id.is_empty()).then(|| situation_id.to_string()))
        .unwrap_or_else(|| "<unidentified>".to_string());

    let description = match text(&deviation.message) {
        Some(message) => message,
        None => {
            return Err(SkippedRecord {
                provider_ref,
                reason: SkipReason::MissingDescription,
            })
        }
    };

    let start_time = parse_time(&deviation.start_time).map_err(|value| SkippedRecord {
        provider_ref: provider_ref.clone(),
        reason: SkipReason::MalformedTimestamp {
            field: "start time",
            value,
        },
    })?;
    let end_time = parse_time(&deviation.end_time).map_err(|value| SkippedRecord {
        provider_ref: provider_ref.clone(),
        reason: SkipReason::MalformedTimestamp {
            field: "end time",
            value,
        },
    })?;

    let incident_id = text(&deviation.id).unwrap_or_else(|| {
        derive_incident_id(situation_id, deviation.start_time.as_deref(), &description)
    });

    let county_no = deviation
        .county_no
        .iter()
        .find_map(|raw| raw.trim().parse::<u32>().ok());
    let (latitude, longitude) = deviation
        .geometry
        .as_ref()
        .and_then(|g| g.wgs84.as_deref())
        .map(parse_wkt_point)
        .unwrap_or((None, None));

    Ok(Incident {
        incident_id,
        status: classify(start_time, end_time, now),
        county_no,
        county: county_no.and_then(county_name).map(str::to_string),
        road_number: text(&deviation.road_number),
        start_time,
        end_time,
        modified_time,
        latitude,
        longitude,
        description,
        message_type: text(&deviation.message_type),
        location: text(&deviation.location_descriptor),
        last_seen_at: now,
        fetched_at: now,
    })
}

/// Deterministic fallback key for deviations the provider sends without an
/// id: a UUIDv5 over the immutable fields, so every cycle derives the same
/// key and upserts reconcile.
fn derive_incident_id(situation_id: &str, start_time: Option<&str>, message: &str) -> String {
    let name = format!(
        "situation|{situation_id}|{}|{message}",
        start_time.unwrap_or("")
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

fn text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Coerces a provider timestamp. Absent or blank is fine (`Ok(None)`);
/// present but unparseable is an error carrying the offending value.
fn parse_time(value: &Option<String>) -> Result<Option<DateTime<Utc>>, String> {
    let raw = match value.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw,
        None => return Ok(None),
    };
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(with_offset.with_timezone(&Utc)));
    }
    // The provider occasionally omits the offset; those values are UTC.
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(Some(naive.and_utc()));
    }
    Err(raw.to_string())
}

/// Extracts `(latitude, longitude)` from a WGS84 `POINT (lon lat)` literal.
/// Anything else, including out-of-range coordinates, nulls both values
/// rather than failing the record.
fn parse_wkt_point(wkt: &str) -> (Option<f64>, Option<f64>) {
    let open = match wkt.find("POINT").and_then(|_| wkt.find('(')) {
        Some(i) => i,
        None => return (None, None),
    };
    let close = match wkt[open..].find(')') {
        Some(i) => open + i,
        None => return (None, None),
    };
    let mut parts = wkt[open + 1..close].split_whitespace();
    let (lon, lat) = match (
        parts.next().and_then(|p| p.parse::<f64>().ok()),
        parts.next().and_then(|p| p.parse::<f64>().ok()),
    ) {
        (Some(lon), Some(lat)) => (lon, lat),
        _ => return (None, None),
    };
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return (None, None);
    }
    (Some(lat), Some(lon))
}

/// Official county numbers, as used in the provider's `CountyNo` field.
fn county_name(no: u32) -> Option<&'static str> {
    let name = match no {
        1 => "Stockholms län",
        3 => "Uppsala län",
        4 => "Södermanlands län",
        5 => "Östergötlands län",
        6 => "Jönköpings län",
        7 => "Kronobergs län",
        8 => "Kalmar län",
        9 => "Gotlands län",
        10 => "Blekinge län",
        12 => "Skåne län",
        13 => "Hallands län",
        14 => "Västra Götalands län",
        17 => "Värmlands län",
        18 => "Örebro län",
        19 => "Västmanlands län",
        20 => "Dalarnas län",
        21 => "Gävleborgs län",
        22 => "Västernorrlands län",
        23 => "Jämtlands län",
        24 => "Västerbottens län",
        25 => "Norrbottens län",
        _ => return None,
    };
    Some(name)
}
