use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

/// Filter specification for one fetch: time window plus optional
/// geographic scope. Status is derived after the fetch, so it is not part
/// of the provider query.
#[derive(Debug, Deserialize, Clone)]
pub struct IncidentQuery {
    /// Lower bound on `Deviation.StartTime`; deviations starting after this
    /// instant (or still upcoming) are returned.
    pub since: DateTime<Utc>,
    /// Upper bound on how far into the future upcoming deviations may start.
    #[serde(default)]
    pub future_limit: Option<DateTime<Utc>>,
    /// Restrict to these county numbers; empty means the whole country.
    #[serde(default)]
    pub counties: Vec<u32>,
}

impl IncidentQuery {
    /// Window reaching `days_back` days into the past, capped
    /// `future_days` into the future, measured from `now`.
    pub fn looking_back(now: DateTime<Utc>, days_back: i64, future_days: Option<i64>) -> Self {
        Self {
            since: now - Duration::days(days_back),
            future_limit: future_days.map(|d| now + Duration::days(d)),
            counties: Vec::new(),
        }
    }

    pub fn with_counties(mut self, counties: Vec<u32>) -> Self {
        self.counties = counties;
        self
    }
}
