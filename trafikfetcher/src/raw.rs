use crate::error::{FetcherError, Result};
use serde::Deserialize;

/// Lenient model of the provider's XML envelope:
/// `RESPONSE / RESULT* / Situation* / Deviation*`.
///
/// Every field is optional so a sparse or partially filled record survives
/// decoding; shape problems are dealt with per record in the transformer,
/// not here.
#[derive(Debug, Deserialize, Default)]
pub struct RawResponse {
    #[serde(rename = "RESULT", default)]
    pub results: Vec<RawResult>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawResult {
    #[serde(rename = "Situation", default)]
    pub situations: Vec<RawSituation>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RawSituation {
    #[serde(rename = "Id")]
    pub id: Option<String>,
    #[serde(rename = "ModifiedTime")]
    pub modified_time: Option<String>,
    #[serde(rename = "Deviation", default)]
    pub deviations: Vec<RawDeviation>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RawDeviation {
    #[serde(rename = "Id")]
    pub id: Option<String>,
    #[serde(rename = "Message")]
    pub message: Option<String>,
    #[serde(rename = "MessageType")]
    pub message_type: Option<String>,
    #[serde(rename = "LocationDescriptor")]
    pub location_descriptor: Option<String>,
    #[serde(rename = "RoadNumber")]
    pub road_number: Option<String>,
    /// The provider repeats `CountyNo` when a deviation spans counties.
    /// Kept as text so one garbled value cannot fail the whole envelope.
    #[serde(rename = "CountyNo", default)]
    pub county_no: Vec<String>,
    #[serde(rename = "StartTime")]
    pub start_time: Option<String>,
    #[serde(rename = "EndTime")]
    pub end_time: Option<String>,
    #[serde(rename = "Geometry")]
    pub geometry: Option<RawGeometry>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RawGeometry {
    #[serde(rename = "WGS84")]
    pub wgs84: Option<String>,
}

/// Decodes one response page into its flat list of situations.
pub fn parse_response(xml: &str) -> Result<Vec<RawSituation>> {
    let response: RawResponse =
        quick_xml::de::from_str(xml).map_err(|err| FetcherError::Decode(err.to_string()))?;
    Ok(response
        .results
        .into_iter()
        .flat_map(|result| result.situations)
        .collect())
}
