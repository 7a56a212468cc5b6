use crate::params::IncidentQuery;
use chrono::{DateTime, Utc};

/// Provider object type queried for road incidents. One `Situation` groups
/// one or more `Deviation` elements, which are the records we ingest.
const OBJECT_TYPE: &str = "Situation";
const SCHEMA_VERSION: &str = "1";

fn iso_z(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Builds the XML `<REQUEST>` body for one page.
///
/// The filter keeps deviations that started inside the query window or are
/// still running at its lower bound; `skip`/`limit` with a fixed `orderby`
/// give stable sequential pages.
pub fn build_request(api_key: &str, query: &IncidentQuery, limit: u32, skip: u32) -> String {
    let since = iso_z(query.since);

    let mut filter = String::new();
    filter.push_str(&format!(
        "      <OR>\n        <GT name=\"Deviation.StartTime\" value=\"{since}\" />\n        <GT name=\"Deviation.EndTime\" value=\"{since}\" />\n      </OR>\n"
    ));
    if let Some(cap) = query.future_limit {
        filter.push_str(&format!(
            "      <LT name=\"Deviation.StartTime\" value=\"{}\" />\n",
            iso_z(cap)
        ));
    }
    if !query.counties.is_empty() {
        let counties = query
            .counties
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(",");
        filter.push_str(&format!(
            "      <IN name=\"Deviation.CountyNo\" value=\"{counties}\" />\n"
        ));
    }

    format!(
        "<REQUEST>\n\
         \x20 <LOGIN authenticationkey=\"{api_key}\" />\n\
         \x20 <QUERY objecttype=\"{OBJECT_TYPE}\" schemaversion=\"{SCHEMA_VERSION}\" limit=\"{limit}\" skip=\"{skip}\" orderby=\"Id\">\n\
         \x20   <FILTER>\n\
         {filter}\
         \x20   </FILTER>\n\
         \x20   <INCLUDE>Id</INCLUDE>\n\
         \x20   <INCLUDE>ModifiedTime</INCLUDE>\n\
         \x20   <INCLUDE>Deviation.Id</INCLUDE>\n\
         \x20   <INCLUDE>Deviation.Message</INCLUDE>\n\
         \x20   <INCLUDE>Deviation.MessageType</INCLUDE>\n\
         \x20   <INCLUDE>Deviation.LocationDescriptor</INCLUDE>\n\
         \x20   <INCLUDE>Deviation.RoadNumber</INCLUDE>\n\
         \x20   <INCLUDE>Deviation.CountyNo</INCLUDE>\n\
         \x20   <INCLUDE>Deviation.StartTime</INCLUDE>\n\
         \x20   <INCLUDE>Deviation.EndTime</INCLUDE>\n\
         \x20   <INCLUDE>Deviation.Geometry.WGS84</INCLUDE>\n\
         \x20 </QUERY>\n\
         </REQUEST>"
    )
}
