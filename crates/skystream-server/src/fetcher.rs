//! Upstream state-vector poller.
//!
//! The upstream feed reports aircraft states as a bare array-of-arrays;
//! rows are positional. Malformed rows and rows without a position are
//! skipped rather than failing the whole snapshot, since one bad aircraft
//! record is routine in the feed.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::FetchConfig;

/// Upstream request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Positional indices in an upstream state row.
const IDX_ICAO24: usize = 0;
const IDX_CALLSIGN: usize = 1;
const IDX_ORIGIN_COUNTRY: usize = 2;
const IDX_LONGITUDE: usize = 5;
const IDX_LATITUDE: usize = 6;
const IDX_ON_GROUND: usize = 8;
const IDX_VELOCITY: usize = 9;
const IDX_TRUE_TRACK: usize = 10;
const IDX_VERTICAL_RATE: usize = 11;
const IDX_GEO_ALTITUDE: usize = 13;

/// Minimum row length covering every index above.
const MIN_ROW_LEN: usize = 14;

/// One aircraft state record as published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateVector {
    pub icao24: String,
    pub callsign: String,
    pub origin_country: String,
    pub longitude: f64,
    pub latitude: f64,
    pub on_ground: bool,
    /// meters/second
    pub velocity: f64,
    /// degrees, 0-360
    pub true_track: f64,
    /// meters/second
    pub vertical_rate: f64,
    /// meters
    pub geo_altitude: f64,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("upstream response is not a states payload: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct StatesResponse {
    states: Option<Vec<Vec<serde_json::Value>>>,
}

pub struct FlightFetcher {
    client: reqwest::Client,
    url: String,
}

impl FlightFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    /// One poll of the upstream feed.
    pub async fn fetch(&self) -> Result<Vec<StateVector>, FetchError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = response.bytes().await?;
        let parsed: StatesResponse = serde_json::from_slice(&body)?;
        let rows = parsed.states.unwrap_or_default();
        let vectors = parse_states(&rows);
        debug!(
            rows = rows.len(),
            vectors = vectors.len(),
            "upstream snapshot fetched"
        );
        Ok(vectors)
    }
}

fn parse_states(rows: &[Vec<serde_json::Value>]) -> Vec<StateVector> {
    let mut vectors = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() < MIN_ROW_LEN {
            warn!(len = row.len(), "skipping short state row");
            continue;
        }
        // Longitude/latitude are the only fields the map cannot live
        // without; a row missing them is dropped, everything else defaults.
        let (Some(longitude), Some(latitude)) =
            (row[IDX_LONGITUDE].as_f64(), row[IDX_LATITUDE].as_f64())
        else {
            warn!("skipping state row without position");
            continue;
        };

        vectors.push(StateVector {
            icao24: value_str(&row[IDX_ICAO24]),
            callsign: value_str(&row[IDX_CALLSIGN]),
            origin_country: value_str(&row[IDX_ORIGIN_COUNTRY]),
            longitude,
            latitude,
            on_ground: row[IDX_ON_GROUND].as_bool().unwrap_or(false),
            velocity: value_f64(&row[IDX_VELOCITY]),
            true_track: value_f64(&row[IDX_TRUE_TRACK]),
            vertical_rate: value_f64(&row[IDX_VERTICAL_RATE]),
            geo_altitude: value_f64(&row[IDX_GEO_ALTITUDE]),
        });
    }
    vectors
}

fn value_str(value: &serde_json::Value) -> String {
    value.as_str().unwrap_or_default().to_string()
}

fn value_f64(value: &serde_json::Value) -> f64 {
    value.as_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn full_row() -> Vec<Value> {
        serde_json::from_value(json!([
            "4b1805", "SWR23N", "Switzerland", 1688000000i64, 1688000000i64,
            8.5492, 47.4612, 9800.0, false, 212.4, 273.0, -2.9, null, 10058.4,
            10362.0, null, false, 0
        ]))
        .unwrap()
    }

    #[test]
    fn parses_a_complete_row() {
        let vectors = parse_states(&[full_row()]);
        assert_eq!(vectors.len(), 1);
        let v = &vectors[0];
        assert_eq!(v.icao24, "4b1805");
        assert_eq!(v.callsign, "SWR23N");
        assert!((v.longitude - 8.5492).abs() < 1e-9);
        assert!((v.latitude - 47.4612).abs() < 1e-9);
        assert!(!v.on_ground);
        assert!((v.geo_altitude - 10058.4).abs() < 1e-9);
    }

    #[test]
    fn skips_short_rows() {
        let short: Vec<Value> = serde_json::from_value(json!(["abc", "XY"])).unwrap();
        assert!(parse_states(&[short]).is_empty());
    }

    #[test]
    fn skips_rows_without_position() {
        let mut row = full_row();
        row[IDX_LONGITUDE] = Value::Null;
        assert!(parse_states(&[row, full_row()]).len() == 1);
    }

    #[test]
    fn nulls_default_instead_of_failing() {
        let mut row = full_row();
        row[IDX_CALLSIGN] = Value::Null;
        row[IDX_VELOCITY] = Value::Null;
        let vectors = parse_states(&[row]);
        assert_eq!(vectors[0].callsign, "");
        assert_eq!(vectors[0].velocity, 0.0);
    }

    #[test]
    fn serialized_vectors_pass_bus_validation() {
        let vectors = parse_states(&[full_row()]);
        let payload = serde_json::to_vec(&vectors).unwrap();
        assert_eq!(
            skystream_streaming::schema::validate_snapshot(&payload).unwrap(),
            1
        );
    }
}
