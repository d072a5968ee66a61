//! Structural validation of snapshot payloads.
//!
//! A snapshot is a JSON array of state-vector records. Validation runs on
//! both sides of the bus: the publisher refuses to write a malformed
//! snapshot, and the fan-out hub drops one that slipped through. The check
//! is structural (required fields present, coordinates numeric) rather than
//! registry-backed; a payload that passes is treated as an opaque blob from
//! then on.

use thiserror::Error;

/// Fields every state-vector record must carry.
pub const REQUIRED_FIELDS: [&str; 10] = [
    "icao24",
    "callsign",
    "origin_country",
    "longitude",
    "latitude",
    "on_ground",
    "velocity",
    "true_track",
    "vertical_rate",
    "geo_altitude",
];

/// Fields that must parse as JSON numbers.
const NUMERIC_FIELDS: [&str; 6] = [
    "longitude",
    "latitude",
    "velocity",
    "true_track",
    "vertical_rate",
    "geo_altitude",
];

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("snapshot is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("snapshot is not an array of records")]
    NotAnArray,

    #[error("record {index} is not an object")]
    NotAnObject { index: usize },

    #[error("record {index} missing required field `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("record {index} field `{field}` is not numeric")]
    NotNumeric { index: usize, field: &'static str },
}

/// Validate a snapshot payload, returning the record count on success.
///
/// An empty array is a valid snapshot: the upstream feed legitimately
/// reports zero aircraft (regional feeds at night, for instance).
pub fn validate_snapshot(payload: &[u8]) -> Result<usize, SchemaError> {
    let value: serde_json::Value = serde_json::from_slice(payload)?;
    let records = value.as_array().ok_or(SchemaError::NotAnArray)?;

    for (index, record) in records.iter().enumerate() {
        let map = record
            .as_object()
            .ok_or(SchemaError::NotAnObject { index })?;
        for field in REQUIRED_FIELDS {
            if !map.contains_key(field) {
                return Err(SchemaError::MissingField { index, field });
            }
        }
        for field in NUMERIC_FIELDS {
            // Presence was checked above; only the type can be wrong here.
            if !map[field].is_number() {
                return Err(SchemaError::NotNumeric { index, field });
            }
        }
    }

    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> serde_json::Value {
        json!({
            "icao24": "4b1805",
            "callsign": "SWR23N",
            "origin_country": "Switzerland",
            "longitude": 8.5492,
            "latitude": 47.4612,
            "on_ground": false,
            "velocity": 212.4,
            "true_track": 273.0,
            "vertical_rate": -2.9,
            "geo_altitude": 10058.4
        })
    }

    #[test]
    fn accepts_well_formed_snapshot() {
        let payload = serde_json::to_vec(&json!([record(), record()])).unwrap();
        assert_eq!(validate_snapshot(&payload).unwrap(), 2);
    }

    #[test]
    fn accepts_empty_snapshot() {
        assert_eq!(validate_snapshot(b"[]").unwrap(), 0);
    }

    #[test]
    fn rejects_non_array_payload() {
        let err = validate_snapshot(b"{\"time\": 0}").unwrap_err();
        assert!(matches!(err, SchemaError::NotAnArray));
    }

    #[test]
    fn rejects_invalid_json() {
        let err = validate_snapshot(b"not json").unwrap_err();
        assert!(matches!(err, SchemaError::Malformed(_)));
    }

    #[test]
    fn rejects_missing_field() {
        let mut r = record();
        r.as_object_mut().unwrap().remove("velocity");
        let payload = serde_json::to_vec(&json!([r])).unwrap();
        let err = validate_snapshot(&payload).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::MissingField { index: 0, field: "velocity" }
        ));
    }

    #[test]
    fn rejects_non_numeric_coordinate() {
        let mut r = record();
        r["latitude"] = json!("47.4612");
        let payload = serde_json::to_vec(&json!([record(), r])).unwrap();
        let err = validate_snapshot(&payload).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::NotNumeric { index: 1, field: "latitude" }
        ));
    }

    #[test]
    fn rejects_scalar_record() {
        let payload = serde_json::to_vec(&json!([42])).unwrap();
        let err = validate_snapshot(&payload).unwrap_err();
        assert!(matches!(err, SchemaError::NotAnObject { index: 0 }));
    }
}
