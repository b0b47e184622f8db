//! Static seed data: an alternate heatmap source bundled with the app.
//!
//! The document is a JSON array of records with `latitude`, `longitude` and
//! `magnitude`. Each magnitude becomes an integer heat weight of
//! `round(magnitude * 10)`. A malformed record is skipped and reported; it does not
//! fail the rest of the load.

use std::fs;
use std::io;
use std::path::Path;

use log::{info, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::{GpsPoint, WeightedLocation};

#[derive(Debug, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error), uniffi(flat_error))]
pub enum DataError {
    /// A record is missing a field, has the wrong type, or has invalid coordinates.
    #[error("malformed seed record {index}: {reason}")]
    MalformedSeedRecord { index: usize, reason: String },
    /// The document itself isn't a JSON array.
    #[error("invalid seed document: {0}")]
    InvalidDocument(String),
    #[error("failed to read seed file: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Deserialize)]
struct SeedRecord {
    latitude: f64,
    longitude: f64,
    magnitude: f64,
}

/// Result of loading a seed document.
#[derive(Debug, Default)]
pub struct SeedLoad {
    pub locations: Vec<WeightedLocation>,
    /// One entry per skipped record
    pub skipped: Vec<DataError>,
}

/// Integer heat weight for a seed magnitude: `round(magnitude * 10)`.
///
/// # Example
/// ```
/// use geo_heatmap::magnitude_to_weight;
/// assert_eq!(magnitude_to_weight(4.2), 42);
/// ```
pub fn magnitude_to_weight(magnitude: f64) -> i64 {
    (magnitude * 10.0).round() as i64
}

/// Parse a seed document, skipping malformed records.
pub fn parse_seed_json(json: &str) -> Result<SeedLoad, DataError> {
    let records: Vec<serde_json::Value> =
        serde_json::from_str(json).map_err(|e| DataError::InvalidDocument(e.to_string()))?;

    let mut load = SeedLoad::default();
    for (index, value) in records.into_iter().enumerate() {
        match parse_record(index, value) {
            Ok(location) => load.locations.push(location),
            Err(err) => {
                warn!("[Seed] Skipping {}", err);
                load.skipped.push(err);
            }
        }
    }

    info!(
        "[Seed] Loaded {} records, skipped {}",
        load.locations.len(),
        load.skipped.len()
    );
    Ok(load)
}

fn parse_record(index: usize, value: serde_json::Value) -> Result<WeightedLocation, DataError> {
    let record: SeedRecord = serde_json::from_value(value).map_err(|e| {
        DataError::MalformedSeedRecord { index, reason: e.to_string() }
    })?;

    let point = GpsPoint::new(record.latitude, record.longitude);
    if !point.is_valid() {
        return Err(DataError::MalformedSeedRecord {
            index,
            reason: format!("coordinates out of range ({}, {})", record.latitude, record.longitude),
        });
    }

    Ok(WeightedLocation::new(point, magnitude_to_weight(record.magnitude) as f64))
}

/// Read and parse a seed file.
pub fn load_seed_file(path: impl AsRef<Path>) -> Result<SeedLoad, DataError> {
    let json = fs::read_to_string(path)?;
    parse_seed_json(&json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magnitude_conversion() {
        assert_eq!(magnitude_to_weight(4.2), 42);
        assert_eq!(magnitude_to_weight(2.0), 20);
        assert_eq!(magnitude_to_weight(3.35), 34);
        assert_eq!(magnitude_to_weight(0.0), 0);
    }

    #[test]
    fn test_parse_well_formed() {
        let json = r#"[
            {"latitude": 37.77, "longitude": -122.42, "magnitude": 4.2},
            {"latitude": 35.68, "longitude": 139.69, "magnitude": 6.1}
        ]"#;
        let load = parse_seed_json(json).unwrap();
        assert!(load.skipped.is_empty());
        assert_eq!(load.locations.len(), 2);
        assert_eq!(load.locations[0].point, GpsPoint::new(37.77, -122.42));
        assert_eq!(load.locations[0].weight, 42.0);
        assert_eq!(load.locations[1].weight, 61.0);
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let json = r#"[
            {"latitude": 37.77, "longitude": -122.42, "magnitude": 4.2},
            {"latitude": 37.77, "magnitude": 3.0},
            {"latitude": "north", "longitude": 0.0, "magnitude": 3.0},
            {"latitude": 120.0, "longitude": 0.0, "magnitude": 3.0},
            {"latitude": 35.68, "longitude": 139.69, "magnitude": 6.1}
        ]"#;
        let load = parse_seed_json(json).unwrap();
        assert_eq!(load.locations.len(), 2);
        assert_eq!(load.skipped.len(), 3);

        let indices: Vec<usize> = load
            .skipped
            .iter()
            .filter_map(|e| match e {
                DataError::MalformedSeedRecord { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn test_invalid_document() {
        assert!(matches!(
            parse_seed_json(r#"{"latitude": 1.0}"#),
            Err(DataError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_seed_file("/nonexistent/geo-heatmap/quake.json"),
            Err(DataError::Io(_))
        ));
    }
}
