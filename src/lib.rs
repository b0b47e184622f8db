//! # Geo Heatmap
//!
//! Passive location sampling and density heatmap rasterization for mobile map overlays.
//!
//! This library provides:
//! - A durable, append-only log of location samples
//! - A location monitor that turns platform updates into accepted samples
//! - A weighted kernel-density rasterizer that renders samples into a pixel grid
//! - A viewport controller that keeps the overlay in sync with the map while dragging
//!
//! ## Features
//!
//! - **`parallel`** - Enable row-parallel rasterization with rayon
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use geo_heatmap::{
//!     GpsPoint, MemoryStore, SampleStore, WeightedLocation,
//!     CoordinateSpan, PixelRect, Viewport, RasterConfig, RasterOptions, rasterize,
//! };
//!
//! let store = MemoryStore::new();
//! store.append(GpsPoint::new(41.95, -87.75), 1_000).unwrap();
//! store.append(GpsPoint::new(41.85, -87.65), 2_000).unwrap();
//!
//! let viewport = Viewport::new(
//!     PixelRect::new(0.0, 0.0, 100.0, 100.0),
//!     GpsPoint::new(41.9, -87.7),
//!     CoordinateSpan::new(0.2, 0.2),
//! );
//!
//! let locations: Vec<WeightedLocation> = store
//!     .fetch_all()
//!     .unwrap()
//!     .iter()
//!     .map(|s| WeightedLocation::new(s.coordinate(), 2.0))
//!     .collect();
//!
//! let points = viewport.project_locations(&locations);
//! let surface = rasterize(&points, &viewport.bounds, &RasterOptions::default(), &RasterConfig::default());
//! assert_eq!((surface.width, surface.height), (100, 100));
//! assert!(surface.max_intensity > 0.0);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod geo_utils;

// Durable sample log
pub mod store;
pub use store::{JsonlStore, MemoryStore, SampleStore, StoreError};

// Platform location updates -> accepted samples
pub mod monitor;
pub use monitor::{
    AppState, AuthorizationStatus, ContinuousOptions, LocationFix, LocationMonitor,
    LocationSource, MonitorConfig, MonitorEvent, MonitoringMode, PermissionError, RetryPolicy,
};

// Density rasterization
pub mod heatmap;
pub use heatmap::{
    coordinate_pairs, rasterize, rasterize_arrays, DensitySurface, PixelRect, RasterConfig,
    RasterOptions, WeightedPoint,
};

pub mod viewport;
pub use viewport::{CoordinateSpan, Viewport};

pub mod spatial;
pub use spatial::SampleIndex;

pub mod controller;
pub use controller::{ControllerConfig, HeatmapSource, ViewportController, ViewportPhase};

pub mod seed;
pub use seed::{load_seed_file, magnitude_to_weight, parse_seed_json, DataError, SeedLoad};

pub mod config;
pub use config::{ConfigError, HeatmapSettings};

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("GeoHeatmapRust")
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use geo_heatmap::GpsPoint;
/// let point = GpsPoint::new(41.8781, -87.6298); // Chicago
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Geographic bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self { min_lat, max_lat, min_lng, max_lng })
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    /// Check whether a point lies inside the bounds (edges inclusive).
    pub fn contains(&self, point: &GpsPoint) -> bool {
        point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
            && point.longitude >= self.min_lng
            && point.longitude <= self.max_lng
    }
}

/// A persisted location sample.
///
/// Samples are created by the store on append and never mutated afterwards.
/// Field names match the durable record schema (`latitude`, `longitude`, `created`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct LocationSample {
    /// Store-assigned id, strictly increasing in append order
    pub id: u64,
    pub latitude: f64,
    pub longitude: f64,
    /// Capture time (Unix milliseconds)
    pub created: i64,
}

impl LocationSample {
    pub fn coordinate(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

impl fmt::Display for LocationSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LOCATION #{} | latitude: {:.6}  longitude: {:.6}  created: {}",
            self.id, self.latitude, self.longitude, self.created
        )
    }
}

/// A geographic location with a heat weight, ready for projection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct WeightedLocation {
    pub point: GpsPoint,
    pub weight: f64,
}

impl WeightedLocation {
    pub fn new(point: GpsPoint, weight: f64) -> Self {
        Self { point, weight }
    }
}

/// Current wall-clock time as Unix milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ============================================================================
// FFI Exports (only when ffi feature is enabled)
// ============================================================================

#[cfg(feature = "ffi")]
mod ffi {
    use super::*;
    use log::{debug, info};
    use std::sync::Arc;

    /// Render a heatmap from parallel point/weight arrays.
    ///
    /// `points` is a flat coordinate buffer: [x1, y1, x2, y2, ...] in view pixels.
    /// An empty `weights` array gives every point weight 1.
    #[uniffi::export]
    pub fn rasterize_heatmap(
        rect: PixelRect,
        boost: f64,
        points: Vec<f64>,
        weights: Vec<f64>,
        weights_adjustment_enabled: bool,
        grouping_enabled: bool,
    ) -> DensitySurface {
        init_logging();
        let coords = coordinate_pairs(&points);
        debug!("[GeoHeatmapRust] rasterize_heatmap called with {} points", coords.len());

        rasterize_arrays(
            &rect,
            boost,
            &coords,
            &weights,
            weights_adjustment_enabled,
            grouping_enabled,
            &RasterConfig::default(),
        )
    }

    /// Render a heatmap with explicit options and kernel configuration.
    #[uniffi::export]
    pub fn rasterize_with_config(
        points: Vec<WeightedPoint>,
        rect: PixelRect,
        options: RasterOptions,
        config: RasterConfig,
    ) -> DensitySurface {
        init_logging();
        rasterize(&points, &rect, &options, &config)
    }

    /// Project stored samples into view pixels with a uniform weight.
    #[uniffi::export]
    pub fn project_samples(
        viewport: Viewport,
        samples: Vec<LocationSample>,
        weight: f64,
    ) -> Vec<WeightedPoint> {
        let locations: Vec<WeightedLocation> = samples
            .iter()
            .map(|s| WeightedLocation::new(s.coordinate(), weight))
            .collect();
        viewport.project_locations(&locations)
    }

    /// Parse a seed data document, skipping malformed records.
    #[uniffi::export]
    pub fn parse_seed_data(json: String) -> Result<Vec<WeightedLocation>, DataError> {
        init_logging();
        let load = parse_seed_json(&json)?;
        info!(
            "[GeoHeatmapRust] Loaded {} seed records ({} skipped)",
            load.locations.len(),
            load.skipped.len()
        );
        Ok(load.locations)
    }

    /// Heat weight for a seed magnitude.
    #[uniffi::export]
    pub fn seed_magnitude_weight(magnitude: f64) -> i64 {
        magnitude_to_weight(magnitude)
    }

    /// Median of a list of values (used to center the initial map region).
    #[uniffi::export]
    pub fn ffi_median(values: Vec<f64>) -> Option<f64> {
        geo_utils::median(&values)
    }

    /// Durable sample log handle for the host app.
    #[derive(uniffi::Object)]
    pub struct HeatmapStore {
        inner: JsonlStore,
    }

    #[uniffi::export]
    impl HeatmapStore {
        #[uniffi::constructor]
        pub fn open(path: String) -> Result<Arc<Self>, StoreError> {
            init_logging();
            let inner = JsonlStore::open(&path)?;
            Ok(Arc::new(Self { inner }))
        }

        pub fn append(
            &self,
            latitude: f64,
            longitude: f64,
            created: i64,
        ) -> Result<LocationSample, StoreError> {
            self.inner.append(GpsPoint::new(latitude, longitude), created)
        }

        pub fn fetch_all(&self) -> Result<Vec<LocationSample>, StoreError> {
            self.inner.fetch_all()
        }

        pub fn count(&self) -> Result<u64, StoreError> {
            Ok(self.inner.len()? as u64)
        }
    }
}

#[cfg(feature = "ffi")]
pub use ffi::*;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gps_point_validation() {
        assert!(GpsPoint::new(41.95, -87.75).is_valid());
        assert!(!GpsPoint::new(91.0, 0.0).is_valid());
        assert!(!GpsPoint::new(0.0, 181.0).is_valid());
        assert!(!GpsPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_bounds_from_points() {
        let bounds = Bounds::from_points(&[
            GpsPoint::new(41.95, -87.75),
            GpsPoint::new(41.85, -87.65),
        ])
        .unwrap();
        assert_eq!(bounds.min_lat, 41.85);
        assert_eq!(bounds.max_lat, 41.95);
        assert_eq!(bounds.min_lng, -87.75);
        assert_eq!(bounds.max_lng, -87.65);
        assert!(bounds.contains(&GpsPoint::new(41.9, -87.7)));
        assert!(!bounds.contains(&GpsPoint::new(42.0, -87.7)));
        assert!(Bounds::from_points(&[]).is_none());
    }

    #[test]
    fn test_sample_record_field_names() {
        let sample = LocationSample { id: 7, latitude: 41.9, longitude: -87.7, created: 1_500 };
        let json = serde_json::to_value(sample).unwrap();
        assert_eq!(json["latitude"], 41.9);
        assert_eq!(json["longitude"], -87.7);
        assert_eq!(json["created"], 1_500);
        assert_eq!(json["id"], 7);
    }

    #[test]
    fn test_sample_display() {
        let sample = LocationSample { id: 1, latitude: 41.95, longitude: -87.75, created: 42 };
        let text = sample.to_string();
        assert!(text.starts_with("LOCATION #1"));
        assert!(text.contains("41.950000"));
    }

    #[test]
    fn test_end_to_end_two_samples() {
        let store = MemoryStore::new();
        store.append(GpsPoint::new(41.95, -87.75), 1).unwrap();
        store.append(GpsPoint::new(41.85, -87.65), 2).unwrap();

        let samples = store.fetch_all().unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].coordinate(), GpsPoint::new(41.95, -87.75));
        assert_eq!(samples[1].coordinate(), GpsPoint::new(41.85, -87.65));

        let viewport = Viewport::new(
            PixelRect::new(0.0, 0.0, 100.0, 100.0),
            GpsPoint::new(41.9, -87.7),
            CoordinateSpan::new(0.2, 0.2),
        );
        let locations: Vec<WeightedLocation> = samples
            .iter()
            .map(|s| WeightedLocation::new(s.coordinate(), 2.0))
            .collect();
        let points = viewport.project_locations(&locations);
        assert_eq!(points.len(), 2);

        let options = RasterOptions { boost: 0.66, weights_adjustment_enabled: false, grouping_enabled: true };
        let surface = rasterize(&points, &viewport.bounds, &options, &RasterConfig::default());

        assert_eq!((surface.width, surface.height), (100, 100));
        assert!(surface.values.iter().all(|v| *v >= 0.0));

        // Each projected sample sits on a local maximum of the surface
        for p in &points {
            let (px, py) = (p.x.floor() as i64, p.y.floor() as i64);
            let mut best = (0i64, 0i64, f32::MIN);
            for dy in -4..=4 {
                for dx in -4..=4 {
                    let v = surface.value((px + dx) as u32, (py + dy) as u32).unwrap();
                    if v > best.2 {
                        best = (px + dx, py + dy, v);
                    }
                }
            }
            assert!((best.0 - px).abs() <= 1 && (best.1 - py).abs() <= 1);
        }

        // And the midpoint between them is cooler than either peak
        let mid = surface.value(50, 50).unwrap();
        let peak = surface.value(points[0].x as u32, points[0].y as u32).unwrap();
        assert!(mid < peak);
    }
}
