//! Map viewport and geographic-to-pixel projection.
//!
//! A viewport is the visible map region: the view's pixel rect plus the geographic
//! center and span shown in it. Longitude maps linearly onto x; latitude goes through
//! the spherical Web Mercator transform used by map tile renderers, so projected
//! points line up with the basemap underneath the overlay.

use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_4;

use crate::geo_utils::median_center;
use crate::heatmap::{PixelRect, WeightedPoint};
use crate::{Bounds, GpsPoint, WeightedLocation};

/// Web Mercator latitude limit (the projection diverges at the poles).
const MAX_MERCATOR_LAT: f64 = 85.051_128_78;

/// Geographic extent of a viewport in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct CoordinateSpan {
    pub latitude_delta: f64,
    pub longitude_delta: f64,
}

impl CoordinateSpan {
    pub fn new(latitude_delta: f64, longitude_delta: f64) -> Self {
        Self { latitude_delta, longitude_delta }
    }

    /// Same delta on both axes.
    pub fn square(delta: f64) -> Self {
        Self::new(delta, delta)
    }

    fn is_usable(&self) -> bool {
        self.latitude_delta.is_finite()
            && self.longitude_delta.is_finite()
            && self.latitude_delta > 0.0
            && self.longitude_delta > 0.0
    }
}

/// The visible map region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Viewport {
    /// View rect in pixels
    pub bounds: PixelRect,
    pub center: GpsPoint,
    pub span: CoordinateSpan,
}

impl Viewport {
    pub fn new(bounds: PixelRect, center: GpsPoint, span: CoordinateSpan) -> Self {
        Self { bounds, center, span }
    }

    /// Viewport centered on the per-axis median of `points`, or on `fallback` when empty.
    pub fn centered_on_median(
        bounds: PixelRect,
        points: &[GpsPoint],
        span: CoordinateSpan,
        fallback: GpsPoint,
    ) -> Self {
        let center = median_center(points).unwrap_or(fallback);
        Self::new(bounds, center, span)
    }

    /// Geographic box covered by the viewport, clamped to valid coordinates.
    pub fn geo_bounds(&self) -> Bounds {
        let half_lat = self.span.latitude_delta / 2.0;
        let half_lng = self.span.longitude_delta / 2.0;
        Bounds {
            min_lat: (self.center.latitude - half_lat).max(-90.0),
            max_lat: (self.center.latitude + half_lat).min(90.0),
            min_lng: (self.center.longitude - half_lng).max(-180.0),
            max_lng: (self.center.longitude + half_lng).min(180.0),
        }
    }

    /// Project a coordinate into view pixels.
    ///
    /// Points outside the viewport project outside the rect; they are not clipped
    /// here. Returns `None` if the span is degenerate.
    pub fn project(&self, point: &GpsPoint) -> Option<(f64, f64)> {
        if !self.span.is_usable() {
            return None;
        }

        let west = self.center.longitude - self.span.longitude_delta / 2.0;
        let x = self.bounds.x + (point.longitude - west) / self.span.longitude_delta * self.bounds.width;

        let top = mercator_y(self.center.latitude + self.span.latitude_delta / 2.0);
        let bottom = mercator_y(self.center.latitude - self.span.latitude_delta / 2.0);
        let height = top - bottom;
        if height <= 0.0 {
            return None;
        }
        let y = self.bounds.y + (top - mercator_y(point.latitude)) / height * self.bounds.height;

        Some((x, y))
    }

    /// Project weighted locations into weighted pixel points.
    pub fn project_locations(&self, locations: &[WeightedLocation]) -> Vec<WeightedPoint> {
        locations
            .iter()
            .filter_map(|loc| {
                let (x, y) = self.project(&loc.point)?;
                Some(WeightedPoint::new(x, y, loc.weight))
            })
            .collect()
    }
}

fn mercator_y(latitude: f64) -> f64 {
    let lat = latitude.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
    (FRAC_PI_4 + lat / 2.0).tan().ln()
}
