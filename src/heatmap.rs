//! Weighted kernel-density rasterization for the heatmap overlay.
//!
//! Turns an unbounded set of weighted, already-projected points into a dense
//! intensity grid sized to the viewport:
//! 1. Drop points outside the pixel rect and points without positive weight
//! 2. Optionally rescale weights so a few heavy points can't saturate the whole map
//! 3. Optionally group near-coincident points into one representative per grid cell
//! 4. Splat a truncated Gaussian per point, scaled by `weight * boost`
//!
//! Grouping bounds the number of kernel applications by the number of occupied
//! cells instead of the raw point count, which keeps a pass within an interactive
//! frame budget even as the sample log grows without bound.
//!
//! The output is left unclamped; colorization happens at render time.

use std::collections::HashMap;
use std::time::Instant;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Truncation radius in units of the Gaussian sigma.
const SIGMAS_PER_RADIUS: f64 = 3.0;

/// A point in view pixel space with a heat weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct WeightedPoint {
    pub x: f64,
    pub y: f64,
    pub weight: f64,
}

impl WeightedPoint {
    pub fn new(x: f64, y: f64, weight: f64) -> Self {
        Self { x, y, weight }
    }
}

/// Pixel rectangle of the map view the overlay covers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Grid dimensions in whole pixels, or `None` for a degenerate rect.
    pub fn grid_size(&self) -> Option<(usize, usize)> {
        if !(self.x.is_finite() && self.y.is_finite()) {
            return None;
        }
        if !(self.width.is_finite() && self.height.is_finite()) {
            return None;
        }
        let width = self.width.round();
        let height = self.height.round();
        if width < 1.0 || height < 1.0 {
            return None;
        }
        // Dimensions are reported as u32 and the grid must fit one allocation
        if width > u32::MAX as f64 || height > u32::MAX as f64 {
            return None;
        }
        let (width, height) = (width as usize, height as usize);
        let cells = width.checked_mul(height)?;
        if cells > isize::MAX as usize / std::mem::size_of::<f32>() {
            return None;
        }
        Some((width, height))
    }
}

/// Per-call rasterization options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(default)]
pub struct RasterOptions {
    /// Intensity multiplier applied to every kernel (default: 0.66)
    pub boost: f64,
    /// Rescale weights against the observed distribution (default: false)
    pub weights_adjustment_enabled: bool,
    /// Merge near-coincident points before splatting (default: true)
    pub grouping_enabled: bool,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            boost: 0.66,
            weights_adjustment_enabled: false,
            grouping_enabled: true,
        }
    }
}

/// Kernel and grouping configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(default)]
pub struct RasterConfig {
    /// Kernel truncation radius in pixels (default: 32)
    pub radius_px: f64,
    /// Grouping cell size in pixels (default: 8)
    pub group_cell_px: f64,
    /// Weight assigned to saturated points when adjustment is on (default: 100)
    pub weight_ceiling: f64,
    /// Fraction of heaviest points allowed to saturate (default: 0.01)
    pub saturation_fraction: f64,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            radius_px: 32.0,
            group_cell_px: 8.0,
            weight_ceiling: 100.0,
            saturation_fraction: 0.01,
        }
    }
}

/// Dense grid of non-negative intensities, row-major, one value per pixel.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct DensitySurface {
    pub width: u32,
    pub height: u32,
    pub values: Vec<f32>,
    /// Highest intensity in the grid (0 for a blank surface)
    pub max_intensity: f32,
}

impl DensitySurface {
    /// All-zero surface of the given size.
    pub fn blank(width: usize, height: usize) -> Self {
        Self {
            width: width as u32,
            height: height as u32,
            values: vec![0.0; width * height],
            max_intensity: 0.0,
        }
    }

    fn from_values(width: usize, height: usize, values: Vec<f32>) -> Self {
        let max_intensity = values.iter().copied().fold(0.0_f32, f32::max);
        Self {
            width: width as u32,
            height: height as u32,
            values,
            max_intensity,
        }
    }

    pub fn value(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.values.get(y as usize * self.width as usize + x as usize).copied()
    }

    /// Intensity scaled to 0.0-1.0 by the surface maximum.
    pub fn normalized(&self, x: u32, y: u32) -> Option<f32> {
        let value = self.value(x, y)?;
        if self.max_intensity <= 0.0 {
            return Some(0.0);
        }
        Some(value / self.max_intensity)
    }

    /// Sum of all intensities.
    pub fn total_intensity(&self) -> f64 {
        self.values.iter().map(|v| *v as f64).sum()
    }

    pub fn is_blank(&self) -> bool {
        self.max_intensity <= 0.0
    }

    /// Coordinates and value of the hottest pixel (first in row-major order on ties).
    pub fn peak(&self) -> Option<(u32, u32, f32)> {
        if self.is_blank() {
            return None;
        }
        let (index, value) = self
            .values
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, v)| if *v > best.1 { (i, *v) } else { best });
        let width = self.width as usize;
        Some(((index % width) as u32, (index / width) as u32, value))
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Rasterize weighted points into a density surface covering `rect`.
///
/// Points are in the same pixel space as `rect` (view coordinates). Empty input
/// produces a blank surface of the rect's size; a degenerate rect produces a 0x0
/// surface.
///
/// # Example
/// ```
/// use geo_heatmap::{rasterize, PixelRect, RasterConfig, RasterOptions, WeightedPoint};
///
/// let rect = PixelRect::new(0.0, 0.0, 64.0, 64.0);
/// let points = vec![WeightedPoint::new(32.0, 32.0, 2.0)];
/// let surface = rasterize(&points, &rect, &RasterOptions::default(), &RasterConfig::default());
///
/// let (x, y, _) = surface.peak().unwrap();
/// assert!((31..=32).contains(&x) && (31..=32).contains(&y));
/// ```
pub fn rasterize(
    points: &[WeightedPoint],
    rect: &PixelRect,
    options: &RasterOptions,
    config: &RasterConfig,
) -> DensitySurface {
    let start = Instant::now();

    let Some((width, height)) = rect.grid_size() else {
        return DensitySurface::blank(0, 0);
    };

    let boost = if options.boost.is_finite() { options.boost.max(0.0) } else { 0.0 };

    // Translate into grid space, dropping anything that can't contribute
    let mut accepted: Vec<WeightedPoint> = points
        .iter()
        .filter(|p| p.weight.is_finite() && p.weight > 0.0)
        .map(|p| WeightedPoint::new(p.x - rect.x, p.y - rect.y, p.weight))
        .filter(|p| p.x >= 0.0 && p.y >= 0.0 && p.x < width as f64 && p.y < height as f64)
        .collect();

    if accepted.is_empty() || boost == 0.0 {
        return DensitySurface::blank(width, height);
    }

    let input_count = accepted.len();

    if options.weights_adjustment_enabled {
        adjust_weights(&mut accepted, config);
    }

    if options.grouping_enabled {
        accepted = group_points(accepted, config.group_cell_px);
    }

    let radius = if config.radius_px.is_finite() { config.radius_px.max(1.0) } else { 1.0 };
    let stamps: Vec<Stamp> = accepted
        .iter()
        .map(|p| Stamp::new(p, boost, radius, width, height))
        .collect();
    let cutoff = (-SIGMAS_PER_RADIUS * SIGMAS_PER_RADIUS / 2.0).exp() as f32;

    let mut values = vec![0.0_f32; width * height];

    #[cfg(feature = "parallel")]
    values
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(row, line)| splat_row(row, line, &stamps, cutoff));

    #[cfg(not(feature = "parallel"))]
    values
        .chunks_mut(width)
        .enumerate()
        .for_each(|(row, line)| splat_row(row, line, &stamps, cutoff));

    let surface = DensitySurface::from_values(width, height, values);

    debug!(
        "[Rasterizer] {} points ({} kernels) into {}x{} in {:?}, max {:.2}",
        input_count,
        stamps.len(),
        width,
        height,
        start.elapsed(),
        surface.max_intensity
    );

    surface
}

/// Rasterize from parallel point and weight sequences.
///
/// An empty `weights` slice gives every point weight 1. When the lengths differ the
/// extra entries of the longer sequence are ignored.
pub fn rasterize_arrays(
    rect: &PixelRect,
    boost: f64,
    points: &[(f64, f64)],
    weights: &[f64],
    weights_adjustment_enabled: bool,
    grouping_enabled: bool,
    config: &RasterConfig,
) -> DensitySurface {
    let weighted: Vec<WeightedPoint> = if weights.is_empty() {
        points.iter().map(|&(x, y)| WeightedPoint::new(x, y, 1.0)).collect()
    } else {
        if weights.len() != points.len() {
            warn!(
                "[Rasterizer] {} points but {} weights, ignoring the extra entries",
                points.len(),
                weights.len()
            );
        }
        points
            .iter()
            .zip(weights)
            .map(|(&(x, y), &w)| WeightedPoint::new(x, y, w))
            .collect()
    };

    let options = RasterOptions {
        boost,
        weights_adjustment_enabled,
        grouping_enabled,
    };
    rasterize(&weighted, rect, &options, config)
}

/// Split a flat `[x1, y1, x2, y2, ...]` buffer into coordinate pairs.
///
/// A trailing unpaired value is dropped with a warning.
pub fn coordinate_pairs(flat: &[f64]) -> Vec<(f64, f64)> {
    let chunks = flat.chunks_exact(2);
    if !chunks.remainder().is_empty() {
        warn!(
            "[Rasterizer] Coordinate buffer has odd length {}, dropping the trailing value",
            flat.len()
        );
    }
    chunks.map(|pair| (pair[0], pair[1])).collect()
}

/// Rescale weights so the heaviest `saturation_fraction` of points saturate at the ceiling.
///
/// All weights are positive here (filtered earlier).
fn adjust_weights(points: &mut [WeightedPoint], config: &RasterConfig) {
    if points.is_empty() {
        return;
    }

    let mut sorted: Vec<f64> = points.iter().map(|p| p.weight).collect();
    sorted.sort_by(|a, b| b.total_cmp(a));

    let fraction = if config.saturation_fraction.is_finite() {
        config.saturation_fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let index = ((fraction * sorted.len() as f64).floor() as usize).min(sorted.len() - 1);
    let saturation = sorted[index];

    let ceiling = if config.weight_ceiling.is_finite() && config.weight_ceiling > 0.0 {
        config.weight_ceiling
    } else {
        RasterConfig::default().weight_ceiling
    };

    for p in points.iter_mut() {
        p.weight = (p.weight / saturation).min(1.0) * ceiling;
    }
}

/// Running weighted centroid of one grid cell.
#[derive(Debug, Default)]
struct Bucket {
    weight: f64,
    x: f64,
    y: f64,
}

impl Bucket {
    // Incremental mean: stays finite even once the summed weight overflows
    fn add(&mut self, p: &WeightedPoint) {
        self.weight += p.weight;
        let share = p.weight / self.weight;
        self.x += (p.x - self.x) * share;
        self.y += (p.y - self.y) * share;
    }
}

/// Merge points sharing a grid cell into one point at their weighted centroid.
fn group_points(points: Vec<WeightedPoint>, cell_size: f64) -> Vec<WeightedPoint> {
    if !(cell_size.is_finite() && cell_size > 0.0) {
        return points;
    }

    let mut buckets: HashMap<(i64, i64), Bucket> = HashMap::new();
    for p in &points {
        let key = ((p.x / cell_size).floor() as i64, (p.y / cell_size).floor() as i64);
        buckets.entry(key).or_default().add(p);
    }

    // Row-major cell order keeps the splat order (and float sums) deterministic
    let mut grouped: Vec<((i64, i64), WeightedPoint)> = buckets
        .into_iter()
        .map(|(key, b)| (key, WeightedPoint::new(b.x, b.y, b.weight)))
        .collect();
    grouped.sort_unstable_by_key(|(key, _)| (key.1, key.0));

    grouped.into_iter().map(|(_, p)| p).collect()
}

/// Precomputed separable kernel footprint of one point, clipped to the grid.
struct Stamp {
    x0: usize,
    y0: usize,
    amplitude: f32,
    gx: Vec<f32>,
    gy: Vec<f32>,
}

impl Stamp {
    fn new(p: &WeightedPoint, boost: f64, radius: f64, width: usize, height: usize) -> Self {
        let sigma = radius / SIGMAS_PER_RADIUS;
        let denom = 2.0 * sigma * sigma;

        let x0 = (p.x - radius).floor().max(0.0) as usize;
        let x1 = (((p.x + radius).ceil() as usize) + 1).min(width);
        let y0 = (p.y - radius).floor().max(0.0) as usize;
        let y1 = (((p.y + radius).ceil() as usize) + 1).min(height);

        // Sample at pixel centres
        let falloff = |offset: f64| (-(offset * offset) / denom).exp() as f32;
        let gx = (x0..x1).map(|x| falloff(x as f64 + 0.5 - p.x)).collect();
        let gy = (y0..y1).map(|y| falloff(y as f64 + 0.5 - p.y)).collect();

        Self {
            x0,
            y0,
            amplitude: (p.weight * boost) as f32,
            gx,
            gy,
        }
    }
}

/// Accumulate every stamp covering `row` into `line`.
///
/// `gx * gy` falls below `cutoff` exactly outside the truncation circle.
fn splat_row(row: usize, line: &mut [f32], stamps: &[Stamp], cutoff: f32) {
    for stamp in stamps {
        if row < stamp.y0 || row >= stamp.y0 + stamp.gy.len() {
            continue;
        }
        let gy = stamp.gy[row - stamp.y0];
        if gy < cutoff {
            continue;
        }
        let cells = &mut line[stamp.x0..stamp.x0 + stamp.gx.len()];
        for (cell, gx) in cells.iter_mut().zip(&stamp.gx) {
            let k = gx * gy;
            if k >= cutoff {
                *cell += stamp.amplitude * k;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(size: f64) -> PixelRect {
        PixelRect::new(0.0, 0.0, size, size)
    }

    fn ungrouped() -> RasterOptions {
        RasterOptions { grouping_enabled: false, ..RasterOptions::default() }
    }

    #[test]
    fn test_empty_input_is_blank() {
        let surface = rasterize(&[], &rect(100.0), &RasterOptions::default(), &RasterConfig::default());
        assert_eq!((surface.width, surface.height), (100, 100));
        assert_eq!(surface.values.len(), 100 * 100);
        assert!(surface.values.iter().all(|v| *v == 0.0));
        assert!(surface.is_blank());
        assert!(surface.peak().is_none());
    }

    #[test]
    fn test_degenerate_rect() {
        let points = vec![WeightedPoint::new(0.0, 0.0, 1.0)];
        let surface = rasterize(
            &points,
            &PixelRect::new(0.0, 0.0, 0.0, 50.0),
            &RasterOptions::default(),
            &RasterConfig::default(),
        );
        assert_eq!((surface.width, surface.height), (0, 0));
        assert!(surface.values.is_empty());
    }

    #[test]
    fn test_non_positive_weights_contribute_nothing() {
        let points = vec![
            WeightedPoint::new(20.0, 20.0, 0.0),
            WeightedPoint::new(30.0, 30.0, -5.0),
            WeightedPoint::new(40.0, 40.0, f64::NAN),
        ];
        let surface = rasterize(&points, &rect(64.0), &RasterOptions::default(), &RasterConfig::default());
        assert!(surface.values.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_negative_weight_does_not_cancel_positive() {
        let positive = vec![WeightedPoint::new(32.0, 32.0, 3.0)];
        let mixed = vec![
            WeightedPoint::new(32.0, 32.0, 3.0),
            WeightedPoint::new(32.0, 32.0, -100.0),
        ];
        let a = rasterize(&positive, &rect(64.0), &ungrouped(), &RasterConfig::default());
        let b = rasterize(&mixed, &rect(64.0), &ungrouped(), &RasterConfig::default());
        assert_eq!(a, b);
        assert!(b.values.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_points_outside_rect_are_dropped() {
        // Just outside the right edge: would bleed into the grid if not dropped
        let points = vec![WeightedPoint::new(64.5, 32.0, 10.0), WeightedPoint::new(-1.0, 10.0, 10.0)];
        let surface = rasterize(&points, &rect(64.0), &RasterOptions::default(), &RasterConfig::default());
        assert!(surface.is_blank());
    }

    #[test]
    fn test_rect_origin_offset() {
        let view = PixelRect::new(100.0, 200.0, 50.0, 50.0);
        let points = vec![WeightedPoint::new(125.0, 225.0, 1.0)];
        let surface = rasterize(&points, &view, &RasterOptions::default(), &RasterConfig::default());
        let (x, y, _) = surface.peak().unwrap();
        assert!((24..=25).contains(&x) && (24..=25).contains(&y));
    }

    #[test]
    fn test_kernel_is_truncated_at_radius() {
        let config = RasterConfig { radius_px: 10.0, ..RasterConfig::default() };
        let points = vec![WeightedPoint::new(50.0, 50.0, 1.0)];
        let surface = rasterize(&points, &rect(100.0), &ungrouped(), &config);

        assert!(surface.value(50, 50).unwrap() > 0.0);
        assert!(surface.value(57, 50).unwrap() > 0.0);
        assert_eq!(surface.value(62, 50).unwrap(), 0.0);
        assert_eq!(surface.value(50, 38).unwrap(), 0.0);
        // Corner of the bounding square lies outside the circle
        assert_eq!(surface.value(58, 58).unwrap(), 0.0);
    }

    #[test]
    fn test_intensity_scales_with_weight_and_boost() {
        let one = vec![WeightedPoint::new(32.0, 32.0, 1.0)];
        let three = vec![WeightedPoint::new(32.0, 32.0, 3.0)];
        let base = rasterize(&one, &rect(64.0), &ungrouped(), &RasterConfig::default());
        let heavy = rasterize(&three, &rect(64.0), &ungrouped(), &RasterConfig::default());
        let ratio = heavy.total_intensity() / base.total_intensity();
        assert!((ratio - 3.0).abs() < 1e-4, "ratio {}", ratio);

        let boosted = RasterOptions { boost: 1.32, ..ungrouped() };
        let doubled = rasterize(&one, &rect(64.0), &boosted, &RasterConfig::default());
        let ratio = doubled.total_intensity() / base.total_intensity();
        assert!((ratio - 2.0).abs() < 1e-4, "ratio {}", ratio);
    }

    #[test]
    fn test_grouping_preserves_total_intensity_of_coincident_points() {
        let n = 50;
        let cluster: Vec<WeightedPoint> = (0..n).map(|_| WeightedPoint::new(40.3, 22.7, 2.0)).collect();
        let single = vec![WeightedPoint::new(40.3, 22.7, 2.0 * n as f64)];

        let grouped = rasterize(&cluster, &rect(80.0), &RasterOptions::default(), &RasterConfig::default());
        let raw = rasterize(&cluster, &rect(80.0), &ungrouped(), &RasterConfig::default());
        let merged = rasterize(&single, &rect(80.0), &ungrouped(), &RasterConfig::default());

        let total = merged.total_intensity();
        assert!(total > 0.0);
        assert!((grouped.total_intensity() - total).abs() / total < 1e-4);
        assert!((raw.total_intensity() - total).abs() / total < 1e-4);
    }

    #[test]
    fn test_grouping_merges_nearby_points() {
        let cluster = vec![
            WeightedPoint::new(9.0, 9.0, 1.0),
            WeightedPoint::new(11.0, 11.0, 1.0),
            WeightedPoint::new(12.0, 13.0, 2.0),
        ];
        let grouped = group_points(cluster, 8.0);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].weight, 4.0);
        assert!((grouped[0].x - 11.0).abs() < 1e-9);
        assert!((grouped[0].y - 11.5).abs() < 1e-9);
    }

    #[test]
    fn test_grouping_keeps_separate_cells_apart() {
        let points = vec![
            WeightedPoint::new(1.0, 1.0, 1.0),
            WeightedPoint::new(30.0, 1.0, 1.0),
            WeightedPoint::new(1.0, 30.0, 1.0),
        ];
        let grouped = group_points(points, 8.0);
        assert_eq!(grouped.len(), 3);
        // Row-major order
        assert_eq!(grouped[0].x, 1.0);
        assert_eq!(grouped[1].x, 30.0);
        assert_eq!(grouped[2].y, 30.0);
    }

    #[test]
    fn test_weights_adjustment_caps_outliers() {
        let mut points: Vec<WeightedPoint> = (0..99).map(|i| WeightedPoint::new(i as f64, 0.0, 1.0)).collect();
        points.push(WeightedPoint::new(0.0, 0.0, 1_000.0));
        points.push(WeightedPoint::new(0.0, 0.0, 500.0));

        adjust_weights(&mut points, &RasterConfig::default());

        // 1% of 101 points -> the single heaviest saturates against the second heaviest
        assert_eq!(points[100].weight, 100.0);
        assert_eq!(points[99].weight, 100.0);
        assert!((points[0].weight - 100.0 / 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_weights_adjustment_small_sets_scale_to_max() {
        let mut points = vec![
            WeightedPoint::new(0.0, 0.0, 2.0),
            WeightedPoint::new(0.0, 0.0, 8.0),
        ];
        adjust_weights(&mut points, &RasterConfig::default());
        assert_eq!(points[0].weight, 25.0);
        assert_eq!(points[1].weight, 100.0);
    }

    #[test]
    fn test_array_surface_defaults_missing_weights() {
        let coords = vec![(32.0, 32.0), (10.0, 10.0)];
        let uniform = rasterize_arrays(&rect(64.0), 0.66, &coords, &[], false, true, &RasterConfig::default());
        let explicit = rasterize_arrays(&rect(64.0), 0.66, &coords, &[1.0, 1.0], false, true, &RasterConfig::default());
        assert_eq!(uniform, explicit);

        // Extra weights are ignored
        let extra = rasterize_arrays(&rect(64.0), 0.66, &coords, &[1.0, 1.0, 9.0], false, true, &RasterConfig::default());
        assert_eq!(uniform, extra);
    }

    #[test]
    fn test_coordinate_pairs_drop_unpaired_tail() {
        assert_eq!(coordinate_pairs(&[1.0, 2.0, 3.0, 4.0]), vec![(1.0, 2.0), (3.0, 4.0)]);
        assert_eq!(coordinate_pairs(&[1.0, 2.0, 3.0]), vec![(1.0, 2.0)]);
        assert!(coordinate_pairs(&[5.0]).is_empty());
        assert!(coordinate_pairs(&[]).is_empty());
    }

    #[test]
    fn test_normalized_values() {
        let points = vec![WeightedPoint::new(32.0, 32.0, 5.0)];
        let surface = rasterize(&points, &rect(64.0), &RasterOptions::default(), &RasterConfig::default());
        let (x, y, _) = surface.peak().unwrap();
        assert_eq!(surface.normalized(x, y), Some(1.0));
        assert_eq!(surface.normalized(64, 0), None);
    }

    #[test]
    fn test_many_points_stay_finite() {
        let points: Vec<WeightedPoint> = (0..20_000)
            .map(|i| WeightedPoint::new((i % 200) as f64 + 0.25, (i / 200) as f64 * 2.0, 2.0))
            .collect();
        let surface = rasterize(&points, &rect(200.0), &RasterOptions::default(), &RasterConfig::default());
        assert!(surface.values.iter().all(|v| v.is_finite() && *v >= 0.0));
        assert!(surface.max_intensity > 0.0);
    }

    #[test]
    fn test_weights_adjustment_rejects_bad_ceiling() {
        let options = RasterOptions { weights_adjustment_enabled: true, ..RasterOptions::default() };
        let points = vec![WeightedPoint::new(32.0, 32.0, 2.0)];
        let reference = rasterize(&points, &rect(64.0), &options, &RasterConfig::default());

        for ceiling in [-100.0, 0.0, f64::NAN, f64::INFINITY] {
            let config = RasterConfig { weight_ceiling: ceiling, ..RasterConfig::default() };

            let mut adjusted = points.clone();
            adjust_weights(&mut adjusted, &config);
            assert_eq!(adjusted[0].weight, 100.0, "ceiling {}", ceiling);

            let surface = rasterize(&points, &rect(64.0), &options, &config);
            assert!(surface.values.iter().all(|v| *v >= 0.0), "ceiling {}", ceiling);
            assert_eq!(surface, reference);
        }
    }

    #[test]
    fn test_grouping_survives_weight_overflow() {
        let heavy = vec![
            WeightedPoint::new(20.0, 20.0, 1e308),
            WeightedPoint::new(21.0, 21.0, 1e308),
        ];

        let grouped = group_points(heavy.clone(), 8.0);
        assert_eq!(grouped.len(), 1);
        assert!(grouped[0].weight.is_infinite());
        assert!(grouped[0].x.is_finite() && grouped[0].y.is_finite());

        let surface = rasterize(&heavy, &rect(64.0), &RasterOptions::default(), &RasterConfig::default());
        let raw = rasterize(&heavy, &rect(64.0), &ungrouped(), &RasterConfig::default());
        assert!(!surface.is_blank());
        assert!(surface.max_intensity.is_infinite());
        assert!(raw.max_intensity.is_infinite());
        assert!(surface.values.iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_oversized_rect_is_degenerate() {
        assert_eq!(PixelRect::new(0.0, 0.0, 4e9, 4e9).grid_size(), None);
        assert_eq!(PixelRect::new(0.0, 0.0, 1e12, 10.0).grid_size(), None);
        assert_eq!(PixelRect::new(0.0, 0.0, 1e300, 1e300).grid_size(), None);
        assert_eq!(PixelRect::new(0.0, 0.0, 640.0, 480.0).grid_size(), Some((640, 480)));

        let points = vec![WeightedPoint::new(10.0, 10.0, 2.0)];
        let surface = rasterize(&points, &PixelRect::new(0.0, 0.0, 4e9, 4e9), &RasterOptions::default(), &RasterConfig::default());
        assert_eq!((surface.width, surface.height), (0, 0));
        assert!(surface.values.is_empty());
    }
}
