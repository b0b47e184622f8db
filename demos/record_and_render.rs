//! Record a short walk through a monitor, then render the heatmap as ASCII.
//!
//! Run with: cargo run --example record_and_render

use std::sync::Arc;

use geo_heatmap::{
    AuthorizationStatus, ContinuousOptions, ControllerConfig, HeatmapSource, JsonlStore,
    LocationFix, LocationMonitor, LocationSource, MonitorConfig, MonitoringMode, PixelRect,
    SampleStore, ViewportController,
};

/// Stand-in for the platform location service.
struct SimulatedGps;

impl LocationSource for SimulatedGps {
    fn authorization_status(&self) -> AuthorizationStatus {
        AuthorizationStatus::AuthorizedAlways
    }
    fn request_always_authorization(&self) {}
    fn location_services_enabled(&self) -> bool {
        true
    }
    fn start_updating_location(&self, _options: &ContinuousOptions) {}
    fn stop_updating_location(&self) {}
    fn start_significant_change_monitoring(&self) {}
    fn stop_significant_change_monitoring(&self) {}
}

const SHADES: &[u8] = b" .:-=+*#%@";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::temp_dir().join(format!("geo-heatmap-demo-{}.jsonl", std::process::id()));
    let store = Arc::new(JsonlStore::open(&path)?);

    let monitor = LocationMonitor::new(SimulatedGps, Arc::clone(&store), MonitorConfig::default());
    monitor.start(MonitoringMode::Continuous)?;

    // Loop Chicago: dwell downtown, then walk north along the lake
    let mut t = 0;
    for _ in 0..20 {
        t += 60_000;
        monitor.handle_locations(&[LocationFix::new(41.8819, -87.6278, t)])?;
    }
    for step in 0..30 {
        t += 60_000;
        let lat = 41.8819 + step as f64 * 0.004;
        let lng = -87.6278 + step as f64 * 0.0005;
        monitor.handle_locations(&[LocationFix::new(lat, lng, t)])?;
    }
    monitor.stop(MonitoringMode::Continuous);
    println!("Recorded {} samples to {}\n", store.len()?, path.display());

    let runtime = tokio::runtime::Runtime::new()?;
    let controller = ViewportController::new(
        Arc::clone(&store),
        HeatmapSource::Samples,
        ControllerConfig::default(),
        PixelRect::new(0.0, 0.0, 64.0, 32.0),
        runtime.handle().clone(),
    )?;

    let viewport = controller.viewport();
    println!(
        "Viewport centered on ({:.4}, {:.4}), span {}°",
        viewport.center.latitude, viewport.center.longitude, viewport.span.latitude_delta
    );

    if let Some(surface) = controller.current_surface() {
        for row in 0..surface.height {
            let line: String = (0..surface.width)
                .map(|col| {
                    let level = surface.normalized(col, row).unwrap_or(0.0);
                    let index = (level * (SHADES.len() - 1) as f32).round() as usize;
                    SHADES[index.min(SHADES.len() - 1)] as char
                })
                .collect();
            println!("|{}|", line);
        }
        if let Some((x, y, value)) = surface.peak() {
            println!("\nPeak {:.2} at pixel ({}, {})", value, x, y);
        }
    }

    std::fs::remove_file(&path)?;
    Ok(())
}
