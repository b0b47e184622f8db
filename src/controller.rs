//! Keeps the heatmap overlay in sync with the map viewport.
//!
//! ## Phases
//!
//! ```text
//!   Idle --region_will_change--> RegionChanging --region_did_change--> Settled
//!                                   ^    |  (timer tick: re-rasterize)     |
//!                                   |    +--------------------------------+
//!                                   +-------- region_will_change ---------+
//! ```
//!
//! While the region is changing a repeating timer re-rasterizes against the current
//! viewport so the overlay tracks the drag. At most one timer exists at a time: arming
//! a new one aborts the previous, and settling aborts it.
//!
//! Each pass reads the in-memory snapshot taken by the last [`ViewportController::refresh`];
//! only refresh touches the store. Finished surfaces are published through a `watch`
//! channel, so consumers always see one complete surface replacing the previous one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::heatmap::{rasterize, DensitySurface, PixelRect, RasterConfig, RasterOptions};
use crate::monitor::{AppState, MonitorEvent};
use crate::spatial::SampleIndex;
use crate::store::{SampleStore, StoreError};
use crate::viewport::{CoordinateSpan, Viewport};
use crate::{GpsPoint, WeightedLocation};

/// Configuration for the viewport controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Re-rasterization period while the region is changing (default: 50ms)
    pub refresh_interval_ms: u64,
    /// Weight given to every recorded sample (default: 2)
    pub sample_weight: f64,
    /// Initial center when there is no data (default: Chicago)
    pub default_center: GpsPoint,
    /// Initial span for recorded samples in degrees (default: 0.6)
    pub sample_span: f64,
    /// Initial span for seed data in degrees (default: 9.0)
    pub seed_span: f64,
    pub raster_options: RasterOptions,
    pub raster: RasterConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 50,
            sample_weight: 2.0,
            default_center: GpsPoint::new(41.95, -87.75),
            sample_span: 0.6,
            seed_span: 9.0,
            raster_options: RasterOptions::default(),
            raster: RasterConfig::default(),
        }
    }
}

/// Where the heatmap data comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum HeatmapSource {
    /// Samples recorded in the store
    Samples,
    /// Static seed records (see [`crate::seed`])
    Seed(Vec<WeightedLocation>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportPhase {
    Idle,
    RegionChanging,
    Settled,
}

struct ControllerState {
    phase: ViewportPhase,
    viewport: Viewport,
    index: SampleIndex,
    data_loaded: bool,
    passes: u64,
}

struct Shared<T: SampleStore> {
    store: Arc<T>,
    source: HeatmapSource,
    config: ControllerConfig,
    state: Mutex<ControllerState>,
    overlay: watch::Sender<Option<Arc<DensitySurface>>>,
}

impl<T: SampleStore> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load(&self) -> Result<Vec<WeightedLocation>, StoreError> {
        match &self.source {
            HeatmapSource::Samples => Ok(self
                .store
                .fetch_all()?
                .iter()
                .map(|s| WeightedLocation::new(s.coordinate(), self.config.sample_weight))
                .collect()),
            HeatmapSource::Seed(records) => Ok(records.clone()),
        }
    }

    fn render(&self, state: &mut ControllerState) {
        let visible = state.index.within(&state.viewport.geo_bounds());
        let points = state.viewport.project_locations(&visible);
        let surface = rasterize(
            &points,
            &state.viewport.bounds,
            &self.config.raster_options,
            &self.config.raster,
        );
        state.passes += 1;
        self.overlay.send_replace(Some(Arc::new(surface)));
    }

    /// One timer tick. Returns false once the region has stopped changing.
    fn tick(&self) -> bool {
        let mut state = self.lock();
        if state.phase != ViewportPhase::RegionChanging {
            return false;
        }
        self.render(&mut state);
        true
    }
}

/// Owns the refresh timer and the displayed overlay for one map view.
pub struct ViewportController<T: SampleStore + 'static> {
    shared: Arc<Shared<T>>,
    runtime: Handle,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl<T: SampleStore + 'static> ViewportController<T> {
    /// Load the data, center the initial viewport on it and render the first overlay.
    ///
    /// The viewport is centered on the median of the loaded locations, falling back to
    /// `config.default_center` when there are none. Timer tasks run on `runtime`.
    pub fn new(
        store: Arc<T>,
        source: HeatmapSource,
        config: ControllerConfig,
        bounds: PixelRect,
        runtime: Handle,
    ) -> Result<Self, StoreError> {
        let span = match source {
            HeatmapSource::Samples => config.sample_span,
            HeatmapSource::Seed(_) => config.seed_span,
        };
        let (overlay, _) = watch::channel(None);

        let shared = Shared {
            store,
            source,
            state: Mutex::new(ControllerState {
                phase: ViewportPhase::Idle,
                viewport: Viewport::new(bounds, config.default_center, CoordinateSpan::square(span)),
                index: SampleIndex::default(),
                data_loaded: false,
                passes: 0,
            }),
            config,
            overlay,
        };

        let locations = shared.load()?;
        {
            let mut state = shared.lock();
            state.index = SampleIndex::new(locations);
            state.data_loaded = true;
            state.viewport = Viewport::centered_on_median(
                bounds,
                &state.index.points(),
                CoordinateSpan::square(span),
                shared.config.default_center,
            );
            info!(
                "[ViewportController] Loaded {} locations, centered on ({:.4}, {:.4})",
                state.index.len(),
                state.viewport.center.latitude,
                state.viewport.center.longitude
            );
            shared.render(&mut state);
        }

        Ok(Self {
            shared: Arc::new(shared),
            runtime,
            timer: Mutex::new(None),
        })
    }

    pub fn phase(&self) -> ViewportPhase {
        self.shared.lock().phase
    }

    pub fn viewport(&self) -> Viewport {
        self.shared.lock().viewport
    }

    /// Number of rasterization passes run so far.
    pub fn pass_count(&self) -> u64 {
        self.shared.lock().passes
    }

    /// Number of locations in the current snapshot.
    pub fn loaded_count(&self) -> usize {
        self.shared.lock().index.len()
    }

    /// The most recently rendered surface.
    pub fn current_surface(&self) -> Option<Arc<DensitySurface>> {
        self.shared.overlay.borrow().clone()
    }

    /// Watch for new surfaces.
    pub fn overlay(&self) -> watch::Receiver<Option<Arc<DensitySurface>>> {
        self.shared.overlay.subscribe()
    }

    /// Update the viewport used by the next pass (e.g. on every drag frame).
    pub fn set_viewport(&self, viewport: Viewport) {
        self.shared.lock().viewport = viewport;
    }

    /// The map started moving: arm (or re-arm) the refresh timer.
    pub fn region_will_change(&self, viewport: Viewport) {
        {
            let mut state = self.shared.lock();
            state.viewport = viewport;
            state.phase = ViewportPhase::RegionChanging;
        }
        self.arm_timer();
    }

    /// The map stopped moving: render once more, then cancel the timer.
    pub fn region_did_change(&self, viewport: Viewport) {
        {
            let mut state = self.shared.lock();
            state.viewport = viewport;
            if state.data_loaded {
                self.shared.render(&mut state);
            }
            state.phase = ViewportPhase::Settled;
        }
        self.cancel_timer();
    }

    /// Reload the data source and re-render, regardless of phase.
    ///
    /// Returns the number of locations loaded.
    pub fn refresh(&self) -> Result<usize, StoreError> {
        // Read outside the state lock so drag ticks keep running during I/O
        let locations = self.shared.load()?;
        let count = locations.len();
        let index = SampleIndex::new(locations);

        let mut state = self.shared.lock();
        state.index = index;
        state.data_loaded = true;
        self.shared.render(&mut state);

        debug!("[ViewportController] Refreshed with {} locations", count);
        Ok(count)
    }

    /// React to a monitor event. Returns true if it triggered a refresh.
    ///
    /// Samples accepted while the app is in the foreground are treated like a manual
    /// refresh; everything else is ignored.
    pub fn handle_event(&self, event: &MonitorEvent) -> Result<bool, StoreError> {
        match event {
            MonitorEvent::SampleAccepted { app_state: AppState::Active, .. } => {
                self.refresh()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Drive [`Self::handle_event`] from a monitor subscription until the channel closes.
    pub fn spawn_event_listener(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<MonitorEvent>,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        self.runtime.spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Err(err) = controller.handle_event(&event) {
                            warn!("[ViewportController] Refresh failed: {}", err);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Missed events collapse into one reload
                        debug!("[ViewportController] Listener lagged by {} events", skipped);
                        if let Err(err) = controller.refresh() {
                            warn!("[ViewportController] Refresh failed: {}", err);
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// True while a refresh timer task is alive.
    pub fn timer_armed(&self) -> bool {
        self.lock_timer()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn lock_timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm_timer(&self) {
        let mut timer = self.lock_timer();
        if let Some(previous) = timer.take() {
            previous.abort();
        }

        let shared = Arc::clone(&self.shared);
        let period = Duration::from_millis(self.shared.config.refresh_interval_ms.max(1));

        *timer = Some(self.runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !shared.tick() {
                    break;
                }
            }
        }));
    }

    fn cancel_timer(&self) {
        if let Some(handle) = self.lock_timer().take() {
            handle.abort();
        }
    }
}

impl<T: SampleStore + 'static> Drop for ViewportController<T> {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
