//! Location monitoring: platform location updates in, accepted samples out.
//!
//! The platform location service is abstracted behind [`LocationSource`]. The monitor
//! checks authorization before starting either monitoring mode, keeps only the most
//! recent fix of every delivered batch, persists it, and publishes a
//! [`MonitorEvent`] on a broadcast channel.
//!
//! A failed append is retried with exponential backoff; if the store still refuses it,
//! the sample is kept in a bounded in-memory queue and flushed (in order) ahead of the
//! next accepted sample.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::geo_utils::haversine_distance;
use crate::store::{SampleStore, StoreError};
use crate::{GpsPoint, LocationSample};

// ============================================================================
// Types
// ============================================================================

/// Platform location authorization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationStatus {
    NotDetermined,
    AuthorizedAlways,
    AuthorizedWhenInUse,
    Restricted,
    Denied,
}

impl AuthorizationStatus {
    /// The permission problem this state represents for background tracking, if any.
    pub fn permission_error(self) -> Option<PermissionError> {
        match self {
            AuthorizationStatus::AuthorizedWhenInUse => Some(PermissionError::WhenInUseOnly),
            AuthorizationStatus::Restricted => Some(PermissionError::Restricted),
            AuthorizationStatus::Denied => Some(PermissionError::Denied),
            AuthorizationStatus::NotDetermined | AuthorizationStatus::AuthorizedAlways => None,
        }
    }
}

/// Location access is not sufficient for background tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("location access denied")]
    Denied,
    #[error("location access restricted")]
    Restricted,
    #[error("location access only granted while in use")]
    WhenInUseOnly,
    #[error("location services are disabled")]
    ServicesDisabled,
}

impl PermissionError {
    /// User-facing hint pointing at the settings change that fixes the problem.
    pub fn corrective_action(&self) -> &'static str {
        match self {
            PermissionError::ServicesDisabled => {
                "Location Services are turned off. Please enable them in Settings."
            }
            _ => {
                "This app requires access to Location Services. Please open this app's \
                 settings and set location access to 'Always'."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitoringMode {
    /// Fine-grained, distance-filtered updates
    Continuous,
    /// Coarse, power-efficient updates for background operation
    SignificantChange,
}

/// Application lifecycle state at the time an update is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppState {
    Active,
    Inactive,
    Background,
}

/// A raw fix delivered by the platform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Fix time (Unix milliseconds)
    pub timestamp: i64,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64, timestamp: i64) -> Self {
        Self { latitude, longitude, timestamp }
    }
}

/// Events published by the monitor.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// A sample was persisted
    SampleAccepted { sample: LocationSample, app_state: AppState },
    /// The user must fix location permissions before tracking can run
    PermissionRequired(PermissionError),
}

/// Platform location service.
///
/// Implemented by the host app on top of CoreLocation / FusedLocationProvider. Fixes
/// are delivered back through [`LocationMonitor::handle_locations`].
pub trait LocationSource: Send + Sync {
    fn authorization_status(&self) -> AuthorizationStatus;
    fn request_always_authorization(&self);
    fn location_services_enabled(&self) -> bool;
    fn start_updating_location(&self, options: &ContinuousOptions);
    fn stop_updating_location(&self);
    fn start_significant_change_monitoring(&self);
    fn stop_significant_change_monitoring(&self);
}

// ============================================================================
// Configuration
// ============================================================================

/// Platform tuning for continuous monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuousOptions {
    /// Minimum displacement between updates in meters. <= 0 disables the filter.
    pub distance_filter_m: f64,
    /// Desired accuracy in meters. <= 0 requests the best available accuracy.
    pub desired_accuracy_m: f64,
}

impl Default for ContinuousOptions {
    fn default() -> Self {
        Self {
            distance_filter_m: 0.0,
            desired_accuracy_m: 0.0,
        }
    }
}

impl ContinuousOptions {
    pub fn distance_filter(&self) -> Option<f64> {
        (self.distance_filter_m > 0.0).then_some(self.distance_filter_m)
    }

    pub fn desired_accuracy(&self) -> Option<f64> {
        (self.desired_accuracy_m > 0.0).then_some(self.desired_accuracy_m)
    }
}

/// Retry schedule for failed appends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per sample, including the first (default: 3)
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds (default: 25)
    pub initial_backoff_ms: u64,
    /// Delay multiplier between retries (default: 2)
    pub backoff_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 25,
            backoff_multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1).saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor as u64))
    }
}

/// Configuration for the location monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub continuous: ContinuousOptions,
    pub retry: RetryPolicy,
    /// Samples kept in memory while the store refuses writes (default: 1024)
    pub max_pending: usize,
    /// Broadcast channel capacity (default: 64)
    pub event_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            continuous: ContinuousOptions::default(),
            retry: RetryPolicy::default(),
            max_pending: 1024,
            event_capacity: 64,
        }
    }
}

// ============================================================================
// Monitor
// ============================================================================

#[derive(Debug)]
struct MonitorState {
    app_state: AppState,
    continuous: bool,
    significant: bool,
    pending: VecDeque<(GpsPoint, i64)>,
    last_accepted: Option<GpsPoint>,
}

/// Turns platform location deliveries into persisted samples.
///
/// One instance per process; it is the single writer of the store.
pub struct LocationMonitor<S: LocationSource, T: SampleStore> {
    source: S,
    store: Arc<T>,
    config: MonitorConfig,
    events: broadcast::Sender<MonitorEvent>,
    state: Mutex<MonitorState>,
    /// Serializes store writes so queued samples land before newer ones
    writer: Mutex<()>,
    badge: AtomicU32,
}

impl<S: LocationSource, T: SampleStore> LocationMonitor<S, T> {
    pub fn new(source: S, store: Arc<T>, config: MonitorConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            source,
            store,
            config,
            events,
            state: Mutex::new(MonitorState {
                app_state: AppState::Active,
                continuous: false,
                significant: false,
                pending: VecDeque::new(),
                last_accepted: None,
            }),
            writer: Mutex::new(()),
            badge: AtomicU32::new(0),
        }
    }

    /// Subscribe to accepted-sample and permission events.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Arc<T> {
        &self.store
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    // State is plain bookkeeping, still consistent after a panic elsewhere
    fn lock_state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: MonitorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // ------------------------------------------------------------------------
    // Authorization
    // ------------------------------------------------------------------------

    fn check_authorization(&self) -> Result<(), PermissionError> {
        let status = self.source.authorization_status();
        if status == AuthorizationStatus::NotDetermined {
            info!("[LocationMonitor] Authorization not determined, requesting 'Always'");
            self.source.request_always_authorization();
        }
        match status.permission_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// React to a platform authorization change.
    ///
    /// Entering `Restricted` or `Denied` publishes [`MonitorEvent::PermissionRequired`].
    pub fn authorization_changed(&self, status: AuthorizationStatus) -> Option<PermissionError> {
        info!("[LocationMonitor] Authorization changed to {:?}", status);
        match status {
            AuthorizationStatus::Restricted | AuthorizationStatus::Denied => {
                let err = status.permission_error()?;
                warn!("[LocationMonitor] {}", err);
                self.publish(MonitorEvent::PermissionRequired(err));
                Some(err)
            }
            _ => None,
        }
    }

    // ------------------------------------------------------------------------
    // Monitoring modes
    // ------------------------------------------------------------------------

    /// Start a monitoring mode.
    ///
    /// Modes are independent: starting one does not stop the other. Fails without
    /// starting if authorization is insufficient or location services are off.
    pub fn start(&self, mode: MonitoringMode) -> Result<(), PermissionError> {
        let allowed = self.check_authorization().and_then(|()| {
            if self.source.location_services_enabled() {
                Ok(())
            } else {
                Err(PermissionError::ServicesDisabled)
            }
        });

        if let Err(err) = allowed {
            warn!("[LocationMonitor] Not starting {:?} monitoring: {}", mode, err);
            self.publish(MonitorEvent::PermissionRequired(err));
            return Err(err);
        }

        let mut state = self.lock_state();
        match mode {
            MonitoringMode::Continuous => {
                self.source.start_updating_location(&self.config.continuous);
                state.continuous = true;
            }
            MonitoringMode::SignificantChange => {
                self.source.start_significant_change_monitoring();
                state.significant = true;
            }
        }
        info!("[LocationMonitor] Started {:?} monitoring", mode);
        Ok(())
    }

    pub fn stop(&self, mode: MonitoringMode) {
        let mut state = self.lock_state();
        match mode {
            MonitoringMode::Continuous => {
                self.source.stop_updating_location();
                state.continuous = false;
            }
            MonitoringMode::SignificantChange => {
                self.source.stop_significant_change_monitoring();
                state.significant = false;
            }
        }
        info!("[LocationMonitor] Stopped {:?} monitoring", mode);
    }

    pub fn is_active(&self, mode: MonitoringMode) -> bool {
        let state = self.lock_state();
        match mode {
            MonitoringMode::Continuous => state.continuous,
            MonitoringMode::SignificantChange => state.significant,
        }
    }

    // ------------------------------------------------------------------------
    // App lifecycle
    // ------------------------------------------------------------------------

    pub fn set_app_state(&self, app_state: AppState) {
        self.lock_state().app_state = app_state;
    }

    pub fn app_state(&self) -> AppState {
        self.lock_state().app_state
    }

    /// The process moved to the background: re-issue significant-change monitoring.
    pub fn did_enter_background(&self) {
        self.set_app_state(AppState::Background);
        if let Err(err) = self.start(MonitoringMode::SignificantChange) {
            debug!("[LocationMonitor] Background restart skipped: {}", err);
        }
    }

    /// Samples accepted while the app was not active since the last clear.
    pub fn badge_count(&self) -> u32 {
        self.badge.load(Ordering::Relaxed)
    }

    pub fn clear_badge(&self) {
        self.badge.store(0, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------------
    // Updates
    // ------------------------------------------------------------------------

    /// Handle a batch of platform location fixes.
    ///
    /// Only the last fix of the batch is kept. Returns the persisted sample, `None`
    /// for an empty batch or an invalid fix, or the store error if the sample could
    /// not be written (it is then queued and retried with the next update).
    ///
    /// Blocks the caller while a failing append is retried with backoff. Other monitor
    /// methods stay responsive during the wait; only concurrent writers queue up.
    pub fn handle_locations(
        &self,
        fixes: &[LocationFix],
    ) -> Result<Option<LocationSample>, StoreError> {
        let Some(fix) = fixes.last() else {
            warn!("[LocationMonitor] Update did not include a location");
            return Ok(None);
        };
        if fixes.len() > 1 {
            debug!("[LocationMonitor] Keeping last of {} fixes", fixes.len());
        }

        let point = GpsPoint::new(fix.latitude, fix.longitude);
        if !point.is_valid() {
            warn!(
                "[LocationMonitor] Ignoring invalid fix ({}, {})",
                fix.latitude, fix.longitude
            );
            return Ok(None);
        }

        let writer = self.lock_writer();

        let appended = self
            .flush_queue()
            .and_then(|_| self.append_with_retry(point, fix.timestamp));

        let sample = match appended {
            Ok(sample) => sample,
            Err(err) => {
                self.enqueue(point, fix.timestamp);
                return Err(err);
            }
        };
        drop(writer);

        let mut state = self.lock_state();
        if let Some(previous) = state.last_accepted {
            debug!(
                "[LocationMonitor] Moved {:.0}m since last sample",
                haversine_distance(&previous, &point)
            );
        }
        state.last_accepted = Some(point);

        let app_state = state.app_state;
        drop(state);

        if app_state != AppState::Active {
            self.badge.fetch_add(1, Ordering::Relaxed);
        }

        info!("[LocationMonitor] Tracked {}", sample);
        self.publish(MonitorEvent::SampleAccepted { sample, app_state });

        Ok(Some(sample))
    }

    /// Samples waiting for the store to accept writes again.
    pub fn pending_count(&self) -> usize {
        self.lock_state().pending.len()
    }

    /// Try to write queued samples now. Returns how many were persisted.
    pub fn flush_pending(&self) -> Result<usize, StoreError> {
        let _writer = self.lock_writer();
        self.flush_queue()
    }

    /// Caller holds the writer lock, so the queue front can't change under us.
    fn flush_queue(&self) -> Result<usize, StoreError> {
        let mut flushed = 0;
        loop {
            let front = self.lock_state().pending.front().copied();
            let Some((point, created)) = front else {
                break;
            };
            self.append_with_retry(point, created)?;
            self.lock_state().pending.pop_front();
            flushed += 1;
        }
        if flushed > 0 {
            info!("[LocationMonitor] Flushed {} queued samples", flushed);
        }
        Ok(flushed)
    }

    fn enqueue(&self, point: GpsPoint, created: i64) {
        let mut state = self.lock_state();
        if state.pending.len() >= self.config.max_pending.max(1) {
            warn!("[LocationMonitor] Pending queue full, dropping oldest queued sample");
            state.pending.pop_front();
        }
        state.pending.push_back((point, created));
        warn!(
            "[LocationMonitor] Store unavailable, {} samples queued",
            state.pending.len()
        );
    }

    fn append_with_retry(&self, point: GpsPoint, created: i64) -> Result<LocationSample, StoreError> {
        let policy = &self.config.retry;
        let mut attempt = 1;
        loop {
            match self.store.append(point, created) {
                Ok(sample) => return Ok(sample),
                Err(err) if attempt < policy.max_attempts => {
                    let wait = policy.backoff(attempt);
                    warn!(
                        "[LocationMonitor] Append failed: {}, retry {} after {:?}",
                        err, attempt, wait
                    );
                    if !wait.is_zero() {
                        thread::sleep(wait);
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
