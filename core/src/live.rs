// Live feed (connection manager)
//
// Owns the single data source for the currently selected view mode:
// a repeating snapshot poll for drivers, a repeating aggregate poll
// for the heatmap. Results are normalized, committed to the view
// state, and pushed through the connection registry as envelopes.
//
// In-flight requests are never cancelled; instead every open/close
// bumps a generation counter and completions from a superseded
// generation are discarded, so a slow response from a previous mode
// can not overwrite newer state.

use crate::config::FleetConfig;
use crate::envelope::{topics, Envelope};
use crate::normalize::{heat_points, normalize_snapshot, RawDriverRecord, RideCluster};
use crate::registry::ConnectionRegistry;
use crate::view::{Overlay, ViewMode, ViewState};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default reporting period for the heatmap aggregate request.
const DEFAULT_HEAT_PERIOD: &str = "week";

/// Source of raw online-driver snapshots
#[async_trait]
pub trait DriverSource: Send + Sync {
    async fn online_drivers(&self) -> Result<Vec<RawDriverRecord>>;
}

/// Source of ride cluster aggregates
#[async_trait]
pub trait HeatSource: Send + Sync {
    async fn ride_clusters(&self, period: &str) -> Result<Vec<RideCluster>>;
}

/// Registry topic carrying updates for a view mode.
pub fn topic_for(mode: ViewMode) -> Option<&'static str> {
    match mode {
        ViewMode::Drivers => Some(topics::ONLINE_DRIVERS),
        ViewMode::Heatmap => Some(topics::RIDE_HEATMAP),
        ViewMode::None => None,
    }
}

/// Live data feed for one dashboard session.
///
/// At most one poll loop is active at a time; `open_for_mode` tears
/// the previous loop down before starting the next, and `close` is
/// safe to call any number of times.
pub struct LiveFeed {
    inner: Arc<FeedInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct FeedInner {
    registry: ConnectionRegistry,
    drivers: Arc<dyn DriverSource>,
    heat: Arc<dyn HeatSource>,
    drivers_poll: Duration,
    heatmap_poll: Duration,
    // Bumped on every open/close; poll completions carrying an older
    // value are stale and discarded.
    generation: AtomicU64,
    shutdown: Notify,
    state: RwLock<ViewState>,
}

impl LiveFeed {
    pub fn new(
        registry: ConnectionRegistry,
        drivers: Arc<dyn DriverSource>,
        heat: Arc<dyn HeatSource>,
        config: &FleetConfig,
    ) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                registry,
                drivers,
                heat,
                drivers_poll: Duration::from_millis(config.drivers_poll_ms),
                heatmap_poll: Duration::from_millis(config.heatmap_poll_ms),
                generation: AtomicU64::new(0),
                shutdown: Notify::new(),
                state: RwLock::new(ViewState::unselected()),
            }),
            task: Mutex::new(None),
        }
    }

    /// Snapshot of the current view state.
    pub async fn state(&self) -> ViewState {
        self.inner.state.read().await.clone()
    }

    /// Whether a poll loop is currently running.
    pub fn is_active(&self) -> bool {
        self.task
            .lock()
            .map(|guard| guard.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Opens the data source for a view mode.
    ///
    /// Any previously active source is closed first, so switching
    /// modes never leaves two loops polling. Selecting
    /// [`ViewMode::None`] is equivalent to [`close`](Self::close).
    pub async fn open_for_mode(&self, mode: ViewMode) {
        self.close().await;
        if topic_for(mode).is_none() {
            return;
        }

        let generation = self.inner.generation.load(Ordering::SeqCst);
        self.inner.state.write().await.begin(mode);
        info!(target: "live", mode = mode.as_str(), "Opening data source");

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let period = match mode {
                ViewMode::Drivers => inner.drivers_poll,
                _ => inner.heatmap_poll,
            };
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick completes immediately: the snapshot is
            // requested as soon as the mode opens.
            interval.tick().await;

            loop {
                if !inner.poll_once(mode, generation).await {
                    break;
                }
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = inner.shutdown.notified() => break,
                }
                if inner.generation.load(Ordering::SeqCst) != generation {
                    break;
                }
            }
            debug!(target: "live", mode = mode.as_str(), "Poll loop ended");
        });

        if let Ok(mut guard) = self.task.lock() {
            *guard = Some(handle);
        }
    }

    /// Tears the active source down. Idempotent.
    ///
    /// A poll that is already in flight is allowed to finish; its
    /// completion fails the generation check and is discarded.
    pub async fn close(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.shutdown.notify_waiters();
        self.inner.state.write().await.reset();
    }
}

impl FeedInner {
    // One fetch-normalize-commit-publish round. Returns false when the
    // loop should stop.
    async fn poll_once(&self, mode: ViewMode, generation: u64) -> bool {
        let result = match mode {
            ViewMode::Drivers => self
                .drivers
                .online_drivers()
                .await
                .map(|raw| Overlay::markers(&normalize_snapshot(raw))),
            ViewMode::Heatmap => self
                .heat
                .ride_clusters(DEFAULT_HEAT_PERIOD)
                .await
                .map(|clusters| Overlay::heat(heat_points(&clusters))),
            ViewMode::None => return false,
        };

        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(target: "live", mode = mode.as_str(), "Discarding stale completion");
            return false;
        }

        match result {
            Ok(overlay) => {
                let payload = serde_json::to_value(&overlay).unwrap_or(Value::Null);
                self.state.write().await.render(overlay);
                if let Some(topic) = topic_for(mode) {
                    let source = format!("feed.{}", mode.as_str());
                    self.registry.publish(Envelope::new(topic, source, payload));
                }
            }
            Err(e) => {
                warn!(target: "live", mode = mode.as_str(), error = %e, "Poll failed");
                self.state.write().await.set_status(e.to_string());
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::Phase;
    use crate::FleetError;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct FakeDrivers {
        calls: AtomicUsize,
        delay: Duration,
        response: std::result::Result<Vec<RawDriverRecord>, String>,
    }

    impl FakeDrivers {
        fn returning(records: Vec<RawDriverRecord>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                response: Ok(records),
            })
        }

        fn slow(records: Vec<RawDriverRecord>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                response: Ok(records),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                response: Err(message.to_string()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DriverSource for FakeDrivers {
        async fn online_drivers(&self) -> Result<Vec<RawDriverRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.response {
                Ok(records) => Ok(records.clone()),
                Err(message) => Err(FleetError::Upstream(message.clone())),
            }
        }
    }

    struct FakeHeat {
        calls: AtomicUsize,
        clusters: Vec<RideCluster>,
    }

    impl FakeHeat {
        fn returning(clusters: Vec<RideCluster>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                clusters,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HeatSource for FakeHeat {
        async fn ride_clusters(&self, _period: &str) -> Result<Vec<RideCluster>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.clusters.clone())
        }
    }

    fn sample_snapshot() -> Vec<RawDriverRecord> {
        serde_json::from_value(json!([{
            "driverId": "d1",
            "driverLiveLocation": {"latitude": "23.03", "longitude": "72.52"}
        }]))
        .unwrap()
    }

    fn feed_with(
        drivers: Arc<FakeDrivers>,
        heat: Arc<FakeHeat>,
    ) -> (LiveFeed, ConnectionRegistry) {
        let registry = ConnectionRegistry::new();
        let config = FleetConfig {
            drivers_poll_ms: 2_000,
            heatmap_poll_ms: 2_000,
            ..FleetConfig::default()
        };
        let feed = LiveFeed::new(registry.clone(), drivers, heat, &config);
        (feed, registry)
    }

    #[tokio::test]
    async fn driver_snapshot_renders_one_marker() {
        let drivers = FakeDrivers::returning(sample_snapshot());
        let (feed, registry) = feed_with(drivers, FakeHeat::returning(Vec::new()));

        let mut sub = registry.open(topics::ONLINE_DRIVERS);
        feed.open_for_mode(ViewMode::Drivers).await;

        let envelope = sub.recv().await.expect("envelope");
        assert_eq!(envelope.topic, topics::ONLINE_DRIVERS);
        assert_eq!(envelope.payload["kind"], "markers");
        assert_eq!(envelope.payload["markers"].as_array().unwrap().len(), 1);
        assert_eq!(envelope.payload["markers"][0]["lat"], 23.03);
        assert_eq!(envelope.payload["markers"][0]["lng"], 72.52);

        let state = feed.state().await;
        assert_eq!(state.phase, Phase::Rendered);
        feed.close().await;
    }

    #[tokio::test]
    async fn heatmap_aggregate_renders_heat_points() {
        let clusters: Vec<RideCluster> =
            serde_json::from_value(json!([{"center": {"lat": 23.0, "lng": 72.5}, "numRides": 5}]))
                .unwrap();
        let (feed, registry) =
            feed_with(FakeDrivers::returning(Vec::new()), FakeHeat::returning(clusters));

        let mut sub = registry.open(topics::RIDE_HEATMAP);
        feed.open_for_mode(ViewMode::Heatmap).await;

        let envelope = sub.recv().await.expect("envelope");
        assert_eq!(envelope.payload["kind"], "heat");
        assert_eq!(envelope.payload["points"], json!([[23.0, 72.5, 5.0]]));
        feed.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn mode_switch_leaves_exactly_one_active_source() {
        let drivers = FakeDrivers::returning(sample_snapshot());
        let heat = FakeHeat::returning(Vec::new());
        let (feed, _registry) = feed_with(drivers.clone(), heat.clone());

        feed.open_for_mode(ViewMode::Heatmap).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(heat.calls() >= 1);

        feed.open_for_mode(ViewMode::Drivers).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let heat_calls_after_switch = heat.calls();

        // Several poll periods elapse; only the driver loop may fire.
        tokio::time::sleep(Duration::from_millis(6_500)).await;
        assert_eq!(heat.calls(), heat_calls_after_switch);
        assert!(drivers.calls() >= 3);

        feed.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_idempotent_and_stops_the_timer() {
        let (feed, _registry) = feed_with(
            FakeDrivers::returning(Vec::new()),
            FakeHeat::returning(Vec::new()),
        );

        // Closing a feed that was never opened must not panic.
        feed.close().await;

        feed.open_for_mode(ViewMode::Drivers).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(feed.is_active());

        feed.close().await;
        feed.close().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!feed.is_active());

        let state = feed.state().await;
        assert_eq!(state.phase, Phase::Unselected);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_completion_is_discarded_after_close() {
        let drivers = FakeDrivers::slow(sample_snapshot(), Duration::from_millis(500));
        let (feed, _registry) = feed_with(drivers, FakeHeat::returning(Vec::new()));

        feed.open_for_mode(ViewMode::Drivers).await;
        // Let the loop start its first fetch, then tear down while the
        // request is still in flight.
        tokio::time::sleep(Duration::from_millis(10)).await;
        feed.close().await;

        // The fetch completes now; its result must not resurrect the
        // closed view.
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        let state = feed.state().await;
        assert_eq!(state.phase, Phase::Unselected);
        assert!(state.overlay.is_none());
        assert!(!feed.is_active());
    }

    #[tokio::test]
    async fn transport_failure_surfaces_as_status_string() {
        let (feed, _registry) = feed_with(
            FakeDrivers::failing("connection refused"),
            FakeHeat::returning(Vec::new()),
        );

        feed.open_for_mode(ViewMode::Drivers).await;
        // Poll loops keep running after a failure; the interval is the
        // only retry mechanism.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let state = feed.state().await;
        assert_eq!(state.phase, Phase::Loading);
        assert!(state.status.as_deref().unwrap().contains("connection refused"));
        assert!(feed.is_active());
        feed.close().await;
    }

    #[tokio::test]
    async fn empty_snapshot_reports_no_data() {
        let (feed, _registry) = feed_with(
            FakeDrivers::returning(Vec::new()),
            FakeHeat::returning(Vec::new()),
        );

        feed.open_for_mode(ViewMode::Drivers).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let state = feed.state().await;
        assert_eq!(state.phase, Phase::Rendered);
        assert_eq!(
            state.status.as_deref(),
            Some("no data for the selected view")
        );
        feed.close().await;
    }
}
