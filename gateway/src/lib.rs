use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use fleetview_core::live::{DriverSource, HeatSource};
use fleetview_core::{ConnectionRegistry, FleetConfig, LiveFeed, UpstreamClient, ViewMode};

pub mod api;

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("unsupported view mode: {0}")]
    UnsupportedMode(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Shared gateway state.
///
/// Each view mode has one live feed for the whole process; browser
/// clients attach to it with a reference count, and the last client
/// to detach closes the feed's poll loop.
#[derive(Clone)]
pub struct GatewayState {
    pub config: FleetConfig,
    pub registry: ConnectionRegistry,
    pub upstream: Arc<UpstreamClient>,
    drivers: Arc<FeedSlot>,
    heatmap: Arc<FeedSlot>,
}

// One live feed plus its attached-client count. The count is a tokio
// mutex, not an atomic, so the count transition and the matching feed
// open/close run as one unit: a detach that drops the count to zero
// holds the lock across `close`, and a concurrent attach can not slip
// in between and have its freshly opened feed torn down.
struct FeedSlot {
    feed: LiveFeed,
    clients: Mutex<usize>,
}

impl FeedSlot {
    fn new(feed: LiveFeed) -> Arc<Self> {
        Arc::new(Self {
            feed,
            clients: Mutex::new(0),
        })
    }
}

impl GatewayState {
    pub fn new(config: FleetConfig) -> Self {
        let upstream = Arc::new(UpstreamClient::new(config.clone()));
        Self::with_sources(config, upstream.clone(), upstream.clone(), upstream)
    }

    /// Wires the state with explicit data sources; tests substitute
    /// fakes here.
    pub fn with_sources(
        config: FleetConfig,
        drivers: Arc<dyn DriverSource>,
        heat: Arc<dyn HeatSource>,
        upstream: Arc<UpstreamClient>,
    ) -> Self {
        let registry = ConnectionRegistry::new();
        let drivers_feed = LiveFeed::new(registry.clone(), drivers.clone(), heat.clone(), &config);
        let heatmap_feed = LiveFeed::new(registry.clone(), drivers, heat, &config);

        Self {
            config,
            registry,
            upstream,
            drivers: FeedSlot::new(drivers_feed),
            heatmap: FeedSlot::new(heatmap_feed),
        }
    }

    fn slot_for(&self, mode: ViewMode) -> Option<&Arc<FeedSlot>> {
        match mode {
            ViewMode::Drivers => Some(&self.drivers),
            ViewMode::Heatmap => Some(&self.heatmap),
            ViewMode::None => None,
        }
    }

    /// Attaches a client to a view mode; the first client opens the
    /// feed.
    pub async fn attach_client(&self, mode: ViewMode) -> Result<()> {
        let slot = self
            .slot_for(mode)
            .ok_or_else(|| GatewayError::UnsupportedMode(mode.as_str().to_string()))?;

        // Held across the open so no interleaved detach sees a stale
        // count.
        let mut clients = slot.clients.lock().await;
        *clients += 1;
        info!(target: "gateway", mode = mode.as_str(), clients = *clients, "Client attached");

        if *clients == 1 {
            slot.feed.open_for_mode(mode).await;
        }
        Ok(())
    }

    /// Detaches a client; the last one closes the feed.
    pub async fn detach_client(&self, mode: ViewMode) {
        let Some(slot) = self.slot_for(mode) else {
            return;
        };

        let mut clients = slot.clients.lock().await;
        *clients = clients.saturating_sub(1);
        info!(target: "gateway", mode = mode.as_str(), clients = *clients, "Client detached");

        if *clients == 0 {
            slot.feed.close().await;
        }
    }

    /// Number of clients currently attached to a mode.
    pub async fn client_count(&self, mode: ViewMode) -> usize {
        match self.slot_for(mode) {
            Some(slot) => *slot.clients.lock().await,
            None => 0,
        }
    }

    /// Whether the feed for a mode is currently polling.
    pub fn feed_active(&self, mode: ViewMode) -> bool {
        self.slot_for(mode).is_some_and(|slot| slot.feed.is_active())
    }
}
