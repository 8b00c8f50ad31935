// Fleetview Core Library
// Live-data engine for the ride-hailing operations dashboard

pub mod config;
pub mod envelope;
pub mod live;
pub mod normalize;
pub mod registry;
pub mod telemetry;
pub mod upstream;
pub mod view;

// Export core types
pub use config::FleetConfig;
pub use envelope::Envelope;
pub use live::{DriverSource, HeatSource, LiveFeed};
pub use normalize::{DriverRecord, GeoPoint, HeatPoint, RawDriverRecord, RideCluster};
pub use registry::{ChannelStats, ConnectionRegistry, Subscription};
pub use upstream::UpstreamClient;
pub use view::{Overlay, Phase, ViewMode, ViewState};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("registry error: {0}")]
    Registry(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FleetError>;
