// Environment-driven configuration
//
// The upstream base URLs and the maps API key are owned by the
// deployment environment, not by this crate.

/// Fleetview configuration
#[derive(Clone, Debug)]
pub struct FleetConfig {
    /// Base URL of the rider-facing service (ride/cluster aggregates)
    pub rider_api_base: String,
    /// Base URL of the admin-facing service (driver endpoints)
    pub admin_api_base: String,
    /// Maps API key handed to the dashboard frontend
    pub maps_api_key: Option<String>,
    /// Heatmap aggregate poll period in milliseconds
    pub heatmap_poll_ms: u64,
    /// Driver snapshot refresh period in milliseconds
    pub drivers_poll_ms: u64,
    /// Timeout for upstream requests in milliseconds
    pub request_timeout_ms: u64,
    /// User agent string for upstream requests
    pub user_agent: String,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            rider_api_base: "http://localhost:4000".to_string(),
            admin_api_base: "http://localhost:5000".to_string(),
            maps_api_key: None,
            heatmap_poll_ms: 2_000,
            drivers_poll_ms: 5_000,
            request_timeout_ms: 10_000,
            user_agent: "fleetview/0.1".to_string(),
        }
    }
}

impl FleetConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            rider_api_base: std::env::var("FLEETVIEW_RIDER_API_BASE")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.rider_api_base),
            admin_api_base: std::env::var("FLEETVIEW_ADMIN_API_BASE")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.admin_api_base),
            maps_api_key: std::env::var("FLEETVIEW_MAPS_API_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            heatmap_poll_ms: std::env::var("FLEETVIEW_HEATMAP_POLL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.heatmap_poll_ms),
            drivers_poll_ms: std::env::var("FLEETVIEW_DRIVERS_POLL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.drivers_poll_ms),
            request_timeout_ms: std::env::var("FLEETVIEW_REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.request_timeout_ms),
            user_agent: defaults.user_agent,
        }
    }
}
