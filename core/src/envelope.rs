use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known topics on the connection registry.
///
/// Every live message is routed by one of these keys inside the
/// envelope rather than by a dynamic event name on a shared channel
/// object, so a single subscription per topic is enough regardless of
/// how many views consume it.
pub mod topics {
    /// Normalized online-driver snapshots (marker overlays)
    pub const ONLINE_DRIVERS: &str = "drivers.online";
    /// Ride density aggregates (heat overlays)
    pub const RIDE_HEATMAP: &str = "rides.heatmap";
}

/// Typed message dispatched through the connection registry.
///
/// The payload is the ad hoc JSON shape the dashboard renders; it is
/// treated as a given external contract and carried opaquely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Routing key (see [`topics`])
    pub topic: String,
    /// Logical identity of the publisher (e.g., "feed.drivers")
    pub source: String,
    /// Message body
    pub payload: Value,
    /// Creation timestamp in milliseconds since epoch
    pub timestamp_ms: i64,
}

impl Envelope {
    /// Creates an envelope stamped with the current time.
    ///
    /// # Examples
    ///
    /// ```
    /// use fleetview_core::envelope::{topics, Envelope};
    ///
    /// let env = Envelope::new(topics::ONLINE_DRIVERS, "feed.drivers", serde_json::json!([]));
    /// assert_eq!(env.topic, "drivers.online");
    /// assert_eq!(env.source, "feed.drivers");
    /// ```
    pub fn new(topic: impl Into<String>, source: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            source: source.into(),
            payload,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}
