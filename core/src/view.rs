// View state and overlay building
//
// The overlay is rebuilt wholesale on every update; the map widget on
// the other end does its own diffing, so nothing here patches
// incrementally.

use crate::normalize::{DriverRecord, HeatPoint};
use serde::{Deserialize, Serialize};

/// Operator-selected display state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    None,
    Heatmap,
    Drivers,
}

impl ViewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewMode::None => "none",
            ViewMode::Heatmap => "heatmap",
            ViewMode::Drivers => "drivers",
        }
    }
}

/// Render phase for the active mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Unselected,
    Loading,
    Rendered,
}

/// Marker for a single driver with a known position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub driver_id: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub lat: f64,
    pub lng: f64,
}

/// Freshly built display overlay, replaced on every update
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Overlay {
    Markers {
        markers: Vec<Marker>,
        /// Records dropped because their position could not be
        /// recovered from the raw payload
        skipped: usize,
    },
    Heat {
        points: Vec<HeatPoint>,
    },
}

impl Overlay {
    /// Builds a marker overlay from normalized records.
    ///
    /// Flagged records are counted, not placed.
    pub fn markers(records: &[DriverRecord]) -> Self {
        let mut markers = Vec::with_capacity(records.len());
        let mut skipped = 0;
        for record in records {
            match record.position {
                Some(point) => markers.push(Marker {
                    driver_id: record.driver_id.clone(),
                    name: record.name.clone(),
                    phone: record.phone.clone(),
                    lat: point.lat,
                    lng: point.lng,
                }),
                None => skipped += 1,
            }
        }
        Overlay::Markers { markers, skipped }
    }

    pub fn heat(points: Vec<HeatPoint>) -> Self {
        Overlay::Heat { points }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Overlay::Markers { markers, .. } => markers.is_empty(),
            Overlay::Heat { points } => points.is_empty(),
        }
    }
}

/// Current render state for the dashboard view.
///
/// Transitions: `Unselected -> Loading -> Rendered`, `Rendered ->
/// Rendered` on each update, and back to `Unselected` when the
/// operator changes mode. Failures do not get their own phase; they
/// surface only through the status string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViewState {
    pub mode: ViewMode,
    pub phase: Phase,
    pub overlay: Option<Overlay>,
    /// Human-readable status ("no data", transport errors)
    pub status: Option<String>,
}

impl ViewState {
    pub fn unselected() -> Self {
        Self {
            mode: ViewMode::None,
            phase: Phase::Unselected,
            overlay: None,
            status: None,
        }
    }

    /// Mode was just selected; data is on its way.
    pub fn begin(&mut self, mode: ViewMode) {
        self.mode = mode;
        self.phase = Phase::Loading;
        self.overlay = None;
        self.status = None;
    }

    /// Replaces the previous overlay with a freshly built one.
    pub fn render(&mut self, overlay: Overlay) {
        self.status = if overlay.is_empty() {
            Some("no data for the selected view".to_string())
        } else {
            None
        };
        self.overlay = Some(overlay);
        self.phase = Phase::Rendered;
    }

    /// Records a failure without leaving the current phase.
    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = Some(status.into());
    }

    /// Mode change or teardown.
    pub fn reset(&mut self) {
        *self = Self::unselected();
    }
}

impl Default for ViewState {
    fn default() -> Self {
        Self::unselected()
    }
}
