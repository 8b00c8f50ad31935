// Location normalization
//
// Raw driver payloads arrive with coordinates as strings, numbers, or
// not at all. Normalization is total: any shape produces a record,
// and a record whose position cannot be recovered is flagged instead
// of being parked at (0, 0) where it would be indistinguishable from
// a real null-island fix.

use serde::{Deserialize, Serialize};

/// Heat point as the map widget consumes it: `[lat, lng, weight]`.
pub type HeatPoint = [f64; 3];

/// Coordinate value as it appears on the wire: number or numeric text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RawCoordinate {
    Number(f64),
    Text(String),
}

impl RawCoordinate {
    /// Parses to a finite float; `None` when not representable.
    pub fn as_finite(&self) -> Option<f64> {
        let value = match self {
            RawCoordinate::Number(n) => *n,
            RawCoordinate::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        value.is_finite().then_some(value)
    }
}

/// Nested location object on the raw driver record
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawLiveLocation {
    #[serde(default)]
    pub latitude: Option<RawCoordinate>,
    #[serde(default)]
    pub longitude: Option<RawCoordinate>,
}

/// Driver record as pushed by the upstream service
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawDriverRecord {
    #[serde(default)]
    pub driver_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub driver_live_location: Option<RawLiveLocation>,
    #[serde(default)]
    pub documents: Vec<String>,
}

/// Validated map coordinate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Builds a point only from finite, in-range coordinates.
    pub fn checked(lat: f64, lng: f64) -> Option<Self> {
        if !lat.is_finite() || !lng.is_finite() {
            return None;
        }
        if lat.abs() > 90.0 || lng.abs() > 180.0 {
            return None;
        }
        Some(Self { lat, lng })
    }
}

/// Render-safe driver record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverRecord {
    pub driver_id: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    /// `None` when the raw payload carried no usable coordinates
    pub position: Option<GeoPoint>,
    pub documents: Vec<String>,
    /// Set when the position was missing or unparseable
    pub flagged: bool,
}

impl DriverRecord {
    /// Normalizes a raw record. Total over arbitrary input shapes.
    pub fn from_raw(raw: RawDriverRecord) -> Self {
        let position = raw.driver_live_location.as_ref().and_then(|loc| {
            let lat = loc.latitude.as_ref()?.as_finite()?;
            let lng = loc.longitude.as_ref()?.as_finite()?;
            GeoPoint::checked(lat, lng)
        });

        Self {
            driver_id: raw.driver_id,
            name: raw.name,
            phone: raw.phone,
            flagged: position.is_none(),
            position,
            documents: raw.documents,
        }
    }
}

/// Normalizes a full snapshot, preserving order.
pub fn normalize_snapshot(raw: Vec<RawDriverRecord>) -> Vec<DriverRecord> {
    raw.into_iter().map(DriverRecord::from_raw).collect()
}

/// Cluster center as aggregated upstream
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClusterCenter {
    #[serde(default)]
    pub lat: Option<RawCoordinate>,
    #[serde(default)]
    pub lng: Option<RawCoordinate>,
}

/// Server-side ride cluster aggregate
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RideCluster {
    #[serde(default)]
    pub center: Option<ClusterCenter>,
    #[serde(default)]
    pub num_rides: f64,
}

/// Derives `[lat, lng, weight]` triples from cluster aggregates.
///
/// Clusters without a usable center are dropped; there is no sensible
/// place to draw them.
pub fn heat_points(clusters: &[RideCluster]) -> Vec<HeatPoint> {
    clusters
        .iter()
        .filter_map(|cluster| {
            let center = cluster.center.as_ref()?;
            let lat = center.lat.as_ref()?.as_finite()?;
            let lng = center.lng.as_ref()?.as_finite()?;
            let point = GeoPoint::checked(lat, lng)?;
            Some([point.lat, point.lng, cluster.num_rides])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_from(value: serde_json::Value) -> RawDriverRecord {
        serde_json::from_value(value).expect("raw record must deserialize")
    }

    #[test]
    fn string_coordinates_parse() {
        let raw = raw_from(json!({
            "driverId": "d1",
            "driverLiveLocation": {"latitude": "23.03", "longitude": "72.52"}
        }));
        let record = DriverRecord::from_raw(raw);
        assert_eq!(
            record.position,
            Some(GeoPoint {
                lat: 23.03,
                lng: 72.52
            })
        );
        assert!(!record.flagged);
    }

    #[test]
    fn non_numeric_coordinates_flag_the_record() {
        let raw = raw_from(json!({
            "driverId": "d2",
            "driverLiveLocation": {"latitude": "not-a-number", "longitude": "72.52"}
        }));
        let record = DriverRecord::from_raw(raw);
        assert_eq!(record.position, None);
        assert!(record.flagged);
    }

    #[test]
    fn missing_location_flags_the_record() {
        let record = DriverRecord::from_raw(raw_from(json!({"driverId": "d3"})));
        assert_eq!(record.position, None);
        assert!(record.flagged);
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        let raw = raw_from(json!({
            "driverId": "d4",
            "driverLiveLocation": {"latitude": 91.0, "longitude": 10.0}
        }));
        assert!(DriverRecord::from_raw(raw).flagged);
        assert_eq!(GeoPoint::checked(f64::NAN, 0.0), None);
        assert_eq!(GeoPoint::checked(0.0, 180.5), None);
    }

    #[test]
    fn total_over_arbitrary_shapes() {
        // Every one of these must produce a record, never a panic.
        let shapes = vec![
            json!({}),
            json!({"driverLiveLocation": {}}),
            json!({"driverLiveLocation": {"latitude": "", "longitude": ""}}),
            json!({"driverId": "x", "name": null, "phone": null}),
            json!({"driverLiveLocation": {"latitude": "1e999", "longitude": "0"}}),
        ];
        for shape in shapes {
            let record = DriverRecord::from_raw(raw_from(shape));
            assert!(record.flagged);
        }
    }

    #[test]
    fn normalization_is_idempotent_on_numeric_input() {
        let raw = raw_from(json!({
            "driverId": "d5",
            "driverLiveLocation": {"latitude": 23.03, "longitude": 72.52}
        }));
        let first = DriverRecord::from_raw(raw.clone());

        // Feed the normalized coordinates back through as raw numbers.
        let again = raw_from(json!({
            "driverId": "d5",
            "driverLiveLocation": {
                "latitude": first.position.unwrap().lat,
                "longitude": first.position.unwrap().lng
            }
        }));
        assert_eq!(DriverRecord::from_raw(again).position, first.position);
    }

    #[test]
    fn cluster_aggregate_derives_heat_points() {
        let clusters: Vec<RideCluster> =
            serde_json::from_value(json!([{"center": {"lat": 23.0, "lng": 72.5}, "numRides": 5}]))
                .unwrap();
        assert_eq!(heat_points(&clusters), vec![[23.0, 72.5, 5.0]]);
    }

    #[test]
    fn clusters_without_centers_are_dropped() {
        let clusters: Vec<RideCluster> = serde_json::from_value(json!([
            {"numRides": 4},
            {"center": {"lat": "bad", "lng": 72.5}, "numRides": 2},
            {"center": {"lat": 23.0, "lng": 72.5}, "numRides": 1}
        ]))
        .unwrap();
        assert_eq!(heat_points(&clusters), vec![[23.0, 72.5, 1.0]]);
    }
}
