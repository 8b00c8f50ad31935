// Upstream REST client
//
// Talks to the externally-owned rider and admin services. Transport
// failures map to a human-readable error and are not retried here;
// the fixed-interval poll in the live feed is the only recovery.

use crate::config::FleetConfig;
use crate::live::{DriverSource, HeatSource};
use crate::normalize::{RawDriverRecord, RideCluster};
use crate::{FleetError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Snapshot response from the driver endpoint
#[derive(Debug, Deserialize)]
struct DriverSnapshot {
    #[serde(default)]
    drivers: Vec<RawDriverRecord>,
}

/// REST client for the rider- and admin-facing services
pub struct UpstreamClient {
    config: FleetConfig,
    http_client: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(config: FleetConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent(&config.user_agent)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            config,
            http_client,
        }
    }

    /// Fetch the current online-driver snapshot.
    pub async fn fetch_online_drivers(&self) -> Result<Vec<RawDriverRecord>> {
        let url = format!("{}/driver/get-online-drivers", self.config.admin_api_base);
        debug!(target: "upstream", url = %url, "Requesting driver snapshot");

        let response = self.http_client.get(&url).send().await.map_err(|e| {
            warn!(target: "upstream", error = %e, "Driver snapshot request failed");
            FleetError::Upstream(format!("driver snapshot request failed: {}", e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(target: "upstream", status = %status, "Driver snapshot returned error");
            return Err(FleetError::Upstream(format!(
                "driver snapshot returned status: {}",
                status
            )));
        }

        let snapshot: DriverSnapshot = response.json().await.map_err(|e| {
            warn!(target: "upstream", error = %e, "Failed to parse driver snapshot");
            FleetError::Upstream(format!("failed to parse driver snapshot: {}", e))
        })?;

        Ok(snapshot.drivers)
    }

    /// Fetch ride cluster aggregates for a reporting period.
    pub async fn fetch_ride_clusters(&self, period: &str) -> Result<Vec<RideCluster>> {
        let url = format!("{}/ride/cluster-map", self.config.rider_api_base);
        debug!(target: "upstream", url = %url, period = %period, "Requesting ride clusters");

        let response = self
            .http_client
            .post(&url)
            .json(&json!({ "period": period }))
            .send()
            .await
            .map_err(|e| {
                warn!(target: "upstream", error = %e, "Cluster request failed");
                FleetError::Upstream(format!("cluster request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(target: "upstream", status = %status, "Cluster endpoint returned error");
            return Err(FleetError::Upstream(format!(
                "cluster endpoint returned status: {}",
                status
            )));
        }

        response.json().await.map_err(|e| {
            warn!(target: "upstream", error = %e, "Failed to parse cluster response");
            FleetError::Upstream(format!("failed to parse cluster response: {}", e))
        })
    }

    /// Fetch per-driver ride aggregates for the chart views.
    ///
    /// The response shape belongs to the upstream service; it is
    /// passed through opaquely.
    pub async fn fetch_driver_stats(
        &self,
        driver_id: &str,
        start_date: &str,
        end_date: &str,
    ) -> Result<Value> {
        let url = format!("{}/ride/driver-stats", self.config.admin_api_base);
        debug!(target: "upstream", url = %url, driver_id = %driver_id, "Requesting driver stats");

        let response = self
            .http_client
            .post(&url)
            .json(&json!({
                "driverId": driver_id,
                "startDate": start_date,
                "endDate": end_date,
            }))
            .send()
            .await
            .map_err(|e| {
                warn!(target: "upstream", error = %e, "Driver stats request failed");
                FleetError::Upstream(format!("driver stats request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(target: "upstream", status = %status, "Driver stats returned error");
            return Err(FleetError::Upstream(format!(
                "driver stats returned status: {}",
                status
            )));
        }

        response.json().await.map_err(|e| {
            warn!(target: "upstream", error = %e, "Failed to parse driver stats");
            FleetError::Upstream(format!("failed to parse driver stats: {}", e))
        })
    }
}

#[async_trait]
impl DriverSource for UpstreamClient {
    async fn online_drivers(&self) -> Result<Vec<RawDriverRecord>> {
        self.fetch_online_drivers().await
    }
}

#[async_trait]
impl HeatSource for UpstreamClient {
    async fn ride_clusters(&self, period: &str) -> Result<Vec<RideCluster>> {
        self.fetch_ride_clusters(period).await
    }
}
