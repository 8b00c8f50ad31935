use std::net::SocketAddr;

use fleetview_core::telemetry::init_tracing;
use fleetview_core::FleetConfig;
use fleetview_gateway::{api, GatewayState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = FleetConfig::from_env();
    tracing::info!(
        rider_api = %config.rider_api_base,
        admin_api = %config.admin_api_base,
        "Starting Fleetview gateway"
    );

    let state = GatewayState::new(config);
    let app = api::router(state);

    let addr: SocketAddr = std::env::var("FLEETVIEW_HTTP_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".into())
        .parse()?;

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(url = %format!("http://{}", addr), "Gateway ready");

    axum::serve(listener, app).await?;
    Ok(())
}
