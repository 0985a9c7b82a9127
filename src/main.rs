//! Secure Connect hub binary.
//!
//! Runs the demo campus topology behind the gateway. Configuration comes
//! from the environment:
//!
//! ```bash
//! CSC_BIND="0.0.0.0:8443" \
//! CSC_CERT="certs/hub.crt" \
//! CSC_KEY="certs/hub.key" \
//! CSC_SPEED="1.0" \
//! campus-sc-hub
//! ```
//!
//! Leave `CSC_CERT`/`CSC_KEY` unset to serve plain `ws://` for local
//! testing (open-hub mode is in effect either way).

use std::env;
use std::sync::Arc;

use log::info;

use campus_sc::overrides::OverrideStore;
use campus_sc::points::{demo_points, LiveTable, PointTable};
use campus_sc::sc::{HubConfig, HubIdentity, ScHub};
use campus_sc::sim::TickConsumer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = HubConfig {
        bind_addr: env::var("CSC_BIND").unwrap_or_else(|_| "0.0.0.0:8443".to_string()),
        cert_path: env::var("CSC_CERT").ok(),
        key_path: env::var("CSC_KEY").ok(),
        ..Default::default()
    };
    let speed: f64 = env::var("CSC_SPEED")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1.0);

    let points = Arc::new(PointTable::new(demo_points()));
    let live = LiveTable::new();
    let store = Arc::new(OverrideStore::new());

    let mut ticker = TickConsumer::new(Arc::clone(&store), live.clone(), speed);
    seed_models(&mut ticker);
    tokio::spawn(ticker.run());

    info!("starting campus-sc hub on {}", config.bind_addr);
    let hub = ScHub::new(config, HubIdentity::default(), points, live, store);

    tokio::select! {
        result = hub.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
    }
    Ok(())
}

/// First-order models for the demo points: everything decays toward its
/// setpoint unless an override pins it.
fn seed_models(ticker: &mut TickConsumer) {
    let toward = |target: f64, rate: f64| {
        Box::new(move |prev: f64, dt: f64| prev + (target - prev) * (dt * rate).min(1.0))
    };

    ticker.add_point("campus.oat", 70.0, toward(72.0, 0.001));
    ticker.add_point("electrical.main_meter_kw", 850.0, toward(900.0, 0.01));
    ticker.add_point("electrical.main_meter_kwh", 0.0, Box::new(|prev, dt| prev + 850.0 * dt / 3600.0));
    ticker.add_point("central_plant.chiller_1.chw_supply_temp", 44.0, toward(44.0, 0.05));
    ticker.add_point("central_plant.chiller_1.chw_return_temp", 54.0, toward(54.0, 0.05));
    ticker.add_point("central_plant.chiller_1.load_percent", 65.0, toward(70.0, 0.02));
    ticker.add_point("building_1.ahu_1.supply_temp", 55.0, toward(55.0, 0.05));
    ticker.add_point("building_1.ahu_1.return_temp", 72.0, toward(73.0, 0.02));
    ticker.add_point("building_1.ahu_1.fan_speed", 80.0, toward(75.0, 0.02));
    ticker.add_point("building_1.ahu_1.vav_1.room_temp", 71.0, toward(72.0, 0.01));
    ticker.add_point("building_1.ahu_1.vav_1.airflow", 450.0, toward(500.0, 0.02));
    ticker.add_point("building_1.ahu_1.vav_1.cooling_setpoint", 74.0, toward(74.0, 1.0));
}
