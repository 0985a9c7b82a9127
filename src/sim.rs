//! Simulation tick consumer.
//!
//! The physics models themselves live outside this crate; what lives here is
//! their consumption contract with the override store. Once per tick the
//! consumer resolves each owned point — a live override wins, otherwise the
//! closed-loop model advances — and then publishes the whole snapshot at
//! once. A write that arrives after a tick's read is therefore invisible
//! until the next tick, never mid-tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::time::interval;

use crate::overrides::OverrideStore;
use crate::points::LiveTable;

/// Base simulated tick period before the speed multiplier.
pub const TICK_PERIOD: Duration = Duration::from_secs(5);

/// Closed-loop model for one point: `(previous value, dt seconds) -> next`.
pub type PointModel = Box<dyn FnMut(f64, f64) -> f64 + Send>;

struct SimPoint {
    path: String,
    value: f64,
    model: PointModel,
}

/// Drives owned points on a fixed period, consulting the override store
/// before falling back to closed-loop control.
pub struct TickConsumer {
    points: Vec<SimPoint>,
    store: Arc<OverrideStore>,
    live: LiveTable,
    /// Simulation speed multiplier; scales simulated dt per tick.
    speed: f64,
}

impl TickConsumer {
    pub fn new(store: Arc<OverrideStore>, live: LiveTable, speed: f64) -> Self {
        Self {
            points: Vec::new(),
            store,
            live,
            speed: speed.clamp(0.1, 100.0),
        }
    }

    /// Register an owned point with its initial value and model.
    pub fn add_point(&mut self, path: impl Into<String>, initial: f64, model: PointModel) {
        self.points.push(SimPoint {
            path: path.into(),
            value: initial,
            model,
        });
    }

    /// Run one tick: arbitrate every owned point, then publish the snapshot.
    ///
    /// Public so tests can drive the ordering guarantees deterministically.
    pub fn step(&mut self, dt: f64) {
        let mut snapshot = HashMap::with_capacity(self.points.len());
        for point in &mut self.points {
            point.value = match self.store.get_effective(&point.path) {
                Some((value, priority)) => {
                    debug!("tick: {} held at {} by priority {}", point.path, value, priority);
                    value
                }
                None => (point.model)(point.value, dt),
            };
            snapshot.insert(point.path.clone(), point.value);
        }
        self.live.publish(snapshot);
    }

    /// Tick forever on the simulated period. The consumer suspends only on
    /// its timer; each tick's store reads happen before that tick's publish.
    pub async fn run(mut self) {
        let dt = TICK_PERIOD.as_secs_f64() * self.speed;
        let mut timer = interval(TICK_PERIOD);
        info!(
            "tick consumer started: {} point(s), dt {:.1}s per tick",
            self.points.len(),
            dt
        );
        loop {
            timer.tick().await;
            self.step(dt);
        }
    }
}
