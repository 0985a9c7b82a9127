//! Point addressing and the live-value snapshot.
//!
//! [`PointTable`] assigns each dotted point path a dense wire instance
//! (0..N-1). It is built once per topology generation and never mutated;
//! instance numbers are only valid for the generation they were built under.
//!
//! [`LiveTable`] holds the values published by the simulation tick. The
//! ticker publishes a whole snapshot at once, so protocol readers always see
//! a consistent-at-one-tick view, never half of an update.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// One control point: its stable dotted path and a display name used to
/// answer ReadProperty(object-name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointDef {
    pub path: String,
    pub name: String,
}

impl PointDef {
    pub fn new(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }
}

/// Immutable instance ↔ path mapping, shared by every protocol adapter.
#[derive(Debug)]
pub struct PointTable {
    points: Vec<PointDef>,
    by_path: HashMap<String, u32>,
}

impl PointTable {
    /// Build the table; instances are assigned in input order.
    pub fn new(points: Vec<PointDef>) -> Self {
        let by_path = points
            .iter()
            .enumerate()
            .map(|(i, p)| (p.path.clone(), i as u32))
            .collect();
        Self { points, by_path }
    }

    /// Dotted path for a wire instance, if one is mapped.
    pub fn resolve_path(&self, instance: u32) -> Option<&str> {
        self.points.get(instance as usize).map(|p| p.path.as_str())
    }

    /// Display name for a wire instance.
    pub fn name_of(&self, instance: u32) -> Option<&str> {
        self.points.get(instance as usize).map(|p| p.name.as_str())
    }

    /// Wire instance for a path.
    pub fn instance_of(&self, path: &str) -> Option<u32> {
        self.by_path.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PointDef> {
        self.points.iter()
    }
}

/// Live point values as of the most recent simulation tick.
///
/// Cloning shares the underlying table; the ticker is the sole writer.
#[derive(Debug, Clone, Default)]
pub struct LiveTable {
    snapshot: Arc<RwLock<Arc<HashMap<String, f64>>>>,
}

impl LiveTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole snapshot atomically.
    pub fn publish(&self, values: HashMap<String, f64>) {
        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(values);
    }

    /// Current live value for a path.
    pub fn read_live(&self, path: &str) -> Option<f64> {
        self.view().get(path).copied()
    }

    /// The full snapshot, consistent at one tick.
    pub fn view(&self) -> Arc<HashMap<String, f64>> {
        let guard = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }
}

/// A small fixed campus topology used by the hub binary and the integration
/// tests: outside air, the main meter, one chiller, and one AHU with a VAV.
pub fn demo_points() -> Vec<PointDef> {
    vec![
        PointDef::new("campus.oat", "Outside Air Temp"),
        PointDef::new("electrical.main_meter_kw", "Main Meter kW"),
        PointDef::new("electrical.main_meter_kwh", "Main Meter kWh"),
        PointDef::new("central_plant.chiller_1.chw_supply_temp", "Chiller 1 Supply Temp"),
        PointDef::new("central_plant.chiller_1.chw_return_temp", "Chiller 1 Return Temp"),
        PointDef::new("central_plant.chiller_1.load_percent", "Chiller 1 Load %"),
        PointDef::new("building_1.ahu_1.supply_temp", "Building 1 AHU 1 Supply Temp"),
        PointDef::new("building_1.ahu_1.return_temp", "Building 1 AHU 1 Return Temp"),
        PointDef::new("building_1.ahu_1.fan_speed", "Building 1 AHU 1 Fan Speed"),
        PointDef::new("building_1.ahu_1.vav_1.room_temp", "Zone 1 Room Temp"),
        PointDef::new("building_1.ahu_1.vav_1.airflow", "Zone 1 Airflow"),
        PointDef::new("building_1.ahu_1.vav_1.cooling_setpoint", "Zone 1 Cooling SP"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instances_are_dense_and_stable() {
        let table = PointTable::new(demo_points());
        assert_eq!(table.resolve_path(0), Some("campus.oat"));
        assert_eq!(table.instance_of("campus.oat"), Some(0));
        assert_eq!(
            table.resolve_path(3),
            Some("central_plant.chiller_1.chw_supply_temp")
        );
        assert_eq!(table.name_of(3), Some("Chiller 1 Supply Temp"));
        assert_eq!(table.resolve_path(table.len() as u32), None);
        assert_eq!(table.instance_of("no.such.point"), None);
    }

    #[test]
    fn live_table_swaps_whole_snapshots() {
        let live = LiveTable::new();
        assert_eq!(live.read_live("campus.oat"), None);

        let mut values = HashMap::new();
        values.insert("campus.oat".to_string(), 70.0);
        values.insert("building_1.ahu_1.supply_temp".to_string(), 55.0);
        live.publish(values);

        // A view taken before a publish keeps the old tick's values.
        let old_view = live.view();
        let mut next = HashMap::new();
        next.insert("campus.oat".to_string(), 71.5);
        live.publish(next);

        assert_eq!(old_view.get("campus.oat"), Some(&70.0));
        assert_eq!(old_view.get("building_1.ahu_1.supply_temp"), Some(&55.0));
        assert_eq!(live.read_live("campus.oat"), Some(71.5));
        assert_eq!(live.read_live("building_1.ahu_1.supply_temp"), None);
    }
}
