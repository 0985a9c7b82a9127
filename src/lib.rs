//! # campus-sc
//!
//! Secure remote-access gateway and point-override engine for a simulated
//! building-automation campus.
//!
//! The crate exposes a simulated campus's control points to remote protocol
//! clients over BACnet Secure Connect: encrypted WebSocket transport, the
//! Secure Connect frame layer, NPDU routing layer, and the application
//! service layer (Who-Is/I-Am, ReadProperty, WriteProperty). Writes land in
//! a priority-array override store shared by every protocol adapter; the
//! simulation tick consumes the store and publishes the live values reads
//! answer from.
//!
//! # Architecture
//!
//! - [`points`] — instance ↔ path addressing and the live-value snapshot
//! - [`overrides`] — the priority-array arbitration store
//! - [`wire`] — the stateless three-layer codec
//! - [`sc`] — the Secure Connect hub, sessions, and service dispatch
//! - [`sim`] — the tick consumer contract binding store to live values
//!
//! # Consistency model
//!
//! The tick consumer is the sole writer of live values. It reads the
//! override store once per tick and then publishes a whole snapshot, so a
//! protocol write becomes visible to readers within one tick — never
//! mid-tick, never instantaneously. Overrides belong to their priority slot,
//! not to the session that set them; disconnecting a client revokes nothing.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use campus_sc::overrides::OverrideStore;
//! use campus_sc::points::{demo_points, LiveTable, PointTable};
//! use campus_sc::sc::{HubConfig, HubIdentity, ScHub};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let points = Arc::new(PointTable::new(demo_points()));
//!     let live = LiveTable::new();
//!     let store = Arc::new(OverrideStore::new());
//!
//!     let hub = ScHub::new(
//!         HubConfig::default(),
//!         HubIdentity::default(),
//!         points,
//!         live,
//!         store,
//!     );
//!     hub.run().await?;
//!     Ok(())
//! }
//! ```

pub mod overrides;
pub mod points;
pub mod sc;
pub mod sim;
pub mod wire;

pub use overrides::{OverrideStore, PointOverride, StoreError};
pub use points::{LiveTable, PointDef, PointTable};
pub use sc::{HubConfig, HubIdentity, ScHub};
pub use sim::TickConsumer;
