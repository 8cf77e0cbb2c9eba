//! # nav-core
//!
//! Stereotactic navigation core for a multi-planar (MPR) viewer: follows a
//! streamed tool position and keeps the synchronized viewport cameras on
//! it, resolves the three-plane tool center, and builds rigid placement
//! transforms for oriented content at that center.
//!
//! The moving parts:
//!
//! - [`connection::TrackerConnection`] — owns the WebSocket session with
//!   the position source; queued commands flush once on connect.
//! - [`controller::NavigationController`] — runs navigation sessions,
//!   applies per-sample deltas to every viewport, re-resolves the tool
//!   center on a fixed interval.
//! - [`intersect`] / [`transform`] — the synchronous geometry: three-plane
//!   intersection and validated rigid transforms.
//!
//! Composition is explicit: the embedding viewer builds a
//! [`controller::NavContext`] (connection handle, viewports, reference
//! viewport id) and hands it to the controller. Nothing in this crate is a
//! process-wide singleton.
//!
//! ```no_run
//! use nav_core::{
//!     CameraPose, NavConfig, NavContext, NavigationController, SharedViewport, TrackerConnection,
//!     TrackingMode,
//! };
//!
//! # async fn compose() -> nav_core::Result<()> {
//! let config = NavConfig::default();
//! let connection = TrackerConnection::spawn_ws(&config);
//!
//! let axial = SharedViewport::new("axial", CameraPose::axial());
//! let controller = NavigationController::spawn(
//!     config,
//!     NavContext {
//!         connection,
//!         viewports: vec![Box::new(axial.clone())],
//!         reference_viewport: "axial".to_string(),
//!     },
//! )?;
//!
//! controller.start(TrackingMode::Circular).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod controller;
pub mod error;
pub mod intersect;
pub mod session;
pub mod transform;
pub mod transport;
pub mod viewport;

pub use config::NavConfig;
pub use connection::{ConnectionEvent, ConnectionState, PositionSample, TrackerConnection};
pub use controller::{NavContext, NavEvent, NavigationController};
pub use error::{NavError, Result};
pub use intersect::{resolve_tool_center, CenterTracker, ToolCenter};
pub use session::{NavigationSession, SessionStats};
pub use transform::{build_placement, RigidTransform};
pub use viewport::{CameraPose, SharedViewport, Viewport, ViewportPlane};

pub use nav_types::{TrackerCommand, TrackerMessage, TrackingMode, Vec3};

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
