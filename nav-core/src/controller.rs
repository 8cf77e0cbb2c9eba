//! # controller
//!
//! Session orchestration. One background task owns the viewports, the
//! active session and the tool-center tracker; all camera mutation happens
//! there, in sample arrival order. The embedding viewer must not write
//! camera positions while a session is running — manual camera edits wait
//! until `stop`, or become part of the next session's reference.
//!
//! There is no service registry: the composing application builds a
//! [`NavContext`] with the connection and viewports and hands it over.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nav_types::{TrackerCommand, TrackingMode, Vec3};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::NavConfig;
use crate::connection::{ConnectionEvent, ConnectionState, PositionSample, TrackerConnection};
use crate::error::{NavError, Result};
use crate::intersect::{CenterTracker, ToolCenter};
use crate::session::{NavigationSession, SessionStats};
use crate::transform::{build_placement, RigidTransform};
use crate::viewport::{Viewport, ViewportPlane};

/// Everything the controller needs from the composing application.
pub struct NavContext {
    pub connection: TrackerConnection,
    pub viewports: Vec<Box<dyn Viewport>>,
    /// Id of the viewport whose camera anchors the session reference and
    /// whose focal point backs `set_center_to_current_position`.
    pub reference_viewport: String,
}

/// Notifications for the embedding UI.
#[derive(Debug, Clone)]
pub enum NavEvent {
    SessionStarted {
        id: Uuid,
        mode: TrackingMode,
    },
    /// `stats` is `None` when the session never applied a sample.
    SessionStopped {
        id: Uuid,
        stats: Option<SessionStats>,
    },
    /// Connection lost mid-session. The session stays alive so the UI can
    /// offer a reconnect; it clears on the next successful connect.
    Interrupted,
    /// Connection back after an interruption; the stream is re-armed.
    Resumed,
    /// The three-plane tool center moved.
    CenterUpdated(ToolCenter),
    /// A `set_center` command was handed to the connection (transmitted,
    /// or queued for the flush that follows the next connect).
    CenterSent(Vec3),
}

/// Handle to the controller task. Cheap to clone; the task exits when the
/// last handle is dropped.
#[derive(Clone, Debug)]
pub struct NavigationController {
    ctl: mpsc::Sender<CtlMsg>,
    events: broadcast::Sender<NavEvent>,
    navigating: Arc<AtomicBool>,
}

impl NavigationController {
    /// Validate the context and spawn the controller task.
    pub fn spawn(config: NavConfig, ctx: NavContext) -> Result<Self> {
        if ctx.viewports.is_empty() {
            return Err(NavError::NoViewports);
        }
        let reference_idx = ctx
            .viewports
            .iter()
            .position(|v| v.id() == ctx.reference_viewport)
            .ok_or_else(|| NavError::UnknownViewport(ctx.reference_viewport.clone()))?;

        let (ctl_tx, ctl_rx) = mpsc::channel(32);
        let (events_tx, _) = broadcast::channel(64);
        let navigating = Arc::new(AtomicBool::new(false));

        let actor = ControllerActor {
            center_interval: config.center_interval,
            connection: ctx.connection,
            viewports: ctx.viewports,
            reference_idx,
            ctl: ctl_rx,
            events: events_tx.clone(),
            navigating: navigating.clone(),
            session: None,
            conn_events: None,
            center: CenterTracker::new(),
            last_planes: None,
        };
        tokio::spawn(actor.run());

        Ok(Self {
            ctl: ctl_tx,
            events: events_tx,
            navigating,
        })
    }

    /// Start a navigation session. Fails with [`NavError::SessionActive`]
    /// if one is already running.
    pub async fn start(&self, mode: TrackingMode) -> Result<Uuid> {
        let (tx, rx) = oneshot::channel();
        self.ctl
            .send(CtlMsg::Start { mode, ack: tx })
            .await
            .map_err(|_| NavError::ChannelClosed)?;
        rx.await.map_err(|_| NavError::ChannelClosed)?
    }

    /// End the active session, returning its statistics (if any sample was
    /// applied). Idempotent: without a session this is a quiet no-op.
    ///
    /// The not-navigating flag is raised here, before the actor gets to
    /// clean up, so an in-flight sample already queued behind this call
    /// cannot be applied against a session mid-teardown.
    pub async fn stop(&self) -> Option<SessionStats> {
        self.navigating.store(false, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        if self.ctl.send(CtlMsg::Stop { ack: tx }).await.is_err() {
            return None;
        }
        rx.await.unwrap_or(None)
    }

    /// Tell the position source to generate around the reference
    /// viewport's current focal point. Works with or without an active
    /// session and never touches any camera.
    pub async fn set_center_to_current_position(&self) -> Result<Vec3> {
        let (tx, rx) = oneshot::channel();
        self.ctl
            .send(CtlMsg::SetCenter { ack: tx })
            .await
            .map_err(|_| NavError::ChannelClosed)?;
        rx.await.map_err(|_| NavError::ChannelClosed)?
    }

    /// Bring the tracking connection back up after an interruption.
    pub async fn reconnect(&self) -> ConnectionState {
        let (tx, rx) = oneshot::channel();
        if self.ctl.send(CtlMsg::Reconnect { ack: tx }).await.is_err() {
            return ConnectionState::Disconnected;
        }
        rx.await.unwrap_or(ConnectionState::Disconnected)
    }

    /// Placement transform for an oriented object at the current tool
    /// center. Fails with [`NavError::NoToolCenter`] before the first
    /// successful plane resolution.
    pub async fn placement_at_center(&self, basis: [Vec3; 3]) -> Result<RigidTransform> {
        let (tx, rx) = oneshot::channel();
        self.ctl
            .send(CtlMsg::Placement { basis, ack: tx })
            .await
            .map_err(|_| NavError::ChannelClosed)?;
        rx.await.map_err(|_| NavError::ChannelClosed)?
    }

    pub fn is_navigating(&self) -> bool {
        self.navigating.load(Ordering::Relaxed)
    }

    /// Subscribe to controller notifications.
    pub fn events(&self) -> broadcast::Receiver<NavEvent> {
        self.events.subscribe()
    }
}

// ── Actor ─────────────────────────────────────────────────────────────────────

enum CtlMsg {
    Start {
        mode: TrackingMode,
        ack: oneshot::Sender<Result<Uuid>>,
    },
    Stop {
        ack: oneshot::Sender<Option<SessionStats>>,
    },
    SetCenter {
        ack: oneshot::Sender<Result<Vec3>>,
    },
    Reconnect {
        ack: oneshot::Sender<ConnectionState>,
    },
    Placement {
        basis: [Vec3; 3],
        ack: oneshot::Sender<Result<RigidTransform>>,
    },
}

struct ControllerActor {
    center_interval: std::time::Duration,
    connection: TrackerConnection,
    viewports: Vec<Box<dyn Viewport>>,
    reference_idx: usize,
    ctl: mpsc::Receiver<CtlMsg>,
    events: broadcast::Sender<NavEvent>,
    navigating: Arc<AtomicBool>,
    session: Option<NavigationSession>,
    conn_events: Option<broadcast::Receiver<ConnectionEvent>>,
    center: CenterTracker,
    last_planes: Option<[ViewportPlane; 3]>,
}

/// Pending-forever when there is nothing to subscribe to, so the select
/// arm simply never fires between sessions.
async fn conn_recv(
    rx: Option<&mut broadcast::Receiver<ConnectionEvent>>,
) -> std::result::Result<ConnectionEvent, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl ControllerActor {
    async fn run(mut self) {
        let mut center_tick = tokio::time::interval(self.center_interval);
        loop {
            tokio::select! {
                msg = self.ctl.recv() => {
                    let Some(msg) = msg else { break };
                    self.handle_ctl(msg).await;
                }
                ev = conn_recv(self.conn_events.as_mut()) => {
                    self.handle_conn_event(ev).await;
                }
                _ = center_tick.tick() => {
                    self.recompute_center();
                }
            }
        }
    }

    async fn handle_ctl(&mut self, msg: CtlMsg) {
        match msg {
            CtlMsg::Start { mode, ack } => {
                let _ = ack.send(self.handle_start(mode).await);
            }
            CtlMsg::Stop { ack } => {
                let _ = ack.send(self.handle_stop().await);
            }
            CtlMsg::SetCenter { ack } => {
                let _ = ack.send(self.handle_set_center().await);
            }
            CtlMsg::Reconnect { ack } => {
                let _ = ack.send(self.connection.connect().await);
            }
            CtlMsg::Placement { basis, ack } => {
                let _ = ack.send(self.handle_placement(basis));
            }
        }
    }

    async fn handle_start(&mut self, mode: TrackingMode) -> Result<Uuid> {
        if self.session.is_some() {
            return Err(NavError::SessionActive);
        }
        let reference = self.viewports[self.reference_idx].camera().position;

        // Subscribe before arming the stream so the first samples cannot
        // slip past the session.
        let rx = self.connection.subscribe();
        self.connection.send(TrackerCommand::Start { mode }).await?;

        let session = NavigationSession::new(mode, reference);
        let id = session.id;
        info!("navigation session {id} started ({mode:?})");
        self.session = Some(session);
        self.conn_events = Some(rx);
        self.navigating.store(true, Ordering::Relaxed);
        let _ = self.events.send(NavEvent::SessionStarted { id, mode });
        Ok(id)
    }

    async fn handle_stop(&mut self) -> Option<SessionStats> {
        // Raised again here for callers that bypass the handle; the
        // handle already raised it before this message was queued.
        self.navigating.store(false, Ordering::Relaxed);
        let session = self.session.take()?;
        self.conn_events = None;

        // Quiesce the source, but never dial just to say stop.
        if self.connection.state().await == ConnectionState::Connected {
            if let Err(e) = self.connection.send(TrackerCommand::Stop).await {
                warn!("stop command not delivered: {e}");
            }
        }

        let stats = session.stats();
        match &stats {
            Some(s) => info!(
                "navigation session {} stopped: {} update(s) in {:.1}s, {:.1} Hz average, {} dropped",
                session.id,
                s.update_count,
                s.elapsed.as_secs_f64(),
                s.average_hz,
                s.dropped_samples
            ),
            None => info!(
                "navigation session {} stopped before any update arrived",
                session.id
            ),
        }
        let _ = self.events.send(NavEvent::SessionStopped {
            id: session.id,
            stats,
        });
        stats
    }

    async fn handle_set_center(&mut self) -> Result<Vec3> {
        let position = self.viewports[self.reference_idx].camera().focal_point;
        self.connection
            .send(TrackerCommand::SetCenter { position })
            .await?;
        info!(
            "source center set to [{:.1}, {:.1}, {:.1}]",
            position.x, position.y, position.z
        );
        let _ = self.events.send(NavEvent::CenterSent(position));
        Ok(position)
    }

    fn handle_placement(&self, basis: [Vec3; 3]) -> Result<RigidTransform> {
        let center = self.center.current().ok_or(NavError::NoToolCenter)?;
        build_placement(basis, center.position)
    }

    async fn handle_conn_event(
        &mut self,
        ev: std::result::Result<ConnectionEvent, broadcast::error::RecvError>,
    ) {
        match ev {
            Ok(ConnectionEvent::Sample(sample)) => self.apply_sample(sample),
            Ok(ConnectionEvent::Status(ConnectionState::Disconnected)) => {
                if let Some(session) = self.session.as_mut() {
                    if !session.interrupted {
                        session.interrupted = true;
                        warn!("connection lost mid-session, awaiting reconnect");
                        let _ = self.events.send(NavEvent::Interrupted);
                    }
                }
            }
            Ok(ConnectionEvent::Status(ConnectionState::Connected)) => {
                let interrupted = self
                    .session
                    .as_ref()
                    .map_or(false, |session| session.interrupted);
                if interrupted {
                    self.resume_session().await;
                }
            }
            Ok(ConnectionEvent::Status(ConnectionState::Connecting)) => {
                debug!("reconnect in progress");
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                if let Some(session) = self.session.as_mut() {
                    session.record_dropped(n);
                }
                warn!("sample backlog, dropped {n} oldest");
            }
            Err(broadcast::error::RecvError::Closed) => {
                warn!("connection manager went away");
                self.conn_events = None;
            }
        }
    }

    /// Clear the interruption and re-arm the stream: the source starts a
    /// fresh client state per connection, so it has to be told to resume.
    async fn resume_session(&mut self) {
        let mode = match self.session.as_mut() {
            Some(session) => {
                session.interrupted = false;
                session.mode
            }
            None => return,
        };
        if let Err(e) = self.connection.send(TrackerCommand::Start { mode }).await {
            warn!("could not re-arm the stream: {e}");
            return;
        }
        info!("navigation resumed after reconnect");
        let _ = self.events.send(NavEvent::Resumed);
    }

    fn apply_sample(&mut self, sample: PositionSample) {
        // The flag is the cancellation marker: once stop raised it, any
        // sample still queued behind the stop is ignored.
        if !self.navigating.load(Ordering::Relaxed) {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let delta = session.delta_for(sample.position);
        for viewport in &self.viewports {
            viewport.apply_delta(delta);
        }
        session.record_applied(sample.position);
        debug!(
            "sample {} applied, delta [{:.2}, {:.2}, {:.2}]",
            sample.seq, delta.x, delta.y, delta.z
        );
    }

    /// Re-resolve the tool center from the first three viewports, skipping
    /// the solve entirely when the planes have not moved since last pass.
    fn recompute_center(&mut self) {
        if self.viewports.len() < 3 {
            return;
        }
        let planes = [
            ViewportPlane::from_camera(self.viewports[0].id(), &self.viewports[0].camera()),
            ViewportPlane::from_camera(self.viewports[1].id(), &self.viewports[1].camera()),
            ViewportPlane::from_camera(self.viewports[2].id(), &self.viewports[2].camera()),
        ];
        if self.last_planes.as_ref() == Some(&planes) {
            return;
        }
        self.last_planes = Some(planes.clone());

        match self.center.update(&planes) {
            Ok(true) => {
                if let Some(center) = self.center.current() {
                    let _ = self.events.send(NavEvent::CenterUpdated(center));
                }
            }
            Ok(false) => {}
            Err(e) => warn!("tool center unresolved, keeping previous: {e}"),
        }
    }
}
