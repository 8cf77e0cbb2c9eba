//! # connection
//!
//! Owns the WebSocket session with the streaming position source. A single
//! background task holds the live link and serializes every state
//! transition; the cloneable [`TrackerConnection`] handle talks to it over
//! channels, so callers never race each other through the state machine.
//!
//! Commands sent while the link is down are queued and the connect runs
//! automatically; the queue is flushed exactly once, right after the
//! `Connected` transition, and is never replayed on later reconnects.
//! There is no automatic retry: a lost link stays lost until an explicit
//! `connect`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nav_types::{TrackerCommand, TrackerMessage, Vec3};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use crate::config::NavConfig;
use crate::error::{NavError, Result};
use crate::transport::{Dialer, TransportLink, WsDialer};

// ── Public surface ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// One position update, stamped on arrival.
#[derive(Debug, Clone, Copy)]
pub struct PositionSample {
    /// Tracked point in patient coordinates.
    pub position: Vec3,
    /// Arrival order, 1-based, monotonic for the lifetime of the manager.
    pub seq: u64,
    /// Source wall clock in seconds, as carried on the wire.
    pub source_timestamp: f64,
    pub received_at: Instant,
}

/// Everything the manager broadcasts to its subscribers. Slow subscribers
/// lose the oldest entries first; the drop count is surfaced through the
/// receiver's `Lagged` error.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Status(ConnectionState),
    Sample(PositionSample),
}

/// Handle to the connection task. Cheap to clone; the task exits when the
/// last handle is dropped.
#[derive(Clone, Debug)]
pub struct TrackerConnection {
    ops: mpsc::Sender<ConnOp>,
    events: broadcast::Sender<ConnectionEvent>,
    state: Arc<RwLock<ConnectionState>>,
}

impl TrackerConnection {
    /// Spawn the manager task against an arbitrary transport.
    pub fn spawn<D: Dialer>(config: &NavConfig, dialer: D) -> Self {
        let (ops_tx, ops_rx) = mpsc::channel(32);
        let (events_tx, _) = broadcast::channel(config.sample_queue);
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));

        let actor = ConnActor {
            url: config.server_url.clone(),
            handshake_timeout: config.handshake_timeout,
            dialer,
            ops: ops_rx,
            events: events_tx.clone(),
            state: ConnectionState::Disconnected,
            shared_state: state.clone(),
            pending: VecDeque::new(),
            next_seq: 0,
        };
        tokio::spawn(actor.run());

        Self {
            ops: ops_tx,
            events: events_tx,
            state,
        }
    }

    /// Spawn against the real WebSocket transport.
    pub fn spawn_ws(config: &NavConfig) -> Self {
        Self::spawn(config, WsDialer)
    }

    /// Bring the link up. Idempotent: while `Connecting` or `Connected`
    /// this is a no-op that reports the state already reached. Returns the
    /// state after the attempt settles, `Connected` or `Disconnected`.
    pub async fn connect(&self) -> ConnectionState {
        let (tx, rx) = oneshot::channel();
        if self.ops.send(ConnOp::Connect { ack: tx }).await.is_err() {
            return ConnectionState::Disconnected;
        }
        rx.await.unwrap_or(ConnectionState::Disconnected)
    }

    /// Tear the link down. A no-op when already disconnected.
    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self.ops.send(ConnOp::Disconnect { ack: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Send a command to the source. When the link is down the command is
    /// queued and a connect is attempted in the same breath; `Ok` then
    /// means transmitted or queued for the flush that follows `Connected`.
    pub async fn send(&self, cmd: TrackerCommand) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.ops
            .send(ConnOp::Send { cmd, ack: tx })
            .await
            .map_err(|_| NavError::ChannelClosed)?;
        rx.await.map_err(|_| NavError::ChannelClosed)?
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Subscribe to status transitions and position samples.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}

// ── Actor ─────────────────────────────────────────────────────────────────────

enum ConnOp {
    Connect { ack: oneshot::Sender<ConnectionState> },
    Disconnect { ack: oneshot::Sender<()> },
    Send { cmd: TrackerCommand, ack: oneshot::Sender<Result<()>> },
}

struct ConnActor<D: Dialer> {
    url: String,
    handshake_timeout: Duration,
    dialer: D,
    ops: mpsc::Receiver<ConnOp>,
    events: broadcast::Sender<ConnectionEvent>,
    state: ConnectionState,
    shared_state: Arc<RwLock<ConnectionState>>,
    pending: VecDeque<TrackerCommand>,
    next_seq: u64,
}

impl<D: Dialer> ConnActor<D> {
    async fn run(mut self) {
        let mut link: Option<TransportLink> = None;
        loop {
            link = match link {
                None => {
                    let Some(op) = self.ops.recv().await else { return };
                    self.handle_op_down(op).await
                }
                Some(mut active) => {
                    let keep = tokio::select! {
                        op = self.ops.recv() => match op {
                            None => return,
                            Some(op) => self.handle_op_up(op, &mut active).await,
                        },
                        frame = active.rx.recv() => match frame {
                            Some(text) => {
                                self.handle_frame(&text);
                                true
                            }
                            None => {
                                warn!("position source closed the stream");
                                self.transition(ConnectionState::Disconnected).await;
                                false
                            }
                        },
                    };
                    if keep {
                        Some(active)
                    } else {
                        None
                    }
                }
            };
        }
    }

    /// Ops while the link is down. Returns the new link if one came up.
    async fn handle_op_down(&mut self, op: ConnOp) -> Option<TransportLink> {
        match op {
            ConnOp::Connect { ack } => {
                let link = self.establish().await;
                let _ = ack.send(self.state);
                link
            }
            ConnOp::Disconnect { ack } => {
                let _ = ack.send(());
                None
            }
            ConnOp::Send { cmd, ack } => {
                // Queue first, then auto-connect; establish() flushes the
                // queue the moment Connected is reached.
                self.pending.push_back(cmd);
                let link = self.establish().await;
                let _ = ack.send(Ok(()));
                link
            }
        }
    }

    /// Ops while the link is up. Returns false when the link must drop.
    async fn handle_op_up(&mut self, op: ConnOp, link: &mut TransportLink) -> bool {
        match op {
            ConnOp::Connect { ack } => {
                let _ = ack.send(ConnectionState::Connected);
                true
            }
            ConnOp::Disconnect { ack } => {
                self.transition(ConnectionState::Disconnected).await;
                let _ = ack.send(());
                false
            }
            ConnOp::Send { cmd, ack } => match Self::transmit(link, &cmd).await {
                Ok(()) => {
                    let _ = ack.send(Ok(()));
                    true
                }
                Err(e) => {
                    warn!("send failed, dropping the link: {e}");
                    self.transition(ConnectionState::Disconnected).await;
                    let _ = ack.send(Err(e));
                    false
                }
            },
        }
    }

    /// Dial, handshake, flush. Emits `Connecting`, then either `Connected`
    /// (after the server hello) or `Disconnected`.
    async fn establish(&mut self) -> Option<TransportLink> {
        self.transition(ConnectionState::Connecting).await;

        let mut link = match self.dialer.dial(&self.url).await {
            Ok(link) => link,
            Err(e) => {
                warn!("dial {} failed: {e}", self.url);
                self.transition(ConnectionState::Disconnected).await;
                return None;
            }
        };

        match tokio::time::timeout(self.handshake_timeout, Self::await_hello(&mut link)).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("stream closed during handshake");
                self.transition(ConnectionState::Disconnected).await;
                return None;
            }
            Err(_) => {
                warn!(
                    "no hello within {:?}, giving up on {}",
                    self.handshake_timeout, self.url
                );
                self.transition(ConnectionState::Disconnected).await;
                return None;
            }
        }

        info!("connected to position source at {}", self.url);
        self.transition(ConnectionState::Connected).await;

        if !self.flush_pending(&mut link).await {
            self.transition(ConnectionState::Disconnected).await;
            return None;
        }
        Some(link)
    }

    /// Read frames until the server hello arrives. `false` means the
    /// stream ended first.
    async fn await_hello(link: &mut TransportLink) -> bool {
        while let Some(text) = link.rx.recv().await {
            match serde_json::from_str::<TrackerMessage>(&text) {
                Ok(TrackerMessage::Connection { server, update_rate_hz, .. }) => {
                    debug!("hello from {server} ({update_rate_hz} Hz)");
                    return true;
                }
                Ok(_) => debug!("message before hello ignored"),
                Err(e) => debug!("malformed frame during handshake: {e}"),
            }
        }
        false
    }

    /// Drain the queued commands into the fresh link. Each queued command
    /// is attempted once and then gone, delivered or not. `false` means
    /// the link died mid-flush.
    async fn flush_pending(&mut self, link: &mut TransportLink) -> bool {
        while let Some(cmd) = self.pending.pop_front() {
            if let Err(e) = Self::transmit(link, &cmd).await {
                let abandoned = 1 + self.pending.len();
                self.pending.clear();
                warn!("link died during flush, {abandoned} queued command(s) dropped: {e}");
                return false;
            }
        }
        true
    }

    async fn transmit(link: &mut TransportLink, cmd: &TrackerCommand) -> Result<()> {
        let json = serde_json::to_string(cmd)
            .map_err(|e| NavError::Connection(format!("encode command: {e}")))?;
        link.tx
            .send(json)
            .await
            .map_err(|_| NavError::Connection("transport closed".to_string()))
    }

    fn handle_frame(&mut self, text: &str) {
        let msg: TrackerMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("malformed frame from source: {e}");
                return;
            }
        };
        match msg {
            TrackerMessage::Update { position, timestamp } => {
                self.next_seq += 1;
                let _ = self.events.send(ConnectionEvent::Sample(PositionSample {
                    position,
                    seq: self.next_seq,
                    source_timestamp: timestamp,
                    received_at: Instant::now(),
                }));
            }
            TrackerMessage::Response { command, status, .. } => {
                debug!("source ack for {command}: {}", status.as_deref().unwrap_or("ok"));
            }
            TrackerMessage::Connection { .. } => debug!("duplicate hello ignored"),
            TrackerMessage::Pong { .. } => debug!("pong"),
        }
    }

    async fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        debug!("connection {:?} -> {next:?}", self.state);
        self.state = next;
        *self.shared_state.write().await = next;
        let _ = self.events.send(ConnectionEvent::Status(next));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock;

    fn test_config() -> NavConfig {
        NavConfig {
            server_url: "ws://mock".to_string(),
            sample_queue: 64,
            handshake_timeout: Duration::from_millis(100),
            center_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn connect_is_idempotent_and_dials_once() {
        let (dialer, mut handle) = mock::pair();
        let conn = TrackerConnection::spawn(&test_config(), dialer);

        let server = tokio::spawn(async move {
            let remote = handle.accept().await.unwrap();
            (handle, remote)
        });

        assert_eq!(conn.connect().await, ConnectionState::Connected);
        assert_eq!(conn.connect().await, ConnectionState::Connected);

        let (handle, _remote) = server.await.unwrap();
        assert_eq!(handle.dial_count(), 1);
    }

    #[tokio::test]
    async fn failed_dial_settles_back_to_disconnected() {
        let (dialer, handle) = mock::pair();
        handle.fail_next_dials(1);
        let conn = TrackerConnection::spawn(&test_config(), dialer);

        let mut events = conn.subscribe();
        assert_eq!(conn.connect().await, ConnectionState::Disconnected);
        assert_eq!(conn.state().await, ConnectionState::Disconnected);

        // Transition events came in order, one per transition.
        let mut seen = Vec::new();
        while let Ok(ev) = events.try_recv() {
            if let ConnectionEvent::Status(s) = ev {
                seen.push(s);
            }
        }
        assert_eq!(
            seen,
            vec![ConnectionState::Connecting, ConnectionState::Disconnected]
        );
    }

    #[tokio::test]
    async fn missing_hello_times_out() {
        let (dialer, mut handle) = mock::pair();
        let conn = TrackerConnection::spawn(&test_config(), dialer);

        // Accept the dial but never say hello.
        let server = tokio::spawn(async move { handle.next_remote().await.unwrap() });

        assert_eq!(conn.connect().await, ConnectionState::Disconnected);
        drop(server);
    }

    #[tokio::test]
    async fn samples_are_sequenced_in_arrival_order() {
        let (dialer, mut handle) = mock::pair();
        let conn = TrackerConnection::spawn(&test_config(), dialer);

        let server = tokio::spawn(async move {
            let remote = handle.accept().await.unwrap();
            for i in 0..3 {
                remote.send_update(Vec3::new(i as f64, 0.0, 0.0), i as f64).await;
            }
            (handle, remote)
        });

        let mut events = conn.subscribe();
        assert_eq!(conn.connect().await, ConnectionState::Connected);

        let mut seqs = Vec::new();
        while seqs.len() < 3 {
            match tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
                Ok(Ok(ConnectionEvent::Sample(s))) => seqs.push(s.seq),
                Ok(Ok(_)) => {}
                other => panic!("sample stream stalled: {other:?}"),
            }
        }
        assert_eq!(seqs, vec![1, 2, 3]);

        // The count continues across reconnects for the manager's lifetime.
        let (mut handle, remote) = server.await.unwrap();
        drop(remote);
        let (state, remote2) =
            tokio::join!(conn.connect(), async { handle.accept().await.unwrap() });
        assert_eq!(state, ConnectionState::Connected);
        remote2.send_update(Vec3::new(9.0, 0.0, 0.0), 3.0).await;

        loop {
            match tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
                Ok(Ok(ConnectionEvent::Sample(s))) => {
                    assert_eq!(s.seq, 4);
                    break;
                }
                Ok(Ok(_)) => {}
                other => panic!("post-reconnect sample never arrived: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn slow_subscriber_loses_oldest_samples_first() {
        let (dialer, mut handle) = mock::pair();
        let mut config = test_config();
        config.sample_queue = 4;
        let conn = TrackerConnection::spawn(&config, dialer);

        let server = tokio::spawn(async move { handle.accept().await.unwrap() });
        assert_eq!(conn.connect().await, ConnectionState::Connected);
        let remote = server.await.unwrap();

        // One subscriber keeps up, the other never reads during the burst.
        let mut drain = conn.subscribe();
        let mut lazy = conn.subscribe();

        for i in 1..=20 {
            remote
                .send_update(Vec3::new(i as f64, 0.0, 0.0), i as f64 * 0.05)
                .await;
        }
        loop {
            match tokio::time::timeout(Duration::from_secs(1), drain.recv()).await {
                Ok(Ok(ConnectionEvent::Sample(s))) if s.seq == 20 => break,
                Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => {}
                other => panic!("sample stream stalled: {other:?}"),
            }
        }

        // The idle subscriber is told how much it missed and resumes at the
        // oldest retained sample, newest intact.
        match lazy.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert_eq!(n, 16),
            other => panic!("expected a lag report, got {other:?}"),
        }
        let mut tail = Vec::new();
        while let Ok(ConnectionEvent::Sample(s)) = lazy.try_recv() {
            tail.push(s.seq);
        }
        assert_eq!(tail, vec![17, 18, 19, 20]);
    }
}
