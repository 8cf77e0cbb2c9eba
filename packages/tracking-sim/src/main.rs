//! main.rs — Tracking position source simulator entry point
//!
//! Stands in for an optical/electromagnetic tracker while the viewer is
//! developed against it. Runs two concurrent loops:
//!   1. Stream loop: advances the motion model at update_rate_hz and
//!      broadcasts a position update while tracking is active
//!   2. WebSocket server: viewer connections (hello on accept, update
//!      relay, start/stop/set_center/ping command handling)
//!
//! One motion model serves every connected viewer, so two viewers looking
//! at the same patient see the same tool.

mod motion;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use clap::Parser;
use nav_types::{TrackerCommand, TrackerMessage};
use tokio::sync::{broadcast, RwLock};
use tokio::time::interval;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use motion::MotionModel;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tracking-sim", about = "Synthetic streaming position source")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// Override the WebSocket bind address
    #[arg(long)]
    bind: Option<String>,
    /// Override the update rate (Hz)
    #[arg(long)]
    rate: Option<f64>,
}

// ── Shared state ──────────────────────────────────────────────────────────────

struct SimState {
    motion: MotionModel,
    active: bool,
    updates: u64,
    update_rate_hz: f64,
}

type SharedState = Arc<RwLock<SimState>>;

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracking_sim=info".into()),
        )
        .init();

    let args = Args::parse();

    // Load config
    let config_str = std::fs::read_to_string(&args.config)
        .unwrap_or_else(|_| include_str!("../config.toml").to_string());
    let mut cfg: FullConfig = toml::from_str(&config_str).expect("Invalid config.toml");
    if let Some(bind) = args.bind {
        cfg.server.bind = bind;
    }
    if let Some(rate) = args.rate {
        cfg.server.update_rate_hz = rate;
    }

    info!(
        "🧭 Tracking simulator starting — {} Hz, path center [{:.1}, {:.1}, {:.1}]",
        cfg.server.update_rate_hz, cfg.motion.center[0], cfg.motion.center[1], cfg.motion.center[2]
    );

    let shared: SharedState = Arc::new(RwLock::new(SimState {
        motion: MotionModel::new(&cfg.motion),
        active: false,
        updates: 0,
        update_rate_hz: cfg.server.update_rate_hz,
    }));

    // Broadcast channel for position updates (one stream, every viewer)
    let (update_tx, _) = broadcast::channel::<String>(64);
    let update_tx = Arc::new(update_tx);

    // Spawn stream loop
    let shared_loop = shared.clone();
    let tx_loop = update_tx.clone();
    let period = stream_period(cfg.server.update_rate_hz);
    tokio::spawn(async move {
        stream_loop(shared_loop, tx_loop, period).await;
    });

    let bind = cfg.server.bind.clone();
    info!("📡 Viewer WebSocket at ws://{bind}");

    let app = Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(|| async { "tracking-sim ok" }))
        .with_state((shared.clone(), update_tx.clone()))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let listener = tokio::net::TcpListener::bind(&bind).await.expect("Failed to bind");
    axum::serve(listener, app).await.expect("Server error");
}

// ── Stream loop ───────────────────────────────────────────────────────────────

/// Tick period for the stream loop. A zero, negative or non-finite rate is
/// a startup configuration error.
fn stream_period(update_rate_hz: f64) -> Duration {
    assert!(
        update_rate_hz.is_finite() && update_rate_hz > 0.0,
        "update_rate_hz must be positive, got {update_rate_hz}"
    );
    Duration::from_secs_f64(1.0 / update_rate_hz)
}

async fn stream_loop(state: SharedState, tx: Arc<broadcast::Sender<String>>, period: Duration) {
    let mut ticker = interval(period);
    let dt = period.as_secs_f64();

    info!("🔄 Stream loop running at {:.0} Hz ({:.1}ms tick)", 1.0 / dt, dt * 1000.0);

    loop {
        ticker.tick().await;

        let active = state.read().await.active;
        if !active {
            continue;
        }

        let (position, updates, mode) = {
            let mut s = state.write().await;
            let position = s.motion.advance(dt);
            s.updates += 1;
            (position, s.updates, s.motion.mode())
        };

        let update = TrackerMessage::Update { position, timestamp: now_secs() };
        match serde_json::to_string(&update) {
            Ok(json) => {
                // No receivers just means no viewer is connected right now.
                let _ = tx.send(json);
            }
            Err(e) => warn!("failed to encode update: {e}"),
        }

        if updates % 100 == 0 {
            info!("📍 {updates} update(s) streamed ({mode:?} mode)");
        }
    }
}

// ── WebSocket viewer handler ──────────────────────────────────────────────────

async fn ws_handler(
    ws: WebSocketUpgrade,
    State((state, update_tx)): State<(SharedState, Arc<broadcast::Sender<String>>)>,
) -> Response {
    ws.on_upgrade(move |socket| handle_ws(socket, state, update_tx))
}

async fn handle_ws(
    mut socket: WebSocket,
    state: SharedState,
    update_tx: Arc<broadcast::Sender<String>>,
) {
    let mut update_rx = update_tx.subscribe();

    // Hello first; the viewer side treats it as the handshake.
    let hello = {
        let s = state.read().await;
        TrackerMessage::Connection {
            status: "connected".to_string(),
            server: format!("tracking-sim v{}", env!("CARGO_PKG_VERSION")),
            update_rate_hz: s.update_rate_hz,
            timestamp: now_secs(),
        }
    };
    if send_msg(&mut socket, &hello).await.is_err() {
        return;
    }
    info!("🔌 viewer connected");

    loop {
        tokio::select! {
            // Relay position updates to this viewer. A lagged receiver just
            // skips stale frames and picks up at the current position.
            relayed = update_rx.recv() => match relayed {
                Ok(json) => {
                    if socket.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            // Handle viewer commands
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(raw))) => {
                    if !handle_command(&mut socket, &state, &raw).await {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("socket error: {e}");
                    break;
                }
            }
        }
    }
    info!("🔌 viewer disconnected");
}

/// Apply one viewer command to the shared tracker state and acknowledge it
/// on the issuing socket. Returns false when the socket is gone.
async fn handle_command(socket: &mut WebSocket, state: &SharedState, raw: &str) -> bool {
    let cmd: TrackerCommand = match serde_json::from_str(raw) {
        Ok(cmd) => cmd,
        Err(e) => {
            warn!("unknown command ignored: {e}");
            return true;
        }
    };
    let response = match cmd {
        TrackerCommand::Start { mode } => {
            let mut s = state.write().await;
            s.active = true;
            s.motion.set_mode(mode);
            info!("▶ tracking started ({mode:?})");
            TrackerMessage::Response {
                command: "start".to_string(),
                status: Some("started".to_string()),
                mode: Some(mode),
                center: None,
            }
        }
        TrackerCommand::Stop => {
            state.write().await.active = false;
            info!("⏸ tracking stopped");
            TrackerMessage::Response {
                command: "stop".to_string(),
                status: Some("stopped".to_string()),
                mode: None,
                center: None,
            }
        }
        TrackerCommand::SetCenter { position } => {
            state.write().await.motion.set_center(position);
            info!(
                "🎯 path center moved to [{:.1}, {:.1}, {:.1}]",
                position.x, position.y, position.z
            );
            TrackerMessage::Response {
                command: "set_center".to_string(),
                status: None,
                mode: None,
                center: Some(position),
            }
        }
        TrackerCommand::Ping => TrackerMessage::Pong { timestamp: now_secs() },
    };
    send_msg(socket, &response).await.is_ok()
}

async fn send_msg(socket: &mut WebSocket, msg: &TrackerMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json)).await,
        Err(e) => {
            warn!("failed to encode message: {e}");
            Ok(())
        }
    }
}

fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ── Config structs ────────────────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct FullConfig {
    server: ServerConfig,
    motion: motion::MotionConfig,
}

#[derive(Debug, serde::Deserialize)]
struct ServerConfig {
    bind: String,
    update_rate_hz: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_period_survives_sub_millisecond_rates() {
        assert_eq!(stream_period(20.0), Duration::from_millis(50));
        // Above 1 kHz the period drops below a millisecond but never to zero.
        assert_eq!(stream_period(2000.0), Duration::from_micros(500));
        assert!(stream_period(5000.0) > Duration::ZERO);
    }

    #[test]
    #[should_panic(expected = "update_rate_hz must be positive")]
    fn zero_rate_is_a_startup_error() {
        stream_period(0.0);
    }

    #[test]
    #[should_panic(expected = "update_rate_hz must be positive")]
    fn nan_rate_is_a_startup_error() {
        stream_period(f64::NAN);
    }
}
