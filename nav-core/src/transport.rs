//! # transport
//!
//! Wire seam between the connection manager and the outside world. The
//! manager never touches a socket directly; it drives a [`TransportLink`]
//! obtained from a [`Dialer`]. Production code dials real WebSockets via
//! [`WsDialer`], tests swap in [`mock::MockDialer`] and script the far end.

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::{NavError, Result};

/// Duplex text-frame link to a position source.
///
/// `tx` carries outbound frames. `rx` yields inbound frames until the peer
/// goes away, after which it yields `None`. Either side failing tears the
/// whole link down.
pub struct TransportLink {
    pub tx: mpsc::Sender<String>,
    pub rx: mpsc::Receiver<String>,
}

/// Opens a fresh [`TransportLink`] per connection attempt.
pub trait Dialer: Send + 'static {
    fn dial(&mut self, url: &str) -> impl Future<Output = Result<TransportLink>> + Send;
}

/// Dials a real WebSocket endpoint and pumps text frames both ways.
pub struct WsDialer;

impl Dialer for WsDialer {
    async fn dial(&mut self, url: &str) -> Result<TransportLink> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| NavError::Connection(format!("dial {url}: {e}")))?;
        let (mut sink, mut stream) = ws.split();

        let (in_tx, in_rx) = mpsc::channel::<String>(64);
        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);

        // Inbound pump: socket -> link. Dropping in_tx closes the link.
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("websocket read error: {e}");
                        break;
                    }
                }
            }
        });

        // Outbound pump: link -> socket.
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        Ok(TransportLink { tx: out_tx, rx: in_rx })
    }
}

pub mod mock {
    //! In-memory transport for tests. [`MockDialer`] goes where [`WsDialer`]
    //! would; the paired [`MockHandle`] hands the test a [`MockRemote`] per
    //! dial so it can play the server side of the conversation.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use nav_types::{TrackerCommand, TrackerMessage, Vec3};
    use tokio::sync::mpsc;

    use super::{Dialer, TransportLink};
    use crate::error::{NavError, Result};

    pub struct MockDialer {
        remotes: mpsc::UnboundedSender<MockRemote>,
        dials: Arc<AtomicUsize>,
        fail_before: Arc<AtomicUsize>,
    }

    /// Test-side view of a [`MockDialer`]: yields one [`MockRemote`] per
    /// successful dial and counts attempts.
    pub struct MockHandle {
        remotes: mpsc::UnboundedReceiver<MockRemote>,
        dials: Arc<AtomicUsize>,
        fail_before: Arc<AtomicUsize>,
    }

    /// Far end of one mock connection. Dropping it closes the link under
    /// the client, as a vanished server would.
    pub struct MockRemote {
        to_client: mpsc::Sender<String>,
        from_client: mpsc::Receiver<String>,
    }

    pub fn pair() -> (MockDialer, MockHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dials = Arc::new(AtomicUsize::new(0));
        let fail_before = Arc::new(AtomicUsize::new(0));
        (
            MockDialer {
                remotes: tx,
                dials: dials.clone(),
                fail_before: fail_before.clone(),
            },
            MockHandle {
                remotes: rx,
                dials,
                fail_before,
            },
        )
    }

    impl Dialer for MockDialer {
        async fn dial(&mut self, _url: &str) -> Result<TransportLink> {
            self.dials.fetch_add(1, Ordering::Relaxed);
            if self
                .fail_before
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(NavError::Connection("mock dial refused".into()));
            }
            let (to_client, client_rx) = mpsc::channel(64);
            let (client_tx, from_client) = mpsc::channel(64);
            let remote = MockRemote {
                to_client,
                from_client,
            };
            self.remotes
                .send(remote)
                .map_err(|_| NavError::Connection("mock handle dropped".into()))?;
            Ok(TransportLink {
                tx: client_tx,
                rx: client_rx,
            })
        }
    }

    impl MockHandle {
        /// Number of dial attempts so far, failed ones included.
        pub fn dial_count(&self) -> usize {
            self.dials.load(Ordering::Relaxed)
        }

        /// Make the next `n` dial attempts fail before a link is opened.
        pub fn fail_next_dials(&self, n: usize) {
            self.fail_before.store(n, Ordering::Relaxed);
        }

        /// Wait for the client's next dial.
        pub async fn next_remote(&mut self) -> Option<MockRemote> {
            self.remotes.recv().await
        }

        /// Wait for the next dial and complete the handshake on it.
        pub async fn accept(&mut self) -> Option<MockRemote> {
            let remote = self.next_remote().await?;
            remote.hello().await;
            Some(remote)
        }
    }

    impl MockRemote {
        /// Push a raw text frame to the client.
        pub async fn send_text(&self, text: impl Into<String>) {
            let _ = self.to_client.send(text.into()).await;
        }

        pub async fn send(&self, msg: &TrackerMessage) {
            if let Ok(json) = serde_json::to_string(msg) {
                self.send_text(json).await;
            }
        }

        /// The connection hello a real server opens with.
        pub async fn hello(&self) {
            self.send(&TrackerMessage::Connection {
                status: "connected".to_string(),
                server: "mock".to_string(),
                update_rate_hz: 20.0,
                timestamp: crate::now_ms() as f64 / 1000.0,
            })
            .await;
        }

        pub async fn send_update(&self, position: Vec3, timestamp: f64) {
            self.send(&TrackerMessage::Update {
                position,
                timestamp,
            })
            .await;
        }

        /// Next command the client sent, blocking until one arrives.
        pub async fn recv_command(&mut self) -> Option<TrackerCommand> {
            let text = self.from_client.recv().await?;
            serde_json::from_str(&text).ok()
        }

        /// Next command within `wait`, or `None` if the client stays quiet.
        pub async fn try_recv_command(&mut self, wait: Duration) -> Option<TrackerCommand> {
            tokio::time::timeout(wait, self.recv_command()).await.ok()?
        }
    }
}
