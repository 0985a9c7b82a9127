//! Secure Connect hub transport.
//!
//! Binds a TCP listener, optionally wraps accepted sockets in TLS, upgrades
//! them to WebSocket (negotiating the `bacnet-sc` subprotocol), and runs one
//! [`SessionHandler`] per connection. All protocol decisions live in the
//! session and service layers; this module only moves bytes and enforces the
//! handshake window and idle timeout.

use std::fs::File;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use crate::overrides::OverrideStore;
use crate::points::{LiveTable, PointTable};

use super::session::{SessionHandler, SessionState};
use super::{HubIdentity, SUBPROTOCOL};

/// Default window for the Connect-Request after transport accept.
pub const DEFAULT_HANDSHAKE_WINDOW: Duration = Duration::from_secs(10);

/// Default idle (heartbeat) timeout while established.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Hub transport configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Listen address, e.g. "0.0.0.0:8443"
    pub bind_addr: String,

    /// Path to the hub certificate (PEM). None serves plain `ws://` for
    /// local testing.
    pub cert_path: Option<String>,

    /// Path to the hub private key (PKCS#8 PEM)
    pub key_path: Option<String>,

    /// How long a freshly accepted connection may take to send its
    /// Connect-Request
    pub handshake_window: Duration,

    /// No traffic for this long tears the session down
    pub idle_timeout: Duration,

    /// Maximum WebSocket message size (bytes)
    pub max_message_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8443".to_string(),
            cert_path: None,
            key_path: None,
            handshake_window: DEFAULT_HANDSHAKE_WINDOW,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_message_size: 1500,
        }
    }
}

/// Hub transport errors. Per-connection failures are logged, not returned;
/// these surface only from the listener itself.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
}

/// The Secure Connect hub.
pub struct ScHub {
    config: HubConfig,
    identity: Arc<HubIdentity>,
    points: Arc<PointTable>,
    live: LiveTable,
    store: Arc<OverrideStore>,
}

impl ScHub {
    pub fn new(
        config: HubConfig,
        identity: HubIdentity,
        points: Arc<PointTable>,
        live: LiveTable,
        store: Arc<OverrideStore>,
    ) -> Self {
        Self {
            config,
            identity: Arc::new(identity),
            points,
            live,
            store,
        }
    }

    /// Accept connections until the listener fails. One task per client.
    pub async fn run(self) -> Result<(), HubError> {
        let acceptor = self.build_tls_acceptor()?;
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(
            "Secure Connect hub listening on {}://{} ({} point(s))",
            if acceptor.is_some() { "wss" } else { "ws" },
            self.config.bind_addr,
            self.points.len()
        );

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let peer = peer_addr.to_string();
            let handler = SessionHandler::new(
                Arc::clone(&self.identity),
                Arc::clone(&self.points),
                self.live.clone(),
                Arc::clone(&self.store),
                peer.clone(),
            );
            let acceptor = acceptor.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                let result = match acceptor {
                    Some(tls) => match tls.accept(stream).await {
                        Ok(tls_stream) => serve_socket(tls_stream, handler, &config).await,
                        Err(e) => {
                            warn!("session {}: TLS accept failed: {}", peer, e);
                            return;
                        }
                    },
                    None => serve_socket(stream, handler, &config).await,
                };
                if let Err(e) = result {
                    // Transport errors end only this session.
                    warn!("session {}: closed with error: {}", peer, e);
                } else {
                    info!("session {}: closed", peer);
                }
            });
        }
    }

    fn build_tls_acceptor(&self) -> Result<Option<tokio_native_tls::TlsAcceptor>, HubError> {
        let (cert_path, key_path) = match (&self.config.cert_path, &self.config.key_path) {
            (Some(cert), Some(key)) => (cert, key),
            (None, None) => return Ok(None),
            _ => {
                return Err(HubError::TlsConfig(
                    "cert_path and key_path must be set together".to_string(),
                ))
            }
        };

        let cert_pem = read_file(cert_path)?;
        let key_pem = read_file(key_path)?;
        let identity = native_tls::Identity::from_pkcs8(&cert_pem, &key_pem)?;
        let acceptor = native_tls::TlsAcceptor::builder(identity).build()?;
        Ok(Some(tokio_native_tls::TlsAcceptor::from(acceptor)))
    }
}

fn read_file(path: &str) -> Result<Vec<u8>, HubError> {
    let mut file = File::open(path)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;
    Ok(contents)
}

/// Drive one WebSocket connection through its session handler.
async fn serve_socket<S>(
    stream: S,
    mut handler: SessionHandler,
    config: &HubConfig,
) -> Result<(), HubError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Echo the bacnet-sc subprotocol when the client offers it.
    let negotiate = |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
        let offered = req
            .headers()
            .get("Sec-WebSocket-Protocol")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').any(|p| p.trim() == SUBPROTOCOL))
            .unwrap_or(false);
        if offered {
            resp.headers_mut()
                .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));
        }
        Ok(resp)
    };

    let ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig {
        max_message_size: Some(config.max_message_size),
        max_frame_size: Some(config.max_message_size),
        ..Default::default()
    };

    let mut ws_stream =
        tokio_tungstenite::accept_hdr_async_with_config(stream, negotiate, Some(ws_config)).await?;

    loop {
        let window = if handler.state() == SessionState::Handshaking {
            config.handshake_window
        } else {
            config.idle_timeout
        };

        let message = match tokio::time::timeout(window, ws_stream.next()).await {
            Err(_) => {
                handler.on_timeout();
                let _ = ws_stream.close(None).await;
                return Ok(());
            }
            Ok(None) => return Ok(()),
            Ok(Some(message)) => message?,
        };

        match message {
            Message::Binary(data) => {
                // No store lock is held here; the handler takes and releases
                // them synchronously inside on_frame.
                let outcome = handler.on_frame(&data);
                for reply in outcome.replies {
                    ws_stream.send(Message::Binary(reply)).await?;
                }
                if outcome.close {
                    let _ = ws_stream.close(None).await;
                    return Ok(());
                }
            }
            Message::Close(_) => return Ok(()),
            Message::Text(_) => {
                warn!("ignoring unexpected text message");
            }
            // Ping/pong are handled by tungstenite itself.
            _ => {}
        }
    }
}
