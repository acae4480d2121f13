//! WebSocket Game Server
//!
//! Async WebSocket server for player connections. Each connection receives
//! the initial snapshot, every round broadcast, and replies to its own bet
//! and cashout requests.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::config::GameConfig;
use crate::core::money::Amount;
use crate::game::manager::{GameManager, PlaceBet};
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Connected client state.
struct ConnectedClient {
    connected_at: DateTime<Utc>,
}

type Clients = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// The game server.
pub struct GameServer {
    config: Arc<GameConfig>,
    manager: Arc<GameManager>,
    clients: Clients,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server in front of `manager`.
    pub fn new(config: GameConfig, manager: Arc<GameManager>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config: Arc::new(config),
            manager,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server listening on {}", listener.local_addr()?);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let manager = self.manager.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            clients.write().await.insert(
                addr,
                ConnectedClient {
                    connected_at: Utc::now(),
                },
            );

            if let Err(e) = Self::run_connection(stream, addr, manager, shutdown_rx).await {
                error!("Connection {} failed: {}", addr, e);
            }

            if let Some(client) = clients.write().await.remove(&addr) {
                let seconds = (Utc::now() - client.connected_at).num_seconds();
                info!("Client {} cleaned up after {}s", addr, seconds);
            }
        });
    }

    async fn run_connection(
        stream: TcpStream,
        addr: SocketAddr,
        manager: Arc<GameManager>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), GameServerError> {
        let ws_stream = accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);

        // Subscribe before the snapshot so no broadcast falls in between.
        let mut events = manager.subscribe();
        let _ = msg_tx.send(ServerMessage::InitialData(manager.initial_data().await)).await;

        let sender_task = tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => match ClientMessage::from_json(&text) {
                            Ok(client_msg) => Self::handle_client_message(addr, client_msg, &manager, &msg_tx).await,
                            Err(e) => {
                                debug!("Invalid message from {}: {}", addr, e);
                                let _ = msg_tx
                                    .send(ServerMessage::error(ErrorCode::InvalidInput, "Invalid message format"))
                                    .await;
                            }
                        },
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Client {} disconnected", addr);
                            break;
                        }
                        Some(Err(e)) => {
                            error!("WebSocket error for {}: {}", addr, e);
                            break;
                        }
                        _ => {}
                    }
                }
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if msg_tx.send(ServerMessage::Round(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Client {} lagged, skipped {} round events", addr, n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = shutdown_rx.recv() => {
                    let _ = msg_tx.send(ServerMessage::Shutdown {
                        reason: "Server shutting down".to_string(),
                    }).await;
                    break;
                }
            }
        }

        drop(msg_tx);
        // let queued replies flush; the task ends once the channel is drained
        let _ = sender_task.await;
        Ok(())
    }

    /// Handle a client message. Bet and cashout replies go to this
    /// connection only.
    async fn handle_client_message(
        addr: SocketAddr,
        msg: ClientMessage,
        manager: &Arc<GameManager>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match msg {
            ClientMessage::PlaceBet {
                user_id,
                stake,
                client_request_id,
                client_seed,
            } => {
                let stake = match Amount::from_decimal(stake) {
                    Ok(stake) => stake,
                    Err(e) => {
                        let _ = sender.send(ServerMessage::bet_placed(client_request_id, Err(e))).await;
                        return;
                    }
                };
                debug!("Client {} placing {} for {}", addr, stake, user_id);

                // The request resolves on the queue; keep reading meanwhile.
                let manager = manager.clone();
                let sender = sender.clone();
                tokio::spawn(async move {
                    let result = manager
                        .place_bet(PlaceBet {
                            user_id,
                            stake,
                            client_seed,
                        })
                        .await;
                    let _ = sender.send(ServerMessage::bet_placed(client_request_id, result)).await;
                });
            }
            ClientMessage::Cashout {
                bet_id,
                client_request_id,
            } => {
                let manager = manager.clone();
                let sender = sender.clone();
                tokio::spawn(async move {
                    let result = manager.cashout(bet_id).await;
                    let _ = sender.send(ServerMessage::cashed_out(client_request_id, result)).await;
                });
            }
            ClientMessage::Ping { timestamp } => {
                let _ = sender
                    .send(ServerMessage::Pong {
                        timestamp,
                        server_time: Utc::now().timestamp_millis().max(0) as u64,
                    })
                    .await;
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }
}
