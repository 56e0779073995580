use crate::browse::BrowseTree;
use crate::session::DaemonEvent;
use crate::BroadcastMessage;
use airwave_proto::protocol::{Broadcast, Command, Message, MAX_FRAME_LEN, PROTOCOL_VERSION};
use airwave_proto::state::StateManager;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    browse: BrowseTree,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);

        let connected = Arc::new(AtomicUsize::new(0));
        let mut client_id = 0usize;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;
                    let count = connected.fetch_add(1, Ordering::SeqCst) + 1;
                    info!("Client {} connected from {} ({} connected)", id, peer, count);

                    let sm = state_manager.clone();
                    let tree = browse.clone();
                    let evt_tx = event_tx.clone();
                    let bcast_rx = broadcast_tx.subscribe();
                    let connected = connected.clone();

                    tokio::spawn(async move {
                        handle_client(stream, sm, tree, id, evt_tx, bcast_rx).await;
                        let count = connected.fetch_sub(1, Ordering::SeqCst) - 1;
                        info!("Client {} disconnected ({} connected)", id, count);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    })
}

async fn handle_client(
    stream: TcpStream,
    state_manager: Arc<StateManager>,
    browse: BrowseTree,
    client_id: usize,
    event_tx: mpsc::Sender<DaemonEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    if let Ok(encoded) = encode_hello(&state_manager).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        loop {
                            let Some(len) = Message::frame_len(&read_buf) else { break };
                            if len > MAX_FRAME_LEN {
                                warn!("Client {} announced a {} byte frame, disconnecting", client_id, len);
                                let message = format!("frame of {} bytes exceeds the {} byte limit", len, MAX_FRAME_LEN);
                                let _ = write_broadcast(&mut write_half, Broadcast::Error { message }).await;
                                return;
                            }
                            if read_buf.len() < 4 + len { break; }

                            let reply = match Message::decode(&read_buf) {
                                Ok((Message::Command(cmd), _)) => {
                                    debug!("Client {} sent command: {:?}", client_id, cmd);
                                    match answer_query(&cmd, &state_manager, &browse).await {
                                        Some(reply) => Some(reply),
                                        None => {
                                            if event_tx.send(DaemonEvent::ClientCommand(cmd)).await.is_err() {
                                                warn!("DaemonEvent channel closed");
                                                return;
                                            }
                                            Some(Broadcast::State { data: state_manager.get_state().await })
                                        }
                                    }
                                }
                                Ok(_) => None,
                                Err(e) => {
                                    warn!("Client {} sent a malformed frame: {}", client_id, e);
                                    Some(Broadcast::Error { message: format!("malformed command: {}", e) })
                                }
                            };
                            read_buf.drain(..4 + len);
                            if let Some(reply) = reply {
                                if write_broadcast(&mut write_half, reply).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let outgoing = match msg {
                    Ok(BroadcastMessage::StateUpdated) => {
                        Broadcast::State { data: state_manager.get_state().await }
                    }
                    Ok(BroadcastMessage::NowPlaying(data)) => Broadcast::NowPlaying { data },
                    Ok(BroadcastMessage::Log(message)) => Broadcast::Log { message },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        Broadcast::State { data: state_manager.get_state().await }
                    }
                    Err(_) => break,
                };
                if write_broadcast(&mut write_half, outgoing).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Browse queries are read-only and answered from the shared snapshot.
async fn answer_query(
    cmd: &Command,
    state_manager: &StateManager,
    browse: &BrowseTree,
) -> Option<Broadcast> {
    let reply = match cmd {
        Command::BrowseChildren { parent_id } => {
            let state = state_manager.get_state().await;
            Broadcast::Children {
                parent_id: parent_id.clone(),
                items: browse.children(&state, parent_id),
            }
        }
        Command::BrowseItem { media_id } => {
            let state = state_manager.get_state().await;
            Broadcast::Item {
                media_id: media_id.clone(),
                item: browse.item(&state, media_id),
            }
        }
        Command::Search { query } => {
            let state = state_manager.get_state().await;
            Broadcast::SearchResults {
                query: query.clone(),
                items: browse.search(&state, query),
            }
        }
        _ => return None,
    };
    Some(reply)
}

async fn write_broadcast<W: AsyncWrite + Unpin>(
    writer: &mut W,
    broadcast: Broadcast,
) -> anyhow::Result<()> {
    let encoded = Message::Broadcast(broadcast).encode()?;
    writer.write_all(&encoded).await?;
    Ok(())
}

async fn encode_hello(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    let rev = state.rev;
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        daemon_rev: rev,
        state,
    })
    .encode()
}
