use crate::cache::EntityCache;
use crate::connection::{BackoffSchedule, CallReply, ConnCmd, ConnectionStatus};
use crate::entity::EntityId;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::service::ServiceCallError;
use futures::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Owns the single WebSocket transport to the hub
///
/// Runs as a background task (see [`ConnectionManager::run`]) driven by
/// commands from [`super::ConnectionHandle`]. The task holds the
/// wire-subscription set: while the transport is down the set doubles as
/// the queue of subscribe intents, and on every (re)connect the whole set
/// is replayed — the hub does not remember subscriptions across a dropped
/// socket.
pub struct ConnectionManager {
    url: String,
    backoff: BackoffSchedule,
    cache: Arc<EntityCache>,
    status_tx: watch::Sender<ConnectionStatus>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl ConnectionManager {
    pub fn new(
        url: String,
        backoff: BackoffSchedule,
        cache: Arc<EntityCache>,
        status_tx: watch::Sender<ConnectionStatus>,
        last_error: Arc<Mutex<Option<String>>>,
    ) -> Self {
        Self {
            url,
            backoff,
            cache,
            status_tx,
            last_error,
        }
    }

    /// Connection task main loop
    ///
    /// Lifecycle:
    /// 1. Idle until a Connect command arrives
    /// 2. Dial the hub, replaying the wire-subscription set on success
    /// 3. Multiplex incoming frames and commands
    /// 4. On drop: fail in-flight calls, reconnect with backoff
    pub async fn run(self, mut cmd_rx: mpsc::UnboundedReceiver<ConnCmd>) {
        let mut wire_subs: HashSet<EntityId> = HashSet::new();
        let mut pending: HashMap<Uuid, CallReply> = HashMap::new();
        let mut ws: Option<WsStream> = None;
        let mut want_connected = false;
        let mut ever_connected = false;
        let mut attempt: u32 = 0;

        loop {
            if !want_connected {
                self.set_status(ConnectionStatus::Disconnected);
                match cmd_rx.recv().await {
                    None | Some(ConnCmd::Shutdown) => return,
                    Some(ConnCmd::Connect) => {
                        want_connected = true;
                        attempt = 0;
                    }
                    Some(ConnCmd::Disconnect) => {}
                    Some(ConnCmd::Subscribe(id)) => {
                        wire_subs.insert(id);
                    }
                    Some(ConnCmd::Unsubscribe(id)) => {
                        wire_subs.remove(&id);
                    }
                    Some(ConnCmd::CallService { result_tx, .. }) => {
                        // Commands are not safe to queue against unknown
                        // device state — fail fast
                        let _ = result_tx.send(Err(ServiceCallError::NotConnected));
                    }
                }
                continue;
            }

            if let Some(ref mut stream) = ws {
                tokio::select! {
                    cmd = cmd_rx.recv() => match cmd {
                        None | Some(ConnCmd::Shutdown) => {
                            let _ = stream.close(None).await;
                            self.fail_pending(&mut pending);
                            self.set_status(ConnectionStatus::Disconnected);
                            return;
                        }
                        Some(ConnCmd::Disconnect) => {
                            info!("Disconnecting from hub");
                            let _ = stream.close(None).await;
                            self.fail_pending(&mut pending);
                            ws = None;
                            want_connected = false;
                        }
                        Some(ConnCmd::Connect) => {}
                        Some(ConnCmd::Subscribe(id)) => {
                            if wire_subs.insert(id.clone()) {
                                debug!(entity_id = %id, "Subscribing on wire");
                                let msg = ClientMessage::SubscribeEntities { entity_ids: vec![id] };
                                if let Err(e) = send_message(stream, &msg).await {
                                    self.connection_lost(&mut pending, &e.to_string());
                                    ws = None;
                                    attempt = 0;
                                }
                            }
                        }
                        Some(ConnCmd::Unsubscribe(id)) => {
                            if wire_subs.remove(&id) {
                                debug!(entity_id = %id, "Unsubscribing on wire");
                                let msg = ClientMessage::UnsubscribeEntities { entity_ids: vec![id] };
                                if let Err(e) = send_message(stream, &msg).await {
                                    self.connection_lost(&mut pending, &e.to_string());
                                    ws = None;
                                    attempt = 0;
                                }
                            }
                        }
                        Some(ConnCmd::CallService { id, message, result_tx }) => {
                            match send_message(stream, &message).await {
                                Ok(()) => {
                                    pending.insert(id, result_tx);
                                }
                                Err(e) => {
                                    let _ = result_tx.send(Err(ServiceCallError::ConnectionLost));
                                    self.connection_lost(&mut pending, &e.to_string());
                                    ws = None;
                                    attempt = 0;
                                }
                            }
                        }
                    },

                    frame = stream.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_frame(text.as_str(), &mut pending);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = stream.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) => {
                            warn!("Hub closed the connection");
                            self.connection_lost(&mut pending, "hub closed the connection");
                            ws = None;
                            attempt = 0;
                        }
                        Some(Ok(_)) => {
                            // Binary, pong — nothing to do
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            self.connection_lost(&mut pending, &e.to_string());
                            ws = None;
                            attempt = 0;
                        }
                        None => {
                            warn!("WebSocket stream ended");
                            self.connection_lost(&mut pending, "socket stream ended");
                            ws = None;
                            attempt = 0;
                        }
                    },
                }
                continue;
            }

            // Not connected but should be — dial, with backoff on failure
            self.set_status(if ever_connected || attempt > 0 {
                ConnectionStatus::Reconnecting { attempt: attempt + 1 }
            } else {
                ConnectionStatus::Connecting
            });

            let failure = match connect_async(self.url.as_str()).await {
                Ok((mut stream, _response)) => {
                    info!(url = %self.url, "Connected to hub");
                    ever_connected = true;

                    // The hub forgot everything a dropped socket knew:
                    // replay the full live-interest set, exactly once each
                    let replayed = if wire_subs.is_empty() {
                        Ok(())
                    } else {
                        let mut entity_ids: Vec<EntityId> = wire_subs.iter().cloned().collect();
                        entity_ids.sort();
                        info!(count = entity_ids.len(), "Replaying wire subscriptions");
                        send_message(&mut stream, &ClientMessage::SubscribeEntities { entity_ids })
                            .await
                    };

                    match replayed {
                        Ok(()) => {
                            attempt = 0;
                            self.clear_error();
                            self.set_status(ConnectionStatus::Connected);
                            ws = Some(stream);
                            None
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to replay subscriptions");
                            Some(e.to_string())
                        }
                    }
                }
                Err(e) => Some(e.to_string()),
            };

            if let Some(error) = failure {
                let delay = self.backoff.delay_for_attempt(attempt);
                warn!(
                    error = %error,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Connection attempt failed"
                );
                self.record_error(error);
                attempt += 1;

                // Keep serving commands while waiting out the delay
                let sleep = tokio::time::sleep(delay);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        _ = &mut sleep => break,
                        cmd = cmd_rx.recv() => match cmd {
                            None | Some(ConnCmd::Shutdown) => {
                                self.set_status(ConnectionStatus::Disconnected);
                                return;
                            }
                            Some(ConnCmd::Disconnect) => {
                                want_connected = false;
                                break;
                            }
                            Some(ConnCmd::Connect) => {}
                            Some(ConnCmd::Subscribe(id)) => {
                                wire_subs.insert(id);
                            }
                            Some(ConnCmd::Unsubscribe(id)) => {
                                wire_subs.remove(&id);
                            }
                            Some(ConnCmd::CallService { result_tx, .. }) => {
                                let _ = result_tx.send(Err(ServiceCallError::NotConnected));
                            }
                        },
                    }
                }
            }
        }
    }

    /// Route one hub frame: state ingestion or call-result correlation
    fn handle_frame(&self, text: &str, pending: &mut HashMap<Uuid, CallReply>) {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(ServerMessage::StateChanged {
                entity_id,
                state,
                attributes,
                ..
            }) => {
                debug!(entity_id = %entity_id, state = %state, "State changed");
                self.cache.apply_event(entity_id, state, attributes);
            }
            Ok(ServerMessage::CallResult {
                id,
                success,
                error,
                result,
            }) => match pending.remove(&id) {
                Some(result_tx) => {
                    let reply = if success {
                        Ok(result)
                    } else {
                        Err(ServiceCallError::Rejected(
                            error.unwrap_or_else(|| "service call rejected".to_string()),
                        ))
                    };
                    let _ = result_tx.send(reply);
                }
                None => {
                    debug!(call_id = %id, "Result for unknown or timed-out call");
                }
            },
            Err(e) => {
                warn!(error = %e, "Failed to parse hub message, skipping");
            }
        }
    }

    /// A live connection died: in-flight calls fail, the cache keeps its
    /// last-known records, and the loop falls through to reconnection
    fn connection_lost(&self, pending: &mut HashMap<Uuid, CallReply>, reason: &str) {
        self.record_error(reason.to_string());
        self.fail_pending(pending);
    }

    fn fail_pending(&self, pending: &mut HashMap<Uuid, CallReply>) {
        for (_, result_tx) in pending.drain() {
            let _ = result_tx.send(Err(ServiceCallError::ConnectionLost));
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    fn record_error(&self, error: String) {
        *self.last_error.lock().unwrap() = Some(error);
    }

    fn clear_error(&self) {
        *self.last_error.lock().unwrap() = None;
    }
}

async fn send_message(
    stream: &mut WsStream,
    message: &ClientMessage,
) -> anyhow::Result<()> {
    let json = serde_json::to_string(message)?;
    stream.send(Message::Text(json.into())).await?;
    Ok(())
}
