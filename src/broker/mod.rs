//! Session broker: per-client multiplexer between the stream channel and
//! the SSH connection pool
//!
//! One broker per authenticated WebSocket. It owns the client-visible
//! session-id → connection-id mapping, so a client can only ever act on
//! connections this broker opened; events for anything else never reach it
//! because subscriptions are per-connection, not broadcast.
//!
//! ```text
//!  client frames ──▶ handle() ──▶ ConnectionManager / AssistantBridge
//!                                        │ per-connection events
//!  client ◀── out_rx ◀── pump task ◀─────┘  (one pump per session)
//! ```

pub mod protocol;

use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::assistant::{AssistantBridge, AssistantReply};
use crate::ssh::{
    ConnectionEvent, ConnectionId, ConnectionManager, ConnectionStatus, EventReceiver,
};
use crate::store::{AiQueryRecord, AiQueryStore, ProfileStore, SessionStore};
use crate::vault::CredentialVault;
use protocol::{ClientMessage, ServerMessage};

/// Outbound frame queue capacity is unbounded: the writer task drains into
/// the socket and the socket applies backpressure there.
pub type OutboundReceiver = mpsc::UnboundedReceiver<ServerMessage>;

pub struct SessionBroker {
    user_id: String,
    manager: Arc<ConnectionManager>,
    profiles: ProfileStore,
    sessions: SessionStore,
    queries: AiQueryStore,
    assistant: Arc<AssistantBridge>,
    vault: Arc<CredentialVault>,
    /// session-id → connection-id, the per-client session mapping
    mapping: Mutex<HashMap<String, ConnectionId>>,
    /// one event pump per live session
    pumps: Mutex<HashMap<String, JoinHandle<()>>>,
    out_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl SessionBroker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: String,
        manager: Arc<ConnectionManager>,
        profiles: ProfileStore,
        sessions: SessionStore,
        queries: AiQueryStore,
        assistant: Arc<AssistantBridge>,
        vault: Arc<CredentialVault>,
    ) -> (Self, OutboundReceiver) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (
            Self {
                user_id,
                manager,
                profiles,
                sessions,
                queries,
                assistant,
                vault,
                mapping: Mutex::new(HashMap::new()),
                pumps: Mutex::new(HashMap::new()),
                out_tx,
            },
            out_rx,
        )
    }

    /// Dispatch one inbound frame. Frames are handled in arrival order on
    /// the stream's read loop, which preserves per-session input ordering.
    pub async fn handle(&self, message: ClientMessage) {
        match message {
            ClientMessage::SshConnect {
                session_id,
                profile_id,
                title,
            } => self.connect(session_id, profile_id, title).await,

            ClientMessage::SshDisconnect { session_id } => self.disconnect(&session_id).await,

            ClientMessage::TerminalInput { session_id, data } => {
                let Some(connection_id) = self.lookup(&session_id) else {
                    self.send(ServerMessage::Error {
                        message: format!("Unknown session: {}", session_id),
                    });
                    return;
                };
                // The data field is base64 so arbitrary byte sequences
                // (control characters, pastes in any encoding) survive the
                // JSON frame untouched
                let Ok(bytes) = STANDARD.decode(&data) else {
                    self.send(ServerMessage::Error {
                        message: format!("Invalid terminal data for session: {}", session_id),
                    });
                    return;
                };
                if let Err(e) = self.manager.send_input(&connection_id, bytes).await {
                    self.send(ServerMessage::SshStatus {
                        session_id,
                        status: ConnectionStatus::Error,
                        error: Some(e.to_string()),
                    });
                }
            }

            ClientMessage::TerminalResize {
                session_id,
                dimensions,
            } => {
                let Some(connection_id) = self.lookup(&session_id) else {
                    self.send(ServerMessage::Error {
                        message: format!("Unknown session: {}", session_id),
                    });
                    return;
                };
                if let Err(e) = self
                    .manager
                    .resize(&connection_id, dimensions.cols, dimensions.rows)
                    .await
                {
                    self.send(ServerMessage::SshStatus {
                        session_id,
                        status: ConnectionStatus::Error,
                        error: Some(e.to_string()),
                    });
                }
            }

            ClientMessage::TerminalClear { session_id } => {
                // Client-side visual clear; nothing to do on the shell
                debug!("terminal:clear for session {} (no-op)", session_id);
            }

            ClientMessage::AiTranslate {
                session_id,
                prompt,
                context,
            } => {
                let result = self.assistant.translate(&prompt, context.as_deref()).await;
                self.finish_ai(session_id, prompt, result).await;
            }

            ClientMessage::AiExplain {
                session_id,
                command,
            } => {
                let result = self.assistant.explain(&command).await;
                self.finish_ai(session_id, command, result).await;
            }

            ClientMessage::AiQuery { session_id, prompt } => {
                let result = self.assistant.query(&prompt).await;
                self.finish_ai(session_id, prompt, result).await;
            }

            ClientMessage::SessionList => {
                match self.sessions.list_active(&self.user_id).await {
                    Ok(sessions) => self.send(ServerMessage::SessionList { sessions }),
                    Err(e) => {
                        warn!("Session listing failed for {}: {}", self.user_id, e);
                        self.send(ServerMessage::Error {
                            message: "Session listing failed".into(),
                        });
                    }
                }
            }
        }
    }

    /// Open a session: resolve the profile, dial, install the mapping, and
    /// start pumping events back to the client.
    async fn connect(&self, session_id: String, profile_id: String, title: Option<String>) {
        if self.lookup(&session_id).is_some() {
            self.send(ServerMessage::Error {
                message: format!("Session already active: {}", session_id),
            });
            return;
        }

        let (target, credentials) = match self
            .profiles
            .resolve_for_connect(&self.user_id, &profile_id, &self.vault)
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                self.send(ServerMessage::SshStatus {
                    session_id,
                    status: ConnectionStatus::Error,
                    error: Some(e.to_string()),
                });
                return;
            }
        };

        if let Err(e) = self
            .sessions
            .open(
                &session_id,
                &self.user_id,
                &profile_id,
                ConnectionStatus::Connecting.as_str(),
                title.as_deref(),
            )
            .await
        {
            self.send(ServerMessage::SshStatus {
                session_id,
                status: ConnectionStatus::Error,
                error: Some(e.to_string()),
            });
            return;
        }

        match self.manager.create_connection(target, credentials).await {
            Ok((connection_id, events)) => {
                info!(
                    "Session {} -> connection {} for user {}",
                    session_id, connection_id, self.user_id
                );
                self.mapping
                    .lock()
                    .insert(session_id.clone(), connection_id);
                self.spawn_pump(session_id, events);
            }
            Err(e) => {
                let _ = self
                    .sessions
                    .set_status(
                        &session_id,
                        &self.user_id,
                        ConnectionStatus::Error.as_str(),
                    )
                    .await;
                self.send(ServerMessage::SshStatus {
                    session_id,
                    status: ConnectionStatus::Error,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    /// Forward one connection's events to the client, translating
    /// connection ids back to the client's session id. The pump dies with
    /// the event channel, which dies with the connection.
    fn spawn_pump(&self, session_id: String, mut events: EventReceiver) {
        let key = session_id.clone();
        let out_tx = self.out_tx.clone();
        let sessions = self.sessions.clone();
        let user_id = self.user_id.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ConnectionEvent::Data(bytes) => {
                        let _ = out_tx.send(ServerMessage::TerminalOutput {
                            session_id: session_id.clone(),
                            data: STANDARD.encode(&bytes),
                        });
                    }
                    ConnectionEvent::Status { status, message } => {
                        if let Err(e) = sessions
                            .set_status(&session_id, &user_id, status.as_str())
                            .await
                        {
                            warn!("Durable status update failed for {}: {}", session_id, e);
                        }
                        let _ = out_tx.send(ServerMessage::SshStatus {
                            session_id: session_id.clone(),
                            status,
                            error: message,
                        });
                    }
                }
            }
            debug!("Event pump ended for session {}", session_id);
        });

        self.pumps.lock().insert(key, handle);
    }

    async fn disconnect(&self, session_id: &str) {
        let Some(connection_id) = self.mapping.lock().remove(session_id) else {
            self.send(ServerMessage::Error {
                message: format!("Unknown session: {}", session_id),
            });
            return;
        };

        info!("Session {} disconnect requested", session_id);
        self.manager.close_connection(&connection_id).await;
        // The pump drains the final `disconnected` event and exits on its
        // own; dropping the handle detaches it.
        self.pumps.lock().remove(session_id);
    }

    /// Persist the exchange and answer the client. Failures become an
    /// `ai:response` with zero confidence; the session stays up.
    async fn finish_ai(
        &self,
        session_id: Option<String>,
        prompt: String,
        result: Result<AssistantReply, crate::assistant::AssistantError>,
    ) {
        match result {
            Ok(reply) => {
                let record = AiQueryRecord {
                    user_id: &self.user_id,
                    session_id: session_id.as_deref(),
                    prompt: &prompt,
                    raw_response: &reply.raw_response,
                    commands: &reply.commands,
                    explanation: &reply.explanation,
                    warnings: &reply.warnings,
                    confidence: reply.confidence,
                };
                if let Err(e) = self.queries.record(record).await {
                    warn!("Assistant query audit write failed: {}", e);
                }
                self.send(ServerMessage::AiResponse {
                    session_id,
                    commands: reply.commands,
                    explanation: reply.explanation,
                    warnings: reply.warnings,
                    confidence: reply.confidence,
                });
            }
            Err(e) => {
                debug!("Assistant call failed: {}", e);
                self.send(ServerMessage::AiResponse {
                    session_id,
                    commands: Vec::new(),
                    explanation: String::new(),
                    warnings: vec![format!("Assistant unavailable: {}", e)],
                    confidence: 0.0,
                });
            }
        }
    }

    /// Tear down every owned session. Called when the client channel
    /// closes; durable records keep whatever status the pool last reported.
    pub async fn shutdown(&self) {
        let owned: Vec<(String, ConnectionId)> = self.mapping.lock().drain().collect();
        if !owned.is_empty() {
            info!(
                "Client channel closed, closing {} session(s) for user {}",
                owned.len(),
                self.user_id
            );
        }
        for (_, connection_id) in owned {
            self.manager.close_connection(&connection_id).await;
        }
        self.pumps.lock().clear();
    }

    /// Surface a protocol-level rejection (malformed or unknown frame).
    pub fn protocol_error(&self, message: impl Into<String>) {
        self.send(ServerMessage::Error {
            message: message.into(),
        });
    }

    fn lookup(&self, session_id: &str) -> Option<ConnectionId> {
        self.mapping.lock().get(session_id).cloned()
    }

    fn send(&self, message: ServerMessage) {
        let _ = self.out_tx.send(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    use crate::config::GatewayConfig;
    use crate::store;

    async fn test_broker() -> (SessionBroker, OutboundReceiver) {
        let pool = store::test_pool().await;
        let user = store::UserStore::new(pool.clone())
            .create("a@b.co", "A", "h")
            .await
            .unwrap();

        let config = GatewayConfig {
            port: 0,
            cors_origin: None,
            jwt_secret: "test-secret".into(),
            encryption_key: "test-secret".into(),
            database_url: String::new(),
            rate_limit_max_requests: 100,
            rate_limit_window_ms: 900_000,
            openai_api_key: None,
            anthropic_api_key: None,
        };

        SessionBroker::new(
            user.id,
            Arc::new(ConnectionManager::new()),
            ProfileStore::new(pool.clone()),
            SessionStore::new(pool.clone()),
            AiQueryStore::new(pool),
            Arc::new(AssistantBridge::from_config(&config)),
            Arc::new(CredentialVault::new("test-secret")),
        )
    }

    #[tokio::test]
    async fn test_input_for_unowned_session_rejected() {
        let (broker, mut out_rx) = test_broker().await;

        broker
            .handle(ClientMessage::TerminalInput {
                session_id: "S1".into(),
                data: "ls\n".into(),
            })
            .await;

        match out_rx.recv().await.unwrap() {
            ServerMessage::Error { message } => assert!(message.contains("Unknown session")),
            other => panic!("expected error frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_unknown_profile_reports_error_status() {
        let (broker, mut out_rx) = test_broker().await;

        broker
            .handle(ClientMessage::SshConnect {
                session_id: "S1".into(),
                profile_id: "missing".into(),
                title: None,
            })
            .await;

        match out_rx.recv().await.unwrap() {
            ServerMessage::SshStatus {
                session_id, status, ..
            } => {
                assert_eq!(session_id, "S1");
                assert_eq!(status, ConnectionStatus::Error);
            }
            other => panic!("expected status frame, got {:?}", other),
        }
        assert!(broker.lookup("S1").is_none());
    }

    #[tokio::test]
    async fn test_pump_translates_connection_events() {
        let (broker, mut out_rx) = test_broker().await;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        broker.spawn_pump("S1".into(), event_rx);

        event_tx
            .send(ConnectionEvent::Status {
                status: ConnectionStatus::Connecting,
                message: None,
            })
            .unwrap();
        event_tx
            .send(ConnectionEvent::Data(Bytes::from_static(b"hi\r\n")))
            .unwrap();
        drop(event_tx);

        match out_rx.recv().await.unwrap() {
            ServerMessage::SshStatus {
                session_id, status, ..
            } => {
                assert_eq!(session_id, "S1");
                assert_eq!(status, ConnectionStatus::Connecting);
            }
            other => panic!("expected status first, got {:?}", other),
        }
        match out_rx.recv().await.unwrap() {
            ServerMessage::TerminalOutput { session_id, data } => {
                assert_eq!(session_id, "S1");
                // Output bytes ride the frame base64-encoded
                assert_eq!(STANDARD.decode(&data).unwrap(), b"hi\r\n");
            }
            other => panic!("expected output, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pump_output_roundtrips_non_utf8_bytes() {
        let (broker, mut out_rx) = test_broker().await;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        broker.spawn_pump("S1".into(), event_rx);

        // Invalid UTF-8 on purpose: a split multi-byte sequence plus raw
        // control bytes, as a pty can emit mid-chunk
        let chunk: &[u8] = &[0x1b, 0x5b, 0xff, 0xfe, 0x00, 0xe2, 0x82];
        event_tx
            .send(ConnectionEvent::Data(Bytes::copy_from_slice(chunk)))
            .unwrap();
        drop(event_tx);

        match out_rx.recv().await.unwrap() {
            ServerMessage::TerminalOutput { data, .. } => {
                assert_eq!(STANDARD.decode(&data).unwrap(), chunk);
            }
            other => panic!("expected output, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_input_rejects_invalid_encoding() {
        let (broker, mut out_rx) = test_broker().await;
        broker.mapping.lock().insert("S1".into(), "conn-1".into());

        broker
            .handle(ClientMessage::TerminalInput {
                session_id: "S1".into(),
                data: "not base64!!!".into(),
            })
            .await;

        match out_rx.recv().await.unwrap() {
            ServerMessage::Error { message } => {
                assert!(message.contains("Invalid terminal data"))
            }
            other => panic!("expected error frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pumps_do_not_cross_sessions() {
        let (broker, mut out_rx) = test_broker().await;

        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        broker.spawn_pump("S1".into(), rx1);
        broker.spawn_pump("S2".into(), rx2);

        tx1.send(ConnectionEvent::Data(Bytes::from_static(b"one")))
            .unwrap();
        tx2.send(ConnectionEvent::Data(Bytes::from_static(b"two")))
            .unwrap();
        drop(tx1);
        drop(tx2);

        let mut seen = Vec::new();
        for _ in 0..2 {
            if let ServerMessage::TerminalOutput { session_id, data } =
                out_rx.recv().await.unwrap()
            {
                seen.push((session_id, data));
            }
        }
        seen.sort();
        assert_eq!(
            seen,
            vec![
                ("S1".to_string(), STANDARD.encode(b"one")),
                ("S2".to_string(), STANDARD.encode(b"two"))
            ]
        );
    }

    #[tokio::test]
    async fn test_ai_without_provider_yields_zero_confidence() {
        let (broker, mut out_rx) = test_broker().await;

        broker
            .handle(ClientMessage::AiTranslate {
                session_id: None,
                prompt: "list files".into(),
                context: None,
            })
            .await;

        match out_rx.recv().await.unwrap() {
            ServerMessage::AiResponse {
                commands,
                confidence,
                warnings,
                ..
            } => {
                assert!(commands.is_empty());
                assert_eq!(confidence, 0.0);
                assert!(!warnings.is_empty());
            }
            other => panic!("expected ai:response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_session_list_empty() {
        let (broker, mut out_rx) = test_broker().await;

        broker.handle(ClientMessage::SessionList).await;

        match out_rx.recv().await.unwrap() {
            ServerMessage::SessionList { sessions } => assert!(sessions.is_empty()),
            other => panic!("expected session:list, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_clears_mapping() {
        let (broker, _out_rx) = test_broker().await;

        broker
            .mapping
            .lock()
            .insert("S1".into(), "conn-1".into());
        broker.shutdown().await;

        assert!(broker.lookup("S1").is_none());
        assert!(broker.pumps.lock().is_empty());
    }
}
