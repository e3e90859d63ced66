//! SSH Connection Manager
//!
//! Process-wide pool of live SSH connections and their pty shells, fully
//! decoupled from the client-facing stream layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ConnectionManager                                          │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │  Connection                                           │  │
//! │  │  ├── target + decrypted credential snapshot           │  │
//! │  │  ├── status: connecting → connected → …               │  │
//! │  │  ├── cmd_tx:   writes to the shell task               │  │
//! │  │  └── event_tx: data/status out to the owning broker   │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!          │ shell task (one per live shell)
//!          ▼
//!   select! { cmd_rx.recv() | channel.wait() }
//! ```
//!
//! # State machine
//!
//! ```text
//! connecting ──dial+shell──▶ connected ──remote close──▶ disconnected ─┐
//!      │                        │                                      │
//!      └──fail──▶ (dropped)     └──transport error──▶ error ───────────┤
//!                                                                      ▼
//!                                              reconnecting ──retry──▶ connected
//!                                                    │
//!                                                    └──fail──▶ error
//! ```
//!
//! Reconnection is a single attempt 5 s after each drop, reusing the
//! retained credential snapshot. A user-initiated close never reconnects.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use russh::ChannelMsg;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::client::{open_shell, AuthCredentials, ConnectTarget, SshClient};
use super::error::SshError;

/// Delay before the single automatic reconnection attempt
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Idle sweeper period
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Connections silent for this long are reaped
const IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Terminal dimension bounds
const MAX_COLS: u16 = 300;
const MAX_ROWS: u16 = 100;

/// Default pty size before the client reports its own
const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;

/// Shell command channel capacity
const SHELL_CHANNEL_CAPACITY: usize = 1024;

pub type ConnectionId = String;
pub type EventReceiver = mpsc::UnboundedReceiver<ConnectionEvent>;

/// Connection status as seen by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }
}

/// Events emitted per connection, in occurrence order, on one channel.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Bytes off the shell. Chunked as the remote produced them.
    Data(Bytes),
    /// Status transition, with an operator-readable message on failures.
    Status {
        status: ConnectionStatus,
        message: Option<String>,
    },
}

/// Commands accepted by a shell task.
#[derive(Debug)]
enum ShellCommand {
    Data(Vec<u8>),
    Resize(u16, u16),
    Close,
}

/// Why a shell task ended.
enum ShellExit {
    UserClosed,
    RemoteClosed,
    TransportError(String),
}

/// One live SSH connection.
pub struct Connection {
    pub id: ConnectionId,
    target: ConnectTarget,
    /// Retained for transparent reconnect; zeroed on drop
    credentials: AuthCredentials,
    status: RwLock<ConnectionStatus>,
    dims: Mutex<(u16, u16)>,
    /// Unix timestamp of the last byte in either direction
    last_activity: AtomicU64,
    /// Set by close_connection; suppresses reconnection
    user_closed: AtomicBool,
    cmd_tx: Mutex<Option<mpsc::Sender<ShellCommand>>>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl Connection {
    fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp() as u64, Ordering::SeqCst);
    }

    fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::SeqCst)
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    /// Transition and emit in one step so the event order matches the
    /// transition order.
    fn set_status(&self, status: ConnectionStatus, message: Option<String>) {
        *self.status.write() = status;
        let _ = self.event_tx.send(ConnectionEvent::Status { status, message });
    }

    fn take_cmd_tx(&self) -> Option<mpsc::Sender<ShellCommand>> {
        self.cmd_tx.lock().take()
    }

    fn clone_cmd_tx(&self) -> Option<mpsc::Sender<ShellCommand>> {
        self.cmd_tx.lock().clone()
    }
}

/// Connection pool statistics for the health endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub total_connections: usize,
    pub connected: usize,
    pub reconnecting: usize,
}

/// The connection pool. One instance per process; brokers share it via
/// `Arc` and never see the map itself.
pub struct ConnectionManager {
    connections: DashMap<ConnectionId, Arc<Connection>>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Dial a new connection and start its shell.
    ///
    /// On success returns the connection id and the event stream, which at
    /// that point already carries the buffered `connecting` and `connected`
    /// transitions. Dial, auth, and shell failures are returned to the
    /// caller directly and leave no record behind.
    pub async fn create_connection(
        self: &Arc<Self>,
        target: ConnectTarget,
        credentials: AuthCredentials,
    ) -> Result<(ConnectionId, EventReceiver), SshError> {
        let connection_id = uuid::Uuid::new_v4().to_string();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        info!(
            "Creating SSH connection {} -> {}@{}:{}",
            connection_id, target.username, target.host, target.port
        );

        let conn = Arc::new(Connection {
            id: connection_id.clone(),
            target,
            credentials,
            status: RwLock::new(ConnectionStatus::Connecting),
            dims: Mutex::new((DEFAULT_COLS, DEFAULT_ROWS)),
            last_activity: AtomicU64::new(Utc::now().timestamp() as u64),
            user_closed: AtomicBool::new(false),
            cmd_tx: Mutex::new(None),
            event_tx,
        });

        self.connections.insert(connection_id.clone(), conn.clone());
        let _ = conn
            .event_tx
            .send(ConnectionEvent::Status {
                status: ConnectionStatus::Connecting,
                message: None,
            });

        match self.start_shell(&conn).await {
            Ok(()) => {
                conn.touch();
                conn.set_status(ConnectionStatus::Connected, None);
                info!("SSH connection {} established", connection_id);
                Ok((connection_id, event_rx))
            }
            Err(e) => {
                self.connections.remove(&connection_id);
                warn!("SSH connection {} failed: {}", connection_id, e);
                Err(e)
            }
        }
    }

    /// Dial + pty + shell, then hand the channel to a fresh shell task.
    /// Used for the initial connect and for reconnection attempts.
    async fn start_shell(self: &Arc<Self>, conn: &Arc<Connection>) -> Result<(), SshError> {
        let (cols, rows) = *conn.dims.lock();

        let client = SshClient::new(conn.target.clone(), conn.credentials.clone());
        let handle = client.connect().await?;
        let channel = open_shell(&handle, cols, rows).await?;

        let (cmd_tx, cmd_rx) = mpsc::channel(SHELL_CHANNEL_CAPACITY);
        *conn.cmd_tx.lock() = Some(cmd_tx);

        let manager = Arc::clone(self);
        let conn = Arc::clone(conn);
        tokio::spawn(async move {
            let exit = shell_task(&conn, handle, channel, cmd_rx).await;
            manager.on_shell_exit(conn, exit).await;
        });

        Ok(())
    }

    /// Write user input to the shell. Byte-exact: no buffering, no
    /// transcoding; ordering is the mpsc order, which is the caller order.
    pub async fn send_input(&self, connection_id: &str, bytes: Vec<u8>) -> Result<(), SshError> {
        let conn = self.get(connection_id)?;

        if conn.status() != ConnectionStatus::Connected {
            return Err(SshError::NotConnected);
        }

        let tx = conn.clone_cmd_tx().ok_or(SshError::NotConnected)?;
        conn.touch();
        tx.send(ShellCommand::Data(bytes))
            .await
            .map_err(|_| SshError::NotConnected)
    }

    /// Update terminal dimensions and window-change the pty.
    ///
    /// Dimensions are clamped to sane bounds and retained even when no
    /// shell is up, so a reconnected shell comes back at the right size.
    pub async fn resize(&self, connection_id: &str, cols: u16, rows: u16) -> Result<(), SshError> {
        let conn = self.get(connection_id)?;

        let cols = cols.clamp(1, MAX_COLS);
        let rows = rows.clamp(1, MAX_ROWS);
        *conn.dims.lock() = (cols, rows);

        if conn.status() == ConnectionStatus::Connected {
            if let Some(tx) = conn.clone_cmd_tx() {
                let _ = tx.send(ShellCommand::Resize(cols, rows)).await;
            }
        }

        Ok(())
    }

    /// Close a connection: end the shell, tear down the transport, emit the
    /// final `disconnected`, drop the record. Idempotent: a second call on
    /// the same id is a no-op.
    pub async fn close_connection(&self, connection_id: &str) {
        let Some((_, conn)) = self.connections.remove(connection_id) else {
            debug!("Close on unknown connection {}, ignoring", connection_id);
            return;
        };

        conn.user_closed.store(true, Ordering::SeqCst);

        if let Some(tx) = conn.take_cmd_tx() {
            let _ = tx.send(ShellCommand::Close).await;
        }

        conn.set_status(ConnectionStatus::Disconnected, None);
        info!("Connection {} closed", connection_id);
    }

    pub fn status(&self, connection_id: &str) -> Option<ConnectionStatus> {
        self.connections.get(connection_id).map(|e| e.value().status())
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn stats(&self) -> PoolStats {
        let mut connected = 0;
        let mut reconnecting = 0;
        for entry in self.connections.iter() {
            match entry.value().status() {
                ConnectionStatus::Connected => connected += 1,
                ConnectionStatus::Reconnecting => reconnecting += 1,
                _ => {}
            }
        }
        PoolStats {
            total_connections: self.connections.len(),
            connected,
            reconnecting,
        }
    }

    fn get(&self, connection_id: &str) -> Result<Arc<Connection>, SshError> {
        self.connections
            .get(connection_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| SshError::ConnectionNotFound(connection_id.to_string()))
    }

    /// Shell ended on its own: surface the transition and schedule the
    /// single reconnection attempt.
    async fn on_shell_exit(self: Arc<Self>, conn: Arc<Connection>, exit: ShellExit) {
        *conn.cmd_tx.lock() = None;

        if conn.user_closed.load(Ordering::SeqCst) || !self.connections.contains_key(&conn.id) {
            // close_connection (or the reaper) already owns this teardown
            return;
        }

        match exit {
            ShellExit::UserClosed => return,
            ShellExit::RemoteClosed => {
                info!("Connection {} closed by remote", conn.id);
                conn.set_status(ConnectionStatus::Disconnected, None);
            }
            ShellExit::TransportError(msg) => {
                warn!("Connection {} transport error: {}", conn.id, msg);
                conn.set_status(ConnectionStatus::Error, Some(msg));
            }
        }

        self.schedule_reconnect(conn);
    }

    /// One attempt per drop event, after a fixed delay. Failure parks the
    /// connection in `error`; no retry ladder.
    fn schedule_reconnect(self: Arc<Self>, conn: Arc<Connection>) {
        tokio::spawn(async move {
            conn.set_status(ConnectionStatus::Reconnecting, None);
            tokio::time::sleep(RECONNECT_DELAY).await;

            if conn.user_closed.load(Ordering::SeqCst) || !self.connections.contains_key(&conn.id)
            {
                debug!("Connection {} gone before reconnect attempt", conn.id);
                return;
            }

            info!("Connection {} attempting reconnect", conn.id);
            match self.start_shell(&conn).await {
                Ok(()) => {
                    conn.touch();
                    conn.set_status(ConnectionStatus::Connected, None);
                    info!("Connection {} reconnected", conn.id);
                }
                Err(e) => {
                    warn!("Connection {} reconnect failed: {}", conn.id, e);
                    conn.set_status(ConnectionStatus::Error, Some(e.to_string()));
                }
            }
        });
    }

    /// Background sweeper: closes connections whose last activity is older
    /// than the idle window. SSH-level keepalive covers liveness of healthy
    /// idle links; this covers abandonment.
    pub fn spawn_idle_reaper(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;

                let now = Utc::now().timestamp() as u64;
                let stale: Vec<ConnectionId> = manager
                    .connections
                    .iter()
                    .filter(|e| {
                        now.saturating_sub(e.value().last_activity()) >= IDLE_TIMEOUT.as_secs()
                    })
                    .map(|e| e.key().clone())
                    .collect();

                for id in stale {
                    info!("Connection {} idle timeout expired, closing", id);
                    manager.close_connection(&id).await;
                }
            }
        });
    }
}

/// Owns the russh channel and session handle for one shell's lifetime.
/// All writes arrive through `cmd_rx`, which serializes them; all reads go
/// out through the connection's event channel.
async fn shell_task(
    conn: &Arc<Connection>,
    handle: russh::client::Handle<super::client::GatewayHandler>,
    mut channel: russh::Channel<russh::client::Msg>,
    mut cmd_rx: mpsc::Receiver<ShellCommand>,
) -> ShellExit {
    debug!("Shell task started for connection {}", conn.id);

    let exit = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ShellCommand::Data(data)) => {
                        if let Err(e) = channel.data(&data[..]).await {
                            break ShellExit::TransportError(format!("write failed: {}", e));
                        }
                    }
                    Some(ShellCommand::Resize(cols, rows)) => {
                        if let Err(e) = channel.window_change(cols as u32, rows as u32, 0, 0).await {
                            warn!("Failed to resize pty on {}: {}", conn.id, e);
                        } else {
                            debug!("Connection {} pty resized to {}x{}", conn.id, cols, rows);
                        }
                    }
                    Some(ShellCommand::Close) | None => {
                        let _ = channel.eof().await;
                        break ShellExit::UserClosed;
                    }
                }
            }

            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { data }) => {
                        conn.touch();
                        let _ = conn.event_tx.send(ConnectionEvent::Data(Bytes::copy_from_slice(&data)));
                    }
                    Some(ChannelMsg::ExtendedData { data, ext }) => {
                        // ext == 1 is stderr
                        if ext == 1 {
                            conn.touch();
                            let _ = conn.event_tx.send(ConnectionEvent::Data(Bytes::copy_from_slice(&data)));
                        }
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) => {
                        break ShellExit::RemoteClosed;
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        info!("Connection {} shell exit status {}", conn.id, exit_status);
                    }
                    Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                        info!("Connection {} shell exit signal {:?}", conn.id, signal_name);
                    }
                    Some(_) => {
                        debug!("Unhandled channel message on {}", conn.id);
                    }
                    None => {
                        break ShellExit::RemoteClosed;
                    }
                }
            }
        }
    };

    let _ = handle
        .disconnect(russh::Disconnect::ByApplication, "", "en")
        .await;

    debug!("Shell task terminated for connection {}", conn.id);
    exit
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a connection entry directly, bypassing the dial path.
    fn stub_connection(
        manager: &ConnectionManager,
        status: ConnectionStatus,
    ) -> (ConnectionId, EventReceiver) {
        let id = uuid::Uuid::new_v4().to_string();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection {
            id: id.clone(),
            target: ConnectTarget {
                host: "10.0.0.1".into(),
                port: 22,
                username: "u".into(),
            },
            credentials: AuthCredentials::Password {
                password: "p".into(),
            },
            status: RwLock::new(status),
            dims: Mutex::new((DEFAULT_COLS, DEFAULT_ROWS)),
            last_activity: AtomicU64::new(Utc::now().timestamp() as u64),
            user_closed: AtomicBool::new(false),
            cmd_tx: Mutex::new(None),
            event_tx,
        });
        manager.connections.insert(id.clone(), conn);
        (id, event_rx)
    }

    #[tokio::test]
    async fn test_close_emits_disconnected_exactly_once() {
        let manager = ConnectionManager::new();
        let (id, mut events) = stub_connection(&manager, ConnectionStatus::Connected);

        manager.close_connection(&id).await;
        assert!(!manager.contains(&id));

        // Second close is a no-op
        manager.close_connection(&id).await;

        let mut disconnects = 0;
        while let Ok(event) = events.try_recv() {
            if let ConnectionEvent::Status { status, .. } = event {
                if status == ConnectionStatus::Disconnected {
                    disconnects += 1;
                }
            }
        }
        assert_eq!(disconnects, 1);
    }

    #[tokio::test]
    async fn test_send_input_requires_connected() {
        let manager = ConnectionManager::new();

        // Unknown id
        assert!(matches!(
            manager.send_input("missing", b"ls\n".to_vec()).await,
            Err(SshError::ConnectionNotFound(_))
        ));

        // Known but not connected
        let (id, _events) = stub_connection(&manager, ConnectionStatus::Reconnecting);
        assert!(matches!(
            manager.send_input(&id, b"ls\n".to_vec()).await,
            Err(SshError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_resize_clamps_and_persists() {
        let manager = ConnectionManager::new();
        let (id, _events) = stub_connection(&manager, ConnectionStatus::Reconnecting);

        manager.resize(&id, 1000, 500).await.unwrap();
        let conn = manager.get(&id).unwrap();
        assert_eq!(*conn.dims.lock(), (MAX_COLS, MAX_ROWS));

        manager.resize(&id, 0, 0).await.unwrap();
        assert_eq!(*conn.dims.lock(), (1, 1));
    }

    #[tokio::test]
    async fn test_status_serializes_lowercase() {
        let rendered = serde_json::to_string(&ConnectionStatus::Reconnecting).unwrap();
        assert_eq!(rendered, "\"reconnecting\"");
        assert_eq!(ConnectionStatus::Connected.as_str(), "connected");
    }

    #[tokio::test]
    async fn test_stats_counts_by_status() {
        let manager = ConnectionManager::new();
        stub_connection(&manager, ConnectionStatus::Connected);
        stub_connection(&manager, ConnectionStatus::Connected);
        stub_connection(&manager, ConnectionStatus::Reconnecting);

        let stats = manager.stats();
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.connected, 2);
        assert_eq!(stats.reconnecting, 1);
    }
}
