use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::{debug, error, info};

use crate::network::{next_connection_id, Connection, ConnectionRegistry, RemoteConnection};
use crate::service::Shutdown;
use crate::utils::run_callback;
use crate::AppError;
use crate::AppResult;
use crate::TcpConfig;

type ConnectionCallback = Arc<dyn Fn(Arc<RemoteConnection>) + Send + Sync>;
type MessageCallback = Arc<dyn Fn(Arc<RemoteConnection>, String) + Send + Sync>;

/// Completed read-side events, queued by the accept loop and the read loops
/// and drained by the single event dispatcher task.
enum ServerEvent {
    Connected(Arc<RemoteConnection>),
    Message(Arc<RemoteConnection>, String),
    Disconnected(Arc<RemoteConnection>),
}

// handler for each accepted connection
struct ConnectionHandler {
    notify_shutdown: broadcast::Sender<()>,
    connection_id: u64,
    connection: Connection,
    remote: Arc<RemoteConnection>,
    registry: Arc<ConnectionRegistry>,
    stopping: Arc<AtomicBool>,
    event_tx: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandler {
    /// Reads frames until the peer disconnects, the connection is closed
    /// locally, or the server stops. Each complete frame is queued as a
    /// `Message` event; queueing keeps per-connection FIFO order because this
    /// loop is the only producer of this connection's messages.
    async fn handle_connection(&mut self) -> AppResult<()> {
        let mut shutdown = Shutdown::new(self.notify_shutdown.subscribe());
        let close_token = self.remote.closed_token();
        loop {
            // read one frame from the peer; a clean close between frames
            // yields None, a close mid-frame yields Err
            let maybe_frame = tokio::select! {
                res = self.connection.read_frame() => res?,
                _ = shutdown.recv() => {
                    debug!("connection {} read loop exit on server stop", self.connection_id);
                    return Ok(());
                }
                _ = close_token.cancelled() => {
                    debug!("connection {} read loop exit on close", self.connection_id);
                    return Ok(());
                }
            };

            let frame = match maybe_frame {
                Some(frame) => frame,
                // peer closed the connection gracefully
                None => break,
            };

            self.event_tx
                .send(ServerEvent::Message(self.remote.clone(), frame.text))
                .await
                .map_err(|e| AppError::ChannelSendError(e.to_string()))?;
        }
        debug!("connection {} handler exit read loop", self.connection_id);

        Ok(())
    }

    /// Runs once the read loop has ended, whatever the reason. During an
    /// explicit server stop the registry is drained centrally and disconnect
    /// events are suppressed, so this only reports organic disconnects.
    async fn finish(&self) {
        self.remote.close().await;
        if !self.stopping.load(Ordering::SeqCst) {
            self.registry.remove(self.connection_id);
            if let Err(e) = self
                .event_tx
                .send(ServerEvent::Disconnected(self.remote.clone()))
                .await
            {
                debug!("disconnect event dropped: {}", e);
            }
        }
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        debug!("connection handler dropped");
    }
}

/// Line-framed TCP server.
///
/// Each accepted connection gets its own read-loop task; completed events
/// flow through one bounded channel to a single dispatcher task, which
/// invokes the registered callbacks. Per connection, the connect callback
/// fires before any message callback and the disconnect callback fires after
/// the last one, at most once. Across connections no order is guaranteed.
///
/// Callbacks are registered before `start` and snapshotted by it; later
/// registration has no effect on a running server.
pub struct TcpServer {
    config: TcpConfig,
    registry: Arc<ConnectionRegistry>,
    stopping: Arc<AtomicBool>,
    on_connect: Option<ConnectionCallback>,
    on_message: Option<MessageCallback>,
    on_disconnect: Option<ConnectionCallback>,
    state: Mutex<Option<RunningState>>,
}

#[derive(Debug)]
struct RunningState {
    local_addr: SocketAddr,
    notify_shutdown: broadcast::Sender<()>,
    accept_handle: JoinHandle<()>,
}

impl TcpServer {
    pub fn new(config: TcpConfig) -> TcpServer {
        TcpServer {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            stopping: Arc::new(AtomicBool::new(false)),
            on_connect: None,
            on_message: None,
            on_disconnect: None,
            state: Mutex::new(None),
        }
    }

    pub fn on_connect<F>(&mut self, callback: F)
    where
        F: Fn(Arc<RemoteConnection>) + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(callback));
    }

    pub fn on_message<F>(&mut self, callback: F)
    where
        F: Fn(Arc<RemoteConnection>, String) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(callback));
    }

    pub fn on_disconnect<F>(&mut self, callback: F)
    where
        F: Fn(Arc<RemoteConnection>) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(callback));
    }

    /// Binds the listener and spawns the dispatcher and accept tasks, then
    /// returns. Port 0 is allowed; `local_addr` exposes the bound address.
    pub async fn start(&self) -> AppResult<()> {
        if self.state.lock().is_some() {
            return Err(AppError::AlreadyStarted);
        }
        let listener =
            TcpListener::bind(format!("{}:{}", self.config.ip, self.config.port)).await?;
        let local_addr = listener.local_addr()?;
        self.stopping.store(false, Ordering::SeqCst);

        let (event_tx, event_rx) = mpsc::channel(self.config.event_channel_size.max(1));
        start_event_dispatcher(
            event_rx,
            self.on_connect.clone(),
            self.on_message.clone(),
            self.on_disconnect.clone(),
        );

        let (notify_shutdown, _) = broadcast::channel(1);
        let accept_handle = self.spawn_accept_loop(listener, event_tx, notify_shutdown.clone());

        let mut state = self.state.lock();
        if state.is_some() {
            // lost a racing start; dismantle what was just spawned
            let _ = notify_shutdown.send(());
            return Err(AppError::AlreadyStarted);
        }
        *state = Some(RunningState {
            local_addr,
            notify_shutdown,
            accept_handle,
        });
        info!("tcp server listening on {}", local_addr);
        Ok(())
    }

    fn spawn_accept_loop(
        &self,
        listener: TcpListener,
        event_tx: mpsc::Sender<ServerEvent>,
        notify_shutdown: broadcast::Sender<()>,
    ) -> JoinHandle<()> {
        let mut shutdown = Shutdown::new(notify_shutdown.subscribe());
        let registry = self.registry.clone();
        let stopping = self.stopping.clone();
        let limit_connections = Arc::new(Semaphore::new(self.config.max_connections));
        let max_frame_size = self.config.max_frame_size;

        tokio::spawn(async move {
            loop {
                let permit = tokio::select! {
                    permit = limit_connections.clone().acquire_owned() => permit.unwrap(),
                    _ = shutdown.recv() => break,
                };
                let socket = tokio::select! {
                    socket = accept_socket(&listener) => socket,
                    _ = shutdown.recv() => break,
                };

                let connection_id = next_connection_id();
                let (remote, connection) =
                    match RemoteConnection::from_stream(connection_id, socket, max_frame_size) {
                        Ok(pair) => pair,
                        Err(err) => {
                            error!("failed to set up accepted connection: {:?}", err);
                            continue;
                        }
                    };
                debug!(
                    "accepted connection {} from {}",
                    connection_id,
                    remote.peer_addr()
                );

                // register, then queue Connected, then spawn the read loop.
                // The connect callback always observes the connection in the
                // registry, and Connected sits in the queue before the read
                // loop can queue this connection's first Message.
                registry.insert(remote.clone());
                if event_tx
                    .send(ServerEvent::Connected(remote.clone()))
                    .await
                    .is_err()
                {
                    error!("event channel closed, stopping accept loop");
                    break;
                }

                let mut handler = ConnectionHandler {
                    notify_shutdown: notify_shutdown.clone(),
                    connection_id,
                    connection,
                    remote,
                    registry: registry.clone(),
                    stopping: stopping.clone(),
                    event_tx: event_tx.clone(),
                };
                tokio::spawn(async move {
                    if let Err(err) = handler.handle_connection().await {
                        error!("connection {} error: {:?}", handler.connection_id, err);
                    }
                    handler.finish().await;
                    // whether gracefully or unexpectedly closed, release the
                    // connection permit
                    drop(permit);
                });
            }
            debug!("accept loop exited");
        })
    }

    /// Writes one line-terminated frame to the identified connection.
    pub async fn send(&self, connection_id: u64, text: &str) -> AppResult<()> {
        let connection = self
            .registry
            .get(connection_id)
            .ok_or(AppError::ConnectionNotFound(connection_id))?;
        connection.send(text).await
    }

    // Graceful stop sequence:
    // 1. The stopping flag is set, so read loops that exit from here on stay
    //    silent instead of reporting a burst of disconnects.
    // 2. The broadcast wakes the accept loop and every blocked read loop.
    // 3. The accept task is awaited, so the listening socket is closed before
    //    this method returns.
    // 4. Every tracked connection is closed and the registry is drained.
    // 5. Read loops and the dispatcher drain on their own; no task is ever
    //    force-killed.
    pub async fn stop(&self) {
        let running = match self.state.lock().take() {
            Some(running) => running,
            None => return,
        };
        self.stopping.store(true, Ordering::SeqCst);
        let _ = running.notify_shutdown.send(());
        if let Err(err) = running.accept_handle.await {
            error!("accept task join error: {:?}", err);
        }
        self.registry.close_all().await;
        info!("tcp server stopped on {}", running.local_addr);
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().is_some()
    }

    /// Bound address of the running listener, useful when started on port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().as_ref().map(|running| running.local_addr)
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn connection_ids(&self) -> Vec<u64> {
        self.registry.ids()
    }

    pub fn find_connection(&self, connection_id: u64) -> Option<Arc<RemoteConnection>> {
        self.registry.get(connection_id)
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        debug!("tcp server dropped");
    }
}

/// Accepts the next connection, retrying failures with capped exponential
/// backoff. Accept errors never terminate the loop.
async fn accept_socket(listener: &TcpListener) -> TcpStream {
    let mut backoff = 1;

    loop {
        match listener.accept().await {
            Ok((socket, _)) => return socket,
            Err(err) => {
                error!("accept error: {}, retrying in {}s", err, backoff);
                time::sleep(Duration::from_secs(backoff)).await;
                if backoff < 64 {
                    backoff *= 2;
                }
            }
        }
    }
}

fn start_event_dispatcher(
    mut event_rx: mpsc::Receiver<ServerEvent>,
    on_connect: Option<ConnectionCallback>,
    on_message: Option<MessageCallback>,
    on_disconnect: Option<ConnectionCallback>,
) {
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                ServerEvent::Connected(remote) => {
                    if let Some(callback) = &on_connect {
                        let callback = callback.clone();
                        run_callback("connect", move || callback(remote));
                    }
                }
                ServerEvent::Message(remote, text) => {
                    if let Some(callback) = &on_message {
                        let callback = callback.clone();
                        run_callback("message", move || callback(remote, text));
                    }
                }
                ServerEvent::Disconnected(remote) => {
                    if let Some(callback) = &on_disconnect {
                        let callback = callback.clone();
                        run_callback("disconnect", move || callback(remote));
                    }
                }
            }
        }
        debug!("event dispatcher exited");
    });
}
