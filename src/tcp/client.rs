use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::network::{next_connection_id, Connection, RemoteConnection};
use crate::utils::run_callback;
use crate::AppError;
use crate::AppResult;
use crate::TcpConfig;

type EventCallback = Arc<dyn Fn() + Send + Sync>;
type MessageCallback = Arc<dyn Fn(String) + Send + Sync>;

enum ClientEvent {
    Connected,
    ConnectFailed,
    Message(String),
    Disconnected,
}

// read loop for the single outbound connection
struct ClientHandler {
    connection: Connection,
    remote: Arc<RemoteConnection>,
    stopping: Arc<AtomicBool>,
    event_tx: mpsc::Sender<ClientEvent>,
}

impl ClientHandler {
    async fn run(&mut self) -> AppResult<()> {
        let close_token = self.remote.closed_token();
        loop {
            let maybe_frame = tokio::select! {
                res = self.connection.read_frame() => res?,
                _ = close_token.cancelled() => {
                    debug!("client read loop exit on close");
                    return Ok(());
                }
            };

            let frame = match maybe_frame {
                Some(frame) => frame,
                // server closed the connection gracefully
                None => break,
            };

            self.event_tx
                .send(ClientEvent::Message(frame.text))
                .await
                .map_err(|e| AppError::ChannelSendError(e.to_string()))?;
        }
        debug!("client read loop exit");

        Ok(())
    }

    /// Runs after the read loop ends. An explicit `stop` suppresses the
    /// disconnect event; a server-side close reports it.
    async fn finish(&self) {
        self.remote.close().await;
        if !self.stopping.load(Ordering::SeqCst) {
            if let Err(e) = self.event_tx.send(ClientEvent::Disconnected).await {
                debug!("disconnect event dropped: {}", e);
            }
        }
    }
}

/// Line-framed TCP client holding one outbound connection.
///
/// The single-connection mirror of `TcpServer`: one read-loop task feeds an
/// event channel drained by one dispatcher task. A failed connect is reported
/// through the connect-failed callback, not through `start`'s return value,
/// and the connect callback never fires for that attempt.
pub struct TcpClient {
    host: String,
    port: u16,
    max_frame_size: usize,
    event_channel_size: usize,
    stopping: Arc<AtomicBool>,
    on_connect: Option<EventCallback>,
    on_connect_failed: Option<EventCallback>,
    on_message: Option<MessageCallback>,
    on_disconnect: Option<EventCallback>,
    state: Mutex<Option<RunningState>>,
}

struct RunningState {
    remote: Arc<RemoteConnection>,
    read_handle: JoinHandle<()>,
}

impl TcpClient {
    pub fn new(host: &str, port: u16) -> TcpClient {
        let defaults = TcpConfig::default();
        TcpClient {
            host: host.to_string(),
            port,
            max_frame_size: defaults.max_frame_size,
            event_channel_size: defaults.event_channel_size,
            stopping: Arc::new(AtomicBool::new(false)),
            on_connect: None,
            on_connect_failed: None,
            on_message: None,
            on_disconnect: None,
            state: Mutex::new(None),
        }
    }

    pub fn on_connect<F>(&mut self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(callback));
    }

    pub fn on_connect_failed<F>(&mut self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_connect_failed = Some(Arc::new(callback));
    }

    pub fn on_message<F>(&mut self, callback: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(callback));
    }

    pub fn on_disconnect<F>(&mut self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(callback));
    }

    /// Connects and spawns the read loop. A connect failure still returns
    /// `Ok`: the partially-open socket is dropped, the connect-failed event
    /// is queued and the client stays stopped, so `start` may be retried.
    pub async fn start(&self) -> AppResult<()> {
        if self.state.lock().is_some() {
            return Err(AppError::AlreadyStarted);
        }
        self.stopping.store(false, Ordering::SeqCst);

        let (event_tx, event_rx) = mpsc::channel(self.event_channel_size.max(1));
        start_event_dispatcher(
            event_rx,
            self.on_connect.clone(),
            self.on_connect_failed.clone(),
            self.on_message.clone(),
            self.on_disconnect.clone(),
        );

        let socket = match self.connect().await {
            Ok(socket) => socket,
            Err(err) => {
                error!("{}", err);
                let _ = event_tx.send(ClientEvent::ConnectFailed).await;
                return Ok(());
            }
        };

        let connection_id = next_connection_id();
        let (remote, connection) =
            RemoteConnection::from_stream(connection_id, socket, self.max_frame_size)?;
        info!(
            "tcp client connected to {} as connection {}",
            remote.peer_addr(),
            connection_id
        );
        // Connected sits in the queue before the read loop can queue the
        // first Message
        if let Err(e) = event_tx.send(ClientEvent::Connected).await {
            debug!("connected event dropped: {}", e);
        }

        let mut handler = ClientHandler {
            connection,
            remote: remote.clone(),
            stopping: self.stopping.clone(),
            event_tx,
        };
        let read_handle = tokio::spawn(async move {
            if let Err(err) = handler.run().await {
                error!("client connection error: {:?}", err);
            }
            handler.finish().await;
        });

        let mut state = self.state.lock();
        if state.is_some() {
            // lost a racing start; close the fresh connection
            remote.closed_token().cancel();
            return Err(AppError::AlreadyStarted);
        }
        *state = Some(RunningState {
            remote,
            read_handle,
        });
        Ok(())
    }

    async fn connect(&self) -> AppResult<TcpStream> {
        TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| AppError::ConnectFailed(format!("{}:{}: {}", self.host, self.port, e)))
    }

    /// Writes one line-terminated frame to the server. Calling this before a
    /// successful connect is an error, never a panic.
    pub async fn send(&self, text: &str) -> AppResult<()> {
        let remote = self
            .state
            .lock()
            .as_ref()
            .map(|running| running.remote.clone());
        match remote {
            Some(remote) => remote.send(text).await,
            None => Err(AppError::IllegalState(
                "send before a successful connect".to_string(),
            )),
        }
    }

    /// Closes the connection and waits for the read loop to exit. No
    /// disconnect event fires for a stop-initiated close. A later `start`
    /// is legal.
    pub async fn stop(&self) {
        let running = match self.state.lock().take() {
            Some(running) => running,
            None => return,
        };
        self.stopping.store(true, Ordering::SeqCst);
        running.remote.close().await;
        if let Err(err) = running.read_handle.await {
            error!("client read task join error: {:?}", err);
        }
        info!("tcp client stopped");
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.state
            .lock()
            .as_ref()
            .map(|running| running.remote.is_open())
            .unwrap_or(false)
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        debug!("tcp client dropped");
    }
}

fn start_event_dispatcher(
    mut event_rx: mpsc::Receiver<ClientEvent>,
    on_connect: Option<EventCallback>,
    on_connect_failed: Option<EventCallback>,
    on_message: Option<MessageCallback>,
    on_disconnect: Option<EventCallback>,
) {
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                ClientEvent::Connected => {
                    if let Some(callback) = &on_connect {
                        let callback = callback.clone();
                        run_callback("connect", move || callback());
                    }
                }
                ClientEvent::ConnectFailed => {
                    if let Some(callback) = &on_connect_failed {
                        let callback = callback.clone();
                        run_callback("connect failed", move || callback());
                    }
                }
                ClientEvent::Message(text) => {
                    if let Some(callback) = &on_message {
                        let callback = callback.clone();
                        run_callback("message", move || callback(text));
                    }
                }
                ClientEvent::Disconnected => {
                    if let Some(callback) = &on_disconnect {
                        let callback = callback.clone();
                        run_callback("disconnect", move || callback());
                    }
                }
            }
        }
        debug!("client event dispatcher exited");
    });
}
