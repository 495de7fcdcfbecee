use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::utils::run_callback;
use crate::AppError;
use crate::AppResult;
use crate::UdpConfig;

type DatagramCallback = Arc<dyn Fn(SocketAddr, &[u8], &str) + Send + Sync>;

/// Connectionless UDP endpoint: one bound socket with a self-perpetuating
/// receive loop, and fire-and-forget sends over a fresh ephemeral socket
/// per call.
///
/// Every received datagram invokes the message callback with the sender
/// address, the raw bytes and a lossily decoded text form. The next receive
/// is armed no matter what the callback does; a panicking callback is logged
/// and delivery of subsequent datagrams continues.
pub struct UdpEndpoint {
    config: UdpConfig,
    on_message: Option<DatagramCallback>,
    state: Mutex<Option<RunningState>>,
}

#[derive(Debug)]
struct RunningState {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    recv_handle: JoinHandle<()>,
}

impl UdpEndpoint {
    pub fn new(config: UdpConfig) -> UdpEndpoint {
        UdpEndpoint {
            config,
            on_message: None,
            state: Mutex::new(None),
        }
    }

    pub fn on_message<F>(&mut self, callback: F)
    where
        F: Fn(SocketAddr, &[u8], &str) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(callback));
    }

    /// Binds the socket and spawns the receive loop. Port 0 is allowed;
    /// `local_addr` exposes the bound address.
    pub async fn start(&self) -> AppResult<()> {
        if self.state.lock().is_some() {
            return Err(AppError::AlreadyStarted);
        }
        let socket =
            UdpSocket::bind(format!("{}:{}", self.config.ip, self.config.port)).await?;
        let local_addr = socket.local_addr()?;

        let cancel = CancellationToken::new();
        let recv_handle = spawn_receive_loop(
            Arc::new(socket),
            self.config.recv_buffer_size,
            self.on_message.clone(),
            cancel.clone(),
        );

        let mut state = self.state.lock();
        if state.is_some() {
            // lost a racing start; tear the fresh receive loop down
            cancel.cancel();
            return Err(AppError::AlreadyStarted);
        }
        *state = Some(RunningState {
            local_addr,
            cancel,
            recv_handle,
        });
        info!("udp endpoint listening on {}", local_addr);
        Ok(())
    }

    /// Sends one datagram over a fresh ephemeral socket with broadcast
    /// enabled. `dest` defaults to the broadcast address and `port` to this
    /// endpoint's bound (or configured) port.
    pub async fn send(
        &self,
        payload: &[u8],
        port: Option<u16>,
        dest: Option<IpAddr>,
    ) -> AppResult<()> {
        let target = self.resolve_target(port, dest);
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_broadcast(true)?;
        socket.send_to(payload, target).await?;
        Ok(())
    }

    fn resolve_target(&self, port: Option<u16>, dest: Option<IpAddr>) -> SocketAddr {
        let ip = dest.unwrap_or(IpAddr::V4(Ipv4Addr::BROADCAST));
        let port = port.unwrap_or_else(|| self.bound_port());
        SocketAddr::new(ip, port)
    }

    fn bound_port(&self) -> u16 {
        self.state
            .lock()
            .as_ref()
            .map(|running| running.local_addr.port())
            .unwrap_or(self.config.port)
    }

    /// Cancels the receive loop and drops the socket; the pending receive
    /// terminates and no further receive is armed.
    pub async fn stop(&self) {
        let running = match self.state.lock().take() {
            Some(running) => running,
            None => return,
        };
        running.cancel.cancel();
        if let Err(err) = running.recv_handle.await {
            error!("udp receive task join error: {:?}", err);
        }
        info!("udp endpoint stopped on {}", running.local_addr);
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().as_ref().map(|running| running.local_addr)
    }
}

impl Drop for UdpEndpoint {
    fn drop(&mut self) {
        debug!("udp endpoint dropped");
    }
}

fn spawn_receive_loop(
    socket: Arc<UdpSocket>,
    recv_buffer_size: usize,
    on_message: Option<DatagramCallback>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer = vec![0u8; recv_buffer_size.max(1)];
        loop {
            let received = tokio::select! {
                received = socket.recv_from(&mut buffer) => received,
                _ = cancel.cancelled() => break,
            };
            match received {
                Ok((len, peer)) => {
                    if let Some(callback) = &on_message {
                        let payload = &buffer[..len];
                        let text = String::from_utf8_lossy(payload);
                        run_callback("message", || callback(peer, payload, &text));
                    }
                }
                Err(err) => {
                    // transient receive errors must not stop delivery of
                    // subsequent datagrams
                    error!("udp receive error: {}", err);
                }
            }
        }
        debug!("udp receive loop exited");
    })
}
