use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::network::Connection;
use crate::AppResult;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-wide unique connection id. Ids are monotonically
/// increasing and never reused, so a stale id can only miss in the
/// registry, never hit a different peer.
pub(crate) fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Write side of a stream socket, shared with every caller that wants to
/// send to the peer. The read side lives in the paired `Connection`.
///
/// Liveness is tracked by a cancellation token that the owning read loop
/// cancels the moment the socket is observed closed, so `is_open` reflects
/// the socket state without touching the socket.
#[derive(Debug)]
pub struct RemoteConnection {
    id: u64,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    writer: Mutex<BufWriter<OwnedWriteHalf>>,
    closed: CancellationToken,
}

impl RemoteConnection {
    /// Builds the shared write handle and the read-side `Connection` from an
    /// established stream. This is the only way to obtain a
    /// `RemoteConnection`.
    pub fn from_stream(
        id: u64,
        stream: TcpStream,
        max_frame_size: usize,
    ) -> AppResult<(std::sync::Arc<RemoteConnection>, Connection)> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        let (read_half, write_half) = stream.into_split();
        let remote = std::sync::Arc::new(RemoteConnection {
            id,
            peer_addr,
            local_addr,
            writer: Mutex::new(BufWriter::new(write_half)),
            closed: CancellationToken::new(),
        });
        let connection = Connection::new(read_half, max_frame_size);
        Ok((remote, connection))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_open(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Token cancelled exactly once when the connection ends, either by the
    /// read loop observing the socket close or by an explicit `close`.
    pub(crate) fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Writes one line to the peer and flushes. A send racing the close of
    /// this connection surfaces the write error, it never panics.
    pub async fn send(&self, text: &str) -> AppResult<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(text.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    /// Closes the connection. Idempotent; shutdown errors after the first
    /// close are ignored.
    pub async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}
