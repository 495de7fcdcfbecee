use std::io::{self, ErrorKind};

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;

use crate::network::LineFrame;
use crate::AppResult;

/// Read side of a stream socket.
///
/// This struct encapsulates the read half of a TCP stream and a buffer for
/// accumulating bytes until a complete line can be parsed. The write half
/// lives in the paired `RemoteConnection` so reads and writes never contend.
#[derive(Debug)]
pub struct Connection {
    reader: OwnedReadHalf,
    buffer: BytesMut,
    max_frame_size: usize,
}

impl Connection {
    pub fn new(reader: OwnedReadHalf, max_frame_size: usize) -> Connection {
        Connection {
            reader,
            buffer: BytesMut::with_capacity(4 * 1024),
            max_frame_size,
        }
    }

    /// Reads one complete line from the stream.
    ///
    /// This method continuously reads data from the stream into the buffer
    /// until a full line can be parsed. An oversized line is an error and the
    /// connection should be closed.
    ///
    /// If the peer closes the connection while a line is partially sent, an
    /// error is returned. If the peer closes the connection cleanly between
    /// lines, `None` is returned.
    pub async fn read_frame(&mut self) -> AppResult<Option<LineFrame>> {
        loop {
            if let Some(frame) = LineFrame::parse(&mut self.buffer, self.max_frame_size)? {
                return Ok(Some(frame));
            }
            if 0 == self.reader.read_buf(&mut self.buffer).await? {
                return if self.buffer.is_empty() {
                    // peer closed the connection cleanly
                    Ok(None)
                } else {
                    // peer closed mid-line
                    Err(
                        io::Error::new(ErrorKind::ConnectionReset, "connection reset by peer")
                            .into(),
                    )
                };
            }
        }
    }
}
