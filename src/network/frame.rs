use bytes::BytesMut;

use crate::AppError::Incomplete;
use crate::{AppError, AppResult};

/// One newline-terminated text line, the message unit of the stream
/// transports. A trailing `\r` before the terminator is stripped, and
/// payloads are decoded lossily so a stray non-UTF-8 byte never kills
/// the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFrame {
    pub text: String,
}

impl LineFrame {
    /// Returns the byte length of the first complete line in `buffer`,
    /// excluding the terminator, or `Incomplete` if no terminator has
    /// arrived yet.
    pub fn check(buffer: &BytesMut, max_size: usize) -> AppResult<usize> {
        match buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if pos > max_size {
                    return Err(AppError::FrameTooLarge(pos));
                }
                Ok(pos)
            }
            None => {
                // no terminator yet; refuse to buffer past the limit
                if buffer.len() > max_size {
                    return Err(AppError::FrameTooLarge(buffer.len()));
                }
                Err(Incomplete)
            }
        }
    }

    pub(crate) fn parse(buffer: &mut BytesMut, max_size: usize) -> AppResult<Option<LineFrame>> {
        match LineFrame::check(buffer, max_size) {
            Ok(pos) => {
                let mut line = buffer.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(pos - 1);
                }
                let text = String::from_utf8_lossy(&line).into_owned();
                Ok(Some(LineFrame { text }))
            }
            Err(AppError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
