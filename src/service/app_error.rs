// Copyright 2025 the wirekit authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// lifecycle errors
    #[error("already started, call stop first")]
    AlreadyStarted,

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("connection {0} not found")]
    ConnectionNotFound(u64),

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// framing and parsing errors
    #[error("frame of length {0} exceeds the size limit")]
    FrameTooLarge(usize),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("no handler for {method} {path} registered in {router}")]
    NoHandler {
        method: String,
        path: String,
        router: String,
    },

    /// marker error
    #[error("incomplete")]
    Incomplete,

    /// transport errors
    #[error("I/O error: {0}")]
    DetailedIoError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("channel send error: {0}")]
    ChannelSendError(String),

    #[error("handler panic: {0}")]
    HandlerPanic(String),

    /// configuration errors
    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            AppError::ConnectionNotFound(42).to_string(),
            "connection 42 not found"
        );
        assert_eq!(
            AppError::NoHandler {
                method: "get".to_string(),
                path: "/missing".to_string(),
                router: "api".to_string(),
            }
            .to_string(),
            "no handler for get /missing registered in api"
        );
        assert_eq!(
            AppError::AlreadyStarted.to_string(),
            "already started, call stop first"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer gone");
        let app_error: AppError = io_error.into();
        assert!(matches!(app_error, AppError::IoError(_)));
    }
}
