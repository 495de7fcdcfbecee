use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

/// Settings for the line-framed TCP server and client.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TcpConfig {
    pub ip: String,
    pub port: u16,
    pub max_connections: usize,
    pub max_frame_size: usize,
    pub event_channel_size: usize,
}

impl Default for TcpConfig {
    fn default() -> TcpConfig {
        TcpConfig {
            ip: "0.0.0.0".to_string(),
            port: 7878,
            max_connections: 1024,
            max_frame_size: 1024 * 1024,
            event_channel_size: 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct UdpConfig {
    pub ip: String,
    pub port: u16,
    /// Receive buffer per datagram. 64 KiB covers the largest possible
    /// UDP payload.
    pub recv_buffer_size: usize,
}

impl Default for UdpConfig {
    fn default() -> UdpConfig {
        UdpConfig {
            ip: "0.0.0.0".to_string(),
            port: 7879,
            recv_buffer_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub ip: String,
    pub port: u16,
    pub max_request_size: usize,
}

impl Default for HttpConfig {
    fn default() -> HttpConfig {
        HttpConfig {
            ip: "0.0.0.0".to_string(),
            port: 7880,
            max_request_size: 64 * 1024,
        }
    }
}

/// Top-level configuration for the toolkit binary. Every section and field
/// carries a default, so a partial config file is enough.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ToolkitConfig {
    pub tcp: TcpConfig,
    pub udp: UdpConfig,
    pub http: HttpConfig,
}

impl ToolkitConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<ToolkitConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;

        let toolkit_config: ToolkitConfig = config.try_deserialize()?;

        Ok(toolkit_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_usable() {
        let config = ToolkitConfig::default();
        assert_eq!(config.tcp.ip, "0.0.0.0");
        assert!(config.tcp.max_connections > 0);
        assert!(config.tcp.max_frame_size > 0);
        assert!(config.tcp.event_channel_size > 0);
        assert!(config.udp.recv_buffer_size >= 64 * 1024);
        assert!(config.http.max_request_size > 0);
    }
}
