mod http;
mod network;
mod service;
mod tcp;
mod udp;
mod utils;

pub use http::{
    proxy_required, system_proxy, HttpRequest, HttpResponse, HttpServer, ProxySettings,
    RouteHandler, Router, DEFAULT_PROBE_URL,
};
pub use network::{Connection, ConnectionRegistry, LineFrame, RemoteConnection};
pub use service::{
    setup_local_tracing, setup_tracing, AppError, AppResult, HttpConfig, LogGuard, Shutdown,
    TcpConfig, ToolkitConfig, UdpConfig,
};
pub use tcp::{TcpClient, TcpServer};
pub use udp::UdpEndpoint;
