//! Minimal HTTP/1.1 surface: request/response model, exact-match routing,
//! a single-task server loop, plus system proxy discovery.

pub use proxy::{proxy_required, system_proxy, ProxySettings, DEFAULT_PROBE_URL};
pub use request::HttpRequest;
pub use response::HttpResponse;
pub use router::{RouteHandler, Router};
pub use server::HttpServer;

mod proxy;
mod request;
mod response;
mod router;
mod server;
