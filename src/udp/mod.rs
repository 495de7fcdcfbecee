pub use endpoint::UdpEndpoint;

mod endpoint;
