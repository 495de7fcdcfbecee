//! Line-framed TCP transports: a multi-connection server and its
//! single-connection client mirror. Both surface completed events through a
//! bounded channel to one dispatcher task, so user callbacks never run on a
//! read loop.

pub use client::TcpClient;
pub use server::TcpServer;

mod client;
mod server;
