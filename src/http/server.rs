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

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::http::{HttpRequest, HttpResponse, Router};
use crate::{AppError, AppResult, HttpConfig};

struct RunningState {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    accept_handle: JoinHandle<()>,
}

/// Minimal HTTP/1.1 server over a fixed route table.
///
/// Exchanges run one at a time on the accept task and every response closes
/// its connection, so ordering is deterministic and handlers never race each
/// other. Suited to control surfaces, not high fan-in traffic.
pub struct HttpServer {
    config: HttpConfig,
    router: Arc<Router>,
    state: Mutex<Option<RunningState>>,
}

impl HttpServer {
    /// The router is fixed for the lifetime of the server; build it fully
    /// before handing it over.
    pub fn new(config: HttpConfig, router: Router) -> HttpServer {
        HttpServer {
            config,
            router: Arc::new(router),
            state: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> AppResult<()> {
        if self.is_running() {
            return Err(AppError::AlreadyStarted);
        }

        let listener =
            TcpListener::bind(format!("{}:{}", self.config.ip, self.config.port)).await?;
        let local_addr = listener.local_addr()?;
        let cancel = CancellationToken::new();
        let accept_handle = self.spawn_accept_loop(listener, cancel.clone());

        let mut state = self.state.lock();
        if state.is_some() {
            // lost a concurrent start race; unwind the task we just spawned
            cancel.cancel();
            return Err(AppError::AlreadyStarted);
        }
        info!("http server '{}' listening on {}", self.router.name(), local_addr);
        *state = Some(RunningState {
            local_addr,
            cancel,
            accept_handle,
        });
        Ok(())
    }

    fn spawn_accept_loop(&self, listener: TcpListener, cancel: CancellationToken) -> JoinHandle<()> {
        let router = self.router.clone();
        let max_request_size = self.config.max_request_size;
        tokio::spawn(async move {
            loop {
                // biased so a pending cancel always wins over a ready accept
                let (stream, peer_addr) = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    pair = accept_socket(&listener) => pair,
                };
                handle_exchange(stream, peer_addr, &router, max_request_size).await;
            }
            debug!("http accept loop exited");
        })
    }

    /// Stops accepting. An exchange already in flight runs to completion
    /// before this returns.
    pub async fn stop(&self) {
        let state = { self.state.lock().take() };
        let state = match state {
            Some(state) => state,
            None => return,
        };
        state.cancel.cancel();
        if let Err(e) = state.accept_handle.await {
            error!("http accept task failed: {}", e);
        }
        info!("http server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().is_some()
    }

    /// The bound address while running, useful when the configured port is 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().as_ref().map(|state| state.local_addr)
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        debug!("http server dropped");
    }
}

async fn accept_socket(listener: &TcpListener) -> (TcpStream, SocketAddr) {
    let mut backoff = 1;
    loop {
        match listener.accept().await {
            Ok(pair) => return pair,
            Err(e) => {
                error!("accept error: {}, retry in {} seconds", e, backoff);
                sleep(Duration::from_secs(backoff)).await;
                if backoff < 64 {
                    backoff *= 2;
                }
            }
        }
    }
}

/// Reads one request, runs the filter and the matching handler, writes the
/// response and closes. Per-request failures are reported through the
/// router's error hook and answered with a best-effort status reply.
async fn handle_exchange(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    router: &Router,
    max_request_size: usize,
) {
    let mut buffer = BytesMut::with_capacity(4 * 1024);
    let request = loop {
        match HttpRequest::parse(&mut buffer, peer_addr, max_request_size) {
            Ok(Some(request)) => break request,
            Ok(None) => {}
            Err(e) => {
                router.report_error(&e);
                write_reply(&mut stream, &status_reply(400)).await;
                return;
            }
        }
        match stream.read_buf(&mut buffer).await {
            Ok(0) => {
                // a probe that never sent a byte is not worth reporting
                if !buffer.is_empty() {
                    router.report_error(&AppError::MalformedRequest(
                        "connection closed mid request".to_string(),
                    ));
                }
                return;
            }
            Ok(_) => {}
            Err(e) => {
                router.report_error(&e.into());
                return;
            }
        }
    };

    match router.run_filter(&request) {
        Ok(true) => {}
        Ok(false) => {
            // filtered out, not an error; the hook stays quiet
            write_reply(&mut stream, &status_reply(403)).await;
            return;
        }
        Err(e) => {
            router.report_error(&e);
            write_reply(&mut stream, &status_reply(500)).await;
            return;
        }
    }

    match router.dispatch(&request) {
        Ok(reply) => write_reply(&mut stream, &reply).await,
        Err(e) => {
            router.report_error(&e);
            write_reply(&mut stream, &status_reply(500)).await;
        }
    }
}

fn status_reply(status: u16) -> HttpResponse {
    HttpResponse::new("", "text/plain").with_status(status)
}

async fn write_reply(stream: &mut TcpStream, reply: &HttpResponse) {
    if let Err(e) = stream.write_all(&reply.encode()).await {
        debug!("failed to write http reply: {}", e);
        return;
    }
    let _ = stream.shutdown().await;
}
