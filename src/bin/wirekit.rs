use clap::Parser;
use dotenv::dotenv;
use std::path::PathBuf;
use tokio::runtime;
use tokio::signal;
use tracing::{info, warn};
use wirekit::{
    setup_tracing, AppResult, HttpResponse, HttpServer, Router, TcpServer, ToolkitConfig,
    UdpEndpoint,
};

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser)]
pub enum Command {
    PrintConfig,
}

fn main() -> AppResult<()> {
    dotenv().ok();

    let commandline: CommandLine = CommandLine::parse();
    let config_path = commandline.conf.as_ref().map_or_else(
        || {
            let mut path = PathBuf::from("./");
            path.push("conf.toml");
            path
        },
        PathBuf::from,
    );
    let config = if config_path.exists() {
        ToolkitConfig::load(&config_path)?
    } else {
        ToolkitConfig::default()
    };

    if let Some(Command::PrintConfig) = commandline.command {
        println!("{:#?}", config);
        return Ok(());
    }

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    let _log_guard = setup_tracing();

    rt.block_on(serve(config))
}

/// Demo wiring: a TCP echo server, a UDP datagram logger and a small HTTP
/// control surface, all driven by the same config file.
async fn serve(config: ToolkitConfig) -> AppResult<()> {
    let mut echo = TcpServer::new(config.tcp);
    echo.on_connect(|remote| {
        info!("tcp peer {} connected from {}", remote.id(), remote.peer_addr())
    });
    echo.on_message(|remote, text| {
        tokio::spawn(async move {
            if let Err(e) = remote.send(&text).await {
                warn!("echo reply to {} failed: {}", remote.id(), e);
            }
        });
    });
    echo.on_disconnect(|remote| info!("tcp peer {} disconnected", remote.id()));
    echo.start().await?;

    let mut beacon = UdpEndpoint::new(config.udp);
    beacon.on_message(|peer, _bytes, text| info!("udp datagram from {}: {}", peer, text));
    beacon.start().await?;

    let router = Router::named("wirekit")
        .route("get", "/health", |_| Ok(HttpResponse::new("ok\n", "text/plain")))
        .route("get", "/version", |_| {
            Ok(HttpResponse::new(
                concat!(env!("CARGO_PKG_VERSION"), "\n"),
                "text/plain",
            ))
        })
        .default_route("get", |request| {
            Ok(
                HttpResponse::new(format!("no page at {}\n", request.path), "text/plain")
                    .with_status(404),
            )
        })
        .error_hook(|error| warn!("http request failed: {}", error));
    let http = HttpServer::new(config.http, router);
    http.start().await?;

    signal::ctrl_c().await?;
    info!("shutting down");

    echo.stop().await;
    beacon.stop().await;
    http.stop().await;
    Ok(())
}
