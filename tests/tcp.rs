use std::time::Duration;

use rstest::{fixture, rstest};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use wirekit::{setup_local_tracing, AppError, AppResult, TcpClient, TcpConfig, TcpServer};

#[fixture]
#[once]
fn setup() {
    setup_local_tracing().expect("failed to setup tracing");
}

fn local_config() -> TcpConfig {
    TcpConfig {
        ip: "127.0.0.1".to_string(),
        port: 0,
        ..TcpConfig::default()
    }
}

async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>, what: &str) -> T {
    match timeout(Duration::from_secs(2), rx.recv()).await {
        Ok(Some(value)) => value,
        Ok(None) => panic!("channel closed while waiting for {}", what),
        Err(_) => panic!("timed out waiting for {}", what),
    }
}

async fn assert_silent<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>, what: &str) {
    if let Ok(Some(event)) = timeout(Duration::from_millis(200), rx.recv()).await {
        panic!("unexpected {}: {:?}", what, event);
    }
}

#[derive(Debug)]
enum ServerSideEvent {
    Connected(u64),
    Message(u64, String),
    Disconnected(u64),
}

struct ProbedServer {
    server: TcpServer,
    events: mpsc::UnboundedReceiver<ServerSideEvent>,
}

/// A started server whose three callbacks forward into one event channel,
/// preserving the order the dispatcher ran them in.
async fn probed_server(config: TcpConfig) -> AppResult<ProbedServer> {
    let mut server = TcpServer::new(config);
    let (event_tx, events) = mpsc::unbounded_channel();
    let connect_tx = event_tx.clone();
    server.on_connect(move |remote| {
        let _ = connect_tx.send(ServerSideEvent::Connected(remote.id()));
    });
    let message_tx = event_tx.clone();
    server.on_message(move |remote, text| {
        let _ = message_tx.send(ServerSideEvent::Message(remote.id(), text));
    });
    server.on_disconnect(move |remote| {
        let _ = event_tx.send(ServerSideEvent::Disconnected(remote.id()));
    });
    server.start().await?;
    Ok(ProbedServer { server, events })
}

async fn expect_connected(events: &mut mpsc::UnboundedReceiver<ServerSideEvent>) -> u64 {
    match recv_within(events, "connect event").await {
        ServerSideEvent::Connected(id) => id,
        other => panic!("expected connect event, got {:?}", other),
    }
}

async fn expect_message(events: &mut mpsc::UnboundedReceiver<ServerSideEvent>) -> (u64, String) {
    match recv_within(events, "message event").await {
        ServerSideEvent::Message(id, text) => (id, text),
        other => panic!("expected message event, got {:?}", other),
    }
}

async fn expect_disconnected(events: &mut mpsc::UnboundedReceiver<ServerSideEvent>) -> u64 {
    match recv_within(events, "disconnect event").await {
        ServerSideEvent::Disconnected(id) => id,
        other => panic!("expected disconnect event, got {:?}", other),
    }
}

#[rstest]
#[tokio::test]
async fn test_accepted_connections_get_distinct_stable_ids(_setup: ()) -> AppResult<()> {
    let mut probe = probed_server(local_config()).await?;
    let addr = probe.server.local_addr().expect("server not bound");

    let _first = TcpStream::connect(addr).await?;
    let _second = TcpStream::connect(addr).await?;
    let third = TcpStream::connect(addr).await?;

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(expect_connected(&mut probe.events).await);
    }
    let mut unique = ids.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), 3, "ids must be distinct: {:?}", ids);
    assert_eq!(probe.server.connection_count(), 3);
    for id in &ids {
        assert!(probe.server.find_connection(*id).is_some());
    }

    // an id stays valid until exactly its own connection goes away
    drop(third);
    let dropped = expect_disconnected(&mut probe.events).await;
    assert!(ids.contains(&dropped));
    assert_eq!(probe.server.connection_count(), 2);
    assert!(probe.server.find_connection(dropped).is_none());

    probe.server.stop().await;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_embedded_separators_split_into_frames(_setup: ()) -> AppResult<()> {
    let mut probe = probed_server(local_config()).await?;
    let addr = probe.server.local_addr().expect("server not bound");

    let mut client = TcpStream::connect(addr).await?;
    let id = expect_connected(&mut probe.events).await;

    // the sender meant this as one message; the framing has no escaping, so
    // the receiver sees separators + 1 messages
    client.write_all(b"alpha\nbeta\ngamma\n").await?;
    client.flush().await?;

    for expected in ["alpha", "beta", "gamma"] {
        let (from, text) = expect_message(&mut probe.events).await;
        assert_eq!(from, id);
        assert_eq!(text, expected);
    }

    probe.server.stop().await;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_send_by_id_and_stale_id(_setup: ()) -> AppResult<()> {
    let mut probe = probed_server(local_config()).await?;
    let addr = probe.server.local_addr().expect("server not bound");

    let client = TcpStream::connect(addr).await?;
    let id = expect_connected(&mut probe.events).await;

    probe.server.send(id, "hello from server").await?;
    let mut reader = BufReader::new(client);
    let mut line = String::new();
    timeout(Duration::from_secs(2), reader.read_line(&mut line))
        .await
        .expect("timed out reading server frame")?;
    assert_eq!(line, "hello from server\n");

    let stale = id + 1000;
    match probe.server.send(stale, "nobody home").await {
        Err(AppError::ConnectionNotFound(reported)) => assert_eq!(reported, stale),
        other => panic!("expected ConnectionNotFound, got {:?}", other),
    }

    probe.server.stop().await;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_stop_drains_registry_and_goes_quiet(_setup: ()) -> AppResult<()> {
    let mut probe = probed_server(local_config()).await?;
    let addr = probe.server.local_addr().expect("server not bound");

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(TcpStream::connect(addr).await?);
        expect_connected(&mut probe.events).await;
    }
    assert_eq!(probe.server.connection_count(), 3);

    probe.server.stop().await;
    assert!(!probe.server.is_running());
    assert_eq!(probe.server.connection_count(), 0);

    // a server-initiated stop reports no disconnects and no further messages
    assert_silent(&mut probe.events, "event after stop").await;

    // every client observes the close
    for mut client in clients {
        let mut buffer = [0u8; 8];
        let n = timeout(Duration::from_secs(2), client.read(&mut buffer))
            .await
            .expect("timed out waiting for close")?;
        assert_eq!(n, 0);
    }
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_server_double_start_fails_and_leaves_first_running(_setup: ()) -> AppResult<()> {
    let mut probe = probed_server(local_config()).await?;
    let addr = probe.server.local_addr().expect("server not bound");

    assert!(matches!(
        probe.server.start().await,
        Err(AppError::AlreadyStarted)
    ));
    assert_eq!(probe.server.local_addr(), Some(addr));

    // the refused second start leaves the first accepting
    let _client = TcpStream::connect(addr).await?;
    expect_connected(&mut probe.events).await;

    probe.server.stop().await;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_connection_limit_defers_accepts(_setup: ()) -> AppResult<()> {
    let config = TcpConfig {
        max_connections: 1,
        ..local_config()
    };
    let mut probe = probed_server(config).await?;
    let addr = probe.server.local_addr().expect("server not bound");

    let first = TcpStream::connect(addr).await?;
    let first_id = expect_connected(&mut probe.events).await;

    // the second connect sits in the backlog until a slot frees up
    let _second = TcpStream::connect(addr).await?;
    assert_silent(&mut probe.events, "accept beyond the connection limit").await;

    drop(first);
    assert_eq!(expect_disconnected(&mut probe.events).await, first_id);
    let second_id = expect_connected(&mut probe.events).await;
    assert_ne!(second_id, first_id);

    probe.server.stop().await;
    Ok(())
}

#[derive(Debug, PartialEq)]
enum ClientSideEvent {
    Connected,
    ConnectFailed,
    Message(String),
    Disconnected,
}

fn probed_client(host: &str, port: u16) -> (TcpClient, mpsc::UnboundedReceiver<ClientSideEvent>) {
    let (event_tx, events) = mpsc::unbounded_channel();
    let mut client = TcpClient::new(host, port);
    let tx = event_tx.clone();
    client.on_connect(move || {
        let _ = tx.send(ClientSideEvent::Connected);
    });
    let tx = event_tx.clone();
    client.on_connect_failed(move || {
        let _ = tx.send(ClientSideEvent::ConnectFailed);
    });
    let tx = event_tx.clone();
    client.on_message(move |text| {
        let _ = tx.send(ClientSideEvent::Message(text));
    });
    client.on_disconnect(move || {
        let _ = event_tx.send(ClientSideEvent::Disconnected);
    });
    (client, events)
}

#[rstest]
#[tokio::test]
async fn test_client_round_trip_is_ordered(_setup: ()) -> AppResult<()> {
    // greets on connect, echoes every message
    let mut server = TcpServer::new(local_config());
    server.on_connect(|remote| {
        tokio::spawn(async move {
            let _ = remote.send("welcome").await;
        });
    });
    server.on_message(|remote, text| {
        tokio::spawn(async move {
            let _ = remote.send(&format!("echo {}", text)).await;
        });
    });
    server.start().await?;
    let addr = server.local_addr().expect("server not bound");

    let (client, mut events) = probed_client("127.0.0.1", addr.port());
    client.start().await?;

    // connect strictly precedes the first message
    assert_eq!(
        recv_within(&mut events, "client event").await,
        ClientSideEvent::Connected
    );
    assert!(client.is_connected());
    assert_eq!(
        recv_within(&mut events, "greeting").await,
        ClientSideEvent::Message("welcome".to_string())
    );

    client.send("one").await?;
    assert_eq!(
        recv_within(&mut events, "first echo").await,
        ClientSideEvent::Message("echo one".to_string())
    );
    client.send("two").await?;
    assert_eq!(
        recv_within(&mut events, "second echo").await,
        ClientSideEvent::Message("echo two".to_string())
    );

    // a client-initiated stop reports no disconnect
    client.stop().await;
    assert!(!client.is_running());
    assert_silent(&mut events, "event after client stop").await;

    server.stop().await;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_client_connect_failure_reports_through_callback(_setup: ()) -> AppResult<()> {
    // bind then drop, so the port is known dead
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let dead = listener.local_addr()?;
    drop(listener);

    let (client, mut events) = probed_client("127.0.0.1", dead.port());
    // a failed connect is reported through the callback, not through start
    client.start().await?;
    assert_eq!(
        recv_within(&mut events, "connect failed event").await,
        ClientSideEvent::ConnectFailed
    );
    assert!(!client.is_running());
    assert!(!client.is_connected());
    assert_silent(&mut events, "event after failed connect").await;

    // send before a successful connect is a synchronous error
    assert!(matches!(
        client.send("anyone there").await,
        Err(AppError::IllegalState(_))
    ));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_client_double_start_fails(_setup: ()) -> AppResult<()> {
    let server = TcpServer::new(local_config());
    server.start().await?;
    let addr = server.local_addr().expect("server not bound");

    let (client, mut events) = probed_client("127.0.0.1", addr.port());
    client.start().await?;
    assert_eq!(
        recv_within(&mut events, "client event").await,
        ClientSideEvent::Connected
    );

    assert!(matches!(
        client.start().await,
        Err(AppError::AlreadyStarted)
    ));
    assert!(client.is_connected());

    client.stop().await;
    server.stop().await;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_server_close_reports_client_disconnect(_setup: ()) -> AppResult<()> {
    let mut probe = probed_server(local_config()).await?;
    let addr = probe.server.local_addr().expect("server not bound");

    let (client, mut events) = probed_client("127.0.0.1", addr.port());
    client.start().await?;
    assert_eq!(
        recv_within(&mut events, "client event").await,
        ClientSideEvent::Connected
    );
    let id = expect_connected(&mut probe.events).await;

    // close from the server side; the client sees an organic disconnect
    let remote = probe.server.find_connection(id).expect("connection in registry");
    remote.close().await;

    assert_eq!(
        recv_within(&mut events, "disconnect event").await,
        ClientSideEvent::Disconnected
    );
    client.stop().await;
    probe.server.stop().await;
    Ok(())
}
