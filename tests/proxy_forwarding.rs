//! End-to-end forwarding through `ProxyServer` over real sockets.

use std::net::TcpListener as StdTcpListener;

use rstest::rstest;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::oneshot,
    task::JoinHandle,
    time::{Duration, timeout},
};
use wireproxy::{
    config::{ProxyConfig, RpcClientConfig},
    proxy::{ProxyServer, ServerError, TcpConnector},
    rpc::{DispatcherHandle, RpcRequest},
};
use wireproxy_testing::{
    RpcTestServer,
    ServerMode,
    TestResult,
    closed_port_addr,
    response_payload,
    spawn_echo_backend,
    unused_listener,
};

struct RunningProxy {
    addr: std::net::SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl RunningProxy {
    fn start(server: ProxyServer<TcpConnector>, listener: StdTcpListener) -> TestResult<Self> {
        let server = server.bind_existing_listener(listener)?;
        let addr = server.local_addr().ok_or("server missing local addr")?;
        let (shutdown, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_with_shutdown(async {
            let _ = rx.await;
        }));
        Ok(Self {
            addr,
            shutdown,
            handle,
        })
    }

    async fn stop(self) -> TestResult {
        let _ = self.shutdown.send(());
        let joined = timeout(Duration::from_secs(5), self.handle).await?;
        joined??;
        Ok(())
    }
}

#[rstest]
#[tokio::test]
async fn concurrent_clients_are_piped_independently(unused_listener: StdTcpListener) -> TestResult {
    let backend = spawn_echo_backend().await?;
    let proxy = RunningProxy::start(
        ProxyServer::new(TcpConnector::new("127.0.0.1", backend.port())).workers(2),
        unused_listener,
    )?;

    let mut clients = Vec::new();
    for n in 0..4_u8 {
        let addr = proxy.addr;
        clients.push(tokio::spawn(async move {
            let message = vec![n; 16 * 1024];
            let mut stream = TcpStream::connect(addr).await?;
            let (mut rd, mut wr) = stream.split();
            let mut echoed = vec![0_u8; message.len()];
            let (written, read) = tokio::join!(wr.write_all(&message), rd.read_exact(&mut echoed));
            written?;
            read?;
            Ok::<_, std::io::Error>(echoed == message)
        }));
    }
    for client in clients {
        assert!(client.await??, "echo must match what was sent");
    }
    proxy.stop().await
}

#[rstest]
#[tokio::test]
async fn bulk_echo_streams_while_the_client_keeps_writing(
    unused_listener: StdTcpListener,
) -> TestResult {
    const TOTAL: usize = 64 * 1024 * 1024;
    const CHUNK: usize = 64 * 1024;
    let backend = spawn_echo_backend().await?;
    let proxy = RunningProxy::start(
        ProxyServer::new(TcpConnector::new("127.0.0.1", backend.port())),
        unused_listener,
    )?;

    let stream = TcpStream::connect(proxy.addr).await?;
    let (mut rd, mut wr) = stream.into_split();
    let writer = tokio::spawn(async move {
        let chunk: Vec<u8> = (0..=250_u8).cycle().take(CHUNK).collect();
        for _ in 0..TOTAL / CHUNK {
            wr.write_all(&chunk).await?;
        }
        Ok::<_, std::io::Error>(wr)
    });
    let reader = tokio::spawn(async move {
        let mut buf = vec![0_u8; CHUNK];
        let mut echoed = 0;
        while echoed < TOTAL {
            match rd.read(&mut buf).await? {
                0 => break,
                n => echoed += n,
            }
        }
        Ok::<_, std::io::Error>(echoed)
    });

    let echoed = timeout(Duration::from_secs(30), reader).await???;
    assert_eq!(echoed, TOTAL);
    drop(writer.await??);
    proxy.stop().await
}

#[rstest]
#[tokio::test]
async fn unreachable_backend_closes_the_frontend(unused_listener: StdTcpListener) -> TestResult {
    let backend = closed_port_addr()?;
    let proxy = RunningProxy::start(
        ProxyServer::new(TcpConnector::new("127.0.0.1", backend.port())),
        unused_listener,
    )?;

    let mut client = TcpStream::connect(proxy.addr).await?;
    let _ = client.write_all(b"lost").await;
    let mut buf = Vec::new();
    let read = timeout(Duration::from_secs(5), client.read_to_end(&mut buf)).await?;
    assert!(!matches!(read, Ok(n) if n > 0), "no bytes may come back");
    proxy.stop().await
}

#[rstest]
#[tokio::test]
async fn configured_proxy_carries_multiplexed_rpc(unused_listener: StdTcpListener) -> TestResult {
    let provider = RpcTestServer::spawn(ServerMode::Reverse(3)).await?;
    let config = ProxyConfig::new(unused_listener.local_addr()?, "127.0.0.1", provider.addr().port())
        .with_connect_timeout(Some(Duration::from_secs(1)))?;
    let proxy = RunningProxy::start(ProxyServer::from_config(&config), unused_listener)?;

    let connector = TcpConnector::new("127.0.0.1", proxy.addr.port());
    let dispatcher = DispatcherHandle::connect(&connector, RpcClientConfig::default()).await?;
    let calls: Vec<_> = (0..3)
        .map(|_| dispatcher.send(RpcRequest::new("com.example.HelloService", "hash").parameter("123456")))
        .collect();
    for call in calls {
        let id = call.id();
        let response = timeout(Duration::from_secs(5), call).await??;
        assert_eq!(response.payload(), &response_payload(id));
    }

    dispatcher.close();
    dispatcher.closed().await;
    proxy.stop().await
}
