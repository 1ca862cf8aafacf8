//! Coverage for the `wireproxy_testing` helpers themselves.

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use wireproxy::rpc::{HEADER_LEN, RpcRequest, RpcResponse};
use wireproxy_testing::{
    RpcTestServer,
    ServerMode,
    TestResult,
    closed_port_addr,
    process_request,
    request_frame,
    response_payload,
    spawn_echo_backend,
};

fn hello() -> RpcRequest { RpcRequest::new("com.example.HelloService", "hash").parameter("1") }

#[test]
fn modes_shape_the_reply() {
    let frame = request_frame(5, hello());
    let echo = process_request(ServerMode::Echo, &frame).expect("echo replies");
    let response = RpcResponse::decode(echo.into()).expect("response");
    assert_eq!(response.id(), 5);
    assert_eq!(response.payload(), &response_payload(5));

    let mismatch = process_request(ServerMode::Mismatch, &frame).expect("mismatch replies");
    assert_eq!(RpcResponse::decode(mismatch.into()).expect("response").id(), 1004);

    assert!(process_request(ServerMode::Silent, &frame).is_none());
    assert!(process_request(ServerMode::Echo, &frame[..4]).is_none());
}

#[tokio::test]
async fn echo_backend_echoes() -> TestResult {
    let addr = spawn_echo_backend().await?;
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(b"ping").await?;
    let mut buf = [0_u8; 4];
    stream.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"ping");
    Ok(())
}

#[tokio::test]
async fn closed_port_refuses_connections() -> TestResult {
    let addr = closed_port_addr()?;
    assert!(TcpStream::connect(addr).await.is_err());
    Ok(())
}

#[tokio::test]
async fn rpc_server_answers_over_tcp() -> TestResult {
    let server = RpcTestServer::spawn(ServerMode::Echo).await?;
    let mut stream = TcpStream::connect(server.addr()).await?;
    stream.write_all(&request_frame(9, hello())).await?;
    let expected = response_payload(9);
    let mut reply = vec![0_u8; HEADER_LEN + expected.len()];
    stream.read_exact(&mut reply).await?;
    let response = RpcResponse::decode(reply.into())?;
    assert_eq!(response.id(), 9);
    assert_eq!(response.payload(), &expected);
    Ok(())
}
