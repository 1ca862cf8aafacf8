//! A scripted RPC provider for dispatcher tests.

use std::{io, net::SocketAddr};

use futures::StreamExt;
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_util::codec::FramedRead;
use wireproxy::{
    codec::LengthFieldDecoder,
    proxy::TcpConnector,
    rpc::{correlation_id, frame_config},
};

use crate::frames::{response_frame, response_payload};

const MAX_REQUEST_LENGTH: usize = 1024 * 1024;

/// How the test server answers requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServerMode {
    /// Answer each request as soon as it arrives.
    #[default]
    Echo,
    /// Collect this many requests, then answer them newest first.
    Reverse(usize),
    /// Read requests and never answer.
    Silent,
    /// Answer with a correlation id nobody is waiting for.
    Mismatch,
}

/// Build the response bytes for one request frame.
///
/// Returns `None` if the frame carries no correlation id or the mode does
/// not answer.
#[must_use]
pub fn process_request(mode: ServerMode, frame: &[u8]) -> Option<Vec<u8>> {
    let id = correlation_id(frame)?;
    match mode {
        ServerMode::Echo | ServerMode::Reverse(_) => Some(response_frame(id, response_payload(id)).to_vec()),
        ServerMode::Mismatch => {
            let wrong = id.wrapping_add(999);
            Some(response_frame(wrong, response_payload(wrong)).to_vec())
        }
        ServerMode::Silent => None,
    }
}

/// RPC provider listening on localhost. Aborted on drop.
#[derive(Debug)]
pub struct RpcTestServer {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl RpcTestServer {
    /// Bind a free port and start serving connections in `mode`.
    ///
    /// # Errors
    ///
    /// Returns any IO error encountered while binding the listener.
    pub async fn spawn(mode: ServerMode) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, mode));
            }
        });
        Ok(Self { addr, task })
    }

    /// Listening address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr { self.addr }

    /// Connector dialing this server.
    #[must_use]
    pub fn connector(&self) -> TcpConnector { TcpConnector::new(self.addr.ip().to_string(), self.addr.port()) }
}

impl Drop for RpcTestServer {
    fn drop(&mut self) { self.task.abort(); }
}

async fn serve(stream: TcpStream, mode: ServerMode) {
    let Ok(config) = frame_config(MAX_REQUEST_LENGTH) else {
        return;
    };
    let (reader, mut writer) = stream.into_split();
    let mut frames = FramedRead::new(reader, LengthFieldDecoder::new(config));
    let mut held = Vec::new();
    while let Some(Ok(Ok(frame))) = frames.next().await {
        let Some(reply) = process_request(mode, &frame) else {
            continue;
        };
        if let ServerMode::Reverse(batch) = mode {
            held.push(reply);
            if held.len() < batch {
                continue;
            }
            for reply in held.drain(..).rev() {
                if writer.write_all(&reply).await.is_err() {
                    return;
                }
            }
        } else if writer.write_all(&reply).await.is_err() {
            return;
        }
    }
}
