//! Deadline decorator for [`RpcService`]s.

use std::time::Duration;

use async_trait::async_trait;

use super::{
    dispatcher::DispatchError,
    message::{RpcRequest, RpcResponse},
    service::RpcService,
};

/// Deadline applied when none is given.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

/// Fails calls that take longer than a fixed deadline.
///
/// The inner call future is dropped on expiry. For a
/// [`DispatcherHandle`](super::DispatcherHandle) that cancels the pending
/// call; the connection stays open for other callers.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
///
/// use wireproxy::{
///     config::RpcClientConfig,
///     proxy::TcpConnector,
///     rpc::{DispatcherHandle, ExpiringService, RpcRequest, RpcService},
/// };
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let connector = TcpConnector::new("127.0.0.1", 20880);
/// let dispatcher = DispatcherHandle::connect(&connector, RpcClientConfig::default()).await?;
/// let service = ExpiringService::new(dispatcher, Duration::from_millis(500));
/// let response = service.call(RpcRequest::new("com.example.HelloService", "hash")).await?;
/// # let _ = response;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct ExpiringService<S> {
    inner: S,
    deadline: Duration,
}

impl<S> ExpiringService<S> {
    /// Wrap `inner`, bounding each call by `deadline`.
    #[must_use]
    pub const fn new(inner: S, deadline: Duration) -> Self { Self { inner, deadline } }

    /// Configured deadline.
    #[must_use]
    pub const fn deadline(&self) -> Duration { self.deadline }

    /// Wrapped service.
    #[must_use]
    pub const fn inner(&self) -> &S { &self.inner }
}

impl<S> From<S> for ExpiringService<S> {
    fn from(inner: S) -> Self { Self::new(inner, DEFAULT_DEADLINE) }
}

#[async_trait]
impl<S: RpcService> RpcService for ExpiringService<S> {
    async fn call(&self, request: RpcRequest) -> Result<RpcResponse, DispatchError> {
        match tokio::time::timeout(self.deadline, self.inner.call(request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(deadline = ?self.deadline, "call expired");
                Err(DispatchError::Timeout(self.deadline))
            }
        }
    }
}
