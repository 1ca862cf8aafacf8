//! The call seam shared by the dispatcher and its decorators.

use async_trait::async_trait;

use super::{
    dispatcher::{DispatchError, DispatcherHandle},
    message::{RpcRequest, RpcResponse},
};

/// Asynchronous request/response service.
///
/// Implemented by [`DispatcherHandle`] and by wrappers such as
/// [`ExpiringService`](super::ExpiringService), so decorators compose.
#[async_trait]
pub trait RpcService: Send + Sync {
    /// Issue `request` and wait for its response.
    async fn call(&self, request: RpcRequest) -> Result<RpcResponse, DispatchError>;
}

#[async_trait]
impl RpcService for DispatcherHandle {
    async fn call(&self, request: RpcRequest) -> Result<RpcResponse, DispatchError> {
        self.send(request).await
    }
}

#[async_trait]
impl<S: RpcService + ?Sized> RpcService for std::sync::Arc<S> {
    async fn call(&self, request: RpcRequest) -> Result<RpcResponse, DispatchError> {
        (**self).call(request).await
    }
}
