//! Top-level error type for starting and running a proxy.
//!
//! Each layer keeps its own error enum; [`Error`] gathers the ones that can
//! stop the process.

use std::io;

use thiserror::Error;

use crate::{config::ProxyConfigError, proxy::ServerError};

/// Failure that ends a `wireproxy` process.
#[derive(Debug, Error)]
pub enum Error {
    /// The supplied configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ProxyConfigError),

    /// The server could not be started.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// The async runtime could not be built.
    #[error("failed to build runtime: {0}")]
    Runtime(#[source] io::Error),

    /// The Prometheus exporter could not be installed.
    #[cfg(feature = "metrics")]
    #[error("failed to install metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Result alias using [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
