//! Immutable proxy and RPC client configuration.
//!
//! A [`ProxyConfig`] is assembled once at start-up, usually from the command
//! line, validated, and then shared read-only by the server and its pipes.
//! An [`RpcClientConfig`] fixes the framing and error policy of one
//! dispatcher connection.

use std::{net::SocketAddr, time::Duration};

use thiserror::Error;

use crate::{
    codec::{ConfigError, LengthFieldConfig, RecoveryPolicy},
    rpc::{BODY_LENGTH_OFFSET, DEFAULT_MAX_FRAME_LENGTH, frame_config},
};

/// Default number of I/O worker threads and accept loops.
pub const DEFAULT_WORKERS: usize = 2;

/// Invalid proxy configuration.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProxyConfigError {
    /// At least one worker is required to accept connections.
    #[error("worker count must be at least 1")]
    ZeroWorkers,

    /// The backend host is empty.
    #[error("backend host must not be empty")]
    EmptyBackendHost,

    /// A zero connect timeout would fail every dial.
    #[error("connect timeout must be greater than zero")]
    ZeroConnectTimeout,
}

/// Settings for one proxy instance, fixed for its lifetime.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use wireproxy::config::ProxyConfig;
///
/// let config = ProxyConfig::new("127.0.0.1:3000".parse().unwrap(), "localhost", 20880)
///     .with_workers(4)
///     .and_then(|c| c.with_connect_timeout(Some(Duration::from_secs(2))))
///     .expect("valid config");
/// assert_eq!(config.backend_target(), "localhost:20880");
/// assert_eq!(config.workers(), 4);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyConfig {
    listen: SocketAddr,
    backend_host: String,
    backend_port: u16,
    workers: usize,
    connect_timeout: Option<Duration>,
}

impl ProxyConfig {
    /// Configuration listening on `listen` and forwarding to
    /// `backend_host:backend_port`, with default workers and no connect
    /// timeout.
    #[must_use]
    pub fn new(listen: SocketAddr, backend_host: impl Into<String>, backend_port: u16) -> Self {
        Self {
            listen,
            backend_host: backend_host.into(),
            backend_port,
            workers: DEFAULT_WORKERS,
            connect_timeout: None,
        }
    }

    /// Set the number of I/O workers.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyConfigError::ZeroWorkers`] when `workers` is zero.
    pub fn with_workers(mut self, workers: usize) -> Result<Self, ProxyConfigError> {
        if workers == 0 {
            return Err(ProxyConfigError::ZeroWorkers);
        }
        self.workers = workers;
        Ok(self)
    }

    /// Bound every backend dial by `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyConfigError::ZeroConnectTimeout`] for a zero duration.
    pub fn with_connect_timeout(mut self, limit: Option<Duration>) -> Result<Self, ProxyConfigError> {
        if limit.is_some_and(|d| d.is_zero()) {
            return Err(ProxyConfigError::ZeroConnectTimeout);
        }
        self.connect_timeout = limit;
        Ok(self)
    }

    /// Check invariants that the constructors cannot enforce by type.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyConfigError::EmptyBackendHost`] for a blank host.
    pub fn validate(self) -> Result<Self, ProxyConfigError> {
        if self.backend_host.trim().is_empty() {
            return Err(ProxyConfigError::EmptyBackendHost);
        }
        Ok(self)
    }

    /// Address the proxy listens on.
    #[must_use]
    pub const fn listen(&self) -> SocketAddr { self.listen }

    /// Backend host name or address.
    #[must_use]
    pub fn backend_host(&self) -> &str { &self.backend_host }

    /// Backend port.
    #[must_use]
    pub const fn backend_port(&self) -> u16 { self.backend_port }

    /// `host:port` of the backend.
    #[must_use]
    pub fn backend_target(&self) -> String { format!("{}:{}", self.backend_host, self.backend_port) }

    /// Number of I/O worker threads and accept loops.
    #[must_use]
    pub const fn workers(&self) -> usize { self.workers }

    /// Optional bound on backend dials.
    #[must_use]
    pub const fn connect_timeout(&self) -> Option<Duration> { self.connect_timeout }
}

/// Settings for one RPC dispatcher connection.
///
/// # Examples
///
/// ```
/// use wireproxy::{codec::RecoveryPolicy, config::RpcClientConfig};
///
/// let config = RpcClientConfig::default()
///     .with_max_frame_length(64 * 1024)
///     .expect("valid limit")
///     .with_recovery(RecoveryPolicy::Disconnect);
/// assert_eq!(config.frame().max_frame_length(), 64 * 1024);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RpcClientConfig {
    frame: LengthFieldConfig,
    recovery: RecoveryPolicy,
}

impl RpcClientConfig {
    /// Accept response frames of up to `max` bytes, header included.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when `max` cannot hold the header's length
    /// field.
    pub fn with_max_frame_length(mut self, max: usize) -> Result<Self, ConfigError> {
        self.frame = frame_config(max)?;
        Ok(self)
    }

    /// Choose how malformed response frames are handled.
    #[must_use]
    pub const fn with_recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    /// Framing of response frames.
    #[must_use]
    pub const fn frame(&self) -> LengthFieldConfig { self.frame }

    /// Policy applied to decode errors.
    #[must_use]
    pub const fn recovery(&self) -> RecoveryPolicy { self.recovery }
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            frame: LengthFieldConfig::whole_frame_u32(BODY_LENGTH_OFFSET, DEFAULT_MAX_FRAME_LENGTH),
            recovery: RecoveryPolicy::Drop,
        }
    }
}
