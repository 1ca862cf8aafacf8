//! Recovery policies for decode errors.
//!
//! Decode errors never unwind the connection by themselves. The component
//! consuming decoded frames picks a [`RecoveryPolicy`] for each error and
//! decides whether the connection survives.

/// How a consumer reacts to a [`DecodeError`](super::DecodeError).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// Discard the malformed frame and continue processing.
    ///
    /// The decoder has already removed the offending bytes, so subsequent
    /// frames decode normally.
    #[default]
    Drop,

    /// Terminate the connection.
    Disconnect,
}

impl RecoveryPolicy {
    /// Returns the policy name as a static string for metrics and logging.
    ///
    /// # Examples
    ///
    /// ```
    /// use wireproxy::codec::RecoveryPolicy;
    ///
    /// assert_eq!(RecoveryPolicy::Drop.as_str(), "drop");
    /// assert_eq!(RecoveryPolicy::Disconnect.as_str(), "disconnect");
    /// ```
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Drop => "drop",
            Self::Disconnect => "disconnect",
        }
    }
}
