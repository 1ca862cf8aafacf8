//! Panic payload formatting for task supervision logs.

use std::{any::Any, fmt};

/// A caught panic payload that renders as its message.
///
/// String payloads (`panic!("...")` with or without formatting) render as the
/// message itself; any other payload falls back to its `Debug` form.
///
/// ```
/// use wireproxy::panic::format_panic;
///
/// assert_eq!(format_panic(Box::new("boom")).to_string(), "boom");
/// assert_eq!(format_panic(Box::new(String::from("boom"))).message(), Some("boom"));
/// assert!(format_panic(Box::new(5_u32)).to_string().contains("Any"));
/// ```
#[derive(Debug)]
#[must_use]
pub struct PanicMessage(Box<dyn Any + Send>);

impl PanicMessage {
    /// The panic message when the payload is a string.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.0
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| self.0.downcast_ref::<&'static str>().copied())
    }
}

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => f.write_str(msg),
            None => write!(f, "{:?}", self.0),
        }
    }
}

/// Wrap a payload returned by `catch_unwind` for logging.
pub fn format_panic(panic: Box<dyn Any + Send>) -> PanicMessage { PanicMessage(panic) }
