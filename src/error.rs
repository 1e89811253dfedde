use std::io;

use thiserror::Error;

use crate::window::WindowId;

pub type Result<T> = std::result::Result<T, MonkeyError>;

/// Caller-observable session errors.
///
/// Protocol anomalies never surface here: a malformed line with a known tag
/// ([`crate::protocol::ProtocolError`]) and an event naming an unknown
/// window are logged and skipped by the pump, because the child is allowed
/// to evolve its protocol additively.
#[derive(Debug, Error)]
pub enum MonkeyError {
    /// The browser child could not be spawned at all.
    #[error("failed to spawn browser child: {0}")]
    Spawn(io::Error),
    /// Reaping the child at teardown failed.
    #[error("{0}")]
    Io(io::Error),
    /// The child exited (or its pipes broke) while an operation was still
    /// waiting on it. Fatal: the session is stopped afterwards.
    #[error("browser child died unexpectedly")]
    ChildDied,
    /// The window a blocking operation was waiting on was destroyed.
    #[error("window {0} was destroyed")]
    WindowDied(WindowId),
    /// A blocking predicate ran out of time. Recoverable; names the wait.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    /// Invalid use of the session API, e.g. operating on a window handle
    /// the session does not know. Does not corrupt session state.
    #[error("{0}")]
    Usage(String),
}

impl MonkeyError {
    pub(crate) fn usage(msg: impl Into<String>) -> Self {
        MonkeyError::Usage(msg.into())
    }

    /// Whether the session is still usable after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MonkeyError::Spawn(_) | MonkeyError::ChildDied)
    }
}
