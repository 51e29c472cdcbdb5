//! Error types for pageant-client.

use std::io;

use thiserror::Error;

/// Main error type for all Pageant operations.
#[derive(Debug, Error)]
pub enum PageantError {
    /// No agent window was found. Expected when Pageant is not running;
    /// callers usually fall back to another agent transport.
    #[error("pageant process not running")]
    PeerUnavailable,

    /// Building the per-user security descriptor failed.
    #[error("security descriptor setup failed at {step}: Windows error {code}")]
    SecurityContext {
        /// Name of the native call that reported failure.
        step: &'static str,
        /// `GetLastError` value captured right after the failure.
        code: u32,
    },

    /// The shared memory region could not be created.
    #[error("creation of file mapping failed with error: {0}")]
    MappingCreateFailed(u32),

    /// The shared memory region could not be mapped into this process.
    #[error("mapping of file failed with error: {0}")]
    MappingViewFailed(u32),

    /// The agent did not answer the notification in time, or rejected it.
    #[error("message failed with error: {0}")]
    NotifyFailed(u32),

    /// A request frame does not fit in the shared memory region.
    #[error("message of {len} bytes exceeds maximum {max}")]
    MessageTooLarge {
        /// Wire length of the offending frame (prefix included).
        len: usize,
        /// Region capacity.
        max: usize,
    },

    /// Malformed frame or reply.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The socket was closed before the call.
    #[error("socket closed")]
    Closed,

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PageantError {
    /// True for failures of a single exchange with the agent.
    ///
    /// None of these are retried; the frame that caused them gets no reply.
    pub fn is_exchange_failure(&self) -> bool {
        matches!(
            self,
            PageantError::SecurityContext { .. }
                | PageantError::MappingCreateFailed(_)
                | PageantError::MappingViewFailed(_)
                | PageantError::NotifyFailed(_)
                | PageantError::MessageTooLarge { .. }
                | PageantError::Protocol(_)
        )
    }

    /// The OS error code attached to this error, if any.
    pub fn os_error_code(&self) -> Option<u32> {
        match self {
            PageantError::SecurityContext { code, .. }
            | PageantError::MappingCreateFailed(code)
            | PageantError::MappingViewFailed(code)
            | PageantError::NotifyFailed(code) => Some(*code),
            _ => None,
        }
    }
}

impl From<PageantError> for io::Error {
    fn from(err: PageantError) -> Self {
        let kind = match &err {
            PageantError::PeerUnavailable => io::ErrorKind::NotFound,
            PageantError::NotifyFailed(_) => io::ErrorKind::TimedOut,
            PageantError::Closed => io::ErrorKind::NotConnected,
            PageantError::MessageTooLarge { .. } => io::ErrorKind::InvalidInput,
            PageantError::Protocol(_) => io::ErrorKind::InvalidData,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Result type alias using PageantError.
pub type Result<T> = std::result::Result<T, PageantError>;
