//! Locating the agent's message window.

use std::ffi::CStr;

use crate::error::{PageantError, Result};
use crate::native::{NativeApi, WindowHandle};

/// The agent window, resolved once per socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerHandle {
    window: WindowHandle,
}

impl PeerHandle {
    /// Get the underlying window handle.
    #[inline]
    pub fn window(&self) -> WindowHandle {
        self.window
    }
}

/// Find the agent window by class and title.
///
/// A missing window is [`PageantError::PeerUnavailable`], the normal
/// outcome when Pageant is not running.
pub fn find_peer<A: NativeApi + ?Sized>(api: &A, class: &CStr, title: &CStr) -> Result<PeerHandle> {
    match api.find_window(class, title) {
        Some(window) if window.0 != 0 => {
            tracing::debug!(window = window.0, "found agent window");
            Ok(PeerHandle { window })
        }
        _ => {
            tracing::debug!(?class, ?title, "agent window not found");
            Err(PageantError::PeerUnavailable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeApi;

    #[test]
    fn test_find_running_agent() {
        let api = FakeApi::new();

        let peer = find_peer(&api, c"Pageant", c"Pageant").unwrap();

        assert_eq!(peer.window(), api.agent_window().unwrap());
    }

    #[test]
    fn test_missing_agent_is_peer_unavailable() {
        let api = FakeApi::without_agent();

        let err = find_peer(&api, c"Pageant", c"Pageant").unwrap_err();

        assert!(matches!(err, PageantError::PeerUnavailable));
    }

    #[test]
    fn test_wrong_title_is_peer_unavailable() {
        let api = FakeApi::new();

        let err = find_peer(&api, c"Pageant", c"Not Pageant").unwrap_err();

        assert!(matches!(err, PageantError::PeerUnavailable));
    }
}
