//! Socket builder and the socket-like adapter.
//!
//! [`PageantSocket`] looks like a connected stream socket to an agent
//! client: bytes go in through [`send`](PageantSocket::send), replies come
//! out through [`read`](PageantSocket::read). Underneath, every complete
//! length-prefixed frame is handed to the agent synchronously inside `send`:
//! 1. Append the bytes to the frame buffer
//! 2. Split off each complete frame, oldest first
//! 3. Exchange it with the agent over shared memory
//! 4. Queue the reply for `read`
//!
//! # Example
//!
//! ```ignore
//! use pageant_client::PageantSocket;
//!
//! let mut socket = PageantSocket::open(None)?;
//! // SSH2_AGENTC_REQUEST_IDENTITIES
//! socket.send(&[0, 0, 0, 1, 11])?;
//! let reply = socket.read(None);
//! ```

use std::io;

use bytes::Bytes;

use crate::config::SocketConfig;
use crate::error::{PageantError, Result};
use crate::native::NativeApi;
use crate::protocol::{FrameBuffer, ReplyQueue};
use crate::transport::{find_peer, ExchangeChannel, PeerHandle};

#[cfg(windows)]
use crate::native::Win32Api;

/// Builder for configuring and connecting a [`PageantSocket`].
#[derive(Debug, Clone, Default)]
pub struct SocketBuilder {
    config: SocketConfig,
}

impl SocketBuilder {
    /// Create a builder with Pageant's defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn with_config(config: SocketConfig) -> Self {
        Self { config }
    }

    /// Set the agent window class.
    ///
    /// Default: `"Pageant"`
    pub fn window_class(mut self, class: impl Into<String>) -> Self {
        self.config.window_class = class.into();
        self
    }

    /// Set the agent window title.
    ///
    /// Default: `"Pageant"`
    pub fn window_title(mut self, title: impl Into<String>) -> Self {
        self.config.window_title = title.into();
        self
    }

    /// Set the shared region size, which bounds every request and reply.
    ///
    /// Default: 8192
    pub fn max_message_len(mut self, len: usize) -> Self {
        self.config.max_message_len = len;
        self
    }

    /// Set how long the agent gets to answer one request.
    ///
    /// Default: 5 seconds
    pub fn notify_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.notify_timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    /// Set the shared region name prefix.
    ///
    /// Default: `"PageantRequest"`
    pub fn channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.channel_prefix = prefix.into();
        self
    }

    /// Get the configuration built so far.
    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// Locate the agent through `api` and build the socket.
    ///
    /// Fails with [`PageantError::PeerUnavailable`] if no agent window
    /// exists; nothing else is touched in that case.
    pub fn connect<A: NativeApi>(self, api: A) -> Result<PageantSocket<A>> {
        self.config.validate()?;

        let class = self.config.window_class_cstr()?;
        let title = self.config.window_title_cstr()?;
        let capacity = u32::try_from(self.config.max_message_len).map_err(|_| {
            PageantError::Config(format!(
                "max_message_len {} does not fit a shared region",
                self.config.max_message_len
            ))
        })?;
        let peer = find_peer(&api, &class, &title)?;

        let channel = ExchangeChannel::new(api, peer)
            .with_capacity(capacity)
            .with_timeout(self.config.notify_timeout())
            .with_name_prefix(self.config.channel_prefix.clone());

        Ok(PageantSocket {
            channel: Some(channel),
            input: FrameBuffer::with_max_frame(self.config.max_message_len),
            output: ReplyQueue::new(),
            write_error: None,
        })
    }
}

/// Socket-like connection to a running agent.
///
/// Not meant to be shared between threads mid-conversation: methods take
/// `&mut self`, so use one socket per caller or wrap it in a mutex.
#[derive(Debug)]
pub struct PageantSocket<A: NativeApi> {
    /// `None` once closed.
    channel: Option<ExchangeChannel<A>>,
    /// Bytes not yet forming a complete frame.
    input: FrameBuffer,
    /// Replies not yet read.
    output: ReplyQueue,
    /// Exchange failure behind an `io::Write::write` that already
    /// reported success.
    write_error: Option<PageantError>,
}

#[cfg(windows)]
impl PageantSocket<Win32Api> {
    /// Connect to the running Pageant with default settings.
    ///
    /// `location` is accepted for symmetry with other agent sockets and
    /// ignored.
    pub fn open(location: Option<&str>) -> Result<Self> {
        let _ = location;
        SocketBuilder::new().connect(Win32Api)
    }

    /// Check whether Pageant is running, without creating any resource.
    pub fn is_running() -> bool {
        pageant_available(&Win32Api)
    }

    /// Create a new socket builder.
    pub fn builder() -> SocketBuilder {
        SocketBuilder::new()
    }
}

impl<A: NativeApi> PageantSocket<A> {
    /// Connect through `api` with default settings.
    pub fn with_api(api: A) -> Result<Self> {
        SocketBuilder::new().connect(api)
    }

    /// Buffer `data` and exchange every frame it completes.
    ///
    /// Returns `data.len()` regardless of how many frames were exchanged.
    /// On failure the failing frame gets no reply and any frames buffered
    /// behind it stay buffered. Except for [`PageantError::Closed`], `data`
    /// has been buffered even when an error is returned, so it must not be
    /// sent again.
    pub fn send(&mut self, data: &[u8]) -> Result<usize> {
        let channel = self.channel.as_ref().ok_or(PageantError::Closed)?;

        self.input.extend(data);

        while let Some(frame) = self.input.next_frame()? {
            let reply = channel.exchange(&frame)?;
            self.output.push(reply.as_bytes());
        }

        tracing::trace!(
            accepted = data.len(),
            pending = self.input.len(),
            queued = self.output.len(),
            "send complete"
        );
        Ok(data.len())
    }

    /// Take up to `n` queued reply bytes (all of them for `None`).
    ///
    /// Never blocks; returns empty bytes when nothing is queued.
    pub fn read(&mut self, n: Option<usize>) -> Bytes {
        self.output.read(n)
    }

    /// Release the agent reference. Buffered bytes are not flushed.
    pub fn close(&mut self) {
        if self.channel.take().is_some() {
            tracing::debug!(
                discarded = self.input.len(),
                "pageant socket closed"
            );
        }
    }

    /// True after [`close`](Self::close).
    pub fn is_closed(&self) -> bool {
        self.channel.is_none()
    }

    /// The agent this socket talks to, while open.
    pub fn peer(&self) -> Option<PeerHandle> {
        self.channel.as_ref().map(ExchangeChannel::peer)
    }

    /// Bytes written but not yet forming a complete frame.
    pub fn pending_input(&self) -> usize {
        self.input.len()
    }

    /// Reply bytes ready to read.
    pub fn available(&self) -> usize {
        self.output.len()
    }
}

/// `write` reports an error only when nothing was buffered. An exchange
/// failure after `buf` was taken is returned by the next `write` (which then
/// buffers nothing) or by `flush`. `flush` also exchanges any complete frames
/// left behind by an earlier failure.
impl<A: NativeApi> io::Write for PageantSocket<A> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(err) = self.write_error.take() {
            return Err(err.into());
        }
        match self.send(buf) {
            Ok(n) => Ok(n),
            Err(PageantError::Closed) => Err(PageantError::Closed.into()),
            Err(err) => {
                tracing::debug!(error = %err, "deferring exchange failure");
                self.write_error = Some(err);
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(err) = self.write_error.take() {
            return Err(err.into());
        }
        self.send(&[])?;
        Ok(())
    }
}

impl<A: NativeApi> io::Read for PageantSocket<A> {
    /// Copies queued reply bytes; `Ok(0)` when none are queued.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.output.read_into(buf))
    }
}

/// Whether an agent window with Pageant's class and title exists.
pub fn pageant_available<A: NativeApi + ?Sized>(api: &A) -> bool {
    let config = SocketConfig::default();
    match (config.window_class_cstr(), config.window_title_cstr()) {
        (Ok(class), Ok(title)) => find_peer(api, &class, &title).is_ok(),
        _ => false,
    }
}
