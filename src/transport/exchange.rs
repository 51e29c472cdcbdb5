//! Shared-memory exchange with the agent.
//!
//! One exchange is one request/reply round trip:
//!
//! ```text
//! client                                   agent
//!   │ CreateFileMapping(name, owner = user)
//!   │ MapViewOfFile
//!   │ write [len BE][request] at offset 0
//!   │ ── WM_COPYDATA {AGENT_COPYDATA_ID, name} ──►  OpenFileMapping(name)
//!   │                                              read request
//!   │                                              write [len BE][reply]
//!   │ ◄──────────── SendMessageTimeout returns ──
//!   │ read [len BE][reply] at offset 0
//!   │ UnmapViewOfFile, CloseHandle
//! ```
//!
//! The region and its view exist only for the duration of
//! [`ExchangeChannel::exchange`] and are released on every exit path.

use std::ffi::CString;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use bytes::Bytes;

use super::locator::PeerHandle;
use super::security::access_descriptor_for_current_user;
use crate::error::{PageantError, Result};
use crate::native::guard::{MappedView, OwnedHandle};
use crate::native::{CopyData, NativeApi};
use crate::protocol::{
    decode_length, Frame, AGENT_COPYDATA_ID, AGENT_MAX_MSGLEN, CHANNEL_NAME_PREFIX,
    DEFAULT_NOTIFY_TIMEOUT, LENGTH_PREFIX_SIZE,
};

/// Process-wide exchange counter, part of every region name.
static NEXT_EXCHANGE: AtomicU32 = AtomicU32::new(0);

/// Performs exchanges with one located agent.
#[derive(Debug)]
pub struct ExchangeChannel<A: NativeApi> {
    api: A,
    peer: PeerHandle,
    capacity: u32,
    timeout: Duration,
    name_prefix: String,
}

impl<A: NativeApi> ExchangeChannel<A> {
    /// Create a channel with Pageant's default capacity and timeout.
    pub fn new(api: A, peer: PeerHandle) -> Self {
        Self {
            api,
            peer,
            capacity: AGENT_MAX_MSGLEN as u32,
            timeout: DEFAULT_NOTIFY_TIMEOUT,
            name_prefix: CHANNEL_NAME_PREFIX.to_string(),
        }
    }

    /// Set the region size (bounds request and reply wire length).
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set how long the agent gets to answer.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the region name prefix.
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Get the located agent.
    pub fn peer(&self) -> PeerHandle {
        self.peer
    }

    /// Hand `request` to the agent and return its reply.
    ///
    /// Fails without touching any native resource if the frame does not fit
    /// the region. Any other failure happens after acquisition and still
    /// unmaps the view and closes the region.
    pub fn exchange(&self, request: &Frame) -> Result<Frame> {
        // The view is exactly as large as the region asked for.
        let size = self.capacity as usize;
        if request.wire_len() > size {
            return Err(PageantError::MessageTooLarge {
                len: request.wire_len(),
                max: size,
            });
        }

        let access = access_descriptor_for_current_user(&self.api)?;
        let name = self.channel_name()?;
        let api = &self.api;

        let mapping = api
            .create_file_mapping(access.attributes(), self.capacity, &name)
            .ok_or_else(|| {
                let code = api.last_error();
                tracing::warn!(channel = ?name, code, "CreateFileMapping failed");
                PageantError::MappingCreateFailed(code)
            })?;
        let mapping = OwnedHandle::new(api, mapping);

        let mut view = api
            .map_view_of_file(mapping.raw())
            .map(|ptr| MappedView::new(api, ptr, size))
            .ok_or_else(|| {
                let code = api.last_error();
                tracing::warn!(channel = ?name, code, "MapViewOfFile failed");
                PageantError::MappingViewFailed(code)
            })?;

        view.write(0, request.as_bytes());

        tracing::debug!(
            channel = ?name,
            request_len = request.wire_len(),
            "notifying agent"
        );

        let notification = CopyData::new(AGENT_COPYDATA_ID, &name);
        match api.send_message_timeout(self.peer.window(), &notification, self.timeout) {
            Some(0) => {
                // Delivered, but the agent left no reply in the region.
                let code = api.last_error();
                tracing::warn!(channel = ?name, code, "agent rejected request");
                return Err(PageantError::NotifyFailed(code));
            }
            Some(_) => {}
            None => {
                let code = api.last_error();
                tracing::warn!(channel = ?name, code, "agent did not accept request");
                return Err(PageantError::NotifyFailed(code));
            }
        }

        let reply = read_reply(&view)?;
        tracing::debug!(channel = ?name, reply_len = reply.wire_len(), "agent replied");
        Ok(reply)
    }

    /// Region name for one exchange: prefix, thread id, sequence number.
    ///
    /// Distinct for every exchange in this process, so concurrent callers
    /// never share a region.
    fn channel_name(&self) -> Result<CString> {
        let sequence = NEXT_EXCHANGE.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "{}{:08x}{:08x}",
            self.name_prefix,
            self.api.current_thread_id(),
            sequence
        );
        CString::new(name)
            .map_err(|_| PageantError::Config("channel prefix contains a NUL byte".to_string()))
    }
}

fn read_reply<A: NativeApi + ?Sized>(view: &MappedView<'_, A>) -> Result<Frame> {
    let prefix = view.read(0, LENGTH_PREFIX_SIZE);
    let declared = decode_length(&prefix).unwrap_or(0) as usize;

    if declared > view.len() - LENGTH_PREFIX_SIZE {
        return Err(PageantError::Protocol(format!(
            "reply length {} exceeds region of {} bytes",
            declared,
            view.len()
        )));
    }

    Frame::from_wire(Bytes::from(view.read(0, LENGTH_PREFIX_SIZE + declared)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::build_frame;
    use crate::testing::{Call, FailPoint, FakeApi};
    use crate::transport::find_peer;

    fn channel(api: &FakeApi) -> ExchangeChannel<FakeApi> {
        let peer = find_peer(api, c"Pageant", c"Pageant").unwrap();
        ExchangeChannel::new(api.clone(), peer)
    }

    #[test]
    fn test_exchange_round_trip() {
        let api = FakeApi::new().respond_with(|_| build_frame(b"ok").unwrap());
        let channel = channel(&api);

        let reply = channel.exchange(&Frame::new(b"abc").unwrap()).unwrap();

        assert_eq!(reply.as_bytes(), b"\x00\x00\x00\x02ok");
        assert_eq!(api.requests(), vec![b"\x00\x00\x00\x03abc".to_vec()]);
        assert_eq!(api.open_handles(), 0);
        assert_eq!(api.mapped_views(), 0);
    }

    #[test]
    fn test_notification_carries_signature_and_name() {
        let api = FakeApi::new();
        let channel = channel(&api);

        channel.exchange(&Frame::new(b"x").unwrap()).unwrap();

        let names = api.channel_names();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("PageantRequest"));
        assert!(api.calls().iter().any(|call| matches!(
            call,
            Call::SendMessage { signature, size, .. }
                if *signature == AGENT_COPYDATA_ID && *size as usize == names[0].len() + 1
        )));
    }

    #[test]
    fn test_region_created_with_capacity_and_descriptor() {
        let api = FakeApi::new();
        let channel = channel(&api).with_capacity(1024);

        channel.exchange(&Frame::new(b"x").unwrap()).unwrap();

        assert!(api.calls().iter().any(|call| matches!(
            call,
            Call::CreateFileMapping { size: 1024, secured: true, .. }
        )));
    }

    #[test]
    fn test_timeout_passed_to_notification() {
        let api = FakeApi::new();
        let channel = channel(&api).with_timeout(Duration::from_millis(250));

        channel.exchange(&Frame::new(b"x").unwrap()).unwrap();

        assert!(api.calls().iter().any(|call| matches!(
            call,
            Call::SendMessage { timeout, .. } if *timeout == Duration::from_millis(250)
        )));
    }

    #[test]
    fn test_notify_failure_releases_resources() {
        let api = FakeApi::new().fail_at(FailPoint::Notify, 1460);
        let channel = channel(&api);

        let err = channel.exchange(&Frame::new(b"abc").unwrap()).unwrap_err();

        assert!(matches!(err, PageantError::NotifyFailed(1460)));
        assert_eq!(api.mapped_views(), 0);
        assert_eq!(api.open_handles(), 0);
        assert_eq!(api.count(|call| matches!(call, Call::UnmapViewOfFile)), 1);
        assert_eq!(api.count(|call| matches!(call, Call::CloseHandle(_))), 2);
    }

    #[test]
    fn test_refused_request_is_not_read_back() {
        let api = FakeApi::new().fail_at(FailPoint::Reject, 5);
        let channel = channel(&api);

        let err = channel.exchange(&Frame::new(b"abc").unwrap()).unwrap_err();

        assert!(matches!(err, PageantError::NotifyFailed(5)));
        assert!(api.requests().is_empty());
        assert_eq!(api.mapped_views(), 0);
        assert_eq!(api.open_handles(), 0);
    }

    #[test]
    fn test_view_matches_region_size() {
        let api = FakeApi::new().respond_with(|_| build_frame(&[1u8; 28]).unwrap());
        let channel = channel(&api).with_capacity(32);

        let reply = channel.exchange(&Frame::new(&[9u8; 28]).unwrap()).unwrap();
        assert_eq!(reply.wire_len(), 32);
        assert!(api.calls().iter().any(|call| matches!(
            call,
            Call::CreateFileMapping { size: 32, .. }
        )));

        let err = channel.exchange(&Frame::new(&[9u8; 29]).unwrap()).unwrap_err();
        assert!(matches!(err, PageantError::MessageTooLarge { len: 33, max: 32 }));
        assert_eq!(api.regions_created(), 1);
    }

    #[test]
    fn test_unmap_happens_before_close() {
        let api = FakeApi::new().fail_at(FailPoint::Notify, 1460);
        let channel = channel(&api);

        let _ = channel.exchange(&Frame::new(b"abc").unwrap());

        let calls = api.calls();
        let unmap = calls
            .iter()
            .position(|call| matches!(call, Call::UnmapViewOfFile))
            .unwrap();
        let close = calls
            .iter()
            .rposition(|call| matches!(call, Call::CloseHandle(_)))
            .unwrap();
        assert!(unmap < close);
    }

    #[test]
    fn test_map_failure_closes_region() {
        let api = FakeApi::new().fail_at(FailPoint::MapView, 8);
        let channel = channel(&api);

        let err = channel.exchange(&Frame::new(b"abc").unwrap()).unwrap_err();

        assert!(matches!(err, PageantError::MappingViewFailed(8)));
        assert_eq!(api.open_handles(), 0);
        assert_eq!(api.count(|call| matches!(call, Call::SendMessage { .. })), 0);
    }

    #[test]
    fn test_create_failure() {
        let api = FakeApi::new().fail_at(FailPoint::CreateMapping, 5);
        let channel = channel(&api);

        let err = channel.exchange(&Frame::new(b"abc").unwrap()).unwrap_err();

        assert!(matches!(err, PageantError::MappingCreateFailed(5)));
        assert_eq!(api.count(|call| matches!(call, Call::MapViewOfFile)), 0);
        assert_eq!(api.open_handles(), 0);
    }

    #[test]
    fn test_security_failure_creates_nothing() {
        let api = FakeApi::new().fail_at(FailPoint::SetOwner, 1337);
        let channel = channel(&api);

        let err = channel.exchange(&Frame::new(b"abc").unwrap()).unwrap_err();

        assert!(matches!(err, PageantError::SecurityContext { code: 1337, .. }));
        assert_eq!(api.regions_created(), 0);
    }

    #[test]
    fn test_oversized_request_rejected_before_acquisition() {
        let api = FakeApi::new();
        let channel = channel(&api).with_capacity(16);

        let err = channel.exchange(&Frame::new(&[0u8; 13]).unwrap()).unwrap_err();

        assert!(matches!(err, PageantError::MessageTooLarge { len: 17, max: 16 }));
        assert_eq!(api.regions_created(), 0);
        assert_eq!(
            api.count(|call| matches!(call, Call::OpenProcessToken)),
            0
        );
    }

    #[test]
    fn test_request_filling_region_exactly() {
        let api = FakeApi::new();
        let channel = channel(&api).with_capacity(16);

        let reply = channel.exchange(&Frame::new(&[7u8; 12]).unwrap()).unwrap();

        assert_eq!(reply.payload(), &[7u8; 12]);
    }

    #[test]
    fn test_oversized_reply_is_protocol_error() {
        let api = FakeApi::new().respond_with(|_| vec![0xff, 0xff, 0xff, 0xff]);
        let channel = channel(&api);

        let err = channel.exchange(&Frame::new(b"abc").unwrap()).unwrap_err();

        assert!(matches!(err, PageantError::Protocol(_)));
        assert_eq!(api.open_handles(), 0);
        assert_eq!(api.mapped_views(), 0);
    }

    #[test]
    fn test_channel_names_unique_per_exchange() {
        let api = FakeApi::new();
        let channel = channel(&api);

        for _ in 0..3 {
            channel.exchange(&Frame::new(b"x").unwrap()).unwrap();
        }

        let mut names = api.channel_names();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn test_channel_name_embeds_thread_id() {
        let api = FakeApi::new();
        let channel = channel(&api);
        let thread_id = api.current_thread_id();

        channel.exchange(&Frame::new(b"x").unwrap()).unwrap();

        let expected = format!("PageantRequest{:08x}", thread_id);
        assert!(api.channel_names()[0].starts_with(&expected));
    }

    #[test]
    fn test_custom_prefix() {
        let api = FakeApi::new();
        let channel = channel(&api).with_name_prefix("MyAgentRequest");

        channel.exchange(&Frame::new(b"x").unwrap()).unwrap();

        assert!(api.channel_names()[0].starts_with("MyAgentRequest"));
    }
}
