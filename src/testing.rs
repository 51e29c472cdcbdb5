//! In-process stand-in for the native API and the agent behind it.
//!
//! [`FakeApi`] implements [`NativeApi`] with real heap memory for regions,
//! records every call, and answers notifications with a scripted responder,
//! so the socket can be driven end to end without Windows or a running
//! Pageant.
//!
//! Built for unit tests and behind the `testing` feature.
//!
//! # Example
//!
//! ```
//! use pageant_client::protocol::build_frame;
//! use pageant_client::testing::FakeApi;
//! use pageant_client::PageantSocket;
//!
//! let api = FakeApi::new().respond_with(|_request| build_frame(b"ok").unwrap());
//! let mut socket = PageantSocket::with_api(api.clone()).unwrap();
//!
//! socket.send(b"\x00\x00\x00\x03abc").unwrap();
//! assert_eq!(&socket.read(None)[..], b"\x00\x00\x00\x02ok");
//! assert_eq!(api.open_handles(), 0);
//! ```

use std::collections::{HashMap, HashSet};
use std::ffi::{c_void, CStr};
use std::fmt;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;
use std::time::Duration;

use crate::native::{
    CopyData, NativeApi, RawHandle, SecurityAttributes, SecurityDescriptor, TokenUser,
    WindowHandle, SECURITY_DESCRIPTOR_REVISION,
};
use crate::protocol::{
    decode_length, AGENT_COPYDATA_ID, LENGTH_PREFIX_SIZE, PAGEANT_WINDOW_CLASS,
    PAGEANT_WINDOW_TITLE,
};

/// `ERROR_INVALID_WINDOW_HANDLE`.
const ERROR_INVALID_WINDOW_HANDLE: u32 = 1400;
/// `ERROR_FILE_NOT_FOUND`.
const ERROR_FILE_NOT_FOUND: u32 = 2;
/// `ERROR_INVALID_HANDLE`.
const ERROR_INVALID_HANDLE: u32 = 6;

const FAKE_WINDOW: WindowHandle = WindowHandle(0x1000);
const FAKE_SID: usize = 0x5151;

/// A native call observed by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    FindWindow { class: String, title: String },
    OpenProcessToken,
    TokenUser,
    InitializeSecurityDescriptor,
    SetSecurityDescriptorOwner,
    IsValidSecurityDescriptor,
    CreateFileMapping {
        name: String,
        size: u32,
        /// Attributes carried a descriptor and were inheritable.
        secured: bool,
    },
    MapViewOfFile,
    UnmapViewOfFile,
    CloseHandle(RawHandle),
    SendMessage {
        name: String,
        signature: u32,
        size: u32,
        timeout: Duration,
    },
}

/// A native step the fake can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    OpenProcessToken,
    TokenInformation,
    InitializeDescriptor,
    SetOwner,
    ValidateDescriptor,
    CreateMapping,
    MapView,
    /// Delivery of the notification fails or times out.
    Notify,
    /// The agent receives the notification and refuses it.
    Reject,
}

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

struct Region {
    name: String,
    addr: usize,
    len: usize,
    handle_open: bool,
    views: usize,
}

impl Region {
    fn alloc(name: String, len: usize) -> Self {
        let memory: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        let addr = Box::into_raw(memory) as *mut u8 as usize;
        Self {
            name,
            addr,
            len,
            handle_open: true,
            views: 0,
        }
    }

    fn is_live(&self) -> bool {
        self.handle_open || self.views > 0
    }

    /// SAFETY: the region must not have been freed, and no other access to
    /// its memory may be in progress.
    unsafe fn memory(&mut self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.addr as *mut u8, self.len)
    }

    fn free(&mut self) {
        // SAFETY: `addr`/`len` come from `Box::into_raw` in `alloc` and are
        // freed exactly once, when the region stops being live.
        unsafe {
            let slice = std::ptr::slice_from_raw_parts_mut(self.addr as *mut u8, self.len);
            drop(Box::from_raw(slice));
        }
    }
}

struct FakeState {
    agent_running: bool,
    last_error: u32,
    next_handle: isize,
    thread_ids: HashMap<ThreadId, u32>,
    tokens: HashSet<isize>,
    regions: HashMap<isize, Region>,
    failures: HashMap<FailPoint, u32>,
    responder: Responder,
    calls: Vec<Call>,
    requests: Vec<Vec<u8>>,
    regions_created: usize,
}

impl FakeState {
    fn alloc_handle(&mut self) -> isize {
        self.next_handle += 4;
        self.next_handle
    }

    fn fail(&mut self, point: FailPoint) -> bool {
        match self.failures.get(&point) {
            Some(&code) => {
                self.last_error = code;
                true
            }
            None => false,
        }
    }

    fn region_by_view(&mut self, addr: usize) -> Option<(isize, &mut Region)> {
        self.regions
            .iter_mut()
            .find(|(_, region)| region.addr == addr && region.views > 0)
            .map(|(handle, region)| (*handle, region))
    }

    fn release_if_dead(&mut self, handle: isize) {
        let dead = self
            .regions
            .get(&handle)
            .is_some_and(|region| !region.is_live());
        if dead {
            if let Some(mut region) = self.regions.remove(&handle) {
                region.free();
            }
        }
    }
}

impl Drop for FakeState {
    fn drop(&mut self) {
        for (_, mut region) in self.regions.drain() {
            region.free();
        }
    }
}

/// Scripted, call-recording [`NativeApi`].
///
/// Clones share state, so a test keeps one clone for inspection and hands
/// another to the socket.
#[derive(Clone)]
pub struct FakeApi {
    state: Arc<Mutex<FakeState>>,
}

impl FakeApi {
    /// An agent is running and echoes every request back.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                agent_running: true,
                last_error: 0,
                next_handle: 0x100,
                thread_ids: HashMap::new(),
                tokens: HashSet::new(),
                regions: HashMap::new(),
                failures: HashMap::new(),
                responder: Box::new(|request| request.to_vec()),
                calls: Vec::new(),
                requests: Vec::new(),
                regions_created: 0,
            })),
        }
    }

    /// No agent window exists.
    pub fn without_agent() -> Self {
        let api = Self::new();
        api.lock().agent_running = false;
        api
    }

    /// Answer each request (full wire bytes) with the returned wire bytes.
    pub fn respond_with<F>(self, responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        self.lock().responder = Box::new(responder);
        self
    }

    /// Make `point` fail with OS error `code`.
    pub fn fail_at(self, point: FailPoint, code: u32) -> Self {
        self.lock().failures.insert(point, code);
        self
    }

    /// Stop failing at `point`.
    pub fn clear_failure(&self, point: FailPoint) {
        self.lock().failures.remove(&point);
    }

    /// Make the agent window disappear (or reappear).
    pub fn set_agent_running(&self, running: bool) {
        self.lock().agent_running = running;
    }

    /// The agent window handle, if the agent is running.
    pub fn agent_window(&self) -> Option<WindowHandle> {
        self.lock().agent_running.then_some(FAKE_WINDOW)
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Number of calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|call| pred(call)).count()
    }

    /// Request frames the agent received, in order.
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.lock().requests.clone()
    }

    /// Number of notifications the agent answered.
    pub fn exchanges(&self) -> usize {
        self.lock().requests.len()
    }

    /// Region names passed to `CreateFileMapping`, in order.
    pub fn channel_names(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::CreateFileMapping { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of regions successfully created.
    pub fn regions_created(&self) -> usize {
        self.lock().regions_created
    }

    /// Token and mapping handles not yet closed.
    pub fn open_handles(&self) -> usize {
        let state = self.lock();
        state.tokens.len()
            + state
                .regions
                .values()
                .filter(|region| region.handle_open)
                .count()
    }

    /// Views not yet unmapped.
    pub fn mapped_views(&self) -> usize {
        self.lock().regions.values().map(|region| region.views).sum()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FakeApi {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FakeApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("FakeApi")
            .field("agent_running", &state.agent_running)
            .field("calls", &state.calls.len())
            .field("regions", &state.regions.len())
            .finish()
    }
}

impl NativeApi for FakeApi {
    fn find_window(&self, class: &CStr, title: &CStr) -> Option<WindowHandle> {
        let mut state = self.lock();
        let class = class.to_string_lossy().into_owned();
        let title = title.to_string_lossy().into_owned();
        let matches = class == PAGEANT_WINDOW_CLASS && title == PAGEANT_WINDOW_TITLE;
        state.calls.push(Call::FindWindow { class, title });

        if state.agent_running && matches {
            Some(FAKE_WINDOW)
        } else {
            state.last_error = 0;
            None
        }
    }

    fn current_thread_id(&self) -> u32 {
        let mut state = self.lock();
        let next = state.thread_ids.len() as u32 + 1;
        *state
            .thread_ids
            .entry(std::thread::current().id())
            .or_insert(next)
    }

    fn last_error(&self) -> u32 {
        self.lock().last_error
    }

    fn open_process_token(&self) -> Option<RawHandle> {
        let mut state = self.lock();
        state.calls.push(Call::OpenProcessToken);
        if state.fail(FailPoint::OpenProcessToken) {
            return None;
        }
        let handle = state.alloc_handle();
        state.tokens.insert(handle);
        Some(RawHandle(handle))
    }

    fn token_user(&self, token: RawHandle) -> Option<TokenUser> {
        let mut state = self.lock();
        state.calls.push(Call::TokenUser);
        if state.fail(FailPoint::TokenInformation) {
            return None;
        }
        if !state.tokens.contains(&token.0) {
            state.last_error = ERROR_INVALID_HANDLE;
            return None;
        }
        Some(TokenUser::from_sid(FAKE_SID as *mut c_void))
    }

    fn initialize_security_descriptor(&self, descriptor: &mut SecurityDescriptor) -> bool {
        let mut state = self.lock();
        state.calls.push(Call::InitializeSecurityDescriptor);
        if state.fail(FailPoint::InitializeDescriptor) {
            return false;
        }
        *descriptor = SecurityDescriptor::zeroed();
        descriptor.revision = SECURITY_DESCRIPTOR_REVISION as u8;
        true
    }

    fn set_security_descriptor_owner(
        &self,
        descriptor: &mut SecurityDescriptor,
        owner: *mut c_void,
    ) -> bool {
        let mut state = self.lock();
        state.calls.push(Call::SetSecurityDescriptorOwner);
        if state.fail(FailPoint::SetOwner) {
            return false;
        }
        descriptor.owner = owner;
        true
    }

    fn is_valid_security_descriptor(&self, descriptor: &SecurityDescriptor) -> bool {
        let mut state = self.lock();
        state.calls.push(Call::IsValidSecurityDescriptor);
        if state.fail(FailPoint::ValidateDescriptor) {
            return false;
        }
        descriptor.revision == SECURITY_DESCRIPTOR_REVISION as u8 && !descriptor.owner.is_null()
    }

    fn create_file_mapping(
        &self,
        attributes: &SecurityAttributes,
        size: u32,
        name: &CStr,
    ) -> Option<RawHandle> {
        let mut state = self.lock();
        let name = name.to_string_lossy().into_owned();
        state.calls.push(Call::CreateFileMapping {
            name: name.clone(),
            size,
            secured: !attributes.security_descriptor.is_null() && attributes.inherit_handle == 1,
        });
        if state.fail(FailPoint::CreateMapping) {
            return None;
        }
        let handle = state.alloc_handle();
        state
            .regions
            .insert(handle, Region::alloc(name, size as usize));
        state.regions_created += 1;
        Some(RawHandle(handle))
    }

    fn map_view_of_file(&self, mapping: RawHandle) -> Option<NonNull<u8>> {
        let mut state = self.lock();
        state.calls.push(Call::MapViewOfFile);
        if state.fail(FailPoint::MapView) {
            return None;
        }
        match state.regions.get_mut(&mapping.0) {
            Some(region) if region.handle_open => {
                region.views += 1;
                NonNull::new(region.addr as *mut u8)
            }
            _ => {
                state.last_error = ERROR_INVALID_HANDLE;
                None
            }
        }
    }

    fn unmap_view_of_file(&self, view: NonNull<u8>) -> bool {
        let mut state = self.lock();
        state.calls.push(Call::UnmapViewOfFile);
        let Some((handle, region)) = state.region_by_view(view.as_ptr() as usize) else {
            state.last_error = ERROR_INVALID_HANDLE;
            return false;
        };
        region.views -= 1;
        state.release_if_dead(handle);
        true
    }

    fn close_handle(&self, handle: RawHandle) -> bool {
        let mut state = self.lock();
        state.calls.push(Call::CloseHandle(handle));
        if state.tokens.remove(&handle.0) {
            return true;
        }
        match state.regions.get_mut(&handle.0) {
            Some(region) if region.handle_open => {
                region.handle_open = false;
                state.release_if_dead(handle.0);
                true
            }
            _ => {
                state.last_error = ERROR_INVALID_HANDLE;
                false
            }
        }
    }

    fn send_message_timeout(
        &self,
        window: WindowHandle,
        data: &CopyData<'_>,
        timeout: Duration,
    ) -> Option<usize> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let name = data.name.to_string_lossy().into_owned();
        state.calls.push(Call::SendMessage {
            name: name.clone(),
            signature: data.signature,
            size: data.size(),
            timeout,
        });

        if state.fail(FailPoint::Notify) {
            return None;
        }
        if !state.agent_running || window != FAKE_WINDOW {
            state.last_error = ERROR_INVALID_WINDOW_HANDLE;
            return None;
        }
        // From here on the message was delivered; the agent answers 0 when
        // it refuses the request.
        if state.fail(FailPoint::Reject) || data.signature != AGENT_COPYDATA_ID {
            return Some(0);
        }

        let Some(region) = state
            .regions
            .values_mut()
            .find(|region| region.name == name && region.handle_open)
        else {
            state.last_error = ERROR_FILE_NOT_FOUND;
            return Some(0);
        };

        // SAFETY: the region is live and the caller is blocked in this call,
        // so nothing else touches its memory.
        let memory = unsafe { region.memory() };
        let declared = decode_length(memory).unwrap_or(0) as usize;
        let end = (LENGTH_PREFIX_SIZE + declared).min(memory.len());
        let request = memory[..end].to_vec();

        let reply = (state.responder)(&request);
        let written = reply.len().min(memory.len());
        memory[..written].copy_from_slice(&reply[..written]);

        state.requests.push(request);
        Some(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_freed_after_unmap_and_close() {
        let api = FakeApi::new();
        let mut descriptor = SecurityDescriptor::zeroed();
        let attributes = SecurityAttributes::inheritable(&mut descriptor);

        let handle = api
            .create_file_mapping(&attributes, 64, c"PageantRequest1")
            .unwrap();
        let view = api.map_view_of_file(handle).unwrap();
        assert_eq!(api.open_handles(), 1);
        assert_eq!(api.mapped_views(), 1);

        assert!(api.close_handle(handle));
        // The view keeps the memory alive after the handle is closed.
        assert_eq!(api.mapped_views(), 1);
        assert!(api.unmap_view_of_file(view));
        assert_eq!(api.mapped_views(), 0);
        assert_eq!(api.open_handles(), 0);
    }

    #[test]
    fn test_double_close_fails() {
        let api = FakeApi::new();
        let token = api.open_process_token().unwrap();

        assert!(api.close_handle(token));
        assert!(!api.close_handle(token));
        assert_eq!(api.last_error(), ERROR_INVALID_HANDLE);
    }

    #[test]
    fn test_thread_ids_are_stable_and_distinct() {
        let api = FakeApi::new();
        let here = api.current_thread_id();
        assert_eq!(api.current_thread_id(), here);

        let other = {
            let api = api.clone();
            std::thread::spawn(move || api.current_thread_id())
                .join()
                .unwrap()
        };
        assert_ne!(here, other);
    }

    #[test]
    fn test_notification_for_unknown_region_is_refused() {
        let api = FakeApi::new();
        let data = CopyData::new(AGENT_COPYDATA_ID, c"PageantRequestMissing");

        let answer = api.send_message_timeout(FAKE_WINDOW, &data, Duration::from_secs(1));

        assert_eq!(answer, Some(0));
        assert_eq!(api.last_error(), ERROR_FILE_NOT_FOUND);
    }

    #[test]
    fn test_notification_without_agent_is_undelivered() {
        let api = FakeApi::without_agent();
        let data = CopyData::new(AGENT_COPYDATA_ID, c"PageantRequest1");

        let answer = api.send_message_timeout(FAKE_WINDOW, &data, Duration::from_secs(1));

        assert_eq!(answer, None);
        assert_eq!(api.last_error(), ERROR_INVALID_WINDOW_HANDLE);
    }
}
