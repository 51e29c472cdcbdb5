//! Native capability interface.
//!
//! Everything the adapter needs from the operating system goes through the
//! [`NativeApi`] trait, one method per native entry point:
//!
//! | Method | Win32 call |
//! |---|---|
//! | `find_window` | `FindWindowA` |
//! | `current_thread_id` | `GetCurrentThreadId` |
//! | `last_error` | `GetLastError` |
//! | `open_process_token` | `OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY)` |
//! | `token_user` | `GetTokenInformation(TokenUser)` |
//! | `initialize_security_descriptor` | `InitializeSecurityDescriptor` |
//! | `set_security_descriptor_owner` | `SetSecurityDescriptorOwner` |
//! | `is_valid_security_descriptor` | `IsValidSecurityDescriptor` |
//! | `create_file_mapping` | `CreateFileMappingA(INVALID_HANDLE_VALUE, ..)` |
//! | `map_view_of_file` | `MapViewOfFile(FILE_MAP_WRITE)` |
//! | `unmap_view_of_file` | `UnmapViewOfFile` |
//! | `close_handle` | `CloseHandle` |
//! | `send_message_timeout` | `SendMessageTimeoutA(WM_COPYDATA, SMTO_NORMAL)` |
//!
//! - Windows: [`Win32Api`] binds the real entry points
//! - Tests: `testing::FakeApi` scripts results and records calls

pub(crate) mod guard;

#[cfg(windows)]
mod win32;

#[cfg(windows)]
pub use win32::Win32Api;

use std::ffi::{c_void, CStr};
use std::mem;
use std::ptr::{self, NonNull};
use std::time::Duration;

/// Revision passed to `InitializeSecurityDescriptor`.
pub const SECURITY_DESCRIPTOR_REVISION: u32 = 1;

/// An opaque kernel object handle (token or file mapping).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(pub isize);

impl RawHandle {
    /// `INVALID_HANDLE_VALUE`.
    pub const INVALID: RawHandle = RawHandle(-1);

    /// True unless the handle is null or `INVALID_HANDLE_VALUE`.
    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0 && self != Self::INVALID
    }
}

/// An opaque window handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub isize);

/// In-memory layout of an absolute `SECURITY_DESCRIPTOR`.
#[repr(C)]
#[derive(Debug)]
pub struct SecurityDescriptor {
    pub revision: u8,
    pub sbz1: u8,
    pub control: u16,
    pub owner: *mut c_void,
    pub group: *mut c_void,
    pub sacl: *mut c_void,
    pub dacl: *mut c_void,
}

impl SecurityDescriptor {
    /// An all-zero descriptor, ready for initialization.
    pub fn zeroed() -> Self {
        Self {
            revision: 0,
            sbz1: 0,
            control: 0,
            owner: ptr::null_mut(),
            group: ptr::null_mut(),
            sacl: ptr::null_mut(),
            dacl: ptr::null_mut(),
        }
    }
}

/// In-memory layout of `SECURITY_ATTRIBUTES`.
#[repr(C)]
#[derive(Debug)]
pub struct SecurityAttributes {
    pub length: u32,
    pub security_descriptor: *mut c_void,
    pub inherit_handle: i32,
}

impl SecurityAttributes {
    /// Inheritable attributes pointing at `descriptor`.
    pub fn inheritable(descriptor: &mut SecurityDescriptor) -> Self {
        Self {
            length: mem::size_of::<SecurityAttributes>() as u32,
            security_descriptor: (descriptor as *mut SecurityDescriptor).cast(),
            inherit_handle: 1,
        }
    }
}

/// Buffer filled by `GetTokenInformation(TokenUser)`.
///
/// Word-aligned so the leading `SID_AND_ATTRIBUTES` can be read in place.
/// The SID it points at lives inside the same buffer.
#[derive(Debug)]
pub struct TokenUser {
    words: Vec<usize>,
}

impl TokenUser {
    /// A zeroed buffer of at least `byte_len` bytes.
    pub fn with_byte_len(byte_len: usize) -> Self {
        let words = byte_len.div_ceil(mem::size_of::<usize>()).max(2);
        Self {
            words: vec![0; words],
        }
    }

    /// A buffer whose SID pointer is `sid` (used by fakes).
    pub fn from_sid(sid: *mut c_void) -> Self {
        let mut user = Self::with_byte_len(0);
        user.words[0] = sid as usize;
        user
    }

    /// Pointer for the native call to write into.
    pub fn as_mut_ptr(&mut self) -> *mut c_void {
        self.words.as_mut_ptr().cast()
    }

    /// Size of the buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.words.len() * mem::size_of::<usize>()
    }

    /// The user SID (`TOKEN_USER.User.Sid`).
    pub fn sid(&self) -> *mut c_void {
        self.words[0] as *mut c_void
    }
}

/// Payload of the `WM_COPYDATA` notification.
///
/// `dwData` carries the signature; `lpData`/`cbData` carry the
/// NUL-terminated region name.
#[derive(Debug, Clone, Copy)]
pub struct CopyData<'a> {
    pub signature: u32,
    pub name: &'a CStr,
}

impl<'a> CopyData<'a> {
    pub fn new(signature: u32, name: &'a CStr) -> Self {
        Self { signature, name }
    }

    /// `cbData`: name length including the terminating NUL.
    pub fn size(&self) -> u32 {
        self.name.to_bytes_with_nul().len() as u32
    }
}

/// Fixed set of operating-system operations used by the adapter.
///
/// Methods return `None`/`false` on failure; the caller then reads
/// [`last_error`](NativeApi::last_error) before any other native call.
pub trait NativeApi {
    /// Look up a top-level window by class and title.
    fn find_window(&self, class: &CStr, title: &CStr) -> Option<WindowHandle>;

    /// Numeric identity of the calling thread.
    fn current_thread_id(&self) -> u32;

    /// Error code of the most recent failed call on this thread.
    fn last_error(&self) -> u32;

    /// Open the current process token for querying.
    fn open_process_token(&self) -> Option<RawHandle>;

    /// Fetch the `TOKEN_USER` information of `token`.
    fn token_user(&self, token: RawHandle) -> Option<TokenUser>;

    fn initialize_security_descriptor(&self, descriptor: &mut SecurityDescriptor) -> bool;

    fn set_security_descriptor_owner(
        &self,
        descriptor: &mut SecurityDescriptor,
        owner: *mut c_void,
    ) -> bool;

    fn is_valid_security_descriptor(&self, descriptor: &SecurityDescriptor) -> bool;

    /// Create a pagefile-backed, named, read/write mapping of `size` bytes.
    fn create_file_mapping(
        &self,
        attributes: &SecurityAttributes,
        size: u32,
        name: &CStr,
    ) -> Option<RawHandle>;

    /// Map the whole of `mapping` for writing.
    fn map_view_of_file(&self, mapping: RawHandle) -> Option<NonNull<u8>>;

    fn unmap_view_of_file(&self, view: NonNull<u8>) -> bool;

    fn close_handle(&self, handle: RawHandle) -> bool;

    /// Deliver `data` to `window` and wait at most `timeout` for it to be
    /// processed.
    ///
    /// Returns the window's answer to the message (0 when it refused the
    /// request), or `None` if delivery failed or timed out.
    fn send_message_timeout(
        &self,
        window: WindowHandle,
        data: &CopyData<'_>,
        timeout: Duration,
    ) -> Option<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_validity() {
        assert!(RawHandle(0x40).is_valid());
        assert!(!RawHandle(0).is_valid());
        assert!(!RawHandle::INVALID.is_valid());
    }

    #[test]
    fn test_security_attributes_point_at_descriptor() {
        let mut descriptor = SecurityDescriptor::zeroed();
        let attributes = SecurityAttributes::inheritable(&mut descriptor);

        assert_eq!(attributes.inherit_handle, 1);
        assert_eq!(
            attributes.length as usize,
            mem::size_of::<SecurityAttributes>()
        );
        assert_eq!(
            attributes.security_descriptor,
            (&mut descriptor as *mut SecurityDescriptor).cast()
        );
    }

    #[test]
    fn test_token_user_sid_round_trip() {
        let sid = 0x5151usize as *mut c_void;
        let user = TokenUser::from_sid(sid);
        assert_eq!(user.sid(), sid);
    }

    #[test]
    fn test_token_user_rounds_up_to_words() {
        let user = TokenUser::with_byte_len(37);
        assert!(user.byte_len() >= 37);
        assert_eq!(user.byte_len() % mem::size_of::<usize>(), 0);
    }

    #[test]
    fn test_copy_data_size_counts_nul() {
        let name = c"PageantRequest0000002a";
        let data = CopyData::new(0x804e50ba, name);
        assert_eq!(data.size() as usize, name.to_bytes().len() + 1);
    }

    #[test]
    fn test_descriptor_layout_fits_native_minimum() {
        // SECURITY_DESCRIPTOR_MIN_LENGTH is 20 bytes on 32-bit, 40 on 64-bit.
        assert!(mem::size_of::<SecurityDescriptor>() >= 4 + 4 * mem::size_of::<usize>());
    }
}
