//! Win32 binding of [`NativeApi`].

use std::ffi::{c_void, CStr};
use std::ptr::{self, NonNull};
use std::time::Duration;

use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, HANDLE, HWND, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Security::{
    GetTokenInformation, InitializeSecurityDescriptor, IsValidSecurityDescriptor,
    SetSecurityDescriptorOwner, TokenUser as TOKEN_USER_CLASS, SECURITY_ATTRIBUTES, TOKEN_QUERY,
};
use windows_sys::Win32::System::DataExchange::COPYDATASTRUCT;
use windows_sys::Win32::System::Memory::{
    CreateFileMappingA, MapViewOfFile, UnmapViewOfFile, FILE_MAP_WRITE,
    MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE,
};
use windows_sys::Win32::System::Threading::{GetCurrentProcess, GetCurrentThreadId, OpenProcessToken};
use windows_sys::Win32::UI::WindowsAndMessaging::{
    FindWindowA, SendMessageTimeoutA, SMTO_NORMAL, WM_COPYDATA,
};

use super::{
    CopyData, NativeApi, RawHandle, SecurityAttributes, SecurityDescriptor, TokenUser,
    WindowHandle, SECURITY_DESCRIPTOR_REVISION,
};

/// The real Windows API.
#[derive(Debug, Clone, Copy, Default)]
pub struct Win32Api;

impl NativeApi for Win32Api {
    fn find_window(&self, class: &CStr, title: &CStr) -> Option<WindowHandle> {
        let hwnd = unsafe { FindWindowA(class.as_ptr().cast(), title.as_ptr().cast()) };
        (!hwnd.is_null()).then(|| WindowHandle(hwnd as isize))
    }

    fn current_thread_id(&self) -> u32 {
        unsafe { GetCurrentThreadId() }
    }

    fn last_error(&self) -> u32 {
        unsafe { GetLastError() }
    }

    fn open_process_token(&self) -> Option<RawHandle> {
        let mut token: HANDLE = ptr::null_mut();
        let ok = unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) };
        (ok != 0).then(|| RawHandle(token as isize))
    }

    fn token_user(&self, token: RawHandle) -> Option<TokenUser> {
        let token = token.0 as HANDLE;
        let mut needed = 0u32;

        // Size probe; always fails with ERROR_INSUFFICIENT_BUFFER.
        unsafe { GetTokenInformation(token, TOKEN_USER_CLASS, ptr::null_mut(), 0, &mut needed) };
        if needed == 0 {
            return None;
        }

        let mut user = TokenUser::with_byte_len(needed as usize);
        let ok = unsafe {
            GetTokenInformation(
                token,
                TOKEN_USER_CLASS,
                user.as_mut_ptr(),
                user.byte_len() as u32,
                &mut needed,
            )
        };
        (ok != 0).then_some(user)
    }

    fn initialize_security_descriptor(&self, descriptor: &mut SecurityDescriptor) -> bool {
        let psd: *mut c_void = (descriptor as *mut SecurityDescriptor).cast();
        unsafe { InitializeSecurityDescriptor(psd, SECURITY_DESCRIPTOR_REVISION) != 0 }
    }

    fn set_security_descriptor_owner(
        &self,
        descriptor: &mut SecurityDescriptor,
        owner: *mut c_void,
    ) -> bool {
        let psd: *mut c_void = (descriptor as *mut SecurityDescriptor).cast();
        unsafe { SetSecurityDescriptorOwner(psd, owner, 0) != 0 }
    }

    fn is_valid_security_descriptor(&self, descriptor: &SecurityDescriptor) -> bool {
        let psd = descriptor as *const SecurityDescriptor as *mut c_void;
        unsafe { IsValidSecurityDescriptor(psd) != 0 }
    }

    fn create_file_mapping(
        &self,
        attributes: &SecurityAttributes,
        size: u32,
        name: &CStr,
    ) -> Option<RawHandle> {
        let attributes = (attributes as *const SecurityAttributes).cast::<SECURITY_ATTRIBUTES>();
        let handle = unsafe {
            CreateFileMappingA(
                INVALID_HANDLE_VALUE, // pagefile-backed
                attributes,
                PAGE_READWRITE,
                0,
                size,
                name.as_ptr().cast(),
            )
        };
        let handle = RawHandle(handle as isize);
        handle.is_valid().then_some(handle)
    }

    fn map_view_of_file(&self, mapping: RawHandle) -> Option<NonNull<u8>> {
        let view = unsafe { MapViewOfFile(mapping.0 as HANDLE, FILE_MAP_WRITE, 0, 0, 0) };
        NonNull::new(view.Value.cast::<u8>())
    }

    fn unmap_view_of_file(&self, view: NonNull<u8>) -> bool {
        let address = MEMORY_MAPPED_VIEW_ADDRESS {
            Value: view.as_ptr().cast(),
        };
        unsafe { UnmapViewOfFile(address) != 0 }
    }

    fn close_handle(&self, handle: RawHandle) -> bool {
        unsafe { CloseHandle(handle.0 as HANDLE) != 0 }
    }

    fn send_message_timeout(
        &self,
        window: WindowHandle,
        data: &CopyData<'_>,
        timeout: Duration,
    ) -> Option<usize> {
        let payload = COPYDATASTRUCT {
            dwData: data.signature as usize,
            cbData: data.size(),
            lpData: data.name.as_ptr() as *mut c_void,
        };
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let mut result: usize = 0;

        let sent = unsafe {
            SendMessageTimeoutA(
                window.0 as HWND,
                WM_COPYDATA,
                0,
                &payload as *const COPYDATASTRUCT as isize,
                SMTO_NORMAL,
                timeout_ms,
                &mut result,
            )
        };
        (sent != 0).then_some(result)
    }
}
