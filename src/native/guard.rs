//! Scoped release of native resources.
//!
//! Declare the view after its mapping so it is dropped (unmapped) first.

use std::ptr::{self, NonNull};

use super::{NativeApi, RawHandle};

/// Closes a handle on drop.
pub(crate) struct OwnedHandle<'a, A: NativeApi + ?Sized> {
    api: &'a A,
    handle: RawHandle,
}

impl<'a, A: NativeApi + ?Sized> OwnedHandle<'a, A> {
    pub(crate) fn new(api: &'a A, handle: RawHandle) -> Self {
        Self { api, handle }
    }

    pub(crate) fn raw(&self) -> RawHandle {
        self.handle
    }
}

impl<A: NativeApi + ?Sized> Drop for OwnedHandle<'_, A> {
    fn drop(&mut self) {
        if self.api.close_handle(self.handle) {
            tracing::trace!(handle = self.handle.0, "closed handle");
        } else {
            tracing::warn!(
                handle = self.handle.0,
                error = self.api.last_error(),
                "CloseHandle failed"
            );
        }
    }
}

/// A mapped view of `len` bytes, unmapped on drop.
pub(crate) struct MappedView<'a, A: NativeApi + ?Sized> {
    api: &'a A,
    ptr: NonNull<u8>,
    len: usize,
}

impl<'a, A: NativeApi + ?Sized> MappedView<'a, A> {
    /// `ptr` must stay valid for reads and writes of `len` bytes until this
    /// guard unmaps it.
    pub(crate) fn new(api: &'a A, ptr: NonNull<u8>, len: usize) -> Self {
        Self { api, ptr, len }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Copy `data` into the view at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the write would run past the end of the view.
    pub(crate) fn write(&mut self, offset: usize, data: &[u8]) {
        assert!(offset + data.len() <= self.len, "write past end of view");
        // SAFETY: bounds checked above; the view is valid for `len` bytes
        // and the peer does not touch it outside the notification call.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len());
        }
    }

    /// Copy `len` bytes out of the view starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the read would run past the end of the view.
    pub(crate) fn read(&self, offset: usize, len: usize) -> Vec<u8> {
        assert!(offset + len <= self.len, "read past end of view");
        let mut out = vec![0u8; len];
        // SAFETY: as in `write`.
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), out.as_mut_ptr(), len);
        }
        out
    }
}

impl<A: NativeApi + ?Sized> Drop for MappedView<'_, A> {
    fn drop(&mut self) {
        if self.api.unmap_view_of_file(self.ptr) {
            tracing::trace!(len = self.len, "unmapped view");
        } else {
            tracing::warn!(error = self.api.last_error(), "UnmapViewOfFile failed");
        }
    }
}
