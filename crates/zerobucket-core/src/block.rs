//! Owned, zero-filled byte block with RAII release.

use std::fmt;
use std::ptr::NonNull;

use crate::error::AllocError;
use crate::size_class::{SizeClass, classify};
use crate::thread;

/// `len` bytes from the calling thread's arena, released on drop.
///
/// May be dropped on any thread.
pub struct Block {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the block is uniquely owned and release is thread-agnostic.
unsafe impl Send for Block {}
// SAFETY: shared access only yields `&[u8]`.
unsafe impl Sync for Block {}

impl Block {
    /// Allocate a zeroed block of `len` bytes.
    pub fn new(len: usize) -> Result<Self, AllocError> {
        let ptr = thread::allocate(len)?;
        Ok(Self { ptr, len })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address of the first byte.
    #[must_use]
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Class the block was served from.
    #[must_use]
    pub fn size_class(&self) -> Option<SizeClass> {
        classify(self.addr(), thread::page_size())
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `len` bytes are allocated and initialized (zeroed at birth).
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, plus exclusive access through `&mut self`.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        // SAFETY: the pointer came from `thread::allocate` and is released once.
        unsafe { thread::free(self.ptr.as_ptr()) };
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("len", &self.len)
            .field("class", &self.size_class())
            .finish()
    }
}
