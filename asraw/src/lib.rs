//! AsRaw provides a safe way to view a structure as its bytes, and an unsafe
//! way to have this as a mutable view.  Generally, this is safe and meaningful
//! for structures that are repr(C) without padding.  `as_mut_raw` is only
//! safe in this case.
//!
//! The byte order of the view is the native order of the machine.  Both the
//! image builder and the device read and write headers through these views,
//! so they agree as long as they share an endianness.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

use core::{mem, slice};

pub trait AsRaw: Sized {
    fn as_raw(&self) -> &[u8] {
        unsafe {
            slice::from_raw_parts(self as *const _ as *const u8, mem::size_of::<Self>())
        }
    }

    /// The first `len` bytes of the view, or the whole view if `len` is
    /// larger than the structure.
    fn raw_prefix(&self, len: usize) -> &[u8] {
        let raw = self.as_raw();
        &raw[..len.min(raw.len())]
    }
}

/// Provide a view into a structure.  This is an unsafe trait, because, in
/// general, it isn't safe to interpret arbitrary bytes as another type.
/// However, if the struct is `repr(C)`, and all types used are valid for all
/// possible values, this will be safe.
pub unsafe trait AsMutRaw: Sized {
    fn as_mut_raw(&mut self) -> &mut [u8] {
        unsafe {
            slice::from_raw_parts_mut(self as *mut _ as *mut u8, mem::size_of::<Self>())
        }
    }

    /// Overwrite the leading bytes of the structure with `bytes`.  Extra input
    /// is ignored, fields past the end of the input are left untouched.
    /// Returns the number of bytes copied.
    fn copy_from_raw(&mut self, bytes: &[u8]) -> usize {
        let raw = self.as_mut_raw();
        let count = raw.len().min(bytes.len());
        raw[..count].copy_from_slice(&bytes[..count]);
        count
    }
}
