//! Values that can cross the pipe as raw bytes.

use std::mem::{MaybeUninit, size_of};

/// Types whose value is exactly their bytes.
///
/// # Safety
///
/// Implementers must guarantee:
///
/// | Property | Requirement |
/// |----------|-------------|
/// | **Bit patterns** | Every byte pattern of `size_of::<Self>()` bytes is a valid value |
/// | **Padding** | No padding bytes (all bytes are initialized) |
/// | **Pointers** | No pointers or references; addresses don't transfer between processes |
///
/// `bool`, `char` and enums are deliberately excluded: the reader cannot
/// trust that the bytes it receives were produced by the same type.
pub unsafe trait Plain: Copy + Send + Sync + 'static {
    /// Views the value as bytes.
    #[inline]
    fn as_bytes(&self) -> &[u8] {
        // SAFETY: No padding, so every byte of the value is initialized.
        unsafe { std::slice::from_raw_parts((self as *const Self).cast::<u8>(), size_of::<Self>()) }
    }

    /// Reads a value from the first `size_of::<Self>()` bytes of `bytes`.
    ///
    /// # Panics
    ///
    /// If `bytes` is shorter than `size_of::<Self>()`.
    #[inline]
    fn from_bytes(bytes: &[u8]) -> Self {
        let bytes = &bytes[..size_of::<Self>()];
        let mut value = MaybeUninit::<Self>::uninit();
        // SAFETY: Exactly size_of::<Self>() bytes are copied into the value
        // and any bit pattern is valid for Self.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                value.as_mut_ptr().cast::<u8>(),
                size_of::<Self>(),
            );
            value.assume_init()
        }
    }
}

macro_rules! impl_plain {
    ($($t:ty),* $(,)?) => {
        $(
            unsafe impl Plain for $t {}
        )*
    };
}

impl_plain! {
    i8, i16, i32, i64, i128, isize,
    u8, u16, u32, u64, u128, usize,
    f32, f64,
}

// Arrays have no padding between elements.
unsafe impl<T: Plain, const N: usize> Plain for [T; N] {}
