//! Shared pieces of the native object model.
//!
//! Objects handed to the host are `#[implement]` COM objects from
//! `windows-core`, so the same pointers can be passed to Direct2D as
//! `IUnknown`. This module holds the status codes they report and the guard
//! every exported entry point runs under.

mod spin;

use std::panic::{AssertUnwindSafe, catch_unwind};

pub use spin::{SpinLock, SpinLockGuard};
pub use windows_core::{GUID, HRESULT, IUnknown, Interface};

pub const S_OK: HRESULT = HRESULT(0);
pub const E_NOTIMPL: HRESULT = HRESULT(0x8000_4001_u32 as i32);
pub const E_NOINTERFACE: HRESULT = HRESULT(0x8000_4002_u32 as i32);
pub const E_POINTER: HRESULT = HRESULT(0x8000_4003_u32 as i32);
pub const E_FAIL: HRESULT = HRESULT(0x8000_4005_u32 as i32);
pub const E_ILLEGAL_METHOD_CALL: HRESULT = HRESULT(0x8000_000E_u32 as i32);
pub const RO_E_CLOSED: HRESULT = HRESULT(0x8000_0013_u32 as i32);
pub const E_UNEXPECTED: HRESULT = HRESULT(0x8000_FFFF_u32 as i32);
pub const E_OUTOFMEMORY: HRESULT = HRESULT(0x8007_000E_u32 as i32);
pub const E_INVALIDARG: HRESULT = HRESULT(0x8007_0057_u32 as i32);
pub const E_NOT_SUFFICIENT_BUFFER: HRESULT = HRESULT(0x8007_007A_u32 as i32);
pub const D2DERR_WRONG_STATE: HRESULT = HRESULT(0x8899_0001_u32 as i32);

/// Runs `body` at the native boundary so that panics never unwind into the
/// host. A caught panic is reported as `E_FAIL`.
pub(crate) fn catch_native<T>(
    name: &str,
    body: impl FnOnce() -> windows_core::Result<T>,
) -> windows_core::Result<T> {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result,
        Err(_) => {
            log::warn!("panic caught at native boundary in {name}");
            Err(E_FAIL.into())
        }
    }
}

/// Borrows a host-provided array, treating null as empty only when `len` is 0.
///
/// # Safety
///
/// A non-null `data` must be valid for `len` reads for the returned lifetime.
pub(crate) unsafe fn slice_from_raw<'a, T>(
    data: *const T,
    len: usize,
) -> windows_core::Result<&'a [T]> {
    if len == 0 {
        return Ok(&[]);
    }
    if data.is_null() {
        return Err(E_POINTER.into());
    }
    Ok(unsafe { std::slice::from_raw_parts(data, len) })
}

/// Mutable counterpart of [`slice_from_raw`] for host-provided out arrays.
///
/// # Safety
///
/// A non-null `data` must be valid for `len` writes for the returned
/// lifetime and not aliased.
pub(crate) unsafe fn slice_from_raw_mut<'a, T>(
    data: *mut T,
    len: usize,
) -> windows_core::Result<&'a mut [T]> {
    if len == 0 {
        return Ok(&mut []);
    }
    if data.is_null() {
        return Err(E_POINTER.into());
    }
    Ok(unsafe { std::slice::from_raw_parts_mut(data, len) })
}
