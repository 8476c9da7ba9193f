//! ABI surface shared by both sides of the boundary
//!
//! Status codes, handle aliases and the callback entry-point signatures.

use crate::interop::{RawTypeCode, TaggedValue};
use core::ffi::c_void;

/// Opaque native function handle
pub type FunctionHandle = *mut c_void;

/// Opaque handle to any reference-counted native object
pub type ObjectHandle = *mut c_void;

/// Status returned by every primitive
pub type Status = i32;

pub const STATUS_OK: Status = 0;
pub const STATUS_ERROR: Status = -1;

/// Entry point the native runtime calls to run a wrapped foreign callable.
///
/// `values`/`codes` may be rewritten in place by the translate step. `ret`
/// is only meaningful to `pffi_func_set_return`.
pub type CallbackEntry = unsafe extern "C" fn(
    values: *mut TaggedValue,
    codes: *mut RawTypeCode,
    num_args: i32,
    ret: *mut c_void,
    resource: *mut c_void,
) -> Status;

/// Releases the resource of a wrapped callable, called exactly once
pub type CallbackFinalizer = unsafe extern "C" fn(resource: *mut c_void);
