//! Constructor invoker - calls whose result code is known in advance
//!
//! The raw handle is returned for the caller to adopt. A code mismatch
//! means the registry and the constructor disagree about a type; that is a
//! registration bug, so it panics (and aborts in release builds).

use super::call::invoke;
use super::types::TypeCode;
use crate::errors::{FfiError, FfiResult};
use crate::ffi::ObjectHandle;
use crate::foreign::{ForeignValue, PackedFunc};
use crate::logging::error;

/// Call `func` and return the owned handle of its result.
///
/// # Panics
/// If the result's type code differs from `expected`.
pub fn construct_handle(func: &PackedFunc, expected: TypeCode, args: &[ForeignValue]) -> FfiResult<ObjectHandle> {
    invoke(func.handle(), args, 1, |value, code| {
        if code != expected.raw() {
            let fault = FfiError::ConstructorTypeMismatch { expected, actual: code };
            error!(event = "constructor_mismatch", expected = expected.raw(), actual = code, "{}", fault);
            panic!("{}", fault);
        }
        Ok(unsafe { value.v_handle })
    })
}
