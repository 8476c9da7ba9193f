//! Callback trampoline - native code calling foreign callables
//!
//! A foreign callable becomes a native function whose resource is one
//! reference to the callable. The entry point runs under the serialization
//! lock; failures are parked in the deferred-error slot and reported as a
//! status code, so nothing unwinds through native frames.

use super::decode::{decode, Position};
use super::encode::{encode_arg, KeepAlive};
use super::types::{RawTypeCode, TaggedValue, TypeCode};
use super::{record, Counter};
use crate::errors::{FfiError, FfiResult, ForeignError};
use crate::ffi::error::panic_message;
use crate::ffi::{
    pffi_cb_arg_to_return, pffi_func_create_from_callback, pffi_func_set_return, pffi_object_free,
    set_last_error, FunctionHandle, Status, STATUS_ERROR, STATUS_OK,
};
use crate::foreign::{deferred, lock, ForeignCallable, ForeignValue, PackedFunc};
use crate::logging::{debug, error, log_callback, log_callback_error};
use core::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::slice;

/// Wrap `callable` as a new local function handle.
///
/// The handle holds one reference to the callable until it is freed.
pub fn convert_to_packed_func(callable: &ForeignCallable) -> FfiResult<PackedFunc> {
    let resource = callable.clone().into_resource();
    let mut handle: FunctionHandle = ptr::null_mut();
    let status = unsafe {
        pffi_func_create_from_callback(Some(callback_entry), resource, Some(callback_finalize), &mut handle)
    };
    if status != STATUS_OK {
        drop(unsafe { ForeignCallable::from_resource(resource) });
        return Err(deferred::raise_last_error());
    }
    debug!(event = "callable_wrapped", callable = callable.name(), handle = ?handle);
    unsafe { PackedFunc::from_raw(handle, false) }.ok_or_else(|| FfiError::NativeCall {
        message: "Function creation returned a null handle".to_string(),
    })
}

/// Entry point the native runtime calls for wrapped callables
///
/// # Safety
/// Called by the runtime with arrays of `num_args` entries and a resource
/// produced by `convert_to_packed_func`.
pub(crate) unsafe extern "C" fn callback_entry(
    values: *mut TaggedValue,
    codes: *mut RawTypeCode,
    num_args: i32,
    ret: *mut c_void,
    resource: *mut c_void,
) -> Status {
    let _guard = lock::acquire();
    record(Counter::CallbackDispatched);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        ForeignCallable::with_resource(resource, |callable| {
            run_callback(callable, values, codes, num_args, ret).map_err(|err| (callable.name().to_string(), err))
        })
    }));
    let (name, err) = match outcome {
        Ok(Ok(())) => return STATUS_OK,
        Ok(Err(failure)) => failure,
        Err(payload) => (
            "<callback>".to_string(),
            FfiError::Callback(ForeignError::new("Panic", panic_message(payload.as_ref()))),
        ),
    };

    record(Counter::CallbackFailed);
    let message = err.to_string();
    log_callback_error(&name, &message);
    set_last_error(&message);
    deferred::defer(err);
    STATUS_ERROR
}

/// Finalizer: gives back the callable reference held by the handle
///
/// # Safety
/// `resource` must come from `convert_to_packed_func` and be finalized once.
pub(crate) unsafe extern "C" fn callback_finalize(resource: *mut c_void) {
    let _guard = lock::acquire();
    let released = panic::catch_unwind(AssertUnwindSafe(|| {
        let callable = ForeignCallable::from_resource(resource);
        debug!(event = "callable_released", callable = callable.name(), remaining = callable.ref_count() - 1);
        drop(callable);
    }));
    if let Err(payload) = released {
        error!(event = "finalizer_panic", error = %panic_message(payload.as_ref()));
    }
}

unsafe fn run_callback(
    callable: &ForeignCallable,
    values: *mut TaggedValue,
    codes: *mut RawTypeCode,
    num_args: i32,
    ret: *mut c_void,
) -> FfiResult<()> {
    let n = usize::try_from(num_args).map_err(|_| FfiError::NativeCall {
        message: format!("Negative argument count {}", num_args),
    })?;
    let (values, codes): (&mut [TaggedValue], &mut [RawTypeCode]) = if n == 0 {
        (&mut [], &mut [])
    } else {
        (slice::from_raw_parts_mut(values, n), slice::from_raw_parts_mut(codes, n))
    };
    log_callback(callable.name(), n);

    // Take ownership of handle arguments so decoded wrappers can adopt them
    for i in 0..n {
        if TypeCode::from_raw(codes[i]).map_or(false, TypeCode::has_mutable_content) {
            if pffi_cb_arg_to_return(&mut values[i], &mut codes[i]) != STATUS_OK {
                release_owned(&values[..i], &codes[..i]);
                return Err(deferred::raise_last_error());
            }
        }
    }

    let mut args = Vec::with_capacity(n);
    for i in 0..n {
        match decode(values[i], codes[i], Position::Argument) {
            Ok(arg) => args.push(arg),
            Err(err) => {
                release_owned(&values[i + 1..], &codes[i + 1..]);
                return Err(err);
            }
        }
    }

    match callable.call(&args).map_err(FfiError::Callback)? {
        None => Ok(()),
        Some(ForeignValue::Tuple(items)) => Err(FfiError::MultipleReturnValues { count: items.len() }),
        Some(result) => {
            let mut keep = KeepAlive::new();
            let (mut value, mut code) = encode_arg(&result, 0, &mut keep)?;
            if pffi_func_set_return(ret, &mut value, &mut code, 1) != STATUS_OK {
                return Err(deferred::raise_last_error());
            }
            Ok(())
        }
    }
}

/// Release translated handles that were never adopted
unsafe fn release_owned(values: &[TaggedValue], codes: &[RawTypeCode]) {
    for (value, &code) in values.iter().zip(codes) {
        if TypeCode::from_raw(code).map_or(false, TypeCode::is_object) {
            pffi_object_free(value.v_handle);
        }
    }
}
