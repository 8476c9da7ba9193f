//! Call invoker - runs a native function over encoded arguments
//!
//! Up to `FAST_PATH_MAX_ARGS` arguments are encoded into fixed stack
//! arrays; longer lists use heap buffers. Both paths end in the same
//! `pffi_func_call` primitive, issued with the serialization lock released
//! and only after every argument has been encoded.

use super::decode::{decode, Position};
use super::encode::{encode_arg, KeepAlive};
use super::types::{RawTypeCode, TaggedValue, TypeCode};
use super::{record, Counter};
use crate::errors::{FfiError, FfiResult};
use crate::ffi::{pffi_cb_arg_to_return, pffi_func_call, pffi_ret_store_clear, FunctionHandle, STATUS_OK};
use crate::foreign::{deferred, lock, ForeignValue};
use crate::logging::{log_call, log_marshal_error, log_native_error};
use std::cell::Cell;

/// Largest argument count served by the stack-array path
pub const FAST_PATH_MAX_ARGS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPath {
    /// Fixed-size stack arrays
    Fast,
    /// Heap buffers sized to the argument count
    General,
}

impl CallPath {
    pub const fn for_arg_count(n: usize) -> Self {
        if n <= FAST_PATH_MAX_ARGS {
            Self::Fast
        } else {
            Self::General
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::General => "general",
        }
    }
}

thread_local! {
    static LAST_CALL_PATH: Cell<Option<CallPath>> = const { Cell::new(None) };
}

/// Path taken by the most recent dispatched call on this thread
pub fn last_call_path() -> Option<CallPath> {
    LAST_CALL_PATH.with(Cell::get)
}

/// Clears the return store once the result has been consumed, also on unwind
struct ReturnStoreGuard;

impl Drop for ReturnStoreGuard {
    fn drop(&mut self) {
        pffi_ret_store_clear();
    }
}

/// Call `handle` and hand the translated result to `finish`.
///
/// `finish` receives the tagged result with ownership of any handle it
/// carries; string and byte results stay valid only inside `finish`.
pub fn invoke<R>(
    handle: FunctionHandle,
    args: &[ForeignValue],
    num_returns: usize,
    finish: impl FnOnce(TaggedValue, RawTypeCode) -> FfiResult<R>,
) -> FfiResult<R> {
    if num_returns > 1 {
        return Err(FfiError::MultipleReturnValues { count: num_returns });
    }

    let mut keep = KeepAlive::new();
    let path = CallPath::for_arg_count(args.len());
    let (value, code) = match path {
        CallPath::Fast => {
            let mut values = [TaggedValue::null(); FAST_PATH_MAX_ARGS];
            let mut codes = [TypeCode::Null.raw(); FAST_PATH_MAX_ARGS];
            for (i, arg) in args.iter().enumerate() {
                (values[i], codes[i]) = encode_or_record(arg, i, &mut keep)?;
            }
            dispatch(handle, &mut values[..args.len()], &mut codes[..args.len()], path)?
        }
        CallPath::General => {
            let mut values = Vec::with_capacity(args.len());
            let mut codes = Vec::with_capacity(args.len());
            for (i, arg) in args.iter().enumerate() {
                let (value, code) = encode_or_record(arg, i, &mut keep)?;
                values.push(value);
                codes.push(code);
            }
            dispatch(handle, &mut values, &mut codes, path)?
        }
    };

    let _clear = ReturnStoreGuard;
    let result = finish(value, code);
    // Arguments may be released only after the result is owned
    drop(keep);
    result
}

/// Call and decode the single result
pub fn call_packed(handle: FunctionHandle, args: &[ForeignValue]) -> FfiResult<ForeignValue> {
    invoke(handle, args, 1, |value, code| unsafe { decode(value, code, Position::Return) })
}

fn encode_or_record(
    arg: &ForeignValue,
    position: usize,
    keep: &mut KeepAlive,
) -> FfiResult<(TaggedValue, RawTypeCode)> {
    encode_arg(arg, position, keep).map_err(|err| {
        record(Counter::MarshalingError);
        log_marshal_error(&err.to_string());
        err
    })
}

fn dispatch(
    handle: FunctionHandle,
    values: &mut [TaggedValue],
    codes: &mut [RawTypeCode],
    path: CallPath,
) -> FfiResult<(TaggedValue, RawTypeCode)> {
    LAST_CALL_PATH.with(|cell| cell.set(Some(path)));
    record(match path {
        CallPath::Fast => Counter::FastCall,
        CallPath::General => Counter::GeneralCall,
    });
    log_call(handle, values.len(), path.name());

    let num_args = i32::try_from(values.len()).map_err(|_| FfiError::NativeCall {
        message: format!("Too many arguments: {}", values.len()),
    })?;
    let mut ret_value = TaggedValue::null();
    let mut ret_code = TypeCode::Null.raw();
    deferred::discard_stale();
    let status = lock::allow_threads(|| unsafe {
        pffi_func_call(
            handle,
            values.as_mut_ptr(),
            codes.as_mut_ptr(),
            num_args,
            &mut ret_value,
            &mut ret_code,
        )
    });
    if status != STATUS_OK {
        let err = deferred::raise_last_error();
        log_native_error(&err.to_string());
        return Err(err);
    }

    let mutable = TypeCode::from_raw(ret_code).map_or(false, TypeCode::has_mutable_content);
    if mutable {
        let status = unsafe { pffi_cb_arg_to_return(&mut ret_value, &mut ret_code) };
        if status != STATUS_OK {
            pffi_ret_store_clear();
            return Err(deferred::raise_last_error());
        }
    }
    Ok((ret_value, ret_code))
}
