//! Interoperability - the packed calling convention
//!
//! Design: every value crosses as a `(TaggedValue, type code)` pair.
//!
//! Architecture:
//! - `types.rs` - tagged value, type codes, device/dtype descriptors
//! - `encode.rs` - foreign value → tagged value (+ keep-alive storage)
//! - `decode.rs` - tagged value → foreign value, extension decoders
//! - `call.rs` - fast/general path invocation of native functions
//! - `trampoline.rs` - native → foreign callbacks and their finalizer
//! - `constructor.rs` - calls whose result type is known up front
//! - `global.rs` - global function lookup and registration

pub mod call;
pub mod constructor;
pub mod decode;
pub mod encode;
pub mod global;
pub mod trampoline;
pub mod types;

pub use call::{call_packed, last_call_path, CallPath, FAST_PATH_MAX_ARGS};
pub use constructor::construct_handle;
pub use decode::{decode, register_ext_decoder, unregister_ext_decoder, ExtDecoder, Position};
pub use encode::{encode_arg, KeepAlive};
pub use global::{
    default_policy, get_global_func, get_global_func_default, list_global_func_names, register_global_callable,
    register_global_func, remove_global_func, set_default_policy, LookupPolicy,
};
pub use trampoline::convert_to_packed_func;
pub use types::{ByteArray, DataType, Device, RawTypeCode, TaggedValue, TypeCode, EXT_BEGIN, EXT_END};

use std::sync::atomic::{AtomicU64, Ordering};

struct Counters {
    calls_made: AtomicU64,
    fast_path_calls: AtomicU64,
    general_path_calls: AtomicU64,
    callbacks_dispatched: AtomicU64,
    callback_failures: AtomicU64,
    marshaling_errors: AtomicU64,
}

static COUNTERS: Counters = Counters {
    calls_made: AtomicU64::new(0),
    fast_path_calls: AtomicU64::new(0),
    general_path_calls: AtomicU64::new(0),
    callbacks_dispatched: AtomicU64::new(0),
    callback_failures: AtomicU64::new(0),
    marshaling_errors: AtomicU64::new(0),
};

#[derive(Clone, Copy)]
pub(crate) enum Counter {
    FastCall,
    GeneralCall,
    CallbackDispatched,
    CallbackFailed,
    MarshalingError,
}

#[inline]
pub(crate) fn record(counter: Counter) {
    let c = &COUNTERS;
    match counter {
        Counter::FastCall => {
            c.calls_made.fetch_add(1, Ordering::Relaxed);
            c.fast_path_calls.fetch_add(1, Ordering::Relaxed);
        }
        Counter::GeneralCall => {
            c.calls_made.fetch_add(1, Ordering::Relaxed);
            c.general_path_calls.fetch_add(1, Ordering::Relaxed);
        }
        Counter::CallbackDispatched => {
            c.callbacks_dispatched.fetch_add(1, Ordering::Relaxed);
        }
        Counter::CallbackFailed => {
            c.callback_failures.fetch_add(1, Ordering::Relaxed);
        }
        Counter::MarshalingError => {
            c.marshaling_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Get interop statistics
pub fn stats() -> InteropStats {
    let c = &COUNTERS;
    InteropStats {
        calls_made: c.calls_made.load(Ordering::Relaxed),
        fast_path_calls: c.fast_path_calls.load(Ordering::Relaxed),
        general_path_calls: c.general_path_calls.load(Ordering::Relaxed),
        callbacks_dispatched: c.callbacks_dispatched.load(Ordering::Relaxed),
        callback_failures: c.callback_failures.load(Ordering::Relaxed),
        marshaling_errors: c.marshaling_errors.load(Ordering::Relaxed),
    }
}

/// Interop statistics for monitoring (process-wide, monotonic)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InteropStats {
    pub calls_made: u64,
    pub fast_path_calls: u64,
    pub general_path_calls: u64,
    pub callbacks_dispatched: u64,
    pub callback_failures: u64,
    pub marshaling_errors: u64,
}

#[cfg(test)]
mod tests;
