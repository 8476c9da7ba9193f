//! packed-ffi - packed calling convention between a dynamic foreign caller
//! and a native runtime
//!
//! Values cross the boundary as `(TaggedValue, type code)` pairs. The
//! foreign side calls native functions through the call invoker, and native
//! code calls foreign callables through the callback trampoline.

pub mod config;
pub mod errors;
pub mod ffi;
pub mod foreign;
pub mod interop;
pub mod logging;

// Re-export commonly used items
pub use config::FfiConfig;
pub use errors::{FfiError, FfiResult, ForeignError};
pub use foreign::{ForeignCallable, ForeignValue, Module, NDArray, ObjectRef, ObjectSlot, PackedFunc, TensorView};
pub use interop::{
    call_packed, construct_handle, get_global_func, last_call_path, register_global_callable,
    register_global_func, stats, CallPath, Device, DataType, InteropStats, LookupPolicy, TypeCode,
};

/// Initialize with the nearest `.pffi.toml` (or defaults)
pub fn init() {
    init_with_config(&FfiConfig::discover());
}

/// Install logging and the default lookup policy from `config`
pub fn init_with_config(config: &FfiConfig) {
    logging::init_with_config(config.logging.to_log_config());
    interop::set_default_policy(config.lookup.missing);
    logging::log_runtime_init();
}

/// Runtime initialization
#[no_mangle]
pub extern "C" fn pffi_runtime_init() {
    init();
}
