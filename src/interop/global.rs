//! Global function registry interface
//!
//! Lookup hands out handles marked global, which the caller never frees.
//! Whether a missing name is an error is the caller's policy.

use super::trampoline::convert_to_packed_func;
use crate::errors::{FfiError, FfiResult};
use crate::ffi::{
    pffi_func_get_global, pffi_func_list_global_names, pffi_func_register_global, pffi_func_remove_global,
    FunctionHandle,
};
use crate::foreign::deferred::check_status;
use crate::foreign::{ForeignCallable, PackedFunc};
use crate::logging::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::ffi::{c_char, CStr, CString};
use std::ptr;

/// What looking up an unregistered name yields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LookupPolicy {
    /// Fail with `UnknownGlobalFunction`
    #[default]
    #[serde(rename = "error")]
    Required,
    /// Return `None`
    #[serde(rename = "none")]
    Optional,
}

static DEFAULT_POLICY: RwLock<LookupPolicy> = parking_lot::const_rwlock(LookupPolicy::Required);

pub fn set_default_policy(policy: LookupPolicy) {
    *DEFAULT_POLICY.write() = policy;
}

pub fn default_policy() -> LookupPolicy {
    *DEFAULT_POLICY.read()
}

fn c_name(name: &str) -> FfiResult<CString> {
    CString::new(name).map_err(|_| FfiError::InvalidName { name: name.to_string() })
}

pub fn get_global_func(name: &str, policy: LookupPolicy) -> FfiResult<Option<PackedFunc>> {
    let c_name = c_name(name)?;
    let mut handle: FunctionHandle = ptr::null_mut();
    check_status(unsafe { pffi_func_get_global(c_name.as_ptr(), &mut handle) })?;
    match unsafe { PackedFunc::from_raw(handle, true) } {
        Some(func) => Ok(Some(func)),
        None => match policy {
            LookupPolicy::Required => Err(FfiError::UnknownGlobalFunction { name: name.to_string() }),
            LookupPolicy::Optional => Ok(None),
        },
    }
}

/// Lookup under the process-wide default policy
pub fn get_global_func_default(name: &str) -> FfiResult<Option<PackedFunc>> {
    get_global_func(name, default_policy())
}

pub(crate) fn required_global_func(name: &str) -> FfiResult<PackedFunc> {
    get_global_func(name, LookupPolicy::Required)?
        .ok_or_else(|| FfiError::UnknownGlobalFunction { name: name.to_string() })
}

pub fn register_global_func(name: &str, func: &PackedFunc, allow_override: bool) -> FfiResult<()> {
    let c_name = c_name(name)?;
    check_status(unsafe { pffi_func_register_global(c_name.as_ptr(), func.handle(), allow_override as i32) })?;
    debug!(event = "global_registered", name, handle = ?func.handle());
    Ok(())
}

/// Register a foreign callable under `name`; the registry keeps it alive
pub fn register_global_callable(name: &str, callable: &ForeignCallable, allow_override: bool) -> FfiResult<()> {
    let func = convert_to_packed_func(callable)?;
    register_global_func(name, &func, allow_override)
}

pub fn remove_global_func(name: &str) -> FfiResult<()> {
    let c_name = c_name(name)?;
    check_status(unsafe { pffi_func_remove_global(c_name.as_ptr()) })
}

pub fn list_global_func_names() -> FfiResult<Vec<String>> {
    let mut size = 0i32;
    let mut names: *const *const c_char = ptr::null();
    check_status(unsafe { pffi_func_list_global_names(&mut size, &mut names) })?;
    let count = usize::try_from(size).unwrap_or(0);
    if count == 0 || names.is_null() {
        return Ok(Vec::new());
    }
    let ptrs = unsafe { std::slice::from_raw_parts(names, count) };
    Ok(ptrs
        .iter()
        .map(|&p| unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned())
        .collect())
}
