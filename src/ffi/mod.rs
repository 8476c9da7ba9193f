//! Native runtime - C ABI primitives behind the calling convention
//!
//! Design: every primitive is a `#[no_mangle] extern "C"` function that
//! returns a status code and reports failures through the thread-local
//! error slot. Handle-typed call results are lent out of a per-thread
//! return store; the caller takes ownership with `pffi_cb_arg_to_return`.

pub mod abi;
pub mod builtins;
pub mod container;
pub mod error;
pub mod function;
pub mod module;
pub mod ndarray;
pub mod object;
pub mod registry;
pub mod value;


pub use abi::{CallbackEntry, CallbackFinalizer, FunctionHandle, ObjectHandle, Status, STATUS_ERROR, STATUS_OK};
pub use container::{ArrayObj, MapObj};
pub use error::{last_error_message, set_last_error, NativeError};
pub use function::FunctionObj;
pub use module::ModuleObj;
pub use ndarray::{DLTensor, NDArrayObj};
pub use object::{type_index, NativeObject, Object, ObjectPtr};
pub use value::{NativeArgs, NativeValue, RawHandle};

use crate::interop::{ByteArray, RawTypeCode, TaggedValue, TypeCode};
use crate::logging::trace;
use core::ffi::c_void;
use core::{mem, ptr, slice};
use error::ffi_guard;
use function::CallbackReturn;
use object::{header_of, payload_of, release_raw, retain_raw};
use std::cell::RefCell;
use std::ffi::{c_char, CStr, CString};
use value::{code_for_type_index, take_from_slot};

struct ReturnStore {
    value: NativeValue,
    desc: ByteArray,
}

#[derive(Default)]
struct NameStore {
    names: Vec<CString>,
    ptrs: Vec<*const c_char>,
}

thread_local! {
    static RETURN_STORE: RefCell<ReturnStore> = RefCell::new(ReturnStore {
        value: NativeValue::Null,
        desc: ByteArray { data: ptr::null(), size: 0 },
    });
    static NAME_STORE: RefCell<NameStore> = RefCell::new(NameStore::default());
}

/// Put `value` in the return store and write its borrowed tagged form
unsafe fn store_return(value: NativeValue, ret_value: *mut TaggedValue, ret_code: *mut RawTypeCode) {
    let previous = RETURN_STORE.with(|cell| {
        let mut store = cell.borrow_mut();
        let store = &mut *store;
        let previous = mem::replace(&mut store.value, value);
        let (tagged, code) = store.value.to_tagged(&mut store.desc);
        *ret_value = tagged;
        *ret_code = code;
        previous
    });
    // Dropping may run finalizers that call back into this module
    drop(previous);
}

unsafe fn read_name<'a>(name: *const c_char) -> Result<&'a str, NativeError> {
    if name.is_null() {
        return Err(NativeError::new("Null name"));
    }
    CStr::from_ptr(name)
        .to_str()
        .map_err(|e| NativeError::new(format!("Name is not valid UTF-8: {}", e)))
}

unsafe fn arg_slices<'a>(
    values: *mut TaggedValue,
    codes: *mut RawTypeCode,
    num_args: i32,
) -> Result<(&'a mut [TaggedValue], &'a mut [RawTypeCode]), NativeError> {
    let n = usize::try_from(num_args)
        .map_err(|_| NativeError::new(format!("Negative argument count {}", num_args)))?;
    if n == 0 {
        return Ok((&mut [], &mut []));
    }
    if values.is_null() || codes.is_null() {
        return Err(NativeError::new("Null argument arrays"));
    }
    Ok((slice::from_raw_parts_mut(values, n), slice::from_raw_parts_mut(codes, n)))
}

fn function_from_handle(handle: FunctionHandle) -> Result<ObjectPtr<FunctionObj>, NativeError> {
    let obj = unsafe { ObjectPtr::<Object>::from_borrowed(handle) }
        .ok_or_else(|| NativeError::new("Null function handle"))?;
    obj.downcast::<FunctionObj>()
        .map_err(|obj| NativeError::new(format!("Handle is a {}, not a function", obj.type_key())))
}

fn check_out<T>(out: *mut T) -> Result<(), NativeError> {
    if out.is_null() {
        Err(NativeError::new("Null output pointer"))
    } else {
        Ok(())
    }
}

// ============================================================================
// Calls
// ============================================================================

/// Invoke a function. Handle results are borrowed from the return store.
///
/// # Safety
/// `values`/`codes` must hold `num_args` entries valid for their codes;
/// `ret_value`/`ret_code` must be writable.
#[no_mangle]
pub unsafe extern "C" fn pffi_func_call(
    handle: FunctionHandle,
    values: *mut TaggedValue,
    codes: *mut RawTypeCode,
    num_args: i32,
    ret_value: *mut TaggedValue,
    ret_code: *mut RawTypeCode,
) -> Status {
    ffi_guard("pffi_func_call", || {
        check_out(ret_value)?;
        check_out(ret_code)?;
        let func = function_from_handle(handle)?;
        let (values, codes) = arg_slices(values, codes, num_args)?;
        trace!(event = "func_call", handle = ?handle, args = values.len());
        let result = func.invoke_tagged(values, codes)?;
        store_return(result, ret_value, ret_code);
        Ok(())
    })
}

/// Set the result of a callback invocation (exactly one value)
///
/// # Safety
/// `ret` must be the return pointer handed to the running callback entry.
#[no_mangle]
pub unsafe extern "C" fn pffi_func_set_return(
    ret: *mut c_void,
    values: *mut TaggedValue,
    codes: *mut RawTypeCode,
    num_ret: i32,
) -> Status {
    ffi_guard("pffi_func_set_return", || {
        if num_ret != 1 {
            return Err(NativeError::new(format!(
                "Multiple return values are not supported (got {})",
                num_ret
            )));
        }
        let slot = (ret as *mut CallbackReturn)
            .as_mut()
            .ok_or_else(|| NativeError::new("Null return slot"))?;
        let (values, codes) = arg_slices(values, codes, 1)?;
        let value = match NativeValue::from_tagged(values[0], codes[0])? {
            NativeValue::TensorView(view) => {
                let tensor = (view.0 as *const DLTensor)
                    .as_ref()
                    .ok_or_else(|| NativeError::new("Null tensor view"))?;
                NativeValue::Object(NDArrayObj::copy_from_tensor(tensor)?.upcast())
            }
            other => other,
        };
        slot.set(value);
        Ok(())
    })
}

/// In-place translate from argument form to owned return form
///
/// # Safety
/// `value` must be valid for `*code`.
#[no_mangle]
pub unsafe extern "C" fn pffi_cb_arg_to_return(value: *mut TaggedValue, code: *mut RawTypeCode) -> Status {
    ffi_guard("pffi_cb_arg_to_return", || {
        check_out(value)?;
        check_out(code)?;
        match TypeCode::from_raw(*code) {
            Some(kind) if kind.is_object() => retain_raw((*value).v_handle),
            Some(TypeCode::ObjectRefSlot) => match take_from_slot((*value).v_handle)? {
                Some(obj) => {
                    *code = code_for_type_index(obj.type_index()).raw();
                    *value = TaggedValue::from_handle(obj.into_raw());
                }
                None => {
                    *code = TypeCode::Null.raw();
                    *value = TaggedValue::null();
                }
            },
            _ => {}
        }
        Ok(())
    })
}

/// Reset the calling thread's return store
#[no_mangle]
pub extern "C" fn pffi_ret_store_clear() {
    let previous = RETURN_STORE.with(|cell| {
        let mut store = cell.borrow_mut();
        store.desc = ByteArray { data: ptr::null(), size: 0 };
        mem::replace(&mut store.value, NativeValue::Null)
    });
    drop(previous);
}

// ============================================================================
// Function handles
// ============================================================================

/// Wrap a foreign callback as a new local function handle
///
/// # Safety
/// `entry` and `finalizer` must be valid for `resource`.
#[no_mangle]
pub unsafe extern "C" fn pffi_func_create_from_callback(
    entry: Option<CallbackEntry>,
    resource: *mut c_void,
    finalizer: Option<CallbackFinalizer>,
    out: *mut FunctionHandle,
) -> Status {
    ffi_guard("pffi_func_create_from_callback", || {
        check_out(out)?;
        let entry = entry.ok_or_else(|| NativeError::new("Null callback entry"))?;
        *out = FunctionObj::from_callback(entry, resource, finalizer).into_raw();
        Ok(())
    })
}

/// Look up a global function; `*out` is null when the name is unknown.
/// The handle borrows the registry's reference: the caller must not free it,
/// and it stays valid only until the name is removed or overridden.
///
/// # Safety
/// `name` must be a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn pffi_func_get_global(name: *const c_char, out: *mut FunctionHandle) -> Status {
    ffi_guard("pffi_func_get_global", || {
        check_out(out)?;
        let name = read_name(name)?;
        *out = registry::get(name).map_or(ptr::null_mut(), |func| func.as_handle());
        Ok(())
    })
}

/// # Safety
/// `name` must be a NUL-terminated string and `handle` a live function.
#[no_mangle]
pub unsafe extern "C" fn pffi_func_register_global(
    name: *const c_char,
    handle: FunctionHandle,
    allow_override: i32,
) -> Status {
    ffi_guard("pffi_func_register_global", || {
        let name = read_name(name)?;
        registry::register(name, function_from_handle(handle)?, allow_override != 0)
    })
}

/// # Safety
/// `name` must be a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn pffi_func_remove_global(name: *const c_char) -> Status {
    ffi_guard("pffi_func_remove_global", || {
        let name = read_name(name)?;
        if registry::remove(name) {
            Ok(())
        } else {
            Err(NativeError::new(format!("Global function {} is not registered", name)))
        }
    })
}

/// List registered names; the array stays valid until the next call on
/// this thread.
///
/// # Safety
/// Both output pointers must be writable.
#[no_mangle]
pub unsafe extern "C" fn pffi_func_list_global_names(
    out_size: *mut i32,
    out_names: *mut *const *const c_char,
) -> Status {
    ffi_guard("pffi_func_list_global_names", || {
        check_out(out_size)?;
        check_out(out_names)?;
        let names = registry::names()
            .into_iter()
            .filter_map(|name| CString::new(name).ok())
            .collect::<Vec<_>>();
        let size = i32::try_from(names.len()).map_err(|_| NativeError::new("Too many global functions"))?;
        NAME_STORE.with(|cell| {
            let mut store = cell.borrow_mut();
            store.ptrs = names.iter().map(|name| name.as_ptr()).collect();
            store.names = names;
            *out_size = size;
            *out_names = store.ptrs.as_ptr();
        });
        Ok(())
    })
}

/// Release a function handle (no-op for global handles)
///
/// # Safety
/// `handle` must be null or a function handle the caller owns.
#[no_mangle]
pub unsafe extern "C" fn pffi_func_free(handle: FunctionHandle) -> Status {
    pffi_object_free(handle)
}

// ============================================================================
// Objects
// ============================================================================

/// # Safety
/// `handle` must be null or an object handle the caller owns.
#[no_mangle]
pub unsafe extern "C" fn pffi_object_free(handle: ObjectHandle) -> Status {
    ffi_guard("pffi_object_free", || {
        release_raw(handle);
        Ok(())
    })
}

/// # Safety
/// `handle` must be null or a live object handle.
#[no_mangle]
pub unsafe extern "C" fn pffi_object_retain(handle: ObjectHandle) -> Status {
    ffi_guard("pffi_object_retain", || {
        retain_raw(handle);
        Ok(())
    })
}

/// Type key of an object as a static byte array
///
/// # Safety
/// `handle` must be a live object handle and `out` writable.
#[no_mangle]
pub unsafe extern "C" fn pffi_object_type_key(handle: ObjectHandle, out: *mut ByteArray) -> Status {
    ffi_guard("pffi_object_type_key", || {
        check_out(out)?;
        let header = header_of(handle).ok_or_else(|| NativeError::new("Null object handle"))?;
        *out = ByteArray::from_slice(header.type_key().as_bytes());
        Ok(())
    })
}

/// # Safety
/// `handle` must be a live object handle and `out` writable.
#[no_mangle]
pub unsafe extern "C" fn pffi_object_type_index(handle: ObjectHandle, out: *mut u32) -> Status {
    ffi_guard("pffi_object_type_index", || {
        check_out(out)?;
        let header = header_of(handle).ok_or_else(|| NativeError::new("Null object handle"))?;
        *out = header.type_index();
        Ok(())
    })
}

// ============================================================================
// Tensors
// ============================================================================

/// Borrow the tensor descriptor of an NDArray
///
/// # Safety
/// `handle` must be a live object handle and `out` writable.
#[no_mangle]
pub unsafe extern "C" fn pffi_ndarray_get_tensor(handle: ObjectHandle, out: *mut *mut DLTensor) -> Status {
    ffi_guard("pffi_ndarray_get_tensor", || {
        check_out(out)?;
        let arr = payload_of::<NDArrayObj>(handle).ok_or_else(|| NativeError::new("Handle is not an NDArray"))?;
        *out = arr.tensor_ptr();
        Ok(())
    })
}

/// Copy a borrowed tensor view into a new owning NDArray
///
/// # Safety
/// `tensor` must describe readable memory and `out` be writable.
#[no_mangle]
pub unsafe extern "C" fn pffi_ndarray_from_tensor(tensor: *const DLTensor, out: *mut ObjectHandle) -> Status {
    ffi_guard("pffi_ndarray_from_tensor", || {
        check_out(out)?;
        let view = tensor.as_ref().ok_or_else(|| NativeError::new("Null tensor view"))?;
        *out = NDArrayObj::copy_from_tensor(view)?.into_raw();
        Ok(())
    })
}

// ============================================================================
// Error slot
// ============================================================================

/// Message of the last failure on this thread
#[no_mangle]
pub extern "C" fn pffi_get_last_error() -> *const c_char {
    error::last_error_ptr()
}

/// # Safety
/// `message` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn pffi_set_last_error(message: *const c_char) {
    if message.is_null() {
        set_last_error("");
    } else {
        set_last_error(&CStr::from_ptr(message).to_string_lossy());
    }
}
