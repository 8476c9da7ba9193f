//! Result decoder - tagged values back to foreign values
//!
//! Dispatch is on the type code alone. Object handles are adopted: the
//! caller hands over one reference per decoded handle.

use super::types::{ByteArray, RawTypeCode, TaggedValue, TypeCode};
use crate::errors::{FfiError, FfiResult};
use crate::ffi::{pffi_cb_arg_to_return, pffi_ndarray_from_tensor, DLTensor, ObjectHandle, RawHandle};
use crate::foreign::deferred::check_status;
use crate::foreign::{ExtValue, ForeignValue, Module, NDArray, ObjectRef, PackedFunc, TensorView};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::ptr;

/// Where a tagged value arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Callback argument; tensor views stay borrowed
    Argument,
    /// Call result; tensor views are copied into an owning array
    Return,
}

/// Decoder for one extension type code
pub type ExtDecoder = fn(RawTypeCode, TaggedValue) -> FfiResult<ForeignValue>;

static EXT_DECODERS: Lazy<DashMap<RawTypeCode, ExtDecoder>> = Lazy::new(DashMap::new);

/// Register a decoder for an extension-range code (replaces any previous one)
pub fn register_ext_decoder(code: RawTypeCode, decoder: ExtDecoder) -> FfiResult<()> {
    match TypeCode::from_raw(code) {
        Some(TypeCode::Ext(_)) => {
            EXT_DECODERS.insert(code, decoder);
            Ok(())
        }
        _ => Err(FfiError::UnknownTypeCode { code }),
    }
}

pub fn unregister_ext_decoder(code: RawTypeCode) -> bool {
    EXT_DECODERS.remove(&code).is_some()
}

unsafe fn read_bytes<'a>(desc: *const ByteArray) -> FfiResult<&'a [u8]> {
    desc.as_ref().map(|d| d.as_slice()).ok_or_else(|| FfiError::NativeCall {
        message: "Null byte-array descriptor".to_string(),
    })
}

/// Decode a tagged value.
///
/// Unextended unknown codes fail with `UnknownTypeCode`. Extension codes
/// without a registered decoder come back as `ForeignValue::Ext`.
///
/// # Safety
/// `value` must be valid for `code`, and the caller must own one reference
/// for every object handle it carries.
pub unsafe fn decode(value: TaggedValue, code: RawTypeCode, position: Position) -> FfiResult<ForeignValue> {
    let kind = TypeCode::from_raw(code).ok_or(FfiError::UnknownTypeCode { code })?;
    Ok(match kind {
        TypeCode::Null => ForeignValue::None,
        TypeCode::Int => ForeignValue::Int(value.v_int64),
        TypeCode::Float => ForeignValue::Float(value.v_float64),
        TypeCode::Bool => ForeignValue::Bool(value.v_int64 != 0),
        TypeCode::Device => ForeignValue::Device(value.v_device),
        TypeCode::Str => {
            let text = std::str::from_utf8(read_bytes(value.v_str)?).map_err(|e| FfiError::NativeCall {
                message: format!("Invalid UTF-8 string result: {}", e),
            })?;
            ForeignValue::Str(text.to_owned())
        }
        TypeCode::Bytes => ForeignValue::Bytes(read_bytes(value.v_bytes)?.to_vec()),
        TypeCode::OpaqueHandle => ForeignValue::Handle(RawHandle(value.v_handle)),
        TypeCode::Object => ObjectRef::from_raw(value.v_handle).map_or(ForeignValue::None, ForeignValue::Object),
        TypeCode::PackedFunction => {
            PackedFunc::from_raw(value.v_handle, false).map_or(ForeignValue::None, ForeignValue::Function)
        }
        TypeCode::Module => ObjectRef::from_raw(value.v_handle)
            .map_or(ForeignValue::None, |obj| ForeignValue::Module(Module::from_object(obj))),
        TypeCode::NDArray => ObjectRef::from_raw(value.v_handle)
            .map_or(ForeignValue::None, |obj| ForeignValue::NDArray(NDArray::from_object(obj))),
        TypeCode::DLTensorView => {
            let tensor = value.v_handle as *mut DLTensor;
            match position {
                Position::Argument => TensorView::from_raw(tensor).map_or(ForeignValue::None, ForeignValue::TensorView),
                Position::Return if tensor.is_null() => ForeignValue::None,
                Position::Return => {
                    let mut handle: ObjectHandle = ptr::null_mut();
                    check_status(pffi_ndarray_from_tensor(tensor, &mut handle))?;
                    ObjectRef::from_raw(handle)
                        .map_or(ForeignValue::None, |obj| ForeignValue::NDArray(NDArray::from_object(obj)))
                }
            }
        }
        TypeCode::ObjectRefSlot => {
            // Move out of the slot first, then decode what it held
            let (mut value, mut code) = (value, code);
            check_status(pffi_cb_arg_to_return(&mut value, &mut code))?;
            return decode(value, code, position);
        }
        TypeCode::Ext(c) => {
            let decoder = EXT_DECODERS.get(&c).map(|entry| *entry.value());
            match decoder {
                Some(decoder) => decoder(c, value)?,
                None => ForeignValue::Ext(ExtValue { code: c, handle: RawHandle(value.v_handle) }),
            }
        }
    })
}
