//! Argument encoder - foreign values to tagged values
//!
//! Dispatch order is part of the contract: booleans before integers,
//! integers before floats, handle kinds before generic containers, and
//! callables last. Temporary storage goes into the `KeepAlive` list so it
//! outlives the call and nothing longer.

use super::global::required_global_func;
use super::trampoline::convert_to_packed_func;
use super::types::{ByteArray, RawTypeCode, TaggedValue, TypeCode};
use crate::errors::{FfiError, FfiResult};
use crate::ffi::builtins;
use crate::foreign::{ForeignValue, ObjectRef, PackedFunc};

/// Storage that must stay alive until the call returns
#[derive(Default)]
pub struct KeepAlive {
    buffers: Vec<Box<[u8]>>,
    descs: Vec<Box<ByteArray>>,
    objects: Vec<ObjectRef>,
    functions: Vec<PackedFunc>,
}

impl KeepAlive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of retained entries
    pub fn len(&self) -> usize {
        self.buffers.len() + self.objects.len() + self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `bytes` into owned storage and return a stable descriptor
    fn store_bytes(&mut self, bytes: &[u8]) -> *const ByteArray {
        let buffer: Box<[u8]> = bytes.into();
        let desc = Box::new(ByteArray::from_slice(&buffer));
        let ptr: *const ByteArray = &*desc;
        self.buffers.push(buffer);
        self.descs.push(desc);
        ptr
    }
}

/// Encode one argument at `position`
pub fn encode_arg(
    value: &ForeignValue,
    position: usize,
    keep: &mut KeepAlive,
) -> FfiResult<(TaggedValue, RawTypeCode)> {
    use ForeignValue as V;

    let (tagged, code) = match value {
        V::None => (TaggedValue::null(), TypeCode::Null),
        V::Bool(b) => (TaggedValue::from_bool(*b), TypeCode::Bool),
        V::Int(v) => (TaggedValue::from_i64(*v), TypeCode::Int),
        V::Float(v) => (TaggedValue::from_f64(*v), TypeCode::Float),

        // Handle kinds
        V::Object(obj) => (TaggedValue::from_handle(obj.as_handle()), TypeCode::Object),
        V::NDArray(arr) => (TaggedValue::from_handle(arr.object().as_handle()), TypeCode::NDArray),
        V::Module(module) => (TaggedValue::from_handle(module.object().as_handle()), TypeCode::Module),
        V::Function(func) => (TaggedValue::from_handle(func.handle()), TypeCode::PackedFunction),
        V::TensorView(view) => (TaggedValue::from_handle(view.as_ptr().cast()), TypeCode::DLTensorView),
        V::Handle(handle) => (TaggedValue::from_handle(handle.0), TypeCode::OpaqueHandle),
        V::Ext(ext) => match TypeCode::from_raw(ext.code) {
            Some(code @ TypeCode::Ext(_)) => (TaggedValue::from_handle(ext.handle.0), code),
            _ => return Err(FfiError::UnknownTypeCode { code: ext.code }),
        },
        V::Device(device) => (TaggedValue::from_device(*device), TypeCode::Device),

        // Copied, referenced by descriptor
        V::Str(s) => (TaggedValue::from_byte_array(keep.store_bytes(s.as_bytes())), TypeCode::Str),
        V::Bytes(b) => (TaggedValue::from_byte_array(keep.store_bytes(b)), TypeCode::Bytes),

        // Address of the caller's handle field
        V::RefSlot(slot) => (TaggedValue::from_handle(slot.as_slot_ptr()), TypeCode::ObjectRefSlot),

        V::List(items) | V::Tuple(items) => {
            let obj = to_native_container(builtins::ARRAY, items, position)?;
            let handle = obj.as_handle();
            keep.objects.push(obj);
            (TaggedValue::from_handle(handle), TypeCode::Object)
        }
        V::Map(pairs) => {
            let flat: Vec<ForeignValue> = pairs
                .iter()
                .flat_map(|(k, v)| [k.clone(), v.clone()])
                .collect();
            let obj = to_native_container(builtins::MAP, &flat, position)?;
            let handle = obj.as_handle();
            keep.objects.push(obj);
            (TaggedValue::from_handle(handle), TypeCode::Object)
        }

        V::Callable(callable) => {
            let func = convert_to_packed_func(callable)?;
            let handle = func.handle();
            keep.functions.push(func);
            (TaggedValue::from_handle(handle), TypeCode::PackedFunction)
        }

        V::Instance { kind } => {
            return Err(FfiError::UnsupportedArgumentType { position, kind: kind.clone() });
        }
    };
    Ok((tagged, code.raw()))
}

/// Build a native container through its registered constructor
fn to_native_container(constructor: &str, items: &[ForeignValue], position: usize) -> FfiResult<ObjectRef> {
    let ctor = required_global_func(constructor)?;
    match ctor.call(items) {
        Ok(ForeignValue::Object(obj)) => Ok(obj),
        Ok(other) => Err(FfiError::NativeCall {
            message: format!("{} returned {}, expected an object", constructor, other.kind_name()),
        }),
        // Report the element's kind at the outer position
        Err(FfiError::UnsupportedArgumentType { kind, .. }) => {
            Err(FfiError::UnsupportedArgumentType { position, kind })
        }
        Err(err) => Err(err),
    }
}
