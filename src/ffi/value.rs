//! Native-side values and argument views
//!
//! `NativeValue` is the owned form native functions produce and store;
//! `NativeArgs` is a borrowed, typed view over an incoming tagged array.

use super::error::NativeError;
use super::function::FunctionObj;
use super::ndarray::{DLTensor, NDArrayObj};
use super::object::{payload_of, type_index, Object, ObjectPtr};
use super::abi::ObjectHandle;
use crate::interop::{ByteArray, Device, RawTypeCode, TaggedValue, TypeCode};
use core::ffi::c_void;
use core::marker::PhantomData;
use core::ptr;

/// Opaque address this layer never dereferences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(pub *mut c_void);

unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

impl RawHandle {
    #[inline]
    pub const fn null() -> Self {
        Self(ptr::null_mut())
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

/// Owned native value
#[derive(Debug, Clone)]
pub enum NativeValue {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Device(Device),
    Str(String),
    Bytes(Vec<u8>),
    Handle(RawHandle),
    /// Borrowed `DLTensor*`; valid only for the call it was passed to
    TensorView(RawHandle),
    Object(ObjectPtr<Object>),
    Ext(RawTypeCode, RawHandle),
}

impl NativeValue {
    pub fn function(func: ObjectPtr<FunctionObj>) -> Self {
        Self::Object(func.upcast())
    }

    pub fn type_code(&self) -> TypeCode {
        match self {
            Self::Null => TypeCode::Null,
            Self::Int(_) => TypeCode::Int,
            Self::Float(_) => TypeCode::Float,
            Self::Bool(_) => TypeCode::Bool,
            Self::Device(_) => TypeCode::Device,
            Self::Str(_) => TypeCode::Str,
            Self::Bytes(_) => TypeCode::Bytes,
            Self::Handle(_) => TypeCode::OpaqueHandle,
            Self::TensorView(_) => TypeCode::DLTensorView,
            Self::Object(obj) => code_for_type_index(obj.type_index()),
            Self::Ext(code, _) => TypeCode::Ext(*code),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectPtr<Object>> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Borrowed tagged form.
    ///
    /// `desc` must stay at a stable address while the tagged value is in
    /// use; it is filled for `Str`/`Bytes`.
    pub(crate) fn to_tagged(&self, desc: &mut ByteArray) -> (TaggedValue, RawTypeCode) {
        let value = match self {
            Self::Null => TaggedValue::null(),
            Self::Int(v) => TaggedValue::from_i64(*v),
            Self::Float(v) => TaggedValue::from_f64(*v),
            Self::Bool(v) => TaggedValue::from_bool(*v),
            Self::Device(d) => TaggedValue::from_device(*d),
            Self::Str(s) => {
                *desc = ByteArray::from_slice(s.as_bytes());
                TaggedValue::from_byte_array(desc)
            }
            Self::Bytes(b) => {
                *desc = ByteArray::from_slice(b);
                TaggedValue::from_byte_array(desc)
            }
            Self::Handle(h) | Self::TensorView(h) | Self::Ext(_, h) => TaggedValue::from_handle(h.0),
            Self::Object(obj) => TaggedValue::from_handle(obj.as_handle()),
        };
        (value, self.type_code().raw())
    }

    /// Build an owned value from a borrowed tagged value (argument form).
    ///
    /// Object kinds gain a reference; an object slot is moved out of.
    ///
    /// # Safety
    /// `value` must be valid for `code`.
    pub(crate) unsafe fn from_tagged(value: TaggedValue, code: RawTypeCode) -> Result<Self, NativeError> {
        let kind = TypeCode::from_raw(code)
            .ok_or_else(|| NativeError::new(format!("Unknown type code: {}", code)))?;
        Ok(match kind {
            TypeCode::Null => Self::Null,
            TypeCode::Int => Self::Int(value.v_int64),
            TypeCode::Float => Self::Float(value.v_float64),
            TypeCode::Bool => Self::Bool(value.v_int64 != 0),
            TypeCode::Device => Self::Device(value.v_device),
            TypeCode::Str => {
                let bytes = read_bytes(value.v_str)?;
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| NativeError::new(format!("Invalid UTF-8 string argument: {}", e)))?;
                Self::Str(text.to_owned())
            }
            TypeCode::Bytes => Self::Bytes(read_bytes(value.v_bytes)?.to_vec()),
            TypeCode::OpaqueHandle => Self::Handle(RawHandle(value.v_handle)),
            TypeCode::DLTensorView => Self::TensorView(RawHandle(value.v_handle)),
            TypeCode::Object | TypeCode::PackedFunction | TypeCode::Module | TypeCode::NDArray => {
                match ObjectPtr::<Object>::from_borrowed(value.v_handle) {
                    Some(obj) => Self::Object(obj),
                    None => Self::Null,
                }
            }
            TypeCode::ObjectRefSlot => match take_from_slot(value.v_handle)? {
                Some(obj) => Self::Object(obj),
                None => Self::Null,
            },
            TypeCode::Ext(c) => Self::Ext(c, RawHandle(value.v_handle)),
        })
    }
}

/// Code matching a runtime type index
pub fn code_for_type_index(index: u32) -> TypeCode {
    match index {
        type_index::FUNCTION => TypeCode::PackedFunction,
        type_index::MODULE => TypeCode::Module,
        type_index::NDARRAY => TypeCode::NDArray,
        _ => TypeCode::Object,
    }
}

unsafe fn read_bytes<'a>(desc: *const ByteArray) -> Result<&'a [u8], NativeError> {
    desc.as_ref()
        .map(|d| d.as_slice())
        .ok_or_else(|| NativeError::new("Null byte-array descriptor"))
}

/// Move the object out of a caller-owned handle slot, leaving it null
///
/// # Safety
/// `slot` must point to a handle field owned by the caller.
pub(crate) unsafe fn take_from_slot(slot: *mut c_void) -> Result<Option<ObjectPtr<Object>>, NativeError> {
    let slot = slot as *mut ObjectHandle;
    if slot.is_null() {
        return Err(NativeError::new("Null object slot"));
    }
    let handle = ptr::replace(slot, ptr::null_mut());
    Ok(ObjectPtr::from_raw(handle))
}

/// Borrowed, typed view over an incoming argument array
#[derive(Debug)]
pub struct NativeArgs<'a> {
    values: &'a [TaggedValue],
    codes: &'a [RawTypeCode],
}

impl<'a> NativeArgs<'a> {
    pub fn new(values: &'a [TaggedValue], codes: &'a [RawTypeCode]) -> Self {
        debug_assert_eq!(values.len(), codes.len());
        Self { values, codes }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn slot(&self, i: usize) -> Result<(TaggedValue, RawTypeCode), NativeError> {
        if i >= self.values.len() {
            return Err(NativeError::new(format!(
                "Argument index {} out of range (num_args={})",
                i,
                self.values.len()
            )));
        }
        Ok((self.values[i], self.codes[i]))
    }

    pub fn type_code(&self, i: usize) -> Result<TypeCode, NativeError> {
        let (_, code) = self.slot(i)?;
        TypeCode::from_raw(code).ok_or_else(|| NativeError::new(format!("Unknown type code: {}", code)))
    }

    fn mismatch(&self, i: usize, expected: &str) -> NativeError {
        let found = match TypeCode::from_raw(self.codes[i]) {
            Some(code) => code.name().to_string(),
            None => format!("code {}", self.codes[i]),
        };
        NativeError::new(format!("Expected {} at argument {}, got {}", expected, i, found))
    }

    pub fn get_i64(&self, i: usize) -> Result<i64, NativeError> {
        let (value, _) = self.slot(i)?;
        unsafe {
            match self.type_code(i)? {
                TypeCode::Int => Ok(value.v_int64),
                TypeCode::Bool => Ok((value.v_int64 != 0) as i64),
                _ => Err(self.mismatch(i, "int")),
            }
        }
    }

    pub fn get_f64(&self, i: usize) -> Result<f64, NativeError> {
        let (value, _) = self.slot(i)?;
        unsafe {
            match self.type_code(i)? {
                TypeCode::Float => Ok(value.v_float64),
                TypeCode::Int => Ok(value.v_int64 as f64),
                _ => Err(self.mismatch(i, "float")),
            }
        }
    }

    pub fn get_bool(&self, i: usize) -> Result<bool, NativeError> {
        let (value, _) = self.slot(i)?;
        unsafe {
            match self.type_code(i)? {
                TypeCode::Bool | TypeCode::Int => Ok(value.v_int64 != 0),
                _ => Err(self.mismatch(i, "bool")),
            }
        }
    }

    pub fn get_str(&self, i: usize) -> Result<&'a str, NativeError> {
        let (value, _) = self.slot(i)?;
        match self.type_code(i)? {
            TypeCode::Str => unsafe {
                let bytes = read_bytes(value.v_str)?;
                std::str::from_utf8(bytes)
                    .map_err(|e| NativeError::new(format!("Invalid UTF-8 at argument {}: {}", i, e)))
            },
            _ => Err(self.mismatch(i, "str")),
        }
    }

    pub fn get_bytes(&self, i: usize) -> Result<&'a [u8], NativeError> {
        let (value, _) = self.slot(i)?;
        match self.type_code(i)? {
            TypeCode::Bytes | TypeCode::Str => unsafe { read_bytes(value.v_bytes) },
            _ => Err(self.mismatch(i, "bytes")),
        }
    }

    pub fn get_device(&self, i: usize) -> Result<Device, NativeError> {
        let (value, _) = self.slot(i)?;
        match self.type_code(i)? {
            TypeCode::Device => Ok(unsafe { value.v_device }),
            _ => Err(self.mismatch(i, "device")),
        }
    }

    /// New reference to an object argument (null is rejected)
    pub fn get_object(&self, i: usize) -> Result<ObjectPtr<Object>, NativeError> {
        let (value, _) = self.slot(i)?;
        if !self.type_code(i)?.is_object() {
            return Err(self.mismatch(i, "object"));
        }
        unsafe { ObjectPtr::from_borrowed(value.v_handle) }
            .ok_or_else(|| NativeError::new(format!("Null object at argument {}", i)))
    }

    pub fn get_function(&self, i: usize) -> Result<ObjectPtr<FunctionObj>, NativeError> {
        self.get_object(i)?
            .downcast::<FunctionObj>()
            .map_err(|obj| NativeError::new(format!("Expected function at argument {}, got {}", i, obj.type_key())))
    }

    /// Tensor behind a tensor-view or NDArray argument, borrowed for the call
    pub fn get_tensor(&self, i: usize) -> Result<&'a DLTensor, NativeError> {
        let (value, _) = self.slot(i)?;
        unsafe {
            match self.type_code(i)? {
                TypeCode::DLTensorView => (value.v_handle as *const DLTensor)
                    .as_ref()
                    .ok_or_else(|| NativeError::new(format!("Null tensor at argument {}", i))),
                TypeCode::NDArray => payload_of::<NDArrayObj>(value.v_handle)
                    .map(|arr| arr.tensor())
                    .ok_or_else(|| self.mismatch(i, "ndarray")),
                _ => Err(self.mismatch(i, "tensor")),
            }
        }
    }

    /// Move the object out of a caller-owned slot argument
    pub fn take_slot(&self, i: usize) -> Result<Option<ObjectPtr<Object>>, NativeError> {
        let (value, _) = self.slot(i)?;
        match self.type_code(i)? {
            TypeCode::ObjectRefSlot => unsafe { take_from_slot(value.v_handle) },
            _ => Err(self.mismatch(i, "object slot")),
        }
    }

    /// Owned copy of argument `i`
    pub fn value(&self, i: usize) -> Result<NativeValue, NativeError> {
        let (value, code) = self.slot(i)?;
        unsafe { NativeValue::from_tagged(value, code) }
    }
}

/// Tagged arrays built from owned values, borrowing them for one call
pub(crate) struct TaggedArgs<'a> {
    pub values: Vec<TaggedValue>,
    pub codes: Vec<RawTypeCode>,
    _descs: Box<[ByteArray]>,
    _marker: PhantomData<&'a [NativeValue]>,
}

impl<'a> TaggedArgs<'a> {
    pub fn new(args: &'a [NativeValue]) -> Self {
        let mut descs: Box<[ByteArray]> = args
            .iter()
            .map(|_| ByteArray { data: ptr::null(), size: 0 })
            .collect();
        let mut values = Vec::with_capacity(args.len());
        let mut codes = Vec::with_capacity(args.len());
        for (arg, desc) in args.iter().zip(descs.iter_mut()) {
            let (value, code) = arg.to_tagged(desc);
            values.push(value);
            codes.push(code);
        }
        Self { values, codes, _descs: descs, _marker: PhantomData }
    }
}

