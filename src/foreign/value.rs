//! Dynamic values as the foreign caller sees them

use super::callable::ForeignCallable;
use super::handles::{ExtValue, Module, NDArray, ObjectRef, ObjectSlot, PackedFunc, TensorView};
use crate::ffi::RawHandle;
use crate::interop::Device;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub enum ForeignValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Device(Device),
    Object(ObjectRef),
    NDArray(NDArray),
    /// Borrowed tensor, valid only for the call it arrived in
    TensorView(TensorView),
    Module(Module),
    Function(PackedFunc),
    Callable(ForeignCallable),
    /// Handle field a constructor may move into
    RefSlot(Rc<ObjectSlot>),
    Handle(RawHandle),
    Ext(ExtValue),
    List(Vec<ForeignValue>),
    Map(Vec<(ForeignValue, ForeignValue)>),
    /// Several values at once; only valid as a sequence argument
    Tuple(Vec<ForeignValue>),
    /// Any other foreign object, identified by its declared kind
    Instance { kind: String },
}

impl ForeignValue {
    /// Declared kind, as reported in errors
    pub fn kind_name(&self) -> &str {
        match self {
            Self::None => "None",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Device(_) => "Device",
            Self::Object(_) => "Object",
            Self::NDArray(_) => "NDArray",
            Self::TensorView(_) => "TensorView",
            Self::Module(_) => "Module",
            Self::Function(_) => "PackedFunc",
            Self::Callable(_) => "callable",
            Self::RefSlot(_) => "ObjectSlot",
            Self::Handle(_) => "handle",
            Self::Ext(_) => "ext",
            Self::List(_) => "list",
            Self::Map(_) => "dict",
            Self::Tuple(_) => "tuple",
            Self::Instance { kind } => kind,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&PackedFunc> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Underlying native object of any object-backed value
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(obj) => Some(obj),
            Self::NDArray(arr) => Some(arr.object()),
            Self::Module(module) => Some(module.object()),
            _ => None,
        }
    }
}

/// Structural equality for data, identity for handles and callables
impl PartialEq for ForeignValue {
    fn eq(&self, other: &Self) -> bool {
        use ForeignValue::*;
        match (self, other) {
            (None, None) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Device(a), Device(b)) => a == b,
            (Object(a), Object(b)) => a.same_as(b),
            (NDArray(a), NDArray(b)) => a.object().same_as(b.object()),
            (Module(a), Module(b)) => a.object().same_as(b.object()),
            (TensorView(a), TensorView(b)) => a == b,
            (Function(a), Function(b)) => a.same_as(b),
            (Callable(a), Callable(b)) => a.ptr_eq(b),
            (RefSlot(a), RefSlot(b)) => Rc::ptr_eq(a, b),
            (Handle(a), Handle(b)) => a == b,
            (Ext(a), Ext(b)) => a == b,
            (List(a), List(b)) | (Tuple(a), Tuple(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (Instance { kind: a }, Instance { kind: b }) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for ForeignValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ForeignValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ForeignValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for ForeignValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ForeignValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ForeignValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<u8>> for ForeignValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<Device> for ForeignValue {
    fn from(v: Device) -> Self {
        Self::Device(v)
    }
}

impl From<PackedFunc> for ForeignValue {
    fn from(v: PackedFunc) -> Self {
        Self::Function(v)
    }
}

impl From<ForeignCallable> for ForeignValue {
    fn from(v: ForeignCallable) -> Self {
        Self::Callable(v)
    }
}

impl From<NDArray> for ForeignValue {
    fn from(v: NDArray) -> Self {
        Self::NDArray(v)
    }
}

impl From<Module> for ForeignValue {
    fn from(v: Module) -> Self {
        Self::Module(v)
    }
}

impl From<ObjectRef> for ForeignValue {
    fn from(v: ObjectRef) -> Self {
        Self::Object(v)
    }
}
