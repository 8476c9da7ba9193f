//! Type definitions for the packed calling convention
//!
//! Design: one pointer-sized `repr(C)` union travels next to a raw `i32`
//! type code. The code alone decides which union member is valid.

use core::ffi::c_void;
use core::fmt;

/// Raw type code as it crosses the ABI boundary
pub type RawTypeCode = i32;

/// First code of the extension range
pub const EXT_BEGIN: RawTypeCode = 16;

/// One past the last extension code
pub const EXT_END: RawTypeCode = 128;

/// Type code of a tagged value
///
/// Closed set of built-in codes plus an open extension range
/// (`EXT_BEGIN..EXT_END`) for foreign-registered types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCode {
    Int,
    Float,
    OpaqueHandle,
    Null,
    Device,
    DLTensorView,
    Object,
    Module,
    PackedFunction,
    Str,
    Bytes,
    NDArray,
    ObjectRefSlot,
    Bool,
    Ext(RawTypeCode),
}

impl TypeCode {
    /// Decode a raw code; `None` for anything outside the recognised set
    #[inline]
    pub const fn from_raw(code: RawTypeCode) -> Option<Self> {
        Some(match code {
            0 => Self::Int,
            2 => Self::Float,
            3 => Self::OpaqueHandle,
            4 => Self::Null,
            6 => Self::Device,
            7 => Self::DLTensorView,
            8 => Self::Object,
            9 => Self::Module,
            10 => Self::PackedFunction,
            11 => Self::Str,
            12 => Self::Bytes,
            13 => Self::NDArray,
            14 => Self::ObjectRefSlot,
            15 => Self::Bool,
            c if c >= EXT_BEGIN && c < EXT_END => Self::Ext(c),
            _ => return None,
        })
    }

    /// Raw code for the ABI
    #[inline]
    pub const fn raw(self) -> RawTypeCode {
        match self {
            Self::Int => 0,
            Self::Float => 2,
            Self::OpaqueHandle => 3,
            Self::Null => 4,
            Self::Device => 6,
            Self::DLTensorView => 7,
            Self::Object => 8,
            Self::Module => 9,
            Self::PackedFunction => 10,
            Self::Str => 11,
            Self::Bytes => 12,
            Self::NDArray => 13,
            Self::ObjectRefSlot => 14,
            Self::Bool => 15,
            Self::Ext(c) => c,
        }
    }

    /// Codes whose referenced content the callee may mutate.
    ///
    /// Values with these codes go through the in-place translate step
    /// before they are decoded.
    #[inline]
    pub const fn has_mutable_content(self) -> bool {
        matches!(
            self,
            Self::Object
                | Self::PackedFunction
                | Self::Module
                | Self::NDArray
                | Self::ObjectRefSlot
                | Self::Ext(_)
        )
    }

    /// Codes whose payload is a reference-counted native object
    #[inline]
    pub const fn is_object(self) -> bool {
        matches!(
            self,
            Self::Object | Self::PackedFunction | Self::Module | Self::NDArray
        )
    }

    /// Check if code lies in the extension range
    #[inline]
    pub const fn is_extension(self) -> bool {
        matches!(self, Self::Ext(_))
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::OpaqueHandle => "handle",
            Self::Null => "null",
            Self::Device => "device",
            Self::DLTensorView => "tensor-view",
            Self::Object => "object",
            Self::Module => "module",
            Self::PackedFunction => "function",
            Self::Str => "str",
            Self::Bytes => "bytes",
            Self::NDArray => "ndarray",
            Self::ObjectRefSlot => "object-slot",
            Self::Bool => "bool",
            Self::Ext(_) => "ext",
        }
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ext(c) => write!(f, "ext({})", c),
            other => write!(f, "{}({})", other.name(), other.raw()),
        }
    }
}

/// Device descriptor: device kind + index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct Device {
    pub device_type: i32,
    pub device_id: i32,
}

impl Device {
    pub const CPU: i32 = 1;
    pub const CUDA: i32 = 2;
    pub const CUDA_HOST: i32 = 3;
    pub const OPENCL: i32 = 4;
    pub const VULKAN: i32 = 7;
    pub const METAL: i32 = 8;
    pub const ROCM: i32 = 10;

    #[inline]
    pub const fn new(device_type: i32, device_id: i32) -> Self {
        Self { device_type, device_id }
    }

    #[inline]
    pub const fn cpu(device_id: i32) -> Self {
        Self::new(Self::CPU, device_id)
    }

    #[inline]
    pub const fn cuda(device_id: i32) -> Self {
        Self::new(Self::CUDA, device_id)
    }

    pub const fn kind_name(&self) -> &'static str {
        match self.device_type {
            Self::CPU => "cpu",
            Self::CUDA => "cuda",
            Self::CUDA_HOST => "cuda_host",
            Self::OPENCL => "opencl",
            Self::VULKAN => "vulkan",
            Self::METAL => "metal",
            Self::ROCM => "rocm",
            _ => "ext_dev",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind_name(), self.device_id)
    }
}

/// Element type of a tensor (`code`, `bits`, `lanes`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct DataType {
    pub code: u8,
    pub bits: u8,
    pub lanes: u16,
}

impl DataType {
    pub const INT: u8 = 0;
    pub const UINT: u8 = 1;
    pub const FLOAT: u8 = 2;

    #[inline]
    pub const fn new(code: u8, bits: u8, lanes: u16) -> Self {
        Self { code, bits, lanes }
    }

    pub const fn int32() -> Self {
        Self::new(Self::INT, 32, 1)
    }

    pub const fn int64() -> Self {
        Self::new(Self::INT, 64, 1)
    }

    pub const fn float32() -> Self {
        Self::new(Self::FLOAT, 32, 1)
    }

    pub const fn float64() -> Self {
        Self::new(Self::FLOAT, 64, 1)
    }

    /// Bytes occupied by one element
    #[inline]
    pub const fn element_bytes(&self) -> usize {
        (self.bits as usize * self.lanes as usize + 7) / 8
    }

    /// Parse names like `float32`, `int64`, `uint8`
    pub fn parse(name: &str) -> Option<Self> {
        let (code, digits) = if let Some(rest) = name.strip_prefix("float") {
            (Self::FLOAT, rest)
        } else if let Some(rest) = name.strip_prefix("uint") {
            (Self::UINT, rest)
        } else if let Some(rest) = name.strip_prefix("int") {
            (Self::INT, rest)
        } else {
            return None;
        };
        let bits: u8 = digits.parse().ok()?;
        if bits == 0 {
            return None;
        }
        Some(Self::new(code, bits, 1))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.code {
            Self::INT => "int",
            Self::UINT => "uint",
            Self::FLOAT => "float",
            _ => "custom",
        };
        write!(f, "{}{}", prefix, self.bits)?;
        if self.lanes > 1 {
            write!(f, "x{}", self.lanes)?;
        }
        Ok(())
    }
}

/// Byte-array descriptor: pointer + length, never owning
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ByteArray {
    pub data: *const u8,
    pub size: usize,
}

impl ByteArray {
    #[inline]
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self { data: bytes.as_ptr(), size: bytes.len() }
    }

    /// View the described bytes
    ///
    /// # Safety
    /// `data` must point to `size` readable bytes that outlive `'a`.
    #[inline]
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        if self.size == 0 {
            &[]
        } else {
            core::slice::from_raw_parts(self.data, self.size)
        }
    }
}

/// Tagged value payload (untagged union, always paired with a type code)
#[derive(Clone, Copy)]
#[repr(C)]
pub union TaggedValue {
    pub v_int64: i64,
    pub v_float64: f64,
    pub v_bool: bool,
    pub v_handle: *mut c_void,
    pub v_str: *const ByteArray,
    pub v_bytes: *const ByteArray,
    pub v_device: Device,
}

impl TaggedValue {
    /// Zeroed payload, the value paired with `TypeCode::Null`
    #[inline]
    pub const fn null() -> Self {
        Self { v_int64: 0 }
    }

    #[inline]
    pub const fn from_i64(v: i64) -> Self {
        Self { v_int64: v }
    }

    #[inline]
    pub const fn from_f64(v: f64) -> Self {
        Self { v_float64: v }
    }

    /// Boolean payload written as a whole word; readers test `v_int64 != 0`
    #[inline]
    pub const fn from_bool(v: bool) -> Self {
        Self { v_int64: v as i64 }
    }

    #[inline]
    pub const fn from_handle(ptr: *mut c_void) -> Self {
        Self { v_handle: ptr }
    }

    #[inline]
    pub const fn from_device(device: Device) -> Self {
        Self { v_device: device }
    }

    #[inline]
    pub const fn from_byte_array(desc: *const ByteArray) -> Self {
        Self { v_bytes: desc }
    }
}

impl Default for TaggedValue {
    #[inline]
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for TaggedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Every member is at most 8 bytes and the payload is zero-initialised.
        write!(f, "TaggedValue({:#018x})", unsafe { self.v_int64 })
    }
}
