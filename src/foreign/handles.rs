//! Owning wrappers for native handles held by the foreign side
//!
//! Every wrapper owns exactly one native reference and gives it back on
//! drop; global function handles are the exception and are never freed.

use super::callable::ForeignCallable;
use super::deferred::check_status;
use super::value::ForeignValue;
use crate::errors::{FfiError, FfiResult};
use crate::ffi::builtins;
use crate::ffi::{
    pffi_func_free, pffi_ndarray_from_tensor, pffi_ndarray_get_tensor, pffi_object_free, pffi_object_retain,
    pffi_object_type_index, pffi_object_type_key, DLTensor, FunctionHandle, ObjectHandle, RawHandle,
};
use crate::interop::{call, constructor, global, trampoline, ByteArray, DataType, Device, RawTypeCode, TypeCode};
use crate::logging::log_handle_release;
use core::ffi::c_void;
use core::ptr::{self, NonNull};
use std::cell::Cell;
use std::fmt;

/// Owned reference to any native object
pub struct ObjectRef {
    handle: NonNull<c_void>,
}

// Native reference counts are atomic.
unsafe impl Send for ObjectRef {}
unsafe impl Sync for ObjectRef {}

impl ObjectRef {
    /// Adopt an owned handle
    ///
    /// # Safety
    /// `handle` must be null or a live object handle whose reference is
    /// handed over.
    pub unsafe fn from_raw(handle: ObjectHandle) -> Option<Self> {
        NonNull::new(handle).map(|handle| Self { handle })
    }

    /// Take a new reference to a borrowed handle
    ///
    /// # Safety
    /// `handle` must be null or a live object handle.
    pub unsafe fn from_borrowed(handle: ObjectHandle) -> Option<Self> {
        let handle = NonNull::new(handle)?;
        pffi_object_retain(handle.as_ptr());
        Some(Self { handle })
    }

    #[inline]
    pub fn as_handle(&self) -> ObjectHandle {
        self.handle.as_ptr()
    }

    /// Give up ownership without releasing
    pub fn into_raw(self) -> ObjectHandle {
        let handle = self.handle.as_ptr();
        std::mem::forget(self);
        handle
    }

    pub fn type_key(&self) -> FfiResult<String> {
        let mut key = ByteArray { data: ptr::null(), size: 0 };
        check_status(unsafe { pffi_object_type_key(self.as_handle(), &mut key) })?;
        Ok(String::from_utf8_lossy(unsafe { key.as_slice() }).into_owned())
    }

    pub fn type_index(&self) -> FfiResult<u32> {
        let mut index = 0u32;
        check_status(unsafe { pffi_object_type_index(self.as_handle(), &mut index) })?;
        Ok(index)
    }

    #[inline]
    pub fn same_as(&self, other: &ObjectRef) -> bool {
        self.handle == other.handle
    }
}

impl Clone for ObjectRef {
    fn clone(&self) -> Self {
        unsafe { pffi_object_retain(self.as_handle()) };
        Self { handle: self.handle }
    }
}

impl Drop for ObjectRef {
    fn drop(&mut self) {
        log_handle_release("object", self.as_handle());
        unsafe { pffi_object_free(self.as_handle()) };
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:p})", self.handle)
    }
}

/// Native function handle
///
/// Global handles borrow the registry's reference, so clone and drop skip
/// retain/release for them.
pub struct PackedFunc {
    handle: NonNull<c_void>,
    is_global: bool,
}

unsafe impl Send for PackedFunc {}
unsafe impl Sync for PackedFunc {}

impl PackedFunc {
    /// # Safety
    /// `handle` must be null or a live function handle. A local handle's
    /// reference is handed over.
    pub unsafe fn from_raw(handle: FunctionHandle, is_global: bool) -> Option<Self> {
        NonNull::new(handle).map(|handle| Self { handle, is_global })
    }

    /// Wrap a foreign callable as a new local function
    pub fn from_callable(callable: &ForeignCallable) -> FfiResult<Self> {
        trampoline::convert_to_packed_func(callable)
    }

    #[inline]
    pub fn handle(&self) -> FunctionHandle {
        self.handle.as_ptr()
    }

    #[inline]
    pub fn is_global(&self) -> bool {
        self.is_global
    }

    pub fn call(&self, args: &[ForeignValue]) -> FfiResult<ForeignValue> {
        call::call_packed(self.handle(), args)
    }

    pub fn same_as(&self, other: &PackedFunc) -> bool {
        self.handle == other.handle
    }
}

impl Clone for PackedFunc {
    fn clone(&self) -> Self {
        if !self.is_global {
            unsafe { pffi_object_retain(self.handle()) };
        }
        Self { handle: self.handle, is_global: self.is_global }
    }
}

impl Drop for PackedFunc {
    fn drop(&mut self) {
        if !self.is_global {
            log_handle_release("function", self.handle());
            unsafe { pffi_func_free(self.handle()) };
        }
    }
}

impl fmt::Debug for PackedFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = if self.is_global { "global" } else { "local" };
        write!(f, "PackedFunc({:p}, {})", self.handle, scope)
    }
}

fn adopt_constructed(handle: ObjectHandle) -> FfiResult<ObjectRef> {
    unsafe { ObjectRef::from_raw(handle) }.ok_or_else(|| FfiError::NativeCall {
        message: "Constructor returned a null handle".to_string(),
    })
}

fn unexpected(function: &str, value: &ForeignValue) -> FfiError {
    FfiError::NativeCall {
        message: format!("{} returned unexpected {}", function, value.kind_name()),
    }
}

/// Named function table
#[derive(Debug, Clone)]
pub struct Module(ObjectRef);

impl Module {
    pub fn new(name: &str) -> FfiResult<Self> {
        let ctor = global::required_global_func(builtins::MODULE_CREATE)?;
        let handle = constructor::construct_handle(&ctor, TypeCode::Module, &[ForeignValue::from(name)])?;
        Ok(Self(adopt_constructed(handle)?))
    }

    pub fn from_object(obj: ObjectRef) -> Self {
        Self(obj)
    }

    pub fn object(&self) -> &ObjectRef {
        &self.0
    }

    pub fn name(&self) -> FfiResult<String> {
        let func = global::required_global_func(builtins::MODULE_NAME)?;
        match func.call(&[ForeignValue::Module(self.clone())])? {
            ForeignValue::Str(name) => Ok(name),
            other => Err(unexpected(builtins::MODULE_NAME, &other)),
        }
    }

    pub fn add_function(&self, name: &str, func: &PackedFunc) -> FfiResult<()> {
        let add = global::required_global_func(builtins::MODULE_ADD_FUNCTION)?;
        add.call(&[
            ForeignValue::Module(self.clone()),
            ForeignValue::from(name),
            ForeignValue::Function(func.clone()),
        ])?;
        Ok(())
    }

    pub fn import(&self, other: &Module) -> FfiResult<()> {
        let import = global::required_global_func(builtins::MODULE_IMPORT)?;
        import.call(&[ForeignValue::Module(self.clone()), ForeignValue::Module(other.clone())])?;
        Ok(())
    }

    pub fn get_function(&self, name: &str, query_imports: bool) -> FfiResult<Option<PackedFunc>> {
        let get = global::required_global_func(builtins::MODULE_GET_FUNCTION)?;
        match get.call(&[
            ForeignValue::Module(self.clone()),
            ForeignValue::from(name),
            ForeignValue::Bool(query_imports),
        ])? {
            ForeignValue::Function(func) => Ok(Some(func)),
            ForeignValue::None => Ok(None),
            other => Err(unexpected(builtins::MODULE_GET_FUNCTION, &other)),
        }
    }
}

/// Owning n-dimensional array
#[derive(Debug, Clone)]
pub struct NDArray(ObjectRef);

impl NDArray {
    /// Zero-filled array allocated by the runtime
    pub fn empty(shape: &[i64], dtype: DataType, device: Device) -> FfiResult<Self> {
        let ctor = global::required_global_func(builtins::NDARRAY_EMPTY)?;
        let args = [
            ForeignValue::List(shape.iter().map(|&d| ForeignValue::Int(d)).collect()),
            ForeignValue::Str(dtype.to_string()),
            ForeignValue::Device(device),
        ];
        let handle = constructor::construct_handle(&ctor, TypeCode::NDArray, &args)?;
        Ok(Self(adopt_constructed(handle)?))
    }

    pub fn from_bytes(shape: &[i64], dtype: DataType, device: Device, bytes: &[u8]) -> FfiResult<Self> {
        let arr = Self::empty(shape, dtype, device)?;
        arr.copy_from_bytes(bytes)?;
        Ok(arr)
    }

    pub fn from_object(obj: ObjectRef) -> Self {
        Self(obj)
    }

    pub fn object(&self) -> &ObjectRef {
        &self.0
    }

    /// Borrowed view of this array's tensor
    pub fn as_view(&self) -> FfiResult<TensorView> {
        let mut tensor: *mut DLTensor = ptr::null_mut();
        check_status(unsafe { pffi_ndarray_get_tensor(self.0.as_handle(), &mut tensor) })?;
        unsafe { TensorView::from_raw(tensor) }.ok_or_else(|| FfiError::NativeCall {
            message: "NDArray has no tensor".to_string(),
        })
    }

    pub fn shape(&self) -> FfiResult<Vec<i64>> {
        Ok(self.as_view()?.shape())
    }

    pub fn dtype(&self) -> FfiResult<DataType> {
        Ok(self.as_view()?.dtype())
    }

    pub fn device(&self) -> FfiResult<Device> {
        Ok(self.as_view()?.device())
    }

    pub fn to_bytes(&self) -> FfiResult<Vec<u8>> {
        self.as_view()?.to_bytes()
    }

    pub fn copy_from_bytes(&self, bytes: &[u8]) -> FfiResult<()> {
        let view = self.as_view()?;
        unsafe { view.tensor().write_bytes(bytes) }.map_err(|e| FfiError::NativeCall {
            message: e.message().to_string(),
        })
    }
}

/// Borrowed tensor descriptor; must not outlive the call it arrived in
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TensorView {
    tensor: NonNull<DLTensor>,
}

impl TensorView {
    /// # Safety
    /// `tensor` must be null or stay valid for as long as the view is used.
    pub unsafe fn from_raw(tensor: *mut DLTensor) -> Option<Self> {
        NonNull::new(tensor).map(|tensor| Self { tensor })
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut DLTensor {
        self.tensor.as_ptr()
    }

    fn tensor(&self) -> &DLTensor {
        unsafe { self.tensor.as_ref() }
    }

    pub fn shape(&self) -> Vec<i64> {
        unsafe { self.tensor().shape() }.to_vec()
    }

    pub fn dtype(&self) -> DataType {
        self.tensor().dtype
    }

    pub fn device(&self) -> Device {
        self.tensor().device
    }

    pub fn to_bytes(&self) -> FfiResult<Vec<u8>> {
        unsafe { self.tensor().bytes() }
            .map(<[u8]>::to_vec)
            .map_err(|e| FfiError::NativeCall { message: e.message().to_string() })
    }

    /// Owning copy that may outlive the view
    pub fn to_ndarray(&self) -> FfiResult<NDArray> {
        let mut handle: ObjectHandle = ptr::null_mut();
        check_status(unsafe { pffi_ndarray_from_tensor(self.as_ptr(), &mut handle) })?;
        Ok(NDArray(adopt_constructed(handle)?))
    }
}

impl fmt::Debug for TensorView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TensorView({:p})", self.tensor)
    }
}

/// Caller-owned handle field a callee can move-construct into
#[derive(Debug)]
pub struct ObjectSlot {
    handle: Cell<ObjectHandle>,
}

impl ObjectSlot {
    pub fn new() -> Self {
        Self { handle: Cell::new(ptr::null_mut()) }
    }

    /// Slot already holding `obj`
    pub fn holding(obj: ObjectRef) -> Self {
        Self { handle: Cell::new(obj.into_raw()) }
    }

    pub fn is_empty(&self) -> bool {
        self.handle.get().is_null()
    }

    /// Move the object out, leaving the slot empty
    pub fn take(&self) -> Option<ObjectRef> {
        let handle = self.handle.replace(ptr::null_mut());
        unsafe { ObjectRef::from_raw(handle) }
    }

    /// Address of the handle field
    pub(crate) fn as_slot_ptr(&self) -> *mut c_void {
        self.handle.as_ptr() as *mut c_void
    }
}

impl Default for ObjectSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ObjectSlot {
    fn drop(&mut self) {
        drop(self.take());
    }
}

/// Value carrying an extension type code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtValue {
    pub code: RawTypeCode,
    pub handle: RawHandle,
}
