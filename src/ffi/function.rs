//! Function objects - native closures and wrapped foreign callbacks
//!
//! Both flavours share one invocation primitive over tagged arrays. A
//! callback function owns `(entry, resource, finalizer)` and runs the
//! finalizer exactly once, when its last reference goes away.

use super::abi::{CallbackEntry, CallbackFinalizer, STATUS_OK};
use super::error::NativeError;
use super::object::{type_index, NativeObject, ObjectPtr};
use super::value::{NativeArgs, NativeValue, RawHandle, TaggedArgs};
use crate::interop::{RawTypeCode, TaggedValue};
use crate::logging::{debug, trace};
use core::ffi::c_void;
use std::fmt;

/// Signature of a function implemented natively
pub type NativeFn = dyn Fn(&NativeArgs<'_>) -> Result<NativeValue, NativeError> + Send + Sync;

enum FunctionKind {
    Native(Box<NativeFn>),
    Callback {
        entry: CallbackEntry,
        resource: RawHandle,
        finalizer: Option<CallbackFinalizer>,
    },
}

pub struct FunctionObj {
    kind: FunctionKind,
}

impl NativeObject for FunctionObj {
    const TYPE_INDEX: u32 = type_index::FUNCTION;
    const TYPE_KEY: &'static str = "runtime.PackedFunc";
}

/// Return slot handed to a callback entry as an opaque pointer
#[derive(Default)]
pub(crate) struct CallbackReturn {
    value: Option<NativeValue>,
}

impl CallbackReturn {
    pub(crate) fn set(&mut self, value: NativeValue) {
        self.value = Some(value);
    }
}

impl FunctionObj {
    /// Wrap a native closure
    pub fn from_native<F>(f: F) -> ObjectPtr<Self>
    where
        F: Fn(&NativeArgs<'_>) -> Result<NativeValue, NativeError> + Send + Sync + 'static,
    {
        ObjectPtr::new(Self { kind: FunctionKind::Native(Box::new(f)) })
    }

    /// Wrap a foreign callback entry point
    pub fn from_callback(
        entry: CallbackEntry,
        resource: *mut c_void,
        finalizer: Option<CallbackFinalizer>,
    ) -> ObjectPtr<Self> {
        debug!(event = "callback_wrap", resource = ?resource);
        ObjectPtr::new(Self {
            kind: FunctionKind::Callback {
                entry,
                resource: RawHandle(resource),
                finalizer,
            },
        })
    }

    #[inline]
    pub fn is_callback(&self) -> bool {
        matches!(self.kind, FunctionKind::Callback { .. })
    }

    /// Invoke over tagged arrays; a callback may rewrite them in place
    pub fn invoke_tagged(
        &self,
        values: &mut [TaggedValue],
        codes: &mut [RawTypeCode],
    ) -> Result<NativeValue, NativeError> {
        debug_assert_eq!(values.len(), codes.len());
        match &self.kind {
            FunctionKind::Native(f) => f(&NativeArgs::new(values, codes)),
            FunctionKind::Callback { entry, resource, .. } => {
                let num_args = i32::try_from(values.len())
                    .map_err(|_| NativeError::new("Too many arguments"))?;
                let mut ret = CallbackReturn::default();
                trace!(event = "callback_enter", args = values.len());
                let status = unsafe {
                    entry(
                        values.as_mut_ptr(),
                        codes.as_mut_ptr(),
                        num_args,
                        &mut ret as *mut CallbackReturn as *mut c_void,
                        resource.0,
                    )
                };
                if status != STATUS_OK {
                    return Err(NativeError::from_last_error());
                }
                Ok(ret.value.unwrap_or(NativeValue::Null))
            }
        }
    }

    /// Call with owned native values (native code calling a function value)
    pub fn call(&self, args: &[NativeValue]) -> Result<NativeValue, NativeError> {
        let mut tagged = TaggedArgs::new(args);
        self.invoke_tagged(&mut tagged.values, &mut tagged.codes)
    }
}

impl Drop for FunctionObj {
    fn drop(&mut self) {
        if let FunctionKind::Callback { resource, finalizer: Some(finalizer), .. } = &self.kind {
            debug!(event = "callback_finalize", resource = ?resource.0);
            unsafe { finalizer(resource.0) }
        }
    }
}

impl fmt::Debug for FunctionObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FunctionKind::Native(_) => f.write_str("FunctionObj(native)"),
            FunctionKind::Callback { resource, .. } => write!(f, "FunctionObj(callback {:p})", resource.0),
        }
    }
}
