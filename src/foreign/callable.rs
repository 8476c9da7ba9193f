//! Foreign callables - closures the native side can hold as function handles

use super::value::ForeignValue;
use crate::errors::ForeignError;
use core::ffi::c_void;
use std::fmt;
use std::mem::ManuallyDrop;
use std::sync::Arc;

/// Outcome of a foreign call: a value, no value, or a raised error
pub type CallableResult = Result<Option<ForeignValue>, ForeignError>;

type Body = dyn Fn(&[ForeignValue]) -> CallableResult + Send + Sync;

struct CallableInner {
    name: String,
    body: Box<Body>,
}

/// Reference-counted foreign closure with an observable count
#[derive(Clone)]
pub struct ForeignCallable(Arc<CallableInner>);

impl ForeignCallable {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&[ForeignValue]) -> CallableResult + Send + Sync + 'static,
    {
        Self(Arc::new(CallableInner { name: name.into(), body: Box::new(body) }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn call(&self, args: &[ForeignValue]) -> CallableResult {
        (self.0.body)(args)
    }

    /// Number of live references, including those held by native handles
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Hand one reference over as an opaque resource pointer
    pub(crate) fn into_resource(self) -> *mut c_void {
        Arc::into_raw(self.0) as *mut c_void
    }

    /// Take back the reference behind a resource pointer
    ///
    /// # Safety
    /// `resource` must come from `into_resource` and not be reclaimed twice.
    pub(crate) unsafe fn from_resource(resource: *mut c_void) -> Self {
        Self(Arc::from_raw(resource as *const CallableInner))
    }

    /// Borrow the callable behind a resource pointer without touching the count
    ///
    /// # Safety
    /// `resource` must come from `into_resource` and still be owned.
    pub(crate) unsafe fn with_resource<R>(resource: *mut c_void, f: impl FnOnce(&ForeignCallable) -> R) -> R {
        let callable = ManuallyDrop::new(Self::from_resource(resource));
        f(&callable)
    }
}

impl fmt::Debug for ForeignCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ForeignCallable({}, refs={})", self.0.name, self.ref_count())
    }
}
