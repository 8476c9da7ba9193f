//! Native object model - header layout and reference counting
//!
//! Design: every object is a `repr(C)` cell whose first field is an
//! `ObjectHeader`, so an object handle is simply the header address.
//! Thread-safe atomic refcounting.

use super::abi::ObjectHandle;
use crate::logging::trace;
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ops::Deref;
use core::ptr::NonNull;
use std::fmt;
use std::sync::atomic::{fence, AtomicU32, Ordering};

/// Built-in type indices
pub mod type_index {
    pub const OBJECT: u32 = 0;
    pub const FUNCTION: u32 = 1;
    pub const MODULE: u32 = 2;
    pub const NDARRAY: u32 = 3;
    pub const ARRAY: u32 = 4;
    pub const MAP: u32 = 5;
    /// First index available to types defined outside this crate
    pub const DYNAMIC_BEGIN: u32 = 64;
}

/// Object header (prefixed before every payload)
#[repr(C)]
pub struct ObjectHeader {
    type_index: u32,
    refcount: AtomicU32,
    type_key: &'static str,
    deleter: unsafe fn(*mut ObjectHeader),
}

impl ObjectHeader {
    #[inline]
    pub fn type_index(&self) -> u32 {
        self.type_index
    }

    #[inline]
    pub fn type_key(&self) -> &'static str {
        self.type_key
    }

    #[inline]
    pub fn ref_count(&self) -> u32 {
        self.refcount.load(Ordering::Relaxed)
    }

    #[inline(always)]
    fn inc_ref(&self) {
        let old = self.refcount.fetch_add(1, Ordering::Relaxed);
        debug_assert!(old < u32::MAX, "refcount overflow");
    }

    /// Decrement, destroying the object when the count reaches zero
    #[inline(always)]
    unsafe fn dec_ref(ptr: *mut ObjectHeader) {
        let header = &*ptr;
        let old = header.refcount.fetch_sub(1, Ordering::Release);
        debug_assert!(old > 0, "refcount underflow");

        if old == 1 {
            // Synchronize with all previous decrements
            fence(Ordering::Acquire);
            destroy(ptr);
        }
    }
}

#[cold]
#[inline(never)]
unsafe fn destroy(ptr: *mut ObjectHeader) {
    trace!(event = "object_destroy", address = ?ptr, type_key = (*ptr).type_key);
    ((*ptr).deleter)(ptr);
}

/// Payload types that can live behind an `ObjectHeader`
pub trait NativeObject: Send + Sync + 'static {
    const TYPE_INDEX: u32;
    const TYPE_KEY: &'static str;
}

#[repr(C)]
struct ObjectCell<T> {
    header: ObjectHeader,
    payload: T,
}

unsafe fn delete_cell<T>(ptr: *mut ObjectHeader) {
    drop(Box::from_raw(ptr as *mut ObjectCell<T>));
}

/// Type-erased object marker for `ObjectPtr<Object>`
pub enum Object {}

/// Owning reference to a native object (one counted reference)
pub struct ObjectPtr<T> {
    ptr: NonNull<ObjectHeader>,
    _marker: PhantomData<T>,
}

// Payloads are `NativeObject` (Send + Sync) and the count is atomic.
unsafe impl<T> Send for ObjectPtr<T> {}
unsafe impl<T> Sync for ObjectPtr<T> {}

impl<T: NativeObject> ObjectPtr<T> {
    /// Allocate a new object with refcount 1
    pub fn new(payload: T) -> Self {
        let cell = Box::new(ObjectCell {
            header: ObjectHeader {
                type_index: T::TYPE_INDEX,
                refcount: AtomicU32::new(1),
                type_key: T::TYPE_KEY,
                deleter: delete_cell::<T>,
            },
            payload,
        });
        let ptr = Box::into_raw(cell) as *mut ObjectHeader;
        trace!(event = "object_new", address = ?ptr, type_key = T::TYPE_KEY);
        Self {
            // Box::into_raw never returns null
            ptr: unsafe { NonNull::new_unchecked(ptr) },
            _marker: PhantomData,
        }
    }

    /// Erase the payload type
    #[inline]
    pub fn upcast(self) -> ObjectPtr<Object> {
        let this = ManuallyDrop::new(self);
        ObjectPtr { ptr: this.ptr, _marker: PhantomData }
    }
}

impl<T> ObjectPtr<T> {
    /// Adopt an owned reference
    ///
    /// # Safety
    /// `handle` must be null or a live object handle whose reference the
    /// caller owns and hands over; for `T != Object` the type must match.
    #[inline]
    pub unsafe fn from_raw(handle: ObjectHandle) -> Option<Self> {
        NonNull::new(handle as *mut ObjectHeader).map(|ptr| Self { ptr, _marker: PhantomData })
    }

    /// Take a new reference to a borrowed handle
    ///
    /// # Safety
    /// Same as `from_raw`, except the caller keeps its own reference.
    #[inline]
    pub unsafe fn from_borrowed(handle: ObjectHandle) -> Option<Self> {
        let ptr = NonNull::new(handle as *mut ObjectHeader)?;
        ptr.as_ref().inc_ref();
        Some(Self { ptr, _marker: PhantomData })
    }

    /// Give up ownership without releasing
    #[inline]
    pub fn into_raw(self) -> ObjectHandle {
        let this = ManuallyDrop::new(self);
        this.ptr.as_ptr() as ObjectHandle
    }

    #[inline]
    pub fn as_handle(&self) -> ObjectHandle {
        self.ptr.as_ptr() as ObjectHandle
    }

    #[inline]
    pub fn header(&self) -> &ObjectHeader {
        unsafe { self.ptr.as_ref() }
    }

    #[inline]
    pub fn type_index(&self) -> u32 {
        self.header().type_index()
    }

    #[inline]
    pub fn type_key(&self) -> &'static str {
        self.header().type_key()
    }

    #[inline]
    pub fn ref_count(&self) -> u32 {
        self.header().ref_count()
    }

    #[inline]
    pub fn same_as<U>(&self, other: &ObjectPtr<U>) -> bool {
        self.ptr == other.ptr
    }
}

impl ObjectPtr<Object> {
    #[inline]
    pub fn is<T: NativeObject>(&self) -> bool {
        self.type_index() == T::TYPE_INDEX
    }

    pub fn downcast<T: NativeObject>(self) -> Result<ObjectPtr<T>, Self> {
        if self.is::<T>() {
            let this = ManuallyDrop::new(self);
            Ok(ObjectPtr { ptr: this.ptr, _marker: PhantomData })
        } else {
            Err(self)
        }
    }

    pub fn downcast_ref<T: NativeObject>(&self) -> Option<&T> {
        if self.is::<T>() {
            Some(unsafe { &(*(self.ptr.as_ptr() as *const ObjectCell<T>)).payload })
        } else {
            None
        }
    }
}

impl<T: NativeObject> Deref for ObjectPtr<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { &(*(self.ptr.as_ptr() as *const ObjectCell<T>)).payload }
    }
}

impl<T> Clone for ObjectPtr<T> {
    #[inline]
    fn clone(&self) -> Self {
        self.header().inc_ref();
        Self { ptr: self.ptr, _marker: PhantomData }
    }
}

impl<T> Drop for ObjectPtr<T> {
    #[inline]
    fn drop(&mut self) {
        unsafe { ObjectHeader::dec_ref(self.ptr.as_ptr()) }
    }
}

impl<T> fmt::Debug for ObjectPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:p}", self.type_key(), self.ptr.as_ptr())
    }
}

/// Take one more reference on a raw handle (null-safe)
///
/// # Safety
/// `handle` must be null or a live object handle.
#[inline]
pub unsafe fn retain_raw(handle: ObjectHandle) {
    if let Some(ptr) = NonNull::new(handle as *mut ObjectHeader) {
        ptr.as_ref().inc_ref();
    }
}

/// Release one reference on a raw handle (null-safe)
///
/// # Safety
/// `handle` must be null or a live object handle whose reference the
/// caller owns.
#[inline]
pub unsafe fn release_raw(handle: ObjectHandle) {
    if !handle.is_null() {
        ObjectHeader::dec_ref(handle as *mut ObjectHeader);
    }
}

/// Header of a raw handle
///
/// # Safety
/// `handle` must be a live object handle for `'a`.
#[inline]
pub unsafe fn header_of<'a>(handle: ObjectHandle) -> Option<&'a ObjectHeader> {
    (handle as *const ObjectHeader).as_ref()
}

/// Borrow the payload of a raw handle after checking its type index
///
/// # Safety
/// `handle` must be null or a live object handle for `'a`.
pub unsafe fn payload_of<'a, T: NativeObject>(handle: ObjectHandle) -> Option<&'a T> {
    let header = header_of(handle)?;
    if header.type_index() != T::TYPE_INDEX {
        return None;
    }
    Some(&(*(handle as *const ObjectCell<T>)).payload)
}
