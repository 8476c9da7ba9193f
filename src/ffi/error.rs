//! Native error slot - thread-local last-error state
//!
//! Producer/consumer contract: a primitive stores the message right before
//! returning a non-zero status, the immediate caller reads it.

use super::abi::{Status, STATUS_ERROR, STATUS_OK};
use crate::logging::{debug, error};
use std::cell::RefCell;
use std::ffi::{c_char, CString};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

/// Failure inside the native runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    message: String,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    /// Build from whatever the current thread's error slot holds
    pub fn from_last_error() -> Self {
        Self::new(last_error_message())
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for NativeError {}

impl From<String> for NativeError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for NativeError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Store `message` in the calling thread's error slot
pub fn set_last_error(message: &str) {
    let text = CString::new(message.replace('\0', "\\0")).unwrap_or_default();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = text);
}

/// Copy of the calling thread's last error message
pub fn last_error_message() -> String {
    LAST_ERROR.with(|slot| slot.borrow().to_string_lossy().into_owned())
}

/// Pointer into the error slot; valid until the next error on this thread
pub(crate) fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|slot| slot.borrow().as_ptr())
}

/// Run a primitive body at the C boundary.
///
/// Errors are stored in the slot and mapped to `STATUS_ERROR`; panics are
/// caught here so they never unwind through an `extern "C"` frame.
pub(crate) fn ffi_guard<F>(primitive: &'static str, body: F) -> Status
where
    F: FnOnce() -> Result<(), NativeError>,
{
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => STATUS_OK,
        Ok(Err(err)) => {
            debug!(event = "native_error", primitive, error = err.message());
            set_last_error(err.message());
            STATUS_ERROR
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(event = "native_panic", primitive, error = %message, "panic caught at ABI boundary");
            set_last_error(&message);
            STATUS_ERROR
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic: <non-string payload>".to_string()
    }
}
