//! Deferred-error slot
//!
//! A callback failure is parked here on the thread that ran the callback,
//! while only its text travels back through the native error slot. The
//! call site that sees the failing status then re-raises the original.
//!
//! A callback that fails on a native worker thread parks its error on that
//! worker, where no foreign call site consumes it. Such an error is
//! overwritten by the next failure there and discarded at the start of the
//! next foreign call on that thread.

use crate::errors::{FfiError, FfiResult};
use crate::ffi::{pffi_get_last_error, Status, STATUS_OK};
use crate::logging::debug;
use std::cell::RefCell;
use std::ffi::CStr;

thread_local! {
    static DEFERRED: RefCell<Option<FfiError>> = const { RefCell::new(None) };
}

/// Park an error for the next failing call site on this thread
pub fn defer(err: FfiError) {
    DEFERRED.with(|slot| *slot.borrow_mut() = Some(err));
}

/// Take the parked error, if any
pub fn take() -> Option<FfiError> {
    DEFERRED.with(|slot| slot.borrow_mut().take())
}

pub fn has_deferred() -> bool {
    DEFERRED.with(|slot| slot.borrow().is_some())
}

/// Drop an error no pending call on this thread is waiting for
pub fn discard_stale() {
    if let Some(stale) = take() {
        debug!(event = "deferred_discarded", error = %stale);
    }
}

/// Native error slot contents, copied
pub fn native_error_message() -> String {
    let ptr = pffi_get_last_error();
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

/// Turn a failing status into an error for the current call site.
///
/// The parked error is returned unchanged when the native message still
/// carries its text; otherwise the native message is surfaced verbatim.
/// The slot is cleared either way.
pub fn raise_last_error() -> FfiError {
    let message = native_error_message();
    match take() {
        Some(err) if message.contains(&err.to_string()) => err,
        _ => FfiError::NativeCall { message },
    }
}

/// `Ok` for a zero status, the raised error otherwise
pub(crate) fn check_status(status: Status) -> FfiResult<()> {
    if status == STATUS_OK {
        Ok(())
    } else {
        Err(raise_last_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ForeignError;
    use crate::ffi::set_last_error;

    #[test]
    fn test_matching_message_reraises_original() {
        let original = FfiError::Callback(ForeignError::new("ValueError", "bad").with_frame("in f"));
        set_last_error(&format!("outer context: {}", original));
        defer(original.clone());
        assert_eq!(raise_last_error(), original);
        assert!(!has_deferred());
    }

    #[test]
    fn test_unrelated_message_is_verbatim() {
        defer(FfiError::Callback(ForeignError::new("KeyError", "stale")));
        set_last_error("index out of range");
        assert_eq!(
            raise_last_error(),
            FfiError::NativeCall { message: "index out of range".to_string() }
        );
        assert!(!has_deferred());
    }

    #[test]
    fn test_discard_stale_empties_slot() {
        defer(FfiError::Callback(ForeignError::new("KeyError", "left behind")));
        assert!(has_deferred());
        discard_stale();
        assert!(!has_deferred());
        assert!(take().is_none());
    }
}
