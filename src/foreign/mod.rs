//! Foreign caller model
//!
//! The dynamically-typed side of the boundary: values, callables, owning
//! handle wrappers, the serialization lock and the deferred-error slot.

pub mod callable;
pub mod deferred;
pub mod handles;
pub mod lock;
pub mod value;

pub use callable::{CallableResult, ForeignCallable};
pub use deferred::raise_last_error;
pub use handles::{ExtValue, Module, NDArray, ObjectRef, ObjectSlot, PackedFunc, TensorView};
pub use lock::{LockGuard, SerializationLock};
pub use value::ForeignValue;
