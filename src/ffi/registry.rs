//! Global function registry - name-keyed table owned by the runtime
//!
//! The table owns one counted reference per name. Removing or overriding a
//! name releases it, so handles lent out by lookup dangle afterwards.

use super::builtins;
use super::error::NativeError;
use super::function::FunctionObj;
use super::object::ObjectPtr;
use crate::logging::{debug, perf};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;

type Table = DashMap<String, ObjectPtr<FunctionObj>>;

static REGISTRY: Lazy<Table> = Lazy::new(|| {
    let _perf = perf::track("registry_init");
    let table = Table::new();
    builtins::install(&table);
    debug!(event = "registry_init", builtins = table.len());
    table
});

/// Insert into a table, handing back the function it replaced
///
/// The caller drops the replaced function once the shard lock is gone: its
/// finalizer may call back into the registry.
pub(crate) fn insert(
    table: &Table,
    name: &str,
    func: ObjectPtr<FunctionObj>,
    allow_override: bool,
) -> Result<Option<ObjectPtr<FunctionObj>>, NativeError> {
    let outcome = match table.entry(name.to_string()) {
        Entry::Occupied(_) if !allow_override => Err(func),
        Entry::Occupied(mut slot) => Ok(Some(slot.insert(func))),
        Entry::Vacant(slot) => {
            slot.insert(func);
            Ok(None)
        }
    };
    // Shard lock released; a rejected function may be dropped here
    outcome.map_err(|_rejected| NativeError::new(format!("Global function {} is already registered", name)))
}

pub fn register(name: &str, func: ObjectPtr<FunctionObj>, allow_override: bool) -> Result<(), NativeError> {
    let replaced = insert(&REGISTRY, name, func, allow_override)?;
    debug!(event = "global_register", name, allow_override, replaced = replaced.is_some());
    drop(replaced);
    Ok(())
}

/// Shared handle to a registered function
pub fn get(name: &str) -> Option<ObjectPtr<FunctionObj>> {
    REGISTRY.get(name).map(|entry| entry.value().clone())
}

/// Drop a name and release the table's reference to its function
pub fn remove(name: &str) -> bool {
    let entry = REGISTRY.remove(name);
    let removed = entry.is_some();
    debug!(event = "global_remove", name, removed);
    // Released outside the shard lock
    drop(entry);
    removed
}

/// All registered names, sorted
pub fn names() -> Vec<String> {
    let mut names: Vec<String> = REGISTRY.iter().map(|entry| entry.key().clone()).collect();
    names.sort();
    names
}
