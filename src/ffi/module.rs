//! Module objects - named function tables with imports

use super::function::FunctionObj;
use super::object::{type_index, NativeObject, ObjectPtr};
use dashmap::DashMap;
use parking_lot::RwLock;

pub struct ModuleObj {
    name: String,
    functions: DashMap<String, ObjectPtr<FunctionObj>>,
    imports: RwLock<Vec<ObjectPtr<ModuleObj>>>,
}

impl NativeObject for ModuleObj {
    const TYPE_INDEX: u32 = type_index::MODULE;
    const TYPE_KEY: &'static str = "runtime.Module";
}

impl ModuleObj {
    pub fn new(name: impl Into<String>) -> ObjectPtr<Self> {
        ObjectPtr::new(Self {
            name: name.into(),
            functions: DashMap::new(),
            imports: RwLock::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_function(&self, name: impl Into<String>, func: ObjectPtr<FunctionObj>) {
        self.functions.insert(name.into(), func);
    }

    pub fn import(&self, other: ObjectPtr<ModuleObj>) {
        self.imports.write().push(other);
    }

    /// Look up a function, optionally searching imports depth-first
    pub fn get_function(&self, name: &str, query_imports: bool) -> Option<ObjectPtr<FunctionObj>> {
        if let Some(func) = self.functions.get(name) {
            return Some(func.value().clone());
        }
        if !query_imports {
            return None;
        }
        self.imports
            .read()
            .iter()
            .find_map(|module| module.get_function(name, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::value::NativeValue;

    #[test]
    fn test_lookup_through_imports() {
        let base = ModuleObj::new("base");
        base.add_function("f", FunctionObj::from_native(|_| Ok(NativeValue::Int(7))));
        let top = ModuleObj::new("top");
        top.import(base.clone());

        assert!(top.get_function("f", false).is_none());
        let f = top.get_function("f", true).unwrap();
        assert_eq!(f.call(&[]).unwrap().as_i64(), Some(7));
        assert_eq!(top.name(), "top");
    }
}
