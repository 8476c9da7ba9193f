//! Builtin global functions
//!
//! Container constructors the argument encoder delegates to, plus the
//! accessors and module helpers native code expects to find by name.

use super::container::{ArrayObj, MapObj};
use super::error::NativeError;
use super::function::FunctionObj;
use super::module::ModuleObj;
use super::ndarray::NDArrayObj;
use super::object::{NativeObject, Object, ObjectPtr};
use super::registry;
use super::value::{NativeArgs, NativeValue};
use crate::interop::DataType;
use crate::logging::trace;
use dashmap::DashMap;

pub const ARRAY: &str = "runtime.Array";
pub const ARRAY_SIZE: &str = "runtime.ArraySize";
pub const ARRAY_GET_ITEM: &str = "runtime.ArrayGetItem";
pub const MAP: &str = "runtime.Map";
pub const MAP_SIZE: &str = "runtime.MapSize";
pub const MAP_GET_ITEM: &str = "runtime.MapGetItem";
pub const GET_TYPE_KEY: &str = "runtime.GetTypeKey";
pub const NDARRAY_EMPTY: &str = "runtime.NDArrayEmpty";
pub const MODULE_CREATE: &str = "runtime.ModuleCreate";
pub const MODULE_ADD_FUNCTION: &str = "runtime.ModuleAddFunction";
pub const MODULE_IMPORT: &str = "runtime.ModuleImport";
pub const MODULE_GET_FUNCTION: &str = "runtime.ModuleGetFunction";
pub const MODULE_NAME: &str = "runtime.ModuleName";

type Builtin = fn(&NativeArgs<'_>) -> Result<NativeValue, NativeError>;

const BUILTINS: &[(&str, Builtin)] = &[
    (ARRAY, array),
    (ARRAY_SIZE, array_size),
    (ARRAY_GET_ITEM, array_get_item),
    (MAP, map),
    (MAP_SIZE, map_size),
    (MAP_GET_ITEM, map_get_item),
    (GET_TYPE_KEY, get_type_key),
    (NDARRAY_EMPTY, ndarray_empty),
    (MODULE_CREATE, module_create),
    (MODULE_ADD_FUNCTION, module_add_function),
    (MODULE_IMPORT, module_import),
    (MODULE_GET_FUNCTION, module_get_function),
    (MODULE_NAME, module_name),
];

pub(crate) fn install(table: &DashMap<String, ObjectPtr<FunctionObj>>) {
    for &(name, body) in BUILTINS {
        let func = FunctionObj::from_native(move |args: &NativeArgs<'_>| {
            trace!(event = "builtin_call", function = name, args = args.len());
            body(args)
        });
        // Fresh table, names are unique
        let _ = registry::insert(table, name, func, false);
    }
}

fn object<T: NativeObject>(value: ObjectPtr<T>) -> NativeValue {
    NativeValue::Object(value.upcast())
}

fn typed_arg<T: NativeObject>(args: &NativeArgs<'_>, i: usize) -> Result<ObjectPtr<T>, NativeError> {
    args.get_object(i)?.downcast::<T>().map_err(|obj| {
        NativeError::new(format!(
            "Expected {} at argument {}, got {}",
            T::TYPE_KEY,
            i,
            obj.type_key()
        ))
    })
}

fn array(args: &NativeArgs<'_>) -> Result<NativeValue, NativeError> {
    let items = (0..args.len()).map(|i| args.value(i)).collect::<Result<Vec<_>, _>>()?;
    Ok(object(ObjectPtr::new(ArrayObj::new(items)?)))
}

fn array_size(args: &NativeArgs<'_>) -> Result<NativeValue, NativeError> {
    let arr = typed_arg::<ArrayObj>(args, 0)?;
    Ok(NativeValue::Int(arr.len() as i64))
}

fn array_get_item(args: &NativeArgs<'_>) -> Result<NativeValue, NativeError> {
    let arr = typed_arg::<ArrayObj>(args, 0)?;
    arr.get(args.get_i64(1)?).cloned()
}

/// Alternating key/value arguments
fn map(args: &NativeArgs<'_>) -> Result<NativeValue, NativeError> {
    if args.len() % 2 != 0 {
        return Err(NativeError::new(format!(
            "runtime.Map expects key/value pairs, got {} arguments",
            args.len()
        )));
    }
    let pairs = (0..args.len() / 2)
        .map(|i| Ok((args.value(2 * i)?, args.value(2 * i + 1)?)))
        .collect::<Result<Vec<_>, NativeError>>()?;
    Ok(object(ObjectPtr::new(MapObj::new(pairs)?)))
}

fn map_size(args: &NativeArgs<'_>) -> Result<NativeValue, NativeError> {
    let map = typed_arg::<MapObj>(args, 0)?;
    Ok(NativeValue::Int(map.len() as i64))
}

fn map_get_item(args: &NativeArgs<'_>) -> Result<NativeValue, NativeError> {
    let map = typed_arg::<MapObj>(args, 0)?;
    let key = args.value(1)?;
    map.get(&key)
        .cloned()
        .ok_or_else(|| NativeError::new(format!("Key not found in map: {:?}", key)))
}

fn get_type_key(args: &NativeArgs<'_>) -> Result<NativeValue, NativeError> {
    let obj: ObjectPtr<Object> = args.get_object(0)?;
    Ok(NativeValue::Str(obj.type_key().to_string()))
}

/// `(shape: Array[int], dtype: str, device)`
fn ndarray_empty(args: &NativeArgs<'_>) -> Result<NativeValue, NativeError> {
    let shape_arr = typed_arg::<ArrayObj>(args, 0)?;
    let shape = shape_arr
        .iter()
        .map(|dim| dim.as_i64().ok_or_else(|| NativeError::new("Shape entries must be integers")))
        .collect::<Result<Vec<i64>, _>>()?;
    let dtype_name = args.get_str(1)?;
    let dtype = DataType::parse(dtype_name)
        .ok_or_else(|| NativeError::new(format!("Unknown dtype {}", dtype_name)))?;
    let device = args.get_device(2)?;
    Ok(object(NDArrayObj::empty(&shape, dtype, device)?))
}

fn module_create(args: &NativeArgs<'_>) -> Result<NativeValue, NativeError> {
    Ok(object(ModuleObj::new(args.get_str(0)?)))
}

fn module_add_function(args: &NativeArgs<'_>) -> Result<NativeValue, NativeError> {
    let module = typed_arg::<ModuleObj>(args, 0)?;
    module.add_function(args.get_str(1)?, args.get_function(2)?);
    Ok(NativeValue::Null)
}

fn module_import(args: &NativeArgs<'_>) -> Result<NativeValue, NativeError> {
    let module = typed_arg::<ModuleObj>(args, 0)?;
    let other = typed_arg::<ModuleObj>(args, 1)?;
    if module.same_as(&other) {
        return Err(NativeError::new("A module cannot import itself"));
    }
    module.import(other);
    Ok(NativeValue::Null)
}

/// `(module, name, query_imports)`; null when absent
fn module_get_function(args: &NativeArgs<'_>) -> Result<NativeValue, NativeError> {
    let module = typed_arg::<ModuleObj>(args, 0)?;
    let query_imports = if args.len() > 2 { args.get_bool(2)? } else { false };
    Ok(module
        .get_function(args.get_str(1)?, query_imports)
        .map(NativeValue::function)
        .unwrap_or(NativeValue::Null))
}

fn module_name(args: &NativeArgs<'_>) -> Result<NativeValue, NativeError> {
    let module = typed_arg::<ModuleObj>(args, 0)?;
    Ok(NativeValue::Str(module.name().to_string()))
}
