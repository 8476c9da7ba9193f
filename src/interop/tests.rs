//! Test suite for the calling convention

use super::*;
use crate::errors::{FfiError, FfiResult, ForeignError};
use crate::ffi::{registry, FunctionObj, NDArrayObj, NativeError, NativeValue, RawHandle};
use crate::foreign::{ExtValue, ForeignCallable, ForeignValue, Module, NDArray, ObjectSlot, PackedFunc};
use std::rc::Rc;
use std::sync::Once;

fn native_global<F>(name: &str, f: F) -> PackedFunc
where
    F: Fn(&crate::ffi::NativeArgs<'_>) -> Result<NativeValue, NativeError> + Send + Sync + 'static,
{
    registry::register(name, FunctionObj::from_native(f), true).unwrap();
    get_global_func(name, LookupPolicy::Required).unwrap().unwrap()
}

static FIXTURES: Once = Once::new();

/// Shared fixtures, registered once so concurrent tests see stable handles
fn install_fixtures() {
    FIXTURES.call_once(|| {
        native_global("test.interop.echo_last", |args| match args.len() {
            0 => Ok(NativeValue::Null),
            n => args.value(n - 1),
        });
        native_global("test.interop.sum", |args| {
            let mut total = 0;
            for i in 0..args.len() {
                total += args.get_i64(i)?;
            }
            Ok(NativeValue::Int(total))
        });
    });
}

fn fixture(name: &str) -> PackedFunc {
    install_fixtures();
    get_global_func(name, LookupPolicy::Required).unwrap().unwrap()
}

fn echo_last() -> PackedFunc {
    fixture("test.interop.echo_last")
}

fn sum() -> PackedFunc {
    fixture("test.interop.sum")
}

#[test]
fn test_scalar_values_survive_encode_decode() {
    let values = [
        ForeignValue::None,
        ForeignValue::Bool(false),
        ForeignValue::Int(-7),
        ForeignValue::Float(0.25),
        ForeignValue::from("text"),
        ForeignValue::Bytes(vec![0, 255, 3]),
        ForeignValue::Device(Device::cuda(1)),
    ];
    let mut keep = KeepAlive::new();
    for (i, value) in values.iter().enumerate() {
        let (tagged, code) = encode_arg(value, i, &mut keep).unwrap();
        let back = unsafe { decode(tagged, code, Position::Return) }.unwrap();
        assert_eq!(&back, value);
    }
    // Two copied buffers
    assert_eq!(keep.len(), 2);
}

#[test]
fn test_bool_encodes_as_bool() {
    let mut keep = KeepAlive::new();
    let (_, code) = encode_arg(&ForeignValue::Bool(true), 0, &mut keep).unwrap();
    assert_eq!(code, TypeCode::Bool.raw());
    let (_, code) = encode_arg(&ForeignValue::Int(1), 0, &mut keep).unwrap();
    assert_eq!(code, TypeCode::Int.raw());
    assert!(keep.is_empty());
}

#[test]
fn test_bool_decodes_from_whole_word() {
    for word in [1, 2, -1] {
        let back = unsafe { decode(TaggedValue::from_i64(word), TypeCode::Bool.raw(), Position::Return) }.unwrap();
        assert_eq!(back, ForeignValue::Bool(true));
    }
    let back = unsafe { decode(TaggedValue::from_i64(0), TypeCode::Bool.raw(), Position::Return) }.unwrap();
    assert_eq!(back, ForeignValue::Bool(false));
}

#[test]
fn test_invalid_utf8_string_result_fails() {
    let raw = [b'o', 0xff, 0xfe];
    let desc = ByteArray { data: raw.as_ptr(), size: raw.len() };
    let tagged = TaggedValue::from_byte_array(&desc);
    let err = unsafe { decode(tagged, TypeCode::Str.raw(), Position::Return) }.unwrap_err();
    assert!(matches!(err, FfiError::NativeCall { ref message } if message.contains("Invalid UTF-8")));

    // The same bytes are fine as a byte string
    let back = unsafe { decode(tagged, TypeCode::Bytes.raw(), Position::Return) }.unwrap();
    assert_eq!(back, ForeignValue::Bytes(raw.to_vec()));
}

#[test]
fn test_echo_returns_bool() {
    let echo = echo_last();
    let result = echo
        .call(&[ForeignValue::Int(5), ForeignValue::from("hi"), ForeignValue::Bool(true)])
        .unwrap();
    assert_eq!(result, ForeignValue::Bool(true));
    assert_eq!(last_call_path(), Some(CallPath::Fast));
}

#[test]
fn test_string_result_is_copied() {
    let echo = echo_last();
    let result = echo.call(&[ForeignValue::from("hello")]).unwrap();
    assert_eq!(result.as_str(), Some("hello"));
}

#[test]
fn test_no_result_is_none() {
    let echo = echo_last();
    assert!(echo.call(&[]).unwrap().is_none());
    assert_eq!(last_call_path(), Some(CallPath::Fast));
}

#[test]
fn test_general_path_sum() {
    let sum = sum();
    let before = stats();
    let args: Vec<ForeignValue> = (1..=5).map(ForeignValue::Int).collect();
    assert_eq!(sum.call(&args).unwrap(), ForeignValue::Int(15));
    assert_eq!(last_call_path(), Some(CallPath::General));
    let after = stats();
    assert!(after.general_path_calls > before.general_path_calls);
    assert!(after.calls_made > before.calls_made);
}

#[test]
fn test_path_boundary() {
    let sum = sum();
    let three: Vec<ForeignValue> = (1..=3).map(ForeignValue::Int).collect();
    assert_eq!(sum.call(&three).unwrap(), ForeignValue::Int(6));
    assert_eq!(last_call_path(), Some(CallPath::Fast));

    let four: Vec<ForeignValue> = (1..=4).map(ForeignValue::Int).collect();
    assert_eq!(sum.call(&four).unwrap(), ForeignValue::Int(10));
    assert_eq!(last_call_path(), Some(CallPath::General));

    assert_eq!(CallPath::for_arg_count(FAST_PATH_MAX_ARGS), CallPath::Fast);
    assert_eq!(CallPath::for_arg_count(FAST_PATH_MAX_ARGS + 1).name(), "general");
}

#[test]
fn test_native_error_is_verbatim() {
    let sum = sum();
    let err = sum.call(&[ForeignValue::Int(1), ForeignValue::from("x")]).unwrap_err();
    assert_eq!(
        err,
        FfiError::NativeCall { message: "Expected int at argument 1, got str".to_string() }
    );
}

#[test]
fn test_list_becomes_native_array() {
    let size = get_global_func(crate::ffi::builtins::ARRAY_SIZE, LookupPolicy::Required)
        .unwrap()
        .unwrap();
    let list = ForeignValue::List(vec![1.into(), "two".into(), ForeignValue::Float(3.0)]);
    assert_eq!(size.call(&[list]).unwrap(), ForeignValue::Int(3));

    let tuple = ForeignValue::Tuple(vec![ForeignValue::None]);
    assert_eq!(size.call(&[tuple]).unwrap(), ForeignValue::Int(1));
}

#[test]
fn test_map_becomes_native_map() {
    let get_item = get_global_func(crate::ffi::builtins::MAP_GET_ITEM, LookupPolicy::Required)
        .unwrap()
        .unwrap();
    let map = ForeignValue::Map(vec![("a".into(), 1.into()), ("b".into(), ForeignValue::Bool(true))]);
    assert_eq!(get_item.call(&[map.clone(), "b".into()]).unwrap(), ForeignValue::Bool(true));
    assert!(get_item.call(&[map, "c".into()]).is_err());
}

#[test]
fn test_instance_is_unsupported_with_position() {
    let echo = echo_last();
    let before = stats().marshaling_errors;
    let err = echo
        .call(&[ForeignValue::Int(1), ForeignValue::Instance { kind: "Widget".to_string() }])
        .unwrap_err();
    assert_eq!(err, FfiError::UnsupportedArgumentType { position: 1, kind: "Widget".to_string() });
    assert!(stats().marshaling_errors > before);
}

#[test]
fn test_nested_instance_reports_outer_position() {
    let echo = echo_last();
    let nested = ForeignValue::List(vec![1.into(), ForeignValue::Instance { kind: "Widget".to_string() }]);
    let err = echo.call(&[1.into(), 2.into(), nested]).unwrap_err();
    assert_eq!(err, FfiError::UnsupportedArgumentType { position: 2, kind: "Widget".to_string() });
}

#[test]
fn test_multiple_returns_rejected_before_call() {
    let echo = echo_last();
    let err = call::invoke(echo.handle(), &[], 2, |_, _| Ok(())).unwrap_err();
    assert_eq!(err, FfiError::MultipleReturnValues { count: 2 });
}

#[test]
fn test_unknown_code() {
    let err = unsafe { decode(TaggedValue::null(), 5, Position::Return) }.unwrap_err();
    assert_eq!(err, FfiError::UnknownTypeCode { code: 5 });
    let err = unsafe { decode(TaggedValue::null(), 200, Position::Argument) }.unwrap_err();
    assert_eq!(err, FfiError::UnknownTypeCode { code: 200 });
}

fn decode_celsius(_code: RawTypeCode, value: TaggedValue) -> FfiResult<ForeignValue> {
    Ok(ForeignValue::Float(unsafe { value.v_float64 } + 273.15))
}

#[test]
fn test_ext_decoder_registration() {
    assert_eq!(
        register_ext_decoder(TypeCode::Str.raw(), decode_celsius),
        Err(FfiError::UnknownTypeCode { code: TypeCode::Str.raw() })
    );

    register_ext_decoder(100, decode_celsius).unwrap();
    let value = unsafe { decode(TaggedValue::from_f64(0.0), 100, Position::Return) }.unwrap();
    assert_eq!(value, ForeignValue::Float(273.15));
    assert!(unregister_ext_decoder(100));
    assert!(!unregister_ext_decoder(100));

    let raw = unsafe { decode(TaggedValue::null(), 101, Position::Return) }.unwrap();
    assert_eq!(raw, ForeignValue::Ext(ExtValue { code: 101, handle: RawHandle::null() }));
}

#[test]
fn test_ext_value_needs_ext_code() {
    let mut keep = KeepAlive::new();
    let bad = ForeignValue::Ext(ExtValue { code: TypeCode::Int.raw(), handle: RawHandle::null() });
    assert_eq!(
        encode_arg(&bad, 0, &mut keep).unwrap_err(),
        FfiError::UnknownTypeCode { code: TypeCode::Int.raw() }
    );
    let good = ForeignValue::Ext(ExtValue { code: EXT_BEGIN, handle: RawHandle::null() });
    let (_, code) = encode_arg(&good, 0, &mut keep).unwrap();
    assert_eq!(code, EXT_BEGIN);
}

#[test]
fn test_lookup_policies() {
    let err = get_global_func("test.interop.missing", LookupPolicy::Required).unwrap_err();
    assert_eq!(err, FfiError::UnknownGlobalFunction { name: "test.interop.missing".to_string() });
    assert!(get_global_func("test.interop.missing", LookupPolicy::Optional).unwrap().is_none());
    assert_eq!(
        get_global_func("bad\0name", LookupPolicy::Optional).unwrap_err(),
        FfiError::InvalidName { name: "bad\0name".to_string() }
    );
}

#[test]
fn test_global_handles_are_marked() {
    let echo = echo_last();
    assert!(echo.is_global());
    let again = get_global_func_default("test.interop.echo_last").unwrap().unwrap();
    assert!(again.same_as(&echo));
}

#[test]
fn test_register_list_remove() {
    let callable = ForeignCallable::new("const", |_| Ok(Some(ForeignValue::Int(7))));
    register_global_callable("test.interop.const", &callable, false).unwrap();
    assert!(register_global_callable("test.interop.const", &callable, false).is_err());
    assert!(list_global_func_names().unwrap().iter().any(|n| n == "test.interop.const"));

    let func = get_global_func("test.interop.const", LookupPolicy::Required).unwrap().unwrap();
    assert_eq!(func.call(&[]).unwrap(), ForeignValue::Int(7));

    remove_global_func("test.interop.const").unwrap();
    assert!(remove_global_func("test.interop.const").is_err());
    assert!(get_global_func("test.interop.const", LookupPolicy::Optional).unwrap().is_none());
}

#[test]
#[should_panic(expected = "ConstructorTypeMismatch")]
fn test_constructor_mismatch_panics() {
    let make_int = native_global("test.interop.make_int", |_| Ok(NativeValue::Int(1)));
    let _ = construct_handle(&make_int, TypeCode::Object, &[]);
}

#[test]
fn test_module_helpers() {
    let lib = Module::new("lib").unwrap();
    assert_eq!(lib.name().unwrap(), "lib");

    let echo = echo_last();
    lib.add_function("echo", &echo).unwrap();
    let found = lib.get_function("echo", false).unwrap().unwrap();
    assert!(found.same_as(&echo));
    assert!(!found.is_global());
    assert!(lib.get_function("absent", true).unwrap().is_none());

    let dep = Module::new("dep").unwrap();
    dep.add_function("sum", &sum()).unwrap();
    lib.import(&dep).unwrap();
    assert!(lib.get_function("sum", false).unwrap().is_none());
    let imported = lib.get_function("sum", true).unwrap().unwrap();
    assert_eq!(imported.call(&[2.into(), 3.into()]).unwrap(), ForeignValue::Int(5));

    assert!(lib.import(&lib).is_err());
}

#[test]
fn test_ndarray_helpers() {
    let bytes: Vec<u8> = (0..16).collect();
    let arr = NDArray::from_bytes(&[2, 2], DataType::float32(), Device::cpu(0), &bytes).unwrap();
    assert_eq!(arr.shape().unwrap(), vec![2, 2]);
    assert_eq!(arr.dtype().unwrap(), DataType::float32());
    assert_eq!(arr.to_bytes().unwrap(), bytes);
    assert_eq!(arr.object().type_key().unwrap(), "runtime.NDArray");

    let echo = echo_last();
    let back = echo.call(&[arr.clone().into()]).unwrap();
    assert_eq!(back, ForeignValue::NDArray(arr));
}

#[test]
fn test_ndarray_shape_overflow_is_reported() {
    let err = NDArray::empty(&[1 << 62, 4], DataType::new(DataType::UINT, 8, 1), Device::cpu(0)).unwrap_err();
    assert!(matches!(err, FfiError::NativeCall { ref message } if message.contains("overflows")));
}

#[test]
fn test_tensor_view_argument_stays_borrowed() {
    let arr = NDArrayObj::from_bytes(&[3], DataType::int32(), Device::cpu(0), &[1u8; 12]).unwrap();
    let tagged = TaggedValue::from_handle(arr.tensor_ptr().cast());
    let value = unsafe { decode(tagged, TypeCode::DLTensorView.raw(), Position::Argument) }.unwrap();
    match value {
        ForeignValue::TensorView(view) => {
            assert_eq!(view.as_ptr(), arr.tensor_ptr());
            assert_eq!(view.shape(), vec![3]);
        }
        other => panic!("expected a tensor view, got {}", other.kind_name()),
    }
}

#[test]
fn test_tensor_view_result_is_copied() {
    let arr = NDArrayObj::from_bytes(&[2], DataType::int32(), Device::cpu(0), &[9u8; 8]).unwrap();
    let held = arr.clone();
    let view_of = native_global("test.interop.view_of", move |_| {
        Ok(NativeValue::TensorView(RawHandle(held.tensor_ptr().cast())))
    });
    let result = view_of.call(&[]).unwrap();
    match result {
        ForeignValue::NDArray(copy) => {
            assert_eq!(copy.to_bytes().unwrap(), vec![9u8; 8]);
            assert_ne!(copy.as_view().unwrap().as_ptr(), arr.tensor_ptr());
        }
        other => panic!("expected an array, got {}", other.kind_name()),
    }
}

#[test]
fn test_callable_round_trip() {
    let add = ForeignCallable::new("add", |args| {
        let a = args[0].as_i64().unwrap_or(0);
        let b = args[1].as_i64().unwrap_or(0);
        Ok(Some(ForeignValue::Int(a + b)))
    });
    let before = stats().callbacks_dispatched;
    let func = PackedFunc::from_callable(&add).unwrap();
    assert_eq!(add.ref_count(), 2);
    assert_eq!(func.call(&[2.into(), 3.into()]).unwrap(), ForeignValue::Int(5));
    assert!(stats().callbacks_dispatched > before);
    drop(func);
    assert_eq!(add.ref_count(), 1);
}

#[test]
fn test_callable_sees_tensor_view() {
    let ndim = ForeignCallable::new("ndim", |args| match &args[0] {
        ForeignValue::TensorView(view) => Ok(Some(ForeignValue::Int(view.shape().len() as i64))),
        other => Err(ForeignError::new("TypeError", other.kind_name().to_string())),
    });
    let arr = NDArray::empty(&[2, 3, 4], DataType::int64(), Device::cpu(0)).unwrap();
    let func = PackedFunc::from_callable(&ndim).unwrap();
    let view = arr.as_view().unwrap();
    assert_eq!(func.call(&[ForeignValue::TensorView(view)]).unwrap(), ForeignValue::Int(3));
}

#[test]
fn test_callable_error_is_reraised() {
    let original = ForeignError::new("ValueError", "boom").with_frame("File \"cb.py\", line 1, in fail");
    let raised = original.clone();
    let fail = ForeignCallable::new("fail", move |_| Err(raised.clone()));
    let func = PackedFunc::from_callable(&fail).unwrap();
    assert_eq!(func.call(&[]).unwrap_err(), FfiError::Callback(original));
}

#[test]
fn test_callable_tuple_result_rejected() {
    let pair = ForeignCallable::new("pair", |_| Ok(Some(ForeignValue::Tuple(vec![1.into(), 2.into()]))));
    let func = PackedFunc::from_callable(&pair).unwrap();
    assert_eq!(func.call(&[]).unwrap_err(), FfiError::MultipleReturnValues { count: 2 });
}

#[test]
fn test_callable_argument_is_released_after_call() {
    let apply = native_global("test.interop.apply", |args| {
        let f = args.get_function(0)?;
        f.call(&[NativeValue::Int(20)])
    });
    let double = ForeignCallable::new("double", |args| Ok(Some(ForeignValue::Int(args[0].as_i64().unwrap_or(0) * 2))));
    let result = apply.call(&[double.clone().into()]).unwrap();
    assert_eq!(result, ForeignValue::Int(40));
    assert_eq!(double.ref_count(), 1);
}

#[test]
fn test_object_slot_is_moved_from() {
    let take = native_global("test.interop.take_slot", |args| {
        Ok(args.take_slot(0)?.map_or(NativeValue::Null, NativeValue::Object))
    });
    let module = Module::new("moved").unwrap();
    let slot = Rc::new(ObjectSlot::holding(module.object().clone()));
    let result = take.call(&[ForeignValue::RefSlot(slot.clone())]).unwrap();
    assert!(slot.is_empty());
    assert_eq!(result, ForeignValue::Module(module));

    let empty = Rc::new(ObjectSlot::new());
    assert!(take.call(&[ForeignValue::RefSlot(empty)]).unwrap().is_none());
}

#[test]
fn test_lookup_policy_serde_names() {
    #[derive(serde::Deserialize)]
    struct Wrapper {
        missing: LookupPolicy,
    }
    let parsed: Wrapper = toml::from_str("missing = \"none\"").unwrap();
    assert_eq!(parsed.missing, LookupPolicy::Optional);
    let parsed: Wrapper = toml::from_str("missing = \"error\"").unwrap();
    assert_eq!(parsed.missing, LookupPolicy::Required);
    assert_eq!(LookupPolicy::default(), LookupPolicy::Required);
}
