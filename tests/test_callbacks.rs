use packed_ffi::ffi::{registry, FunctionObj, NativeError, NativeValue, Object, ObjectPtr};
use packed_ffi::foreign::{deferred, lock};
use packed_ffi::interop::remove_global_func;
use packed_ffi::{
    get_global_func, stats, FfiError, ForeignCallable, ForeignError, ForeignValue, LookupPolicy, Module, ObjectSlot,
    PackedFunc,
};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread;

static SETUP: Once = Once::new();

/// Natives that call back into whatever function they are handed
fn setup() {
    SETUP.call_once(|| {
        // apply(f, *args) -> f(*args)
        registry::register(
            "callbacks.apply",
            FunctionObj::from_native(|args| {
                let f = args.get_function(0)?;
                let rest = (1..args.len()).map(|i| args.value(i)).collect::<Result<Vec<_>, _>>()?;
                f.call(&rest)
            }),
            false,
        )
        .unwrap();
        // Same, but wraps failures with extra context
        registry::register(
            "callbacks.apply_with_context",
            FunctionObj::from_native(|args| {
                let f = args.get_function(0)?;
                f.call(&[]).map_err(|e| NativeError::new(format!("while applying: {}", e)))
            }),
            false,
        )
        .unwrap();
        registry::register(
            "callbacks.take_slot",
            FunctionObj::from_native(|args| Ok(args.take_slot(0)?.map_or(NativeValue::Null, NativeValue::Object))),
            false,
        )
        .unwrap();
    });
}

fn global(name: &str) -> PackedFunc {
    setup();
    get_global_func(name, LookupPolicy::Required).unwrap().unwrap()
}

fn native_view(func: &PackedFunc) -> ObjectPtr<FunctionObj> {
    unsafe { ObjectPtr::<Object>::from_borrowed(func.handle()) }
        .unwrap()
        .downcast::<FunctionObj>()
        .unwrap()
}

#[test]
fn test_concurrent_native_callers() {
    const THREADS: usize = 8;
    const CALLS: usize = 50;

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let callable = ForeignCallable::new("count", move |args| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Some(ForeignValue::Int(args[0].as_i64().unwrap_or(0) + 1)))
    });
    let baseline = callable.ref_count();

    let func = PackedFunc::from_callable(&callable).unwrap();
    let native = native_view(&func);
    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let native = native.clone();
            thread::spawn(move || {
                for i in 0..CALLS {
                    let n = (t * CALLS + i) as i64;
                    let result = native.call(&[NativeValue::Int(n)]).unwrap();
                    assert_eq!(result.as_i64(), Some(n + 1));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(seen.load(Ordering::SeqCst), THREADS * CALLS);
    drop(native);
    drop(func);
    assert_eq!(callable.ref_count(), baseline);
}

#[test]
fn test_diagnostic_preserved_through_native_frames() {
    let original = ForeignError::new("ValueError", "invalid shape")
        .with_frame("File \"model.py\", line 12, in forward")
        .with_frame("File \"model.py\", line 40, in check");
    let raised = original.clone();
    let fail = ForeignCallable::new("fail", move |_| Err(raised.clone()));
    let before = stats().callback_failures;

    let apply = global("callbacks.apply");
    let err = apply.call(&[fail.clone().into()]).unwrap_err();
    assert_eq!(err, FfiError::Callback(original.clone()));
    assert!(stats().callback_failures > before);

    let with_context = global("callbacks.apply_with_context");
    let err = with_context.call(&[fail.into()]).unwrap_err();
    assert_eq!(err.into_foreign(), original);
}

#[test]
fn test_unrelated_native_failure_after_callback_error() {
    // The callback error is swallowed by native code, which then fails on its own
    registry::register(
        "callbacks.swallow",
        FunctionObj::from_native(|args| {
            let f = args.get_function(0)?;
            let _ = f.call(&[]);
            Err(NativeError::new("index out of range"))
        }),
        true,
    )
    .unwrap();
    let swallow = get_global_func("callbacks.swallow", LookupPolicy::Required).unwrap().unwrap();
    let fail = ForeignCallable::new("fail", |_| Err(ForeignError::new("KeyError", "'x'")));
    let err = swallow.call(&[fail.into()]).unwrap_err();
    assert_eq!(err, FfiError::NativeCall { message: "index out of range".to_string() });
}

#[test]
fn test_tuple_result_is_multiple_returns() {
    let apply = global("callbacks.apply");
    let pair = ForeignCallable::new("pair", |_| Ok(Some(ForeignValue::Tuple(vec![1.into(), 2.into()]))));
    let err = apply.call(&[pair.into()]).unwrap_err();
    assert_eq!(err, FfiError::MultipleReturnValues { count: 2 });
}

#[test]
fn test_panicking_callable_becomes_error() {
    let apply = global("callbacks.apply");
    let boom = ForeignCallable::new("boom", |_| panic!("callable bug"));
    match apply.call(&[boom.into()]).unwrap_err() {
        FfiError::Callback(err) => {
            assert_eq!(err.kind, "Panic");
            assert!(err.message.contains("callable bug"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_arguments_decoded_for_callable() {
    let apply = global("callbacks.apply");
    let inspect = ForeignCallable::new("inspect", |args| {
        let kinds: Vec<ForeignValue> = args.iter().map(|a| ForeignValue::from(a.kind_name())).collect();
        Ok(Some(ForeignValue::List(kinds)))
    });
    let module = Module::new("arg").unwrap();
    let result = apply
        .call(&[
            inspect.into(),
            ForeignValue::Bool(true),
            ForeignValue::from("s"),
            module.into(),
            ForeignValue::None,
        ])
        .unwrap();
    // Lists come back as native arrays
    let obj = result.as_object().unwrap();
    assert_eq!(obj.type_key().unwrap(), "runtime.Array");
}

#[test]
fn test_object_argument_identity() {
    let apply = global("callbacks.apply");
    let identity = ForeignCallable::new("identity", |args| Ok(Some(args[0].clone())));
    let module = Module::new("same").unwrap();
    let back = apply.call(&[identity.into(), module.clone().into()]).unwrap();
    assert_eq!(back, ForeignValue::Module(module));
}

#[test]
fn test_nested_reentrant_callbacks() {
    let apply = global("callbacks.apply");
    let inner = ForeignCallable::new("inner", |_| Ok(Some(ForeignValue::Bool(lock::global().is_held()))));
    let outer_apply = apply.clone();
    let outer = ForeignCallable::new("outer", move |args| {
        assert!(lock::global().is_held());
        let inner_result = outer_apply.call(&[args[0].clone()]).map_err(FfiError::into_foreign)?;
        // Lock is restored after the nested native call returns
        assert!(lock::global().is_held());
        Ok(Some(inner_result))
    });

    let result = apply.call(&[outer.into(), inner.clone().into()]).unwrap();
    assert_eq!(result, ForeignValue::Bool(true));
    assert!(!lock::global().is_held());
    assert_eq!(inner.ref_count(), 1);
}

#[test]
fn test_slot_moved_by_native() {
    let take = global("callbacks.take_slot");
    let module = Module::new("slot").unwrap();
    let slot = Rc::new(ObjectSlot::holding(module.object().clone()));
    let result = take.call(&[ForeignValue::RefSlot(slot.clone())]).unwrap();
    assert!(slot.is_empty());
    assert!(slot.take().is_none());
    assert_eq!(result, ForeignValue::Module(module));
}

#[test]
fn test_globally_registered_callable_stays_alive() {
    let callable = ForeignCallable::new("forever", |_| Ok(Some(ForeignValue::from("alive"))));
    packed_ffi::register_global_callable("callbacks.forever", &callable, true).unwrap();
    assert!(callable.ref_count() > 1);

    let func = get_global_func("callbacks.forever", LookupPolicy::Required).unwrap().unwrap();
    drop(func);
    let func = get_global_func("callbacks.forever", LookupPolicy::Required).unwrap().unwrap();
    assert_eq!(func.call(&[]).unwrap().as_str(), Some("alive"));
}

#[test]
fn test_removed_global_releases_callable() {
    let callable = ForeignCallable::new("temporary", |_| Ok(Some(ForeignValue::Int(0))));
    let baseline = callable.ref_count();
    packed_ffi::register_global_callable("callbacks.temporary", &callable, false).unwrap();
    assert_eq!(callable.ref_count(), baseline + 1);

    remove_global_func("callbacks.temporary").unwrap();
    assert_eq!(callable.ref_count(), baseline);
}

#[test]
fn test_overridden_global_releases_old_callable() {
    let old = ForeignCallable::new("old", |_| Ok(Some(ForeignValue::from("old"))));
    let new = ForeignCallable::new("new", |_| Ok(Some(ForeignValue::from("new"))));
    let old_baseline = old.ref_count();
    let new_baseline = new.ref_count();

    packed_ffi::register_global_callable("callbacks.replaced", &old, false).unwrap();
    packed_ffi::register_global_callable("callbacks.replaced", &new, true).unwrap();
    assert_eq!(old.ref_count(), old_baseline);
    assert_eq!(new.ref_count(), new_baseline + 1);

    let func = get_global_func("callbacks.replaced", LookupPolicy::Required).unwrap().unwrap();
    assert_eq!(func.call(&[]).unwrap().as_str(), Some("new"));
    drop(func);

    remove_global_func("callbacks.replaced").unwrap();
    assert_eq!(new.ref_count(), new_baseline);
}

#[test]
fn test_worker_thread_failure_is_not_left_behind() {
    let fail = ForeignCallable::new("fail", |_| Err(ForeignError::new("RuntimeError", "on worker")));
    let func = PackedFunc::from_callable(&fail).unwrap();
    let native = native_view(&func);
    let apply = global("callbacks.apply");

    thread::spawn(move || {
        // Native code on this thread swallows the failure
        assert!(native.call(&[]).is_err());
        assert!(deferred::has_deferred());

        let ok = ForeignCallable::new("ok", |_| Ok(Some(ForeignValue::Int(1))));
        assert_eq!(apply.call(&[ok.into()]).unwrap(), ForeignValue::Int(1));
        assert!(!deferred::has_deferred());
    })
    .join()
    .unwrap();
}
