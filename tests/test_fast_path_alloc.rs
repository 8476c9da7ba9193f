//! Allocation behaviour of the fast call path
//!
//! A counting global allocator tallies allocations made on the current
//! thread, so concurrent harness threads do not disturb the measurement.

use packed_ffi::ffi::{registry, FunctionObj, NativeValue};
use packed_ffi::{get_global_func, last_call_path, CallPath, Device, ForeignValue, LookupPolicy, PackedFunc};
use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;

struct CountingAlloc;

thread_local! {
    static ALLOCATIONS: Cell<usize> = const { Cell::new(0) };
}

fn note_allocation() {
    let _ = ALLOCATIONS.try_with(|count| count.set(count.get() + 1));
}

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        note_allocation();
        System.alloc(layout)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        note_allocation();
        System.alloc_zeroed(layout)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        note_allocation();
        System.realloc(ptr, layout, new_size)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static GLOBAL: CountingAlloc = CountingAlloc;

fn allocations_during(f: impl FnOnce()) -> usize {
    let before = ALLOCATIONS.with(Cell::get);
    f();
    ALLOCATIONS.with(Cell::get) - before
}

fn echo_last() -> PackedFunc {
    registry::register(
        "alloc.echo_last",
        FunctionObj::from_native(|args| match args.len() {
            0 => Ok(NativeValue::Null),
            n => args.value(n - 1),
        }),
        true,
    )
    .unwrap();
    get_global_func("alloc.echo_last", LookupPolicy::Required).unwrap().unwrap()
}

#[test]
fn test_pod_arguments_on_fast_path_do_not_allocate() {
    let echo = echo_last();
    let arg_lists: Vec<Vec<ForeignValue>> = vec![
        vec![],
        vec![ForeignValue::Int(7)],
        vec![ForeignValue::Float(0.5), ForeignValue::Bool(true)],
        vec![ForeignValue::None, ForeignValue::Device(Device::cpu(0)), ForeignValue::Int(-1)],
    ];

    // First calls set up per-thread state and logging callsites
    for args in &arg_lists {
        for _ in 0..4 {
            echo.call(args).unwrap();
        }
    }

    for args in &arg_lists {
        let mut result = ForeignValue::None;
        let count = allocations_during(|| result = echo.call(args).unwrap());
        assert_eq!(count, 0, "{} POD arguments allocated {} times", args.len(), count);
        assert_eq!(last_call_path(), Some(CallPath::Fast));
        assert_eq!(&result, args.last().unwrap_or(&ForeignValue::None));
    }

    // Four arguments take the heap-backed path
    let four: Vec<ForeignValue> = (0..4).map(ForeignValue::Int).collect();
    echo.call(&four).unwrap();
    let count = allocations_during(|| {
        echo.call(&four).unwrap();
    });
    assert!(count > 0);
    assert_eq!(last_call_path(), Some(CallPath::General));
}
