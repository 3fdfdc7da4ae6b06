mod common;

use std::cell::Cell;
use std::rc::Rc;

use common::{i32_const, i64_const, memarg, op, ModuleBuilder, I32, I64};
use kasm_vm::parser::module::{FunctionType, Limits, MemoryType, ValueType};
use kasm_vm::runtime::{FuncAddr, GlobalAddr};
use kasm_vm::{
    load, ExportError, ExternValue, HostError, HostFunc, Imports, InstantiationError, InstantiationTrap, LinkError,
    ModuleInstance, Store, StoreConfig, Trap, Value,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rstest::rstest;

fn instantiate(store: &mut Store, bytes: &[u8], imports: &Imports) -> Result<ModuleInstance, InstantiationError> {
    let module = load(bytes).expect("module decodes");
    store.instantiate(Rc::new(module), imports)
}

fn add() -> Vec<u8> {
    let mut m = ModuleBuilder::new();
    let t = m.func_type(&[I32, I32], &[I32]);
    let f = m.function(t, &[], &[op::LOCAL_GET, 0, op::LOCAL_GET, 1, op::I32_ADD]);
    m.export_func("add", f);
    m.build()
}

/// `addTwo(x)` calls the imported `env.add` with `(x, 2)`
fn add_two() -> Vec<u8> {
    let mut m = ModuleBuilder::new();
    let binary = m.func_type(&[I32, I32], &[I32]);
    let unary = m.func_type(&[I32], &[I32]);
    let add = m.import_func("env", "add", binary);
    let mut body = vec![op::LOCAL_GET, 0];
    body.extend(i32_const(2));
    body.extend([op::CALL, add as u8]);
    let f = m.function(unary, &[], &body);
    m.export_func("addTwo", f);
    m.build()
}

/// One page of memory (maximum two) with store, load, grow and size exports
fn memory_module() -> Vec<u8> {
    let mut m = ModuleBuilder::new();
    let store_type = m.func_type(&[I32], &[]);
    let load_type = m.func_type(&[I32], &[I32]);
    let size_type = m.func_type(&[], &[I32]);
    m.memory(1, Some(2));

    let mut store_body = vec![op::LOCAL_GET, 0];
    store_body.extend(i32_const(1));
    store_body.push(op::I32_STORE);
    store_body.extend(memarg(2, 0));
    let store = m.function(store_type, &[], &store_body);

    let mut load_body = vec![op::LOCAL_GET, 0, op::I32_LOAD8_U];
    load_body.extend(memarg(0, 0));
    let load = m.function(load_type, &[], &load_body);

    let grow = m.function(load_type, &[], &[op::LOCAL_GET, 0, op::MEMORY_GROW, 0x00]);
    let size = m.function(size_type, &[], &[op::MEMORY_SIZE, 0x00]);

    m.export_func("store", store);
    m.export_func("load8", load);
    m.export_func("grow", grow);
    m.export_func("size", size);
    m.export_memory("memory", 0);
    m.data(16, b"kasm");
    m.build()
}

#[rstest]
#[case(5, 2, 7)]
#[case(-1, 1, 0)]
#[case(i32::MAX, 1, i32::MIN)]
fn test_add(#[case] a: i32, #[case] b: i32, #[case] expected: i32) {
    let mut store = Store::new();
    let instance = instantiate(&mut store, &add(), &Imports::new()).unwrap();
    let results = store.invoke(&instance, "add", &[Value::I32(a), Value::I32(b)]).unwrap();
    assert_eq!(results, vec![Value::I32(expected)]);
}

#[rstest]
#[case(5, 7)]
#[case(-2, 0)]
#[case(i32::MAX, i32::MIN + 1)]
fn test_add_two_calls_host_add(#[case] x: i32, #[case] expected: i32) {
    let mut store = Store::new();
    let add = store.alloc_host_function(HostFunc::wrap("add", |a: i32, b: i32| a.wrapping_add(b)));
    let imports = Imports::new().with("env", "add", ExternValue::Function(add));
    let instance = instantiate(&mut store, &add_two(), &imports).unwrap();
    assert_eq!(store.invoke(&instance, "addTwo", &[Value::I32(x)]), Ok(vec![Value::I32(expected)]));
}

#[rstest]
#[case(0)]
#[case(65532)]
fn test_store_in_bounds(#[case] address: i32) {
    let mut store = Store::new();
    let instance = instantiate(&mut store, &memory_module(), &Imports::new()).unwrap();
    assert_eq!(store.invoke(&instance, "store", &[Value::I32(address)]), Ok(vec![]));
    let memory = store.memory(instance.memory().unwrap()).unwrap();
    assert_eq!(memory.read_u32(address as u64).unwrap(), 1);
}

#[rstest]
#[case(65533)]
#[case(65534)]
#[case(65536)]
#[case(-1)]
fn test_store_out_of_bounds(#[case] address: i32) {
    let mut store = Store::new();
    let instance = instantiate(&mut store, &memory_module(), &Imports::new()).unwrap();
    let before = store.memory(instance.memory().unwrap()).unwrap().data().to_vec();

    let err = store.invoke(&instance, "store", &[Value::I32(address)]).unwrap_err();
    assert_eq!(
        err,
        Trap::MemoryOutOfBounds {
            address: address as u32 as u64,
            width: 4,
            size: 65536
        }
    );
    // nothing was partially written
    assert_eq!(store.memory(instance.memory().unwrap()).unwrap().data(), &before[..]);
}

#[rstest]
#[case(16, Ok(vec![Value::I32(b'k' as i32)]))]
#[case(65535, Ok(vec![Value::I32(0)]))]
#[case(65536, Err(Trap::MemoryOutOfBounds { address: 65536, width: 1, size: 65536 }))]
fn test_load_boundary(#[case] address: i32, #[case] expected: Result<Vec<Value>, Trap>) {
    let mut store = Store::new();
    let instance = instantiate(&mut store, &memory_module(), &Imports::new()).unwrap();
    assert_eq!(store.invoke(&instance, "load8", &[Value::I32(address)]), expected);
}

#[test]
fn test_memory_grow_stops_at_maximum() {
    let mut store = Store::new();
    let instance = instantiate(&mut store, &memory_module(), &Imports::new()).unwrap();

    assert_eq!(store.invoke(&instance, "grow", &[Value::I32(1)]), Ok(vec![Value::I32(1)]));
    assert_eq!(store.invoke(&instance, "grow", &[Value::I32(1)]), Ok(vec![Value::I32(-1)]));
    assert_eq!(store.invoke(&instance, "grow", &[Value::I32(0)]), Ok(vec![Value::I32(2)]));
    assert_eq!(store.invoke(&instance, "size", &[]), Ok(vec![Value::I32(2)]));

    // the new page is addressable and zeroed
    assert_eq!(store.invoke(&instance, "load8", &[Value::I32(131071)]), Ok(vec![Value::I32(0)]));
    assert_eq!(store.invoke(&instance, "store", &[Value::I32(131068)]), Ok(vec![]));
}

#[test]
fn test_memory_grow_respects_store_ceiling() {
    let mut store = Store::with_config(StoreConfig::default().with_max_memory_pages(1));
    let instance = instantiate(&mut store, &memory_module(), &Imports::new()).unwrap();
    assert_eq!(store.invoke(&instance, "grow", &[Value::I32(1)]), Ok(vec![Value::I32(-1)]));
}

/// A table of three slots holding `double` (i32 -> i32), `seven` (-> i32)
/// and null, with `dispatch(x, slot)` calling the slot as i32 -> i32
fn table_module() -> Vec<u8> {
    let mut m = ModuleBuilder::new();
    let unary = m.func_type(&[I32], &[I32]);
    let nullary = m.func_type(&[], &[I32]);
    let dispatch_type = m.func_type(&[I32, I32], &[I32]);
    m.table(3, None);

    let double = m.function(unary, &[], &[op::LOCAL_GET, 0, op::LOCAL_GET, 0, op::I32_ADD]);
    let seven = m.function(nullary, &[], &i32_const(7));
    let dispatch = m.function(
        dispatch_type,
        &[],
        &[op::LOCAL_GET, 0, op::LOCAL_GET, 1, op::CALL_INDIRECT, unary as u8, 0x00],
    );
    m.elements(0, &[double, seven]);
    m.export_func("dispatch", dispatch);
    m.export_table("table", 0);
    m.build()
}

#[rstest]
#[case(0, Ok(vec![Value::I32(42)]))]
#[case(1, Err(Trap::IndirectCallTypeMismatch {
    expected: FunctionType::new(vec![ValueType::I32], vec![ValueType::I32]),
    actual: FunctionType::new(vec![], vec![ValueType::I32]),
}))]
#[case(2, Err(Trap::UndefinedElement { index: 2 }))]
#[case(3, Err(Trap::TableOutOfBounds { index: 3, size: 3 }))]
fn test_call_indirect(#[case] slot: i32, #[case] expected: Result<Vec<Value>, Trap>) {
    let mut store = Store::new();
    let instance = instantiate(&mut store, &table_module(), &Imports::new()).unwrap();
    assert_eq!(
        store.invoke(&instance, "dispatch", &[Value::I32(21), Value::I32(slot)]),
        expected
    );
}

#[test]
fn test_factorial() {
    let mut m = ModuleBuilder::new();
    let t = m.func_type(&[I64], &[I64]);
    let mut body = vec![op::LOCAL_GET, 0, op::I64_EQZ, op::IF, I64];
    body.extend(i64_const(1));
    body.extend([op::ELSE, op::LOCAL_GET, 0, op::LOCAL_GET, 0]);
    body.extend(i64_const(1));
    body.extend([op::I64_SUB, op::CALL, 0, op::I64_MUL, op::END]);
    let fac = m.function(t, &[], &body);
    m.export_func("fac", fac);

    let mut store = Store::new();
    let instance = instantiate(&mut store, &m.build(), &Imports::new()).unwrap();
    assert_eq!(
        store.invoke(&instance, "fac", &[Value::I64(20)]),
        Ok(vec![Value::I64(2432902008176640000)])
    );
}

/// Imports `env.log: (i32) -> ()` and calls it from `run`
fn log_importer() -> Vec<u8> {
    let mut m = ModuleBuilder::new();
    let t = m.func_type(&[I32], &[]);
    let log = m.import_func("env", "log", t);
    let run = m.function(t, &[], &[op::LOCAL_GET, 0, op::CALL, log as u8]);
    m.export_func("run", run);
    m.build()
}

#[test]
fn test_missing_import() {
    let mut store = Store::new();
    let err = instantiate(&mut store, &log_importer(), &Imports::new()).unwrap_err();
    assert_eq!(
        err,
        InstantiationError::Link(LinkError::MissingImport {
            module: "env".to_string(),
            name: "log".to_string(),
        })
    );
}

#[test]
fn test_import_function_type_mismatch() {
    let mut store = Store::new();
    let log = store.alloc_host_function(HostFunc::wrap("log", |_value: i64| {}));
    let imports = Imports::new().with("env", "log", ExternValue::Function(log));

    let err = instantiate(&mut store, &log_importer(), &imports).unwrap_err();
    assert_eq!(
        err,
        InstantiationError::Link(LinkError::FunctionTypeMismatch {
            module: "env".to_string(),
            name: "log".to_string(),
            expected: FunctionType::new(vec![ValueType::I32], vec![]),
            actual: FunctionType::new(vec![ValueType::I64], vec![]),
        })
    );
}

#[test]
fn test_import_kind_mismatch() {
    let mut store = Store::new();
    let memory = store
        .alloc_memory(MemoryType {
            limits: Limits { min: 1, max: None },
        })
        .unwrap();
    let imports = Imports::new().with("env", "log", ExternValue::Memory(memory));

    let err = instantiate(&mut store, &log_importer(), &imports).unwrap_err();
    assert_eq!(
        err,
        InstantiationError::Link(LinkError::KindMismatch {
            module: "env".to_string(),
            name: "log".to_string(),
            expected: "function",
            actual: "memory",
        })
    );
}

#[test]
fn test_host_function_is_called() {
    let seen = Rc::new(Cell::new(0));
    let mut store = Store::new();
    let log = {
        let seen = Rc::clone(&seen);
        store.alloc_host_function(HostFunc::wrap("log", move |value: i32| seen.set(value)))
    };
    let imports = Imports::new().with("env", "log", ExternValue::Function(log));
    let instance = instantiate(&mut store, &log_importer(), &imports).unwrap();

    assert_eq!(store.invoke(&instance, "run", &[Value::I32(99)]), Ok(vec![]));
    assert_eq!(seen.get(), 99);
}

#[test]
fn test_host_failure_becomes_trap() {
    let mut store = Store::new();
    let log = store.alloc_host_function(HostFunc::new(
        "log",
        FunctionType::new(vec![ValueType::I32], vec![]),
        |_store, _args| Err(HostError::new("disk full")),
    ));
    let imports = Imports::new().with("env", "log", ExternValue::Function(log));
    let instance = instantiate(&mut store, &log_importer(), &imports).unwrap();

    assert_eq!(
        store.invoke(&instance, "run", &[Value::I32(1)]),
        Err(Trap::Host {
            function: "log".to_string(),
            message: "disk full".to_string(),
        })
    );
}

#[test]
fn test_host_reads_guest_memory() {
    let mut store = Store::new();
    let memory = store
        .alloc_memory(MemoryType {
            limits: Limits { min: 1, max: None },
        })
        .unwrap();
    let peek = store.alloc_host_function(HostFunc::new(
        "peek",
        FunctionType::new(vec![ValueType::I32], vec![ValueType::I32]),
        move |store, args| {
            let address = args[0].as_i32().ok_or("expected an address")?;
            let byte = store.memory(memory)?.read_u8(address as u32 as u64)?;
            Ok(vec![Value::I32(byte as i32)])
        },
    ));

    let mut m = ModuleBuilder::new();
    let t = m.func_type(&[I32], &[I32]);
    let peek_idx = m.import_func("env", "peek", t);
    m.import_memory("env", "memory", 1, None);
    let run = m.function(t, &[], &[op::LOCAL_GET, 0, op::CALL, peek_idx as u8]);
    m.export_func("run", run);
    m.data(100, b"Z");

    let imports = Imports::new()
        .with("env", "peek", ExternValue::Function(peek))
        .with("env", "memory", ExternValue::Memory(memory));
    let instance = instantiate(&mut store, &m.build(), &imports).unwrap();
    assert_eq!(store.invoke(&instance, "run", &[Value::I32(100)]), Ok(vec![Value::I32(b'Z' as i32)]));
    assert_eq!(
        store.invoke(&instance, "run", &[Value::I32(70000)]),
        Err(Trap::Host {
            function: "peek".to_string(),
            message: "out of bounds memory access: address 70000 width 1 memory size 65536".to_string(),
        })
    );
}

#[test]
fn test_host_reenters_store() {
    let mut store = Store::new();
    let provider = instantiate(&mut store, &table_module(), &Imports::new()).unwrap();
    let dispatch = store.get_export(&provider, "dispatch").unwrap().as_function().unwrap();

    // (i32) -> i32: dispatch(x, 0) doubles x
    let callback = store.alloc_host_function(HostFunc::new(
        "callback",
        FunctionType::new(vec![ValueType::I32], vec![ValueType::I32]),
        move |store, args| Ok(store.call(dispatch, &[args[0], Value::I32(0)])?),
    ));

    let mut m = ModuleBuilder::new();
    let t = m.func_type(&[I32], &[I32]);
    let callback_idx = m.import_func("env", "callback", t);
    let mut body = vec![op::LOCAL_GET, 0, op::CALL, callback_idx as u8];
    body.extend(i32_const(1));
    body.push(op::I32_ADD);
    let run = m.function(t, &[], &body);
    m.export_func("run", run);

    let imports = Imports::new().with("env", "callback", ExternValue::Function(callback));
    let instance = instantiate(&mut store, &m.build(), &imports).unwrap();
    assert_eq!(store.invoke(&instance, "run", &[Value::I32(20)]), Ok(vec![Value::I32(41)]));
}

#[test]
fn test_recursion_exhausts_call_depth() {
    let mut m = ModuleBuilder::new();
    let t = m.func_type(&[I32], &[I32]);
    let forever = m.function(t, &[], &[op::LOCAL_GET, 0, op::CALL, 0]);
    let ok = m.function(t, &[], &[op::LOCAL_GET, 0]);
    m.export_func("forever", forever);
    m.export_func("ok", ok);

    let mut store = Store::with_config(StoreConfig::default().with_max_call_depth(64));
    let instance = instantiate(&mut store, &m.build(), &Imports::new()).unwrap();
    assert_eq!(
        store.invoke(&instance, "forever", &[Value::I32(0)]),
        Err(Trap::CallStackExhausted { depth: 64 })
    );
    // the Store is still usable afterwards
    assert_eq!(store.invoke(&instance, "ok", &[Value::I32(3)]), Ok(vec![Value::I32(3)]));
}

#[test]
fn test_host_recursion_shares_call_depth() {
    let target: Rc<Cell<Option<FuncAddr>>> = Rc::new(Cell::new(None));
    let mut store = Store::with_config(StoreConfig::default().with_max_call_depth(32));
    let back = {
        let target = Rc::clone(&target);
        store.alloc_host_function(HostFunc::new(
            "back",
            FunctionType::new(vec![ValueType::I32], vec![ValueType::I32]),
            move |store, args| {
                let addr = target.get().ok_or("not linked")?;
                Ok(store.call(addr, args)?)
            },
        ))
    };

    let mut m = ModuleBuilder::new();
    let t = m.func_type(&[I32], &[I32]);
    let back_idx = m.import_func("env", "back", t);
    let bounce = m.function(t, &[], &[op::LOCAL_GET, 0, op::CALL, back_idx as u8]);
    m.export_func("bounce", bounce);

    let imports = Imports::new().with("env", "back", ExternValue::Function(back));
    let instance = instantiate(&mut store, &m.build(), &imports).unwrap();
    target.set(store.get_export(&instance, "bounce").unwrap().as_function());

    match store.invoke(&instance, "bounce", &[Value::I32(1)]) {
        Err(Trap::Host { function, message }) => {
            assert_eq!(function, "back");
            assert!(message.contains("call stack exhausted"), "{}", message);
        }
        other => panic!("expected a host trap, got {:?}", other),
    }
}

#[test]
fn test_instruction_budget() {
    let mut m = ModuleBuilder::new();
    let spin_type = m.func_type(&[], &[]);
    let one_type = m.func_type(&[], &[I32]);
    let spin = m.function(spin_type, &[], &[op::LOOP, 0x40, op::BR, 0, op::END]);
    let one = m.function(one_type, &[], &i32_const(1));
    m.export_func("spin", spin);
    m.export_func("one", one);

    let mut store = Store::with_config(StoreConfig::default().with_instruction_budget(10_000));
    let instance = instantiate(&mut store, &m.build(), &Imports::new()).unwrap();
    assert_eq!(store.invoke(&instance, "spin", &[]), Err(Trap::InstructionBudgetExhausted));
    // every outer invoke starts with a fresh budget
    assert_eq!(store.invoke(&instance, "one", &[]), Ok(vec![Value::I32(1)]));
}

#[test]
fn test_start_function_runs_during_instantiation() {
    let mut m = ModuleBuilder::new();
    let t = m.func_type(&[], &[]);
    m.global(I32, true, &i32_const(0));
    let mut body = i32_const(42);
    body.extend([op::GLOBAL_SET, 0]);
    let init = m.function(t, &[], &body);
    m.start(init);
    m.export_global("counter", 0);

    let mut store = Store::new();
    let instance = instantiate(&mut store, &m.build(), &Imports::new()).unwrap();
    let counter = store.get_export(&instance, "counter").unwrap().as_global().unwrap();
    assert_eq!(store.global_value(counter), Ok(Value::I32(42)));
}

#[test]
fn test_trapping_start_function_fails_instantiation() {
    let mut m = ModuleBuilder::new();
    let t = m.func_type(&[], &[]);
    m.memory(1, None);
    let init = m.function(t, &[], &[op::UNREACHABLE]);
    m.start(init);

    let mut store = Store::new();
    let err = instantiate(&mut store, &m.build(), &Imports::new()).unwrap_err();
    assert_eq!(err, InstantiationError::Start(Trap::Unreachable));
    assert!(store.memory(kasm_vm::runtime::MemoryAddr(0)).is_err());
}

#[test]
fn test_start_trap_keeps_functions_placed_in_imported_table() {
    let mut store = Store::new();

    let mut p = ModuleBuilder::new();
    let nullary = p.func_type(&[], &[I32]);
    p.table(1, None);
    let mut body = i32_const(0);
    body.extend([op::CALL_INDIRECT, nullary as u8, 0x00]);
    let dispatch = p.function(nullary, &[], &body);
    p.export_func("dispatch", dispatch);
    p.export_table("table", 0);
    let provider = instantiate(&mut store, &p.build(), &Imports::new()).unwrap();
    assert_eq!(
        store.invoke(&provider, "dispatch", &[]),
        Err(Trap::UndefinedElement { index: 0 })
    );

    // writes `seven` into the provider's table, then traps in its start function
    let mut c = ModuleBuilder::new();
    let nullary = c.func_type(&[], &[I32]);
    let unit = c.func_type(&[], &[]);
    c.import_table("provider", "table", 1, None);
    c.global(I32, false, &i32_const(7));
    let seven = c.function(nullary, &[], &[op::GLOBAL_GET, 0]);
    let init = c.function(unit, &[], &[op::UNREACHABLE]);
    c.elements(0, &[seven]);
    c.start(init);

    let mut imports = Imports::new();
    imports.define_instance(&store, "provider", &provider).unwrap();
    let err = instantiate(&mut store, &c.build(), &imports).unwrap_err();
    assert_eq!(err, InstantiationError::Start(Trap::Unreachable));

    // the slot still works, global included
    assert_eq!(store.invoke(&provider, "dispatch", &[]), Ok(vec![Value::I32(7)]));
}

#[test]
fn test_failed_instantiation_leaves_no_live_entries() {
    let mut store = Store::new();
    let shared = store
        .alloc_memory(MemoryType {
            limits: Limits { min: 1, max: None },
        })
        .unwrap();

    let module_with_data = |second_offset: i32| {
        let mut m = ModuleBuilder::new();
        let t = m.func_type(&[], &[I32]);
        m.import_memory("env", "memory", 1, None);
        m.global(I32, false, &i32_const(5));
        let f = m.function(t, &[], &[op::GLOBAL_GET, 0]);
        m.export_func("five", f);
        m.data(0, b"first");
        m.data(second_offset, b"xx");
        m.build()
    };
    let imports = Imports::new().with("env", "memory", ExternValue::Memory(shared));

    let functions_before = store.function_count();
    let globals_before = store.global_count();
    let err = instantiate(&mut store, &module_with_data(65535), &imports).unwrap_err();
    assert_eq!(
        err,
        InstantiationError::Init(InstantiationTrap::DataSegmentOutOfBounds {
            segment: 1,
            offset: 65535,
            len: 2,
            size: 65536,
        })
    );
    // segments are checked before any is written
    assert_eq!(&store.memory(shared).unwrap().data()[..5], &[0; 5]);
    // whatever the failed attempt allocated is gone
    assert_eq!(
        store.function(FuncAddr(functions_before)).unwrap_err(),
        Trap::DanglingAddress {
            kind: "function",
            index: functions_before,
        }
    );
    assert!(store.global(GlobalAddr(globals_before)).is_err());

    let instance = instantiate(&mut store, &module_with_data(100), &imports).unwrap();
    let five = store.get_export(&instance, "five").unwrap().as_function().unwrap();
    assert!(five.0 > functions_before);
    assert_eq!(store.invoke(&instance, "five", &[]), Ok(vec![Value::I32(5)]));
    assert_eq!(&store.memory(shared).unwrap().data()[..5], b"first");
}

#[test]
fn test_instances_link_through_exports() {
    let mut store = Store::new();
    let provider = instantiate(&mut store, &memory_module(), &Imports::new()).unwrap();

    let mut m = ModuleBuilder::new();
    let t = m.func_type(&[I32], &[I32]);
    m.import_memory("provider", "memory", 1, None);
    let mut body = vec![op::LOCAL_GET, 0, op::I32_LOAD8_U];
    body.extend(memarg(0, 0));
    let peek = m.function(t, &[], &body);
    m.export_func("peek", peek);

    let mut imports = Imports::new();
    imports.define_instance(&store, "provider", &provider).unwrap();
    let consumer = instantiate(&mut store, &m.build(), &imports).unwrap();

    // the provider's data segment is visible through the shared memory
    assert_eq!(store.invoke(&consumer, "peek", &[Value::I32(17)]), Ok(vec![Value::I32(b'a' as i32)]));
    store.invoke(&provider, "store", &[Value::I32(200)]).unwrap();
    assert_eq!(store.invoke(&consumer, "peek", &[Value::I32(200)]), Ok(vec![Value::I32(1)]));
}

#[test]
fn test_release_tombstones_owned_entries() {
    let mut store = Store::new();
    let instance = instantiate(&mut store, &memory_module(), &Imports::new()).unwrap();
    let store_fn = store.get_export(&instance, "store").unwrap().as_function().unwrap();
    let memory = instance.memory().unwrap();
    store.release(instance);

    assert_eq!(
        store.call(store_fn, &[Value::I32(0)]),
        Err(Trap::DanglingAddress {
            kind: "function",
            index: store_fn.0,
        })
    );

    let mut m = ModuleBuilder::new();
    m.import_memory("env", "memory", 1, None);
    let imports = Imports::new().with("env", "memory", ExternValue::Memory(memory));
    let err = instantiate(&mut store, &m.build(), &imports).unwrap_err();
    assert_eq!(
        err,
        InstantiationError::Link(LinkError::DanglingImport {
            module: "env".to_string(),
            name: "memory".to_string(),
            kind: "memory",
        })
    );
}

#[test]
fn test_dropped_instance_is_reclaimed() {
    let mut store = Store::new();
    let instance = instantiate(&mut store, &memory_module(), &Imports::new()).unwrap();
    let memory = instance.memory().unwrap();
    let size = store.get_export(&instance, "size").unwrap().as_function().unwrap();
    drop(instance);

    // queued until the Store reclaims it
    assert!(store.memory(memory).is_ok());
    store.reclaim();
    assert_eq!(
        store.memory(memory).map(|_| ()),
        Err(Trap::DanglingAddress {
            kind: "memory",
            index: memory.0,
        })
    );
    assert_eq!(
        store.call(size, &[]),
        Err(Trap::DanglingAddress {
            kind: "function",
            index: size.0,
        })
    );
}

#[test]
fn test_next_instantiate_reclaims_dropped_instances() {
    let mut store = Store::new();
    let first = instantiate(&mut store, &memory_module(), &Imports::new()).unwrap();
    let old_memory = first.memory().unwrap();
    drop(first);

    let second = instantiate(&mut store, &memory_module(), &Imports::new()).unwrap();
    assert!(store.memory(old_memory).is_err());
    assert_ne!(second.memory(), Some(old_memory));
    assert_eq!(store.invoke(&second, "size", &[]), Ok(vec![Value::I32(1)]));
}

#[test]
fn test_export_lookup_errors() {
    let mut store = Store::new();
    let instance = instantiate(&mut store, &memory_module(), &Imports::new()).unwrap();

    assert_eq!(
        store.get_export(&instance, "nope"),
        Err(ExportError::NotFound("nope".to_string()))
    );
    assert_eq!(
        store.invoke(&instance, "nope", &[]),
        Err(Trap::UnknownExport("nope".to_string()))
    );
    assert_eq!(
        store.invoke(&instance, "memory", &[]),
        Err(Trap::NotAFunction("memory".to_string()))
    );
}

#[test]
fn test_argument_types_are_checked() {
    let mut store = Store::new();
    let instance = instantiate(&mut store, &add(), &Imports::new()).unwrap();
    assert!(matches!(
        store.invoke(&instance, "add", &[Value::I64(5), Value::I32(2)]),
        Err(Trap::ArgumentMismatch { .. })
    ));
    assert!(matches!(
        store.invoke(&instance, "add", &[Value::I32(5)]),
        Err(Trap::ArgumentMismatch { .. })
    ));
}

/// `mix(a, b) = rotl((a / b) ^ a, b) - b * 3`; traps on division by zero
/// and on i32::MIN / -1
fn mix_module() -> Vec<u8> {
    let mut m = ModuleBuilder::new();
    let t = m.func_type(&[I32, I32], &[I32]);
    let mut body = vec![
        op::LOCAL_GET, 0, op::LOCAL_GET, 1, op::I32_DIV_S, op::LOCAL_GET, 0, op::I32_XOR, op::LOCAL_GET, 1,
        op::I32_ROTL, op::LOCAL_GET, 1,
    ];
    body.extend(i32_const(3));
    body.extend([op::I32_MUL, op::I32_SUB]);
    let mix = m.function(t, &[], &body);
    m.export_func("mix", mix);
    m.build()
}

#[test]
fn test_execution_is_deterministic() {
    let bytes = mix_module();
    let mut rng = StdRng::seed_from_u64(0x6b61736d);

    for _ in 0..200 {
        let a: i32 = if rng.gen_bool(0.1) { i32::MIN } else { rng.gen() };
        let b: i32 = if rng.gen_bool(0.3) { rng.gen_range(-2..=2) } else { rng.gen() };
        let args = [Value::I32(a), Value::I32(b)];

        let mut first = Store::new();
        let first_instance = instantiate(&mut first, &bytes, &Imports::new()).unwrap();
        let mut second = Store::new();
        let second_instance = instantiate(&mut second, &bytes, &Imports::new()).unwrap();

        let expected = if b == 0 {
            Err(Trap::IntegerDivideByZero)
        } else if a == i32::MIN && b == -1 {
            Err(Trap::IntegerOverflow)
        } else {
            Ok(vec![Value::I32(
                ((a / b) ^ a).rotate_left(b as u32).wrapping_sub(b.wrapping_mul(3)),
            )])
        };
        assert_eq!(first.invoke(&first_instance, "mix", &args), expected);
        assert_eq!(second.invoke(&second_instance, "mix", &args), expected);
    }
}
