use crate::{
    Error, HostError, Imports, Module, ModuleInstance, NopExternals, Runtime, RuntimeValue, Trap,
    TrapKind, WasiSnapshotPreview1,
};
use assert_matches::assert_matches;
use core::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};

fn load(wat: &str) -> Module {
    let wasm = wat::parse_str(wat).expect("failed to parse wat");
    Module::from_buffer(wasm).expect("failed to load wasm")
}

const CALL_ADD: &str = r#"
    (module
        (import "env" "add" (func $add (param i32) (result i32)))
        (func (export "call_add") (param i32) (result i32)
            local.get 0
            call $add))
"#;

#[test]
fn imported_function_is_dispatched_by_name() {
    let module = load(CALL_ADD);
    let instance = ModuleInstance::new(&module).unwrap().assert_no_start();

    let mut imports = Imports::new();
    imports.add_import("env", "add", |_store, args| {
        let n: i32 = args.nth_checked(0)?;
        Ok(vec![RuntimeValue::I32(n + n)])
    });

    assert_eq!(
        instance
            .invoke_export("call_add", &[RuntimeValue::I32(3)], &mut imports)
            .unwrap(),
        vec![RuntimeValue::I32(6)]
    );
}

#[test]
fn runtime_facade_wires_imports() {
    let module = load(CALL_ADD);
    let mut runtime = Runtime::new(&module).unwrap();
    runtime.add_import("env", "add", |_store, args| {
        let n: i32 = args.nth_checked(0)?;
        Ok(vec![RuntimeValue::I32(n + n)])
    });
    assert_eq!(
        runtime.call("call_add", &[RuntimeValue::I32(3)]).unwrap(),
        vec![RuntimeValue::I32(6)]
    );
    assert_eq!(
        runtime.call("call_add", &[RuntimeValue::I32(-4)]).unwrap(),
        vec![RuntimeValue::I32(-8)]
    );
}

#[test]
fn missing_import_module() {
    let module = load(CALL_ADD);
    let instance = ModuleInstance::new(&module).unwrap().assert_no_start();
    let result = instance.invoke_export("call_add", &[RuntimeValue::I32(1)], &mut NopExternals);
    assert_matches!(
        result,
        Err(Error::Trap(trap)) if matches!(trap.kind(), TrapKind::ImportModuleNotFound(name) if name == "env")
    );
}

#[test]
fn missing_import_function() {
    let module = load(CALL_ADD);
    let instance = ModuleInstance::new(&module).unwrap().assert_no_start();
    let mut imports = Imports::new();
    imports.add_import("env", "sub", |_store, _args| Ok(vec![]));
    let result = instance.invoke_export("call_add", &[RuntimeValue::I32(1)], &mut imports);
    assert_matches!(
        result,
        Err(Error::Trap(trap)) if matches!(
            trap.kind(),
            TrapKind::ImportFunctionNotFound(module, field) if module == "env" && field == "add"
        )
    );
}

#[test]
fn host_result_must_match_the_signature() {
    let module = load(CALL_ADD);
    let instance = ModuleInstance::new(&module).unwrap().assert_no_start();

    let mut imports = Imports::new();
    imports.add_import("env", "add", |_store, _args| {
        Ok(vec![RuntimeValue::I64(1)])
    });
    let result = instance.invoke_export("call_add", &[RuntimeValue::I32(1)], &mut imports);
    assert_matches!(
        result,
        Err(Error::Trap(trap)) if matches!(trap.kind(), TrapKind::TypeMismatch)
    );

    let mut imports = Imports::new();
    imports.add_import("env", "add", |_store, _args| Ok(vec![]));
    let result = instance.invoke_export("call_add", &[RuntimeValue::I32(1)], &mut imports);
    assert_matches!(
        result,
        Err(Error::Trap(trap)) if matches!(trap.kind(), TrapKind::TypeMismatch)
    );
}

#[derive(Debug)]
struct MyError {
    code: u32,
}

impl fmt::Display for MyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MyError, code={}", self.code)
    }
}

impl HostError for MyError {}

#[test]
fn host_errors_can_be_downcast() {
    let module = load(CALL_ADD);
    let instance = ModuleInstance::new(&module).unwrap().assert_no_start();

    let mut imports = Imports::new();
    imports.add_import("env", "add", |_store, _args| {
        Err(Trap::from(MyError { code: 1312 }))
    });

    let error = instance
        .invoke_export("call_add", &[RuntimeValue::I32(1)], &mut imports)
        .unwrap_err();
    let my_error = error
        .as_host_error()
        .expect("expected a host error")
        .downcast_ref::<MyError>()
        .expect("expected MyError");
    assert_eq!(my_error.code, 1312);
}

#[test]
fn host_function_can_touch_linear_memory() {
    let module = load(
        r#"
        (module
            (import "env" "peek" (func $peek (param i32) (result i32)))
            (memory 1)
            (data (i32.const 16) "\2A")
            (func (export "peek16") (result i32)
                i32.const 16
                call $peek))
        "#,
    );
    let instance = ModuleInstance::new(&module).unwrap().assert_no_start();

    let mut imports = Imports::new();
    imports.add_import("env", "peek", |store, args| {
        let address: u32 = args.nth_checked(0)?;
        let memory = store
            .export_by_name("nothing-exported")
            .and_then(|e| e.as_memory().cloned());
        assert!(memory.is_none());
        // Host functions reach memory through the store they are given.
        let memory = store.memory_by_index(0).expect("default memory exists");
        let byte: u8 = memory
            .get_value(address)
            .map_err(|_| Trap::new(TrapKind::MemoryAccessOutOfBounds))?;
        Ok(vec![RuntimeValue::I32(byte as i32)])
    });

    assert_eq!(
        instance
            .invoke_export("peek16", &[], &mut imports)
            .unwrap(),
        vec![RuntimeValue::I32(42)]
    );
}

/// A `Write` handle into a shared buffer, for capturing WASI output.
#[derive(Clone)]
struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn wasi_hello_world() {
    let module = load(
        r#"
        (module
            (import "wasi_snapshot_preview1" "fd_write"
                (func $fd_write (param i32 i32 i32 i32) (result i32)))
            (memory (export "memory") 1)
            (data (i32.const 8) "hello world\n")
            (func (export "_start")
                ;; iovec at address 0: base = 8, len = 12
                i32.const 0
                i32.const 8
                i32.store
                i32.const 4
                i32.const 12
                i32.store
                i32.const 1   ;; fd: stdout
                i32.const 0   ;; *iovs
                i32.const 1   ;; iovs_len
                i32.const 20  ;; *nwritten
                call $fd_write
                drop))
        "#,
    );

    let captured = Arc::new(Mutex::new(Vec::new()));
    let mut runtime = Runtime::new(&module).unwrap();
    WasiSnapshotPreview1::with_file_table(vec![
        Box::new(std::io::sink()),
        Box::new(SharedWriter(Arc::clone(&captured))),
        Box::new(std::io::sink()),
    ])
    .register(&mut runtime);

    runtime.start().unwrap();
    runtime.call("_start", &[]).unwrap();

    assert_eq!(&*captured.lock().unwrap(), b"hello world\n");

    let memory = runtime
        .instance()
        .export_by_name("memory")
        .and_then(|e| e.as_memory().cloned())
        .unwrap();
    assert_eq!(memory.get_value::<i32>(20).unwrap(), 12);
}

#[test]
fn wasi_rejects_unknown_descriptor() {
    let module = load(
        r#"
        (module
            (import "wasi_snapshot_preview1" "fd_write"
                (func $fd_write (param i32 i32 i32 i32) (result i32)))
            (memory 1)
            (func (export "bad_fd") (result i32)
                i32.const 9
                i32.const 0
                i32.const 0
                i32.const 16
                call $fd_write))
        "#,
    );
    let mut runtime = Runtime::new(&module).unwrap();
    WasiSnapshotPreview1::with_file_table(vec![Box::new(std::io::sink())]).register(&mut runtime);

    let error = runtime.call("bad_fd", &[]).unwrap_err();
    let wasi_error = error
        .as_host_error()
        .expect("expected a host error")
        .downcast_ref::<crate::WasiError>()
        .expect("expected WasiError");
    assert_matches!(wasi_error, crate::WasiError::BadFileDescriptor(9));
}
