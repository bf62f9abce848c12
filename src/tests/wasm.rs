use crate::{
    Error, InstantiationError, Module, ModuleInstance, ModuleRef, NopExternals, RuntimeValue,
    TrapKind,
};
use assert_matches::assert_matches;

fn load(wat: &str) -> Module {
    let wasm = wat::parse_str(wat).expect("failed to parse wat");
    Module::from_buffer(wasm).expect("failed to load wasm")
}

fn instantiate(wat: &str) -> ModuleRef {
    ModuleInstance::new(&load(wat))
        .expect("failed to instantiate wasm module")
        .assert_no_start()
}

fn run(
    instance: &ModuleRef,
    name: &str,
    args: &[RuntimeValue],
) -> Result<Vec<RuntimeValue>, Error> {
    instance.invoke_export(name, args, &mut NopExternals)
}

fn trap_kind(result: Result<Vec<RuntimeValue>, Error>) -> TrapKind {
    match result {
        Err(Error::Trap(trap)) => trap.into_kind(),
        other => panic!("expected a trap, got {:?}", other),
    }
}

#[test]
fn minimal_module_has_no_exports() {
    let module = Module::from_buffer([0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00]).unwrap();
    let instance = ModuleInstance::new(&module).unwrap().assert_no_start();
    assert!(instance.export_by_name("anything").is_none());
    assert_matches!(
        run(&instance, "anything", &[]),
        Err(Error::Function(_))
    );
}

#[test]
fn add_two_i32s() {
    let instance = instantiate(
        r#"
        (module
            (func (export "add") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add))
        "#,
    );
    assert_eq!(
        run(&instance, "add", &[RuntimeValue::I32(3), RuntimeValue::I32(4)]).unwrap(),
        vec![RuntimeValue::I32(7)]
    );
    assert_eq!(
        run(&instance, "add", &[RuntimeValue::I32(-1), RuntimeValue::I32(1)]).unwrap(),
        vec![RuntimeValue::I32(0)]
    );
}

#[test]
fn argument_types_are_checked() {
    let instance = instantiate(
        r#"
        (module
            (func (export "add") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add))
        "#,
    );
    assert_matches!(
        trap_kind(run(&instance, "add", &[RuntimeValue::I64(1), RuntimeValue::I32(2)])),
        TrapKind::TypeMismatch
    );
    assert_matches!(
        trap_kind(run(&instance, "add", &[RuntimeValue::I32(1)])),
        TrapKind::TypeMismatch
    );
}

#[test]
fn doubler_via_internal_call() {
    let instance = instantiate(
        r#"
        (module
            (func $double (param i32) (result i32)
                local.get 0
                local.get 0
                i32.add)
            (func (export "call_doubler") (param i32) (result i32)
                local.get 0
                call $double))
        "#,
    );
    assert_eq!(
        run(&instance, "call_doubler", &[RuntimeValue::I32(5)]).unwrap(),
        vec![RuntimeValue::I32(10)]
    );
}

#[test]
fn recursive_fib() {
    let instance = instantiate(
        r#"
        (module
            (func $fib (export "fib") (param i32) (result i32)
                local.get 0
                i32.const 2
                i32.lt_s
                if (result i32)
                    i32.const 1
                else
                    local.get 0
                    i32.const 2
                    i32.sub
                    call $fib
                    local.get 0
                    i32.const 1
                    i32.sub
                    call $fib
                    i32.add
                end))
        "#,
    );
    assert_eq!(
        run(&instance, "fib", &[RuntimeValue::I32(10)]).unwrap(),
        vec![RuntimeValue::I32(89)]
    );
}

#[test]
fn i32_store_writes_through() {
    let instance = instantiate(
        r#"
        (module
            (memory (export "memory") 1)
            (func (export "i32_store")
                i32.const 0
                i32.const 42
                i32.store))
        "#,
    );
    run(&instance, "i32_store", &[]).unwrap();
    let memory = instance
        .export_by_name("memory")
        .and_then(|e| e.as_memory().cloned())
        .unwrap();
    assert_eq!(memory.get(0, 4).unwrap(), vec![42, 0, 0, 0]);
}

#[test]
fn loads_at_the_page_boundary() {
    let instance = instantiate(
        r#"
        (module
            (memory 1)
            (func (export "load") (param i32) (result i32)
                local.get 0
                i32.load))
        "#,
    );
    assert_eq!(
        run(&instance, "load", &[RuntimeValue::I32(65532)]).unwrap(),
        vec![RuntimeValue::I32(0)]
    );
    assert_matches!(
        trap_kind(run(&instance, "load", &[RuntimeValue::I32(65533)])),
        TrapKind::MemoryAccessOutOfBounds
    );
}

#[test]
fn load_offset_overflow_traps() {
    let instance = instantiate(
        r#"
        (module
            (memory 1)
            (func (export "load_off") (param i32) (result i32)
                local.get 0
                i32.load offset=8))
        "#,
    );
    assert_matches!(
        trap_kind(run(&instance, "load_off", &[RuntimeValue::I32(-1)])),
        TrapKind::MemoryAccessOutOfBounds
    );
}

#[test]
fn sub_width_memory_access() {
    let instance = instantiate(
        r#"
        (module
            (memory 1)
            (func (export "store8") (param i32 i32)
                local.get 0
                local.get 1
                i32.store8)
            (func (export "load8_s") (param i32) (result i32)
                local.get 0
                i32.load8_s)
            (func (export "load8_u") (param i32) (result i32)
                local.get 0
                i32.load8_u)
            (func (export "load16_s") (param i32) (result i32)
                local.get 0
                i32.load16_s))
        "#,
    );
    run(&instance, "store8", &[RuntimeValue::I32(0), RuntimeValue::I32(0xFF)]).unwrap();
    assert_eq!(
        run(&instance, "load8_s", &[RuntimeValue::I32(0)]).unwrap(),
        vec![RuntimeValue::I32(-1)]
    );
    assert_eq!(
        run(&instance, "load8_u", &[RuntimeValue::I32(0)]).unwrap(),
        vec![RuntimeValue::I32(255)]
    );
    // Only the low byte was stored; the 16-bit load sees 0x00FF.
    assert_eq!(
        run(&instance, "load16_s", &[RuntimeValue::I32(0)]).unwrap(),
        vec![RuntimeValue::I32(255)]
    );
}

#[test]
fn memory_size_and_grow() {
    let instance = instantiate(
        r#"
        (module
            (memory 1 2)
            (func (export "size") (result i32)
                memory.size)
            (func (export "grow") (param i32) (result i32)
                local.get 0
                memory.grow))
        "#,
    );
    assert_eq!(
        run(&instance, "size", &[]).unwrap(),
        vec![RuntimeValue::I32(1)]
    );
    assert_eq!(
        run(&instance, "grow", &[RuntimeValue::I32(1)]).unwrap(),
        vec![RuntimeValue::I32(1)]
    );
    assert_eq!(
        run(&instance, "size", &[]).unwrap(),
        vec![RuntimeValue::I32(2)]
    );
    // Past the declared maximum the instruction reports -1.
    assert_eq!(
        run(&instance, "grow", &[RuntimeValue::I32(1)]).unwrap(),
        vec![RuntimeValue::I32(-1)]
    );
}

#[test]
fn data_segments_are_copied() {
    let instance = instantiate(
        r#"
        (module
            (memory (export "memory") 1)
            (data (i32.const 4) "wasm"))
        "#,
    );
    let memory = instance
        .export_by_name("memory")
        .and_then(|e| e.as_memory().cloned())
        .unwrap();
    assert_eq!(memory.get(4, 4).unwrap(), b"wasm".to_vec());
    assert_eq!(memory.get(0, 4).unwrap(), vec![0; 4]);
}

#[test]
fn data_segment_out_of_bounds() {
    let module = load(
        r#"
        (module
            (memory 1)
            (data (i32.const 65534) "wasm"))
        "#,
    );
    let error = ModuleInstance::new(&module).err().expect("expected an error");
    assert_matches!(
        error,
        Error::Instantiation(InstantiationError::DataSegmentOutOfBounds {
            offset: 65534,
            len: 4
        })
    );
}

#[test]
fn duplicate_export_is_rejected() {
    // Assembled by hand: wat refuses to emit two exports with one name.
    let mut bytes = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
    bytes.extend([0x01, 0x04, 0x01, 0x60, 0x00, 0x00]); // type: () -> ()
    bytes.extend([0x03, 0x02, 0x01, 0x00]); // function: [type 0]
    bytes.extend([0x07, 0x09, 0x02, 0x01, 0x61, 0x00, 0x00, 0x01, 0x61, 0x00, 0x00]); // "a" twice
    bytes.extend([0x0A, 0x04, 0x01, 0x02, 0x00, 0x0B]); // code: empty body
    let module = Module::from_buffer(bytes).unwrap();
    let error = ModuleInstance::new(&module).err().expect("expected an error");
    assert_matches!(
        error,
        Error::Instantiation(InstantiationError::DuplicateExport(name)) if name == "a"
    );
}

#[test]
fn globals_read_and_write() {
    let instance = instantiate(
        r#"
        (module
            (global $g (mut i32) (i32.const 41))
            (func (export "bump") (result i32)
                global.get $g
                i32.const 1
                i32.add
                global.set $g
                global.get $g))
        "#,
    );
    assert_eq!(
        run(&instance, "bump", &[]).unwrap(),
        vec![RuntimeValue::I32(42)]
    );
    assert_eq!(
        run(&instance, "bump", &[]).unwrap(),
        vec![RuntimeValue::I32(43)]
    );
}

#[test]
fn global_init_can_reference_earlier_global() {
    let instance = instantiate(
        r#"
        (module
            (global $a i32 (i32.const 7))
            (global $b i32 (global.get $a))
            (func (export "get_b") (result i32)
                global.get $b))
        "#,
    );
    assert_eq!(
        run(&instance, "get_b", &[]).unwrap(),
        vec![RuntimeValue::I32(7)]
    );
}

#[test]
fn set_of_immutable_global_traps() {
    let instance = instantiate(
        r#"
        (module
            (global $c i32 (i32.const 5))
            (func (export "break_it")
                i32.const 1
                global.set $c))
        "#,
    );
    assert_matches!(
        trap_kind(run(&instance, "break_it", &[])),
        TrapKind::ImmutableGlobal
    );
}

#[test]
fn unreachable_traps() {
    let instance = instantiate(
        r#"
        (module (func (export "boom") unreachable))
        "#,
    );
    assert_matches!(trap_kind(run(&instance, "boom", &[])), TrapKind::Unreachable);
}

#[test]
fn division_traps() {
    let instance = instantiate(
        r#"
        (module
            (func (export "div_s") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.div_s)
            (func (export "rem_s") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.rem_s))
        "#,
    );
    assert_eq!(
        run(&instance, "div_s", &[RuntimeValue::I32(-7), RuntimeValue::I32(2)]).unwrap(),
        vec![RuntimeValue::I32(-3)]
    );
    assert_matches!(
        trap_kind(run(&instance, "div_s", &[RuntimeValue::I32(1), RuntimeValue::I32(0)])),
        TrapKind::DivisionByZero
    );
    assert_matches!(
        trap_kind(run(
            &instance,
            "div_s",
            &[RuntimeValue::I32(i32::MIN), RuntimeValue::I32(-1)]
        )),
        TrapKind::IntegerOverflow
    );
    assert_eq!(
        run(&instance, "rem_s", &[RuntimeValue::I32(-7), RuntimeValue::I32(2)]).unwrap(),
        vec![RuntimeValue::I32(-1)]
    );
    assert_eq!(
        run(
            &instance,
            "rem_s",
            &[RuntimeValue::I32(i32::MIN), RuntimeValue::I32(-1)]
        )
        .unwrap(),
        vec![RuntimeValue::I32(0)]
    );
}

#[test]
fn store_survives_a_trap() {
    let instance = instantiate(
        r#"
        (module
            (func (export "div") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.div_u)
            (func (export "add") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add))
        "#,
    );
    assert_matches!(
        trap_kind(run(&instance, "div", &[RuntimeValue::I32(1), RuntimeValue::I32(0)])),
        TrapKind::DivisionByZero
    );
    assert_eq!(
        run(&instance, "add", &[RuntimeValue::I32(1), RuntimeValue::I32(2)]).unwrap(),
        vec![RuntimeValue::I32(3)]
    );
}

#[test]
fn unsigned_and_signed_comparisons_differ() {
    let instance = instantiate(
        r#"
        (module
            (func (export "lt_s") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.lt_s)
            (func (export "lt_u") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.lt_u))
        "#,
    );
    let args = [RuntimeValue::I32(-1), RuntimeValue::I32(1)];
    assert_eq!(run(&instance, "lt_s", &args).unwrap(), vec![RuntimeValue::I32(1)]);
    // -1 is u32::MAX unsigned.
    assert_eq!(run(&instance, "lt_u", &args).unwrap(), vec![RuntimeValue::I32(0)]);
}

#[test]
fn shifts_mask_their_amount() {
    let instance = instantiate(
        r#"
        (module
            (func (export "shl") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.shl)
            (func (export "shr_u") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.shr_u)
            (func (export "rotl") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.rotl))
        "#,
    );
    assert_eq!(
        run(&instance, "shl", &[RuntimeValue::I32(1), RuntimeValue::I32(33)]).unwrap(),
        vec![RuntimeValue::I32(2)]
    );
    assert_eq!(
        run(&instance, "shr_u", &[RuntimeValue::I32(-1), RuntimeValue::I32(24)]).unwrap(),
        vec![RuntimeValue::I32(0xFF)]
    );
    assert_eq!(
        run(
            &instance,
            "rotl",
            &[RuntimeValue::I32(i32::MIN), RuntimeValue::I32(1)]
        )
        .unwrap(),
        vec![RuntimeValue::I32(1)]
    );
}

#[test]
fn bit_counting() {
    let instance = instantiate(
        r#"
        (module
            (func (export "clz") (param i32) (result i32)
                local.get 0
                i32.clz)
            (func (export "popcnt") (param i64) (result i64)
                local.get 0
                i64.popcnt))
        "#,
    );
    assert_eq!(
        run(&instance, "clz", &[RuntimeValue::I32(1)]).unwrap(),
        vec![RuntimeValue::I32(31)]
    );
    assert_eq!(
        run(&instance, "popcnt", &[RuntimeValue::I64(0xFF00FF)]).unwrap(),
        vec![RuntimeValue::I64(16)]
    );
}

#[test]
fn select_and_drop() {
    let instance = instantiate(
        r#"
        (module
            (func (export "pick") (param i32) (result i32)
                i32.const 10
                i32.const 20
                local.get 0
                select)
            (func (export "second") (result i32)
                i32.const 1
                i32.const 2
                drop))
        "#,
    );
    assert_eq!(
        run(&instance, "pick", &[RuntimeValue::I32(1)]).unwrap(),
        vec![RuntimeValue::I32(10)]
    );
    assert_eq!(
        run(&instance, "pick", &[RuntimeValue::I32(0)]).unwrap(),
        vec![RuntimeValue::I32(20)]
    );
    assert_eq!(run(&instance, "second", &[]).unwrap(), vec![RuntimeValue::I32(1)]);
}

#[test]
fn if_without_else_leaves_stack_alone() {
    let instance = instantiate(
        r#"
        (module
            (func (export "maybe") (param i32) (result i32)
                local.get 0
                if
                    nop
                end
                i32.const 5))
        "#,
    );
    assert_eq!(
        run(&instance, "maybe", &[RuntimeValue::I32(1)]).unwrap(),
        vec![RuntimeValue::I32(5)]
    );
    assert_eq!(
        run(&instance, "maybe", &[RuntimeValue::I32(0)]).unwrap(),
        vec![RuntimeValue::I32(5)]
    );
}

#[test]
fn if_else_takes_both_arms() {
    let instance = instantiate(
        r#"
        (module
            (func (export "choose") (param i32) (result i32)
                local.get 0
                if (result i32)
                    i32.const 10
                else
                    i32.const 20
                end))
        "#,
    );
    assert_eq!(
        run(&instance, "choose", &[RuntimeValue::I32(7)]).unwrap(),
        vec![RuntimeValue::I32(10)]
    );
    assert_eq!(
        run(&instance, "choose", &[RuntimeValue::I32(0)]).unwrap(),
        vec![RuntimeValue::I32(20)]
    );
}

#[test]
fn early_return() {
    let instance = instantiate(
        r#"
        (module
            (func (export "early") (param i32) (result i32)
                local.get 0
                if
                    i32.const 1
                    return
                end
                i32.const 2))
        "#,
    );
    assert_eq!(
        run(&instance, "early", &[RuntimeValue::I32(1)]).unwrap(),
        vec![RuntimeValue::I32(1)]
    );
    assert_eq!(
        run(&instance, "early", &[RuntimeValue::I32(0)]).unwrap(),
        vec![RuntimeValue::I32(2)]
    );
}

#[test]
fn block_result_survives_branch() {
    let instance = instantiate(
        r#"
        (module
            (func (export "br_block") (result i32)
                block (result i32)
                    i32.const 1
                    br 0
                end))
        "#,
    );
    assert_eq!(run(&instance, "br_block", &[]).unwrap(), vec![RuntimeValue::I32(1)]);
}

#[test]
fn branch_out_of_nested_block() {
    let instance = instantiate(
        r#"
        (module
            (func (export "nested") (result i32)
                block (result i32)
                    i32.const 1
                    block
                        br 1
                    end
                    unreachable
                end))
        "#,
    );
    assert_eq!(run(&instance, "nested", &[]).unwrap(), vec![RuntimeValue::I32(1)]);
}

#[test]
fn loop_with_back_edge() {
    // sum(n) adds 1..=n with a br back edge and a br_if exit.
    let instance = instantiate(
        r#"
        (module
            (func (export "sum") (param i32) (result i32)
                (local i32 i32)
                block
                    loop
                        local.get 1
                        local.get 0
                        i32.ge_s
                        br_if 1
                        local.get 1
                        i32.const 1
                        i32.add
                        local.tee 1
                        local.get 2
                        i32.add
                        local.set 2
                        br 0
                    end
                end
                local.get 2))
        "#,
    );
    assert_eq!(
        run(&instance, "sum", &[RuntimeValue::I32(5)]).unwrap(),
        vec![RuntimeValue::I32(15)]
    );
    assert_eq!(
        run(&instance, "sum", &[RuntimeValue::I32(0)]).unwrap(),
        vec![RuntimeValue::I32(0)]
    );
    assert_eq!(
        run(&instance, "sum", &[RuntimeValue::I32(100)]).unwrap(),
        vec![RuntimeValue::I32(5050)]
    );
}

#[test]
fn br_table_selects_by_index() {
    let instance = instantiate(
        r#"
        (module
            (func (export "classify") (param i32) (result i32)
                block
                    block
                        block
                            local.get 0
                            br_table 0 1 2
                        end
                        i32.const 100
                        return
                    end
                    i32.const 200
                    return
                end
                i32.const 300))
        "#,
    );
    for (input, expected) in [(0, 100), (1, 200), (2, 300), (9, 300)] {
        assert_eq!(
            run(&instance, "classify", &[RuntimeValue::I32(input)]).unwrap(),
            vec![RuntimeValue::I32(expected)],
        );
    }
}

#[test]
fn multiple_results_come_back_in_order() {
    let instance = instantiate(
        r#"
        (module
            (func (export "pair") (result i32 i32)
                i32.const 1
                i32.const 2))
        "#,
    );
    assert_eq!(
        run(&instance, "pair", &[]).unwrap(),
        vec![RuntimeValue::I32(1), RuntimeValue::I32(2)]
    );
}

#[test]
fn integer_conversions() {
    let instance = instantiate(
        r#"
        (module
            (func (export "wrap") (param i64) (result i32)
                local.get 0
                i32.wrap_i64)
            (func (export "extend_u") (param i32) (result i64)
                local.get 0
                i64.extend_i32_u)
            (func (export "extend_s") (param i32) (result i64)
                local.get 0
                i64.extend_i32_s)
            (func (export "extend8") (param i32) (result i32)
                local.get 0
                i32.extend8_s))
        "#,
    );
    assert_eq!(
        run(&instance, "wrap", &[RuntimeValue::I64(0x1_0000_0005)]).unwrap(),
        vec![RuntimeValue::I32(5)]
    );
    assert_eq!(
        run(&instance, "extend_u", &[RuntimeValue::I32(-1)]).unwrap(),
        vec![RuntimeValue::I64(0xFFFF_FFFF)]
    );
    assert_eq!(
        run(&instance, "extend_s", &[RuntimeValue::I32(-1)]).unwrap(),
        vec![RuntimeValue::I64(-1)]
    );
    assert_eq!(
        run(&instance, "extend8", &[RuntimeValue::I32(0x80)]).unwrap(),
        vec![RuntimeValue::I32(-128)]
    );
}

#[test]
fn float_conversions_and_reinterpret() {
    let instance = instantiate(
        r#"
        (module
            (func (export "convert") (param i32) (result f64)
                local.get 0
                f64.convert_i32_s)
            (func (export "reinterpret") (param f32) (result i32)
                local.get 0
                i32.reinterpret_f32)
            (func (export "demote") (param f64) (result f32)
                local.get 0
                f32.demote_f64))
        "#,
    );
    assert_eq!(
        run(&instance, "convert", &[RuntimeValue::I32(-2)]).unwrap(),
        vec![RuntimeValue::F64((-2.0f64).into())]
    );
    assert_eq!(
        run(&instance, "reinterpret", &[RuntimeValue::F32(1.0f32.into())]).unwrap(),
        vec![RuntimeValue::I32(0x3F80_0000)]
    );
    assert_eq!(
        run(&instance, "demote", &[RuntimeValue::F64(1.5f64.into())]).unwrap(),
        vec![RuntimeValue::F32(1.5f32.into())]
    );
}

#[test]
fn trapping_truncation() {
    let instance = instantiate(
        r#"
        (module
            (func (export "trunc") (param f64) (result i32)
                local.get 0
                i32.trunc_f64_s))
        "#,
    );
    assert_eq!(
        run(&instance, "trunc", &[RuntimeValue::F64((-3.7f64).into())]).unwrap(),
        vec![RuntimeValue::I32(-3)]
    );
    assert_matches!(
        trap_kind(run(&instance, "trunc", &[RuntimeValue::F64(1e10f64.into())])),
        TrapKind::IntegerOverflow
    );
    assert_matches!(
        trap_kind(run(&instance, "trunc", &[RuntimeValue::F64(f64::NAN.into())])),
        TrapKind::InvalidConversionToInt
    );
}

#[test]
fn saturating_truncation() {
    let instance = instantiate(
        r#"
        (module
            (func (export "trunc_sat") (param f64) (result i32)
                local.get 0
                i32.trunc_sat_f64_s)
            (func (export "trunc_sat_u") (param f64) (result i32)
                local.get 0
                i32.trunc_sat_f64_u))
        "#,
    );
    assert_eq!(
        run(&instance, "trunc_sat", &[RuntimeValue::F64(f64::NAN.into())]).unwrap(),
        vec![RuntimeValue::I32(0)]
    );
    assert_eq!(
        run(&instance, "trunc_sat", &[RuntimeValue::F64(1e10f64.into())]).unwrap(),
        vec![RuntimeValue::I32(i32::MAX)]
    );
    assert_eq!(
        run(&instance, "trunc_sat", &[RuntimeValue::F64((-1e10f64).into())]).unwrap(),
        vec![RuntimeValue::I32(i32::MIN)]
    );
    assert_eq!(
        run(&instance, "trunc_sat_u", &[RuntimeValue::F64((-5.0f64).into())]).unwrap(),
        vec![RuntimeValue::I32(0)]
    );
}

#[test]
fn float_arithmetic_and_nan() {
    let instance = instantiate(
        r#"
        (module
            (func (export "fma") (param f64 f64 f64) (result f64)
                local.get 0
                local.get 1
                f64.mul
                local.get 2
                f64.add)
            (func (export "fmin") (param f64 f64) (result f64)
                local.get 0
                local.get 1
                f64.min)
            (func (export "flt") (param f64 f64) (result i32)
                local.get 0
                local.get 1
                f64.lt)
            (func (export "fne") (param f64 f64) (result i32)
                local.get 0
                local.get 1
                f64.ne))
        "#,
    );
    assert_eq!(
        run(
            &instance,
            "fma",
            &[
                RuntimeValue::F64(1.5f64.into()),
                RuntimeValue::F64(2.0f64.into()),
                RuntimeValue::F64(0.75f64.into()),
            ]
        )
        .unwrap(),
        vec![RuntimeValue::F64(3.75f64.into())]
    );

    let nan = RuntimeValue::F64(f64::NAN.into());
    let one = RuntimeValue::F64(1.0f64.into());
    match run(&instance, "fmin", &[nan, one]).unwrap()[0] {
        RuntimeValue::F64(result) => assert!(result.is_nan()),
        ref other => panic!("expected f64, got {:?}", other),
    }
    // Unordered comparisons are false, except `ne` which is true.
    assert_eq!(run(&instance, "flt", &[nan, one]).unwrap(), vec![RuntimeValue::I32(0)]);
    assert_eq!(run(&instance, "fne", &[nan, nan]).unwrap(), vec![RuntimeValue::I32(1)]);
}

#[test]
fn i64_arithmetic() {
    let instance = instantiate(
        r#"
        (module
            (func (export "mul") (param i64 i64) (result i64)
                local.get 0
                local.get 1
                i64.mul)
            (func (export "shr_u") (param i64 i64) (result i64)
                local.get 0
                local.get 1
                i64.shr_u))
        "#,
    );
    assert_eq!(
        run(
            &instance,
            "mul",
            &[RuntimeValue::I64(i64::MAX), RuntimeValue::I64(2)]
        )
        .unwrap(),
        vec![RuntimeValue::I64(-2)]
    );
    assert_eq!(
        run(&instance, "shr_u", &[RuntimeValue::I64(-1), RuntimeValue::I64(56)]).unwrap(),
        vec![RuntimeValue::I64(0xFF)]
    );
}

#[test]
fn start_function_runs_before_exports() {
    let module = load(
        r#"
        (module
            (global $g (mut i32) (i32.const 0))
            (func $init
                i32.const 1
                global.set $g)
            (start $init)
            (func (export "initialized") (result i32)
                global.get $g))
        "#,
    );
    let not_started = ModuleInstance::new(&module).unwrap();
    assert!(not_started.has_start());
    let instance = not_started.run_start(&mut NopExternals).unwrap();
    assert_eq!(
        run(&instance, "initialized", &[]).unwrap(),
        vec![RuntimeValue::I32(1)]
    );
}

#[test]
fn repeated_runs_on_fresh_stores_agree() {
    let wat = r#"
        (module
            (func $fib (export "fib") (param i32) (result i32)
                local.get 0
                i32.const 2
                i32.lt_s
                if (result i32)
                    i32.const 1
                else
                    local.get 0
                    i32.const 2
                    i32.sub
                    call $fib
                    local.get 0
                    i32.const 1
                    i32.sub
                    call $fib
                    i32.add
                end))
    "#;
    let first = run(&instantiate(wat), "fib", &[RuntimeValue::I32(12)]).unwrap();
    let second = run(&instantiate(wat), "fib", &[RuntimeValue::I32(12)]).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, vec![RuntimeValue::I32(233)]);
}
