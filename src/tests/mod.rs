use crate::{
    execute,
    isa::{opcodes::*, CodeWriter},
    Code,
    FuncType,
    Instance,
    InstanceRef,
    Limits,
    Module,
    Trap,
    TrapCode,
    Value,
    ValueType,
};
use crate::memory_units::Pages;
use alloc::{rc::Rc, vec::Vec};
use assert_matches::assert_matches;


/// Builds a single-function module and instantiates it.
fn instance_with_function(
    params: Vec<ValueType>,
    return_type: Option<ValueType>,
    local_count: u32,
    max_stack_height: u32,
    build: impl FnOnce(&mut CodeWriter),
) -> (InstanceRef, u32) {
    let mut writer = CodeWriter::new();
    build(&mut writer);
    let mut builder = Module::builder();
    let ty = builder.push_type(FuncType::new(params, return_type));
    let func = builder.push_function(
        ty,
        Code::new(writer.finish(), local_count, max_stack_height),
    );
    let instance = Instance::builder(Rc::new(builder.build())).build().unwrap();
    (instance, func)
}

/// Like [`instance_with_function`], with a one-page linear memory attached.
fn instance_with_memory(
    params: Vec<ValueType>,
    return_type: Option<ValueType>,
    max_stack_height: u32,
    build: impl FnOnce(&mut CodeWriter),
) -> (InstanceRef, u32) {
    let mut writer = CodeWriter::new();
    build(&mut writer);
    let mut builder = Module::builder();
    builder.memory(Limits::new(1, None));
    let ty = builder.push_type(FuncType::new(params, return_type));
    let func = builder.push_function(ty, Code::new(writer.finish(), 0, max_stack_height));
    let instance = Instance::builder(Rc::new(builder.build())).build().unwrap();
    (instance, func)
}

fn binop(op: u8, return_type: ValueType, lhs: Value, rhs: Value) -> Result<Option<Value>, Trap> {
    let (instance, func) = instance_with_function(
        vec![lhs.value_type(), rhs.value_type()],
        Some(return_type),
        0,
        2,
        |body| {
            body.op_var_u32(LOCAL_GET, 0)
                .op_var_u32(LOCAL_GET, 1)
                .op(op);
        },
    );
    execute(&instance, func, &[lhs, rhs])
}

fn unop(op: u8, return_type: ValueType, value: Value) -> Result<Option<Value>, Trap> {
    let (instance, func) = instance_with_function(
        vec![value.value_type()],
        Some(return_type),
        0,
        1,
        |body| {
            body.op_var_u32(LOCAL_GET, 0).op(op);
        },
    );
    execute(&instance, func, &[value])
}

fn trap_code(result: Result<Option<Value>, Trap>) -> TrapCode {
    result
        .expect_err("expected a trap")
        .code()
        .expect("expected an interpreter trap, not a host error")
}

#[test]
fn const_add() {
    // (i32.const 1) (i32.const 2) (i32.add)
    let (instance, func) =
        instance_with_function(Vec::new(), Some(ValueType::I32), 0, 2, |body| {
            body.i32_const(1).i32_const(2).op(I32_ADD);
        });
    assert_eq!(execute(&instance, func, &[]).unwrap(), Some(Value::I32(3)));
}

#[test]
fn if_else_picks_an_arm() {
    // (local.get 0) (i32.eqz) (if (i32.const 7) (else (i32.const 9)))
    let (instance, func) =
        instance_with_function(vec![ValueType::I32], Some(ValueType::I32), 0, 1, |body| {
            body.op_var_u32(LOCAL_GET, 0).op(I32_EQZ).op(IF);
            let if_hole = body.hole_u32();
            body.i32_const(7).op(ELSE);
            let else_hole = body.hole_u32();
            body.patch_u32(if_hole, body.pos());
            body.i32_const(9);
            body.patch_u32(else_hole, body.pos());
            body.op(END);
            // The if's target is the start of the else arm; the else's
            // target is the shared end.
        });
    assert_eq!(
        execute(&instance, func, &[Value::I32(0)]).unwrap(),
        Some(Value::I32(7))
    );
    assert_eq!(
        execute(&instance, func, &[Value::I32(5)]).unwrap(),
        Some(Value::I32(9))
    );
}

#[test]
fn if_without_else_skips_to_end() {
    // (local.get 0) (if (local.set 1 (i32.const 9))) (local.get 1)
    let (instance, func) =
        instance_with_function(vec![ValueType::I32], Some(ValueType::I32), 1, 1, |body| {
            body.op_var_u32(LOCAL_GET, 0).op(IF);
            let if_hole = body.hole_u32();
            body.i32_const(9).op_var_u32(LOCAL_SET, 1);
            body.patch_u32(if_hole, body.pos());
            body.op(END);
            body.op_var_u32(LOCAL_GET, 1);
        });
    assert_eq!(
        execute(&instance, func, &[Value::I32(1)]).unwrap(),
        Some(Value::I32(9))
    );
    assert_eq!(
        execute(&instance, func, &[Value::I32(0)]).unwrap(),
        Some(Value::I32(0))
    );
}

#[test]
fn br_table_uses_default_for_large_index() {
    let (instance, func) =
        instance_with_function(vec![ValueType::I32], Some(ValueType::I32), 0, 1, |body| {
            body.op_var_u32(LOCAL_GET, 0);
            body.op(BR_TABLE).u32(2).u32(0);
            let t0 = body.hole_u32();
            body.u32(0);
            let t1 = body.hole_u32();
            body.u32(0);
            let default = body.hole_u32();
            body.u32(0);

            body.patch_u32(t0, body.pos());
            body.i32_const(10).op(RETURN).u32(1);
            let r0 = body.hole_u32();
            body.u32(0);

            body.patch_u32(t1, body.pos());
            body.i32_const(20).op(RETURN).u32(1);
            let r1 = body.hole_u32();
            body.u32(0);

            body.patch_u32(default, body.pos());
            body.i32_const(99);

            // Returns branch to the terminal end emitted by `finish`.
            body.patch_u32(r0, body.pos());
            body.patch_u32(r1, body.pos());
        });
    assert_eq!(
        execute(&instance, func, &[Value::I32(0)]).unwrap(),
        Some(Value::I32(10))
    );
    assert_eq!(
        execute(&instance, func, &[Value::I32(1)]).unwrap(),
        Some(Value::I32(20))
    );
    assert_eq!(
        execute(&instance, func, &[Value::I32(2)]).unwrap(),
        Some(Value::I32(99))
    );
    assert_eq!(
        execute(&instance, func, &[Value::I32(1000)]).unwrap(),
        Some(Value::I32(99))
    );
}

#[test]
fn backward_branch_loops() {
    // Sums n + (n-1) + ... + 1 with an explicit loop.
    let (instance, func) =
        instance_with_function(vec![ValueType::I32], Some(ValueType::I32), 1, 2, |body| {
            let loop_start = body.pos();
            body.op_var_u32(LOCAL_GET, 0).op(I32_EQZ);
            body.op(BR_IF).u32(0);
            let exit = body.hole_u32();
            body.u32(0);
            body.op_var_u32(LOCAL_GET, 1)
                .op_var_u32(LOCAL_GET, 0)
                .op(I32_ADD)
                .op_var_u32(LOCAL_SET, 1);
            body.op_var_u32(LOCAL_GET, 0)
                .i32_const(1)
                .op(I32_SUB)
                .op_var_u32(LOCAL_SET, 0);
            body.op(BR).u32(0).branch(loop_start, 0);
            body.patch_u32(exit, body.pos());
            body.op_var_u32(LOCAL_GET, 1);
        });
    assert_eq!(
        execute(&instance, func, &[Value::I32(5)]).unwrap(),
        Some(Value::I32(15))
    );
    assert_eq!(
        execute(&instance, func, &[Value::I32(0)]).unwrap(),
        Some(Value::I32(0))
    );
}

#[test]
fn branch_with_arity_preserves_the_result() {
    // block (result i32): (i32.const 1) (i32.const 2) (i32.const 3)
    // (br 0) drops the two cells below the top.
    let (instance, func) =
        instance_with_function(Vec::new(), Some(ValueType::I32), 0, 3, |body| {
            body.i32_const(1).i32_const(2).i32_const(3);
            body.op(BR).u32(1);
            let target = body.hole_u32();
            body.u32(2);
            body.patch_u32(target, body.pos());
        });
    assert_eq!(execute(&instance, func, &[]).unwrap(), Some(Value::I32(3)));
}

#[test]
fn unreachable_traps() {
    let (instance, func) = instance_with_function(Vec::new(), None, 0, 0, |body| {
        body.op(UNREACHABLE);
    });
    assert_eq!(
        trap_code(execute(&instance, func, &[])),
        TrapCode::Unreachable
    );
}

#[test]
fn select_and_drop() {
    let (instance, func) =
        instance_with_function(vec![ValueType::I32], Some(ValueType::I32), 0, 4, |body| {
            body.i32_const(100)
                .i32_const(-7)
                .i32_const(42)
                .op_var_u32(LOCAL_GET, 0)
                .op(SELECT)
                // Stack is now [100, selected]; keep only the selection.
                .op_var_u32(LOCAL_SET, 0)
                .op(DROP)
                .op_var_u32(LOCAL_GET, 0);
        });
    assert_eq!(
        execute(&instance, func, &[Value::I32(1)]).unwrap(),
        Some(Value::I32(-7))
    );
    assert_eq!(
        execute(&instance, func, &[Value::I32(0)]).unwrap(),
        Some(Value::I32(42))
    );
}

#[test]
fn tee_keeps_the_operand() {
    let (instance, func) =
        instance_with_function(vec![ValueType::I32], Some(ValueType::I32), 1, 2, |body| {
            body.op_var_u32(LOCAL_GET, 0)
                .op_var_u32(LOCAL_TEE, 1)
                .op_var_u32(LOCAL_GET, 1)
                .op(I32_ADD);
        });
    assert_eq!(
        execute(&instance, func, &[Value::I32(21)]).unwrap(),
        Some(Value::I32(42))
    );
}

#[test]
fn entry_point_checks_signature() {
    let (instance, func) =
        instance_with_function(vec![ValueType::I32], Some(ValueType::I32), 0, 1, |body| {
            body.op_var_u32(LOCAL_GET, 0);
        });
    assert_eq!(
        trap_code(execute(&instance, func, &[])),
        TrapCode::UnexpectedSignature
    );
    assert_eq!(
        trap_code(execute(&instance, func, &[Value::I64(1)])),
        TrapCode::UnexpectedSignature
    );
    assert_eq!(
        trap_code(execute(&instance, 7, &[])),
        TrapCode::UnexpectedSignature
    );
}

#[test]
fn integer_arithmetic_wraps() {
    assert_eq!(
        binop(I32_ADD, ValueType::I32, Value::I32(i32::MAX), Value::I32(1)).unwrap(),
        Some(Value::I32(i32::MIN))
    );
    assert_eq!(
        binop(I32_MUL, ValueType::I32, Value::I32(0x4000_0001), Value::I32(4)).unwrap(),
        Some(Value::I32(4))
    );
    assert_eq!(
        binop(I64_SUB, ValueType::I64, Value::I64(i64::MIN), Value::I64(1)).unwrap(),
        Some(Value::I64(i64::MAX))
    );
}

#[test]
fn shift_counts_are_masked() {
    assert_eq!(
        binop(I32_SHL, ValueType::I32, Value::I32(1), Value::I32(33)).unwrap(),
        Some(Value::I32(2))
    );
    assert_eq!(
        binop(I32_SHL, ValueType::I32, Value::I32(1), Value::I32(32)).unwrap(),
        Some(Value::I32(1))
    );
    assert_eq!(
        binop(I64_SHL, ValueType::I64, Value::I64(1), Value::I64(65)).unwrap(),
        Some(Value::I64(2))
    );
}

#[test]
fn right_shifts_distinguish_sign() {
    assert_eq!(
        binop(I32_SHR_S, ValueType::I32, Value::I32(-8), Value::I32(1)).unwrap(),
        Some(Value::I32(-4))
    );
    assert_eq!(
        binop(I32_SHR_U, ValueType::I32, Value::I32(-8), Value::I32(1)).unwrap(),
        Some(Value::I32(0x7FFF_FFFC))
    );
    // Each 64-bit shift opcode has its own semantics.
    assert_eq!(
        binop(I64_SHL, ValueType::I64, Value::I64(-8), Value::I64(1)).unwrap(),
        Some(Value::I64(-16))
    );
    assert_eq!(
        binop(I64_SHR_S, ValueType::I64, Value::I64(-8), Value::I64(1)).unwrap(),
        Some(Value::I64(-4))
    );
    assert_eq!(
        binop(I64_SHR_U, ValueType::I64, Value::I64(-8), Value::I64(1)).unwrap(),
        Some(Value::I64(0x7FFF_FFFF_FFFF_FFFC))
    );
}

#[test]
fn rotates() {
    assert_eq!(
        binop(I32_ROTL, ValueType::I32, Value::I32(0x8000_0001u32 as i32), Value::I32(1)).unwrap(),
        Some(Value::I32(3))
    );
    assert_eq!(
        binop(I32_ROTR, ValueType::I32, Value::I32(3), Value::I32(1)).unwrap(),
        Some(Value::I32(0x8000_0001u32 as i32))
    );
    assert_eq!(
        binop(I64_ROTR, ValueType::I64, Value::I64(1), Value::I64(1)).unwrap(),
        Some(Value::I64(i64::MIN))
    );
}

#[test]
fn division_edge_cases() {
    assert_eq!(
        binop(I32_DIV_S, ValueType::I32, Value::I32(-7), Value::I32(2)).unwrap(),
        Some(Value::I32(-3))
    );
    assert_eq!(
        trap_code(binop(I32_DIV_S, ValueType::I32, Value::I32(i32::MIN), Value::I32(-1))),
        TrapCode::IntegerOverflow
    );
    assert_eq!(
        binop(I32_REM_S, ValueType::I32, Value::I32(i32::MIN), Value::I32(-1)).unwrap(),
        Some(Value::I32(0))
    );
    assert_eq!(
        trap_code(binop(I32_DIV_U, ValueType::I32, Value::I32(0), Value::I32(0))),
        TrapCode::DivisionByZero
    );
    assert_eq!(
        trap_code(binop(I32_DIV_U, ValueType::I32, Value::I32(17), Value::I32(0))),
        TrapCode::DivisionByZero
    );
    assert_eq!(
        trap_code(binop(I32_REM_U, ValueType::I32, Value::I32(17), Value::I32(0))),
        TrapCode::DivisionByZero
    );
    assert_eq!(
        trap_code(binop(I64_DIV_S, ValueType::I64, Value::I64(i64::MIN), Value::I64(-1))),
        TrapCode::IntegerOverflow
    );
    assert_eq!(
        binop(I64_REM_S, ValueType::I64, Value::I64(i64::MIN), Value::I64(-1)).unwrap(),
        Some(Value::I64(0))
    );
    // div_u computes in the unsigned interpretation.
    assert_eq!(
        binop(I32_DIV_U, ValueType::I32, Value::I32(-2), Value::I32(2)).unwrap(),
        Some(Value::I32(0x7FFF_FFFF))
    );
}

#[test]
fn bit_counting() {
    assert_eq!(
        unop(I32_CLZ, ValueType::I32, Value::I32(1)).unwrap(),
        Some(Value::I32(31))
    );
    assert_eq!(
        unop(I32_CTZ, ValueType::I32, Value::I32(0x8000_0000u32 as i32)).unwrap(),
        Some(Value::I32(31))
    );
    assert_eq!(
        unop(I32_POPCNT, ValueType::I32, Value::I32(-1)).unwrap(),
        Some(Value::I32(32))
    );
    assert_eq!(
        unop(I64_CLZ, ValueType::I64, Value::I64(1)).unwrap(),
        Some(Value::I64(63))
    );
    assert_eq!(
        unop(I64_CLZ, ValueType::I64, Value::I64(0)).unwrap(),
        Some(Value::I64(64))
    );
}

#[test]
fn comparisons_differ_by_sign_interpretation() {
    assert_eq!(
        binop(I32_LT_S, ValueType::I32, Value::I32(-1), Value::I32(1)).unwrap(),
        Some(Value::I32(1))
    );
    assert_eq!(
        binop(I32_LT_U, ValueType::I32, Value::I32(-1), Value::I32(1)).unwrap(),
        Some(Value::I32(0))
    );
    assert_eq!(
        binop(I64_GE_U, ValueType::I32, Value::I64(-1), Value::I64(1)).unwrap(),
        Some(Value::I32(1))
    );
}

#[test]
fn float_nan_propagation() {
    let nan = Value::F32(f32::NAN.into());
    let result = binop(F32_ADD, ValueType::F32, nan, Value::F32(1.0.into())).unwrap();
    assert_matches!(result, Some(Value::F32(value)) if value.is_nan());
    let result = binop(F32_MIN, ValueType::F32, nan, Value::F32(1.0.into())).unwrap();
    assert_matches!(result, Some(Value::F32(value)) if value.is_nan());
}

#[test]
fn float_min_of_signed_zeroes() {
    let result = binop(
        F32_MIN,
        ValueType::F32,
        Value::F32((-0.0f32).into()),
        Value::F32(0.0f32.into()),
    )
    .unwrap();
    assert_matches!(result, Some(Value::F32(value)) if value.to_bits() == 0x8000_0000);
}

#[test]
fn float_max_of_signed_zeroes() {
    // Like min, a zero pair with either sign bit set yields -0.
    let result = binop(
        F32_MAX,
        ValueType::F32,
        Value::F32(0.0f32.into()),
        Value::F32((-0.0f32).into()),
    )
    .unwrap();
    assert_matches!(result, Some(Value::F32(value)) if value.to_bits() == 0x8000_0000);
}

#[test]
fn float_arithmetic_and_copysign() {
    assert_eq!(
        binop(F64_DIV, ValueType::F64, Value::F64(1.0.into()), Value::F64(0.0.into())).unwrap(),
        Some(Value::F64(f64::INFINITY.into()))
    );
    assert_eq!(
        binop(F32_COPYSIGN, ValueType::F32, Value::F32(2.5.into()), Value::F32((-1.0f32).into()))
            .unwrap(),
        Some(Value::F32((-2.5f32).into()))
    );
    assert_eq!(
        unop(F64_SQRT, ValueType::F64, Value::F64(81.0.into())).unwrap(),
        Some(Value::F64(9.0.into()))
    );
    assert_eq!(
        unop(F64_NEAREST, ValueType::F64, Value::F64(2.5.into())).unwrap(),
        Some(Value::F64(2.0.into()))
    );
}

#[test]
fn trapping_truncation() {
    assert_eq!(
        unop(I32_TRUNC_F32_S, ValueType::I32, Value::F32((-1.7f32).into())).unwrap(),
        Some(Value::I32(-1))
    );
    assert_eq!(
        trap_code(unop(I32_TRUNC_F32_S, ValueType::I32, Value::F32(2147483648.0f32.into()))),
        TrapCode::IntegerOverflow
    );
    assert_eq!(
        trap_code(unop(I32_TRUNC_F32_S, ValueType::I32, Value::F32(f32::NAN.into()))),
        TrapCode::InvalidConversionToInt
    );
    assert_eq!(
        trap_code(unop(I32_TRUNC_F32_U, ValueType::I32, Value::F32((-1.0f32).into()))),
        TrapCode::IntegerOverflow
    );
    assert_eq!(
        unop(I32_TRUNC_F64_U, ValueType::I32, Value::F64(4294967295.0.into())).unwrap(),
        Some(Value::I32(-1))
    );
    assert_eq!(
        unop(I64_TRUNC_F64_S, ValueType::I64, Value::F64((-9007199254740993.0).into())).unwrap(),
        Some(Value::I64(-9007199254740992))
    );
}

#[test]
fn conversions() {
    assert_eq!(
        unop(I32_WRAP_I64, ValueType::I32, Value::I64(0x1_0000_0001)).unwrap(),
        Some(Value::I32(1))
    );
    assert_eq!(
        unop(I64_EXTEND_I32_S, ValueType::I64, Value::I32(-1)).unwrap(),
        Some(Value::I64(-1))
    );
    assert_eq!(
        unop(I64_EXTEND_I32_U, ValueType::I64, Value::I32(-1)).unwrap(),
        Some(Value::I64(0xFFFF_FFFF))
    );
    assert_eq!(
        unop(F64_CONVERT_I32_U, ValueType::F64, Value::I32(-1)).unwrap(),
        Some(Value::F64(4294967295.0.into()))
    );
    assert_eq!(
        unop(F32_DEMOTE_F64, ValueType::F32, Value::F64(0.5.into())).unwrap(),
        Some(Value::F32(0.5f32.into()))
    );
    assert_eq!(
        unop(F64_PROMOTE_F32, ValueType::F64, Value::F32(0.5f32.into())).unwrap(),
        Some(Value::F64(0.5.into()))
    );
}

#[test]
fn reinterpret_is_bitwise() {
    assert_eq!(
        unop(I32_REINTERPRET_F32, ValueType::I32, Value::F32((-0.0f32).into())).unwrap(),
        Some(Value::I32(i32::MIN))
    );
    let nan_bits = 0x7FC0_1234u32 as i32;
    let result = unop(F32_REINTERPRET_I32, ValueType::F32, Value::I32(nan_bits)).unwrap();
    assert_matches!(
        result,
        Some(Value::F32(value)) if value.to_bits() == nan_bits as u32
    );
}

#[test]
fn narrow_loads_extend() {
    // Each case stores 0xFFFF8081 at address 0 and reads it back narrow.
    let load = |load_op: u8, return_type: ValueType| {
        let (instance, func) =
            instance_with_memory(Vec::new(), Some(return_type), 2, |body| {
                body.i32_const(0)
                    .i32_const(0xFFFF_8081u32 as i32)
                    .op_var_u32(I32_STORE, 0)
                    .i32_const(0)
                    .op_var_u32(load_op, 0);
            });
        execute(&instance, func, &[]).unwrap().unwrap()
    };
    assert_eq!(load(I32_LOAD8_S, ValueType::I32), Value::I32(-127));
    assert_eq!(load(I32_LOAD8_U, ValueType::I32), Value::I32(0x81));
    assert_eq!(load(I32_LOAD16_S, ValueType::I32), Value::I32(-32639));
    assert_eq!(load(I32_LOAD16_U, ValueType::I32), Value::I32(0x8081));
    assert_eq!(
        load(I32_LOAD, ValueType::I32),
        Value::I32(0xFFFF_8081u32 as i32)
    );
    assert_eq!(load(I64_LOAD8_U, ValueType::I64), Value::I64(0x81));
    assert_eq!(load(I64_LOAD16_S, ValueType::I64), Value::I64(-32639));
    assert_eq!(load(I64_LOAD32_S, ValueType::I64), Value::I64(-32639));
    assert_eq!(load(I64_LOAD32_U, ValueType::I64), Value::I64(0xFFFF_8081));
}

#[test]
fn narrow_stores_only_touch_their_bytes() {
    let (instance, func) = instance_with_memory(Vec::new(), Some(ValueType::I64), 2, |body| {
        body.i32_const(0)
            .i64_const(-1)
            .op_var_u32(I64_STORE, 0)
            .i32_const(2)
            .i32_const(0)
            .op_var_u32(I32_STORE8, 0)
            .i32_const(0)
            .op_var_u32(I64_LOAD, 0);
    });
    assert_eq!(
        execute(&instance, func, &[]).unwrap(),
        Some(Value::I64(0xFFFF_FFFF_FF00_FFFFu64 as i64))
    );
}

#[test]
fn memory_bounds() {
    let page = crate::LINEAR_MEMORY_PAGE_SIZE.0 as u32;
    let load_at = |address: u32, offset: u32| {
        let (instance, func) =
            instance_with_memory(Vec::new(), Some(ValueType::I32), 1, |body| {
                body.i32_const(address as i32).op_var_u32(I32_LOAD, offset);
            });
        execute(&instance, func, &[])
    };
    // A load of the last full slot succeeds.
    assert_eq!(load_at(page - 4, 0).unwrap(), Some(Value::I32(0)));
    assert_eq!(load_at(0, page - 4).unwrap(), Some(Value::I32(0)));
    // One byte over traps.
    assert_eq!(
        trap_code(load_at(page - 3, 0)),
        TrapCode::MemoryAccessOutOfBounds
    );
    assert_eq!(
        trap_code(load_at(page, 0)),
        TrapCode::MemoryAccessOutOfBounds
    );
    // address + offset overflowing 32 bits traps instead of wrapping.
    assert_eq!(
        trap_code(load_at(u32::MAX, 1)),
        TrapCode::MemoryAccessOutOfBounds
    );
    assert_eq!(
        trap_code(load_at(u32::MAX, u32::MAX)),
        TrapCode::MemoryAccessOutOfBounds
    );
}

#[test]
fn memory_size_and_grow() {
    // One-page memory, growth capped at two pages by the embedder.
    let mut builder = Module::builder();
    builder.memory(Limits::new(1, None));
    let ty = builder.push_type(FuncType::new(vec![ValueType::I32], Some(ValueType::I32)));
    let mut body = CodeWriter::new();
    body.op_var_u32(LOCAL_GET, 0).op(MEMORY_GROW);
    let grow = builder.push_function(ty, Code::new(body.finish(), 0, 1));
    let size_ty = builder.push_type(FuncType::new(Vec::new(), Some(ValueType::I32)));
    let mut body = CodeWriter::new();
    body.op(MEMORY_SIZE);
    let size = builder.push_function(size_ty, Code::new(body.finish(), 0, 1));
    let instance = Instance::builder(Rc::new(builder.build()))
        .with_memory_pages_limit(Pages(2))
        .build()
        .unwrap();

    assert_eq!(
        execute(&instance, size, &[]).unwrap(),
        Some(Value::I32(1))
    );
    // First grow succeeds and returns the old page count.
    assert_eq!(
        execute(&instance, grow, &[Value::I32(1)]).unwrap(),
        Some(Value::I32(1))
    );
    assert_eq!(
        execute(&instance, size, &[]).unwrap(),
        Some(Value::I32(2))
    );
    // The new page reads back zero.
    let memory = instance.memory().unwrap();
    assert_eq!(
        memory
            .get_value::<u64>(crate::LINEAR_MEMORY_PAGE_SIZE.0 as u32)
            .unwrap(),
        0
    );
    // Second grow exceeds the pages limit and reports -1.
    assert_eq!(
        execute(&instance, grow, &[Value::I32(1)]).unwrap(),
        Some(Value::I32(-1))
    );
    assert_eq!(
        execute(&instance, size, &[]).unwrap(),
        Some(Value::I32(2))
    );
}

#[test]
fn globals_are_indexed_imports_first() {
    use crate::GlobalInstance;

    let mut builder = Module::builder();
    builder.push_global(crate::GlobalType::new(ValueType::I32, true));
    let ty = builder.push_type(FuncType::new(Vec::new(), Some(ValueType::I32)));
    let mut body = CodeWriter::new();
    // defined += imported; return defined
    body.op_var_u32(GLOBAL_GET, 0)
        .op_var_u32(GLOBAL_GET, 1)
        .op(I32_ADD)
        .op_var_u32(GLOBAL_SET, 1)
        .op_var_u32(GLOBAL_GET, 1);
    let func = builder.push_function(ty, Code::new(body.finish(), 0, 2));

    let imported = GlobalInstance::alloc(Value::I32(40), false);
    let instance = Instance::builder(Rc::new(builder.build()))
        .import_global(imported)
        .build()
        .unwrap();
    let defined = instance.global(1).unwrap().clone();
    defined.set(Value::I32(2)).unwrap();

    assert_eq!(execute(&instance, func, &[]).unwrap(), Some(Value::I32(42)));
    assert_eq!(defined.get(), Value::I32(42));
    assert_eq!(execute(&instance, func, &[]).unwrap(), Some(Value::I32(82)));
}

#[test]
fn i64_values_round_trip_through_locals() {
    let (instance, func) =
        instance_with_function(vec![ValueType::I64], Some(ValueType::I64), 1, 2, |body| {
            body.op_var_u32(LOCAL_GET, 0)
                .op_var_u32(LOCAL_SET, 1)
                .op_var_u32(LOCAL_GET, 1)
                .i64_const(1)
                .op(I64_ADD);
        });
    assert_eq!(
        execute(&instance, func, &[Value::I64(i64::MAX - 1)]).unwrap(),
        Some(Value::I64(i64::MAX))
    );
}
