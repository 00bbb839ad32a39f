//! The interpreter loop and its entry points.

use crate::{
    cursor::Cursor,
    instance::InstanceRef,
    isa::{opcodes, BranchImmediate, BRANCH_IMMEDIATE_SIZE},
    memory::MemoryRef,
    memory_units::Pages,
    module::FuncType,
};
use alloc::vec::Vec;
use core::{cell::Cell, cmp, ops};
use wasmint_core::{
    ArithmeticOps,
    ExtendInto,
    Float,
    Integer,
    LittleEndianConvert,
    Trap,
    TrapCode,
    TransmuteInto,
    TryTruncateInto,
    UntypedValue,
    Value,
    WrapInto,
    F32,
    F64,
};

/// Default maximum number of nested function entries.
pub const DEFAULT_CALL_STACK_LIMIT: usize = 2048;

// Proof text for immediate reads inside the dispatch loop. A rewritten body
// is produced together with its validation, so the stream cannot end inside
// an immediate.
const VALIDATED: &str = "validation rewrote this immediate into the stream; qed";

/// Per-invocation shared state: the call depth.
///
/// One context is threaded through an entire computation, including host
/// functions that re-enter the interpreter. Its only job is to bound
/// recursion: every function entry holds a scoped increment of `depth` that
/// is released on every exit path, normal or trapping.
#[derive(Debug)]
pub struct ExecutionContext {
    depth: Cell<usize>,
    limit: usize,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    /// Creates a context with the default call depth limit.
    pub fn new() -> ExecutionContext {
        Self::with_call_depth_limit(DEFAULT_CALL_STACK_LIMIT)
    }

    /// Creates a context with a custom call depth limit.
    pub fn with_call_depth_limit(limit: usize) -> ExecutionContext {
        ExecutionContext {
            depth: Cell::new(0),
            limit,
        }
    }

    /// Returns the current call depth.
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    fn enter(&self) -> Result<CallDepthGuard, TrapCode> {
        if self.depth.get() >= self.limit {
            return Err(TrapCode::StackOverflow);
        }
        self.depth.set(self.depth.get() + 1);
        Ok(CallDepthGuard { ctx: self })
    }
}

struct CallDepthGuard<'a> {
    ctx: &'a ExecutionContext,
}

impl Drop for CallDepthGuard<'_> {
    fn drop(&mut self) {
        self.ctx.depth.set(self.ctx.depth.get() - 1);
    }
}

/// Executes function `func_idx` of `instance` with a fresh default
/// [`ExecutionContext`].
///
/// Returns the function result on success, `None` for a void function, or
/// the [`Trap`] that aborted the computation. Passing a function index the
/// instance does not have, or arguments whose count or types do not match
/// the function type, yields an `UnexpectedSignature` trap.
pub fn execute(
    instance: &InstanceRef,
    func_idx: u32,
    args: &[Value],
) -> Result<Option<Value>, Trap> {
    let ctx = ExecutionContext::default();
    execute_with_context(instance, func_idx, args, &ctx)
}

/// Executes function `func_idx` of `instance`, reusing the caller's
/// [`ExecutionContext`].
///
/// This is the re-entry point for host functions: invoking Wasm from inside
/// a host function with the context it was handed keeps the combined
/// recursion bounded by one call depth limit.
pub fn execute_with_context(
    instance: &InstanceRef,
    func_idx: u32,
    args: &[Value],
    ctx: &ExecutionContext,
) -> Result<Option<Value>, Trap> {
    let func_type = instance
        .module()
        .function_type(func_idx)
        .ok_or(TrapCode::UnexpectedSignature)?
        .clone();
    check_function_args(&func_type, args)?;
    let args: Vec<UntypedValue> = args.iter().map(|arg| UntypedValue::from(*arg)).collect();
    let ret = invoke_untyped(instance, func_idx, &args, ctx)?;
    Ok(ret
        .zip(func_type.return_type())
        .map(|(value, value_type)| value.with_type(value_type)))
}

/// Checks that `args` matches the parameter list of `func_type`.
pub(crate) fn check_function_args(func_type: &FuncType, args: &[Value]) -> Result<(), Trap> {
    if func_type.params().len() != args.len() {
        return Err(TrapCode::UnexpectedSignature.into());
    }
    if func_type
        .params()
        .iter()
        .zip(args.iter().map(|arg| arg.value_type()))
        .any(|(expected, actual)| actual != *expected)
    {
        return Err(TrapCode::UnexpectedSignature.into());
    }
    Ok(())
}

/// The untyped execution path shared by entry points, `call` and
/// `call_indirect`.
///
/// `args` is a window into the caller's operand stack (or the converted
/// entry-point arguments); the cells are copied into the callee frame, so
/// the caller's stack is untouched on a trapping callee.
pub(crate) fn invoke_untyped(
    instance: &InstanceRef,
    func_idx: u32,
    args: &[UntypedValue],
    ctx: &ExecutionContext,
) -> Result<Option<UntypedValue>, Trap> {
    let _depth = ctx.enter()?;

    // Imported functions dispatch to their resolved callable; no frame is
    // built for them here.
    if let Some(imported) = instance.imported_function(func_idx) {
        let ret = imported.func.call(instance, args, ctx)?;
        if ret.is_some() != imported.func_type.return_type().is_some() {
            return Err(TrapCode::UnexpectedSignature.into());
        }
        return Ok(ret);
    }

    Vm::new(instance, func_idx, args).run(ctx)
}

fn effective_address(offset: u32, address: u32) -> Result<u32, TrapCode> {
    offset
        .checked_add(address)
        .ok_or(TrapCode::MemoryAccessOutOfBounds)
}

/// One function frame: the operand stack with its colocated locals, plus the
/// cached pieces of the instance the dispatch loop touches on every
/// iteration.
struct Vm {
    instance: InstanceRef,
    memory: Option<MemoryRef>,
    func_type: FuncType,
    func_idx: u32,
    stack: OperandStack,
}

impl Vm {
    fn new(instance: &InstanceRef, func_idx: u32, args: &[UntypedValue]) -> Vm {
        let module = instance.module();
        let func_type = module
            .function_type(func_idx)
            .expect("the caller resolved this function's type; qed")
            .clone();
        let code = module
            .code(func_idx)
            .expect("imported functions are dispatched before a frame is built; qed");
        let num_inputs = func_type.params().len();
        assert_eq!(num_inputs, args.len(), "argument count mismatch");

        let locals_len = num_inputs + code.local_count as usize;
        let mut stack = OperandStack::new(locals_len + code.max_stack_height as usize);
        stack.init_locals(args, locals_len);

        Vm {
            instance: instance.clone(),
            memory: instance.memory().cloned(),
            func_type,
            func_idx,
            stack,
        }
    }

    fn run(mut self, ctx: &ExecutionContext) -> Result<Option<UntypedValue>, Trap> {
        let instance = self.instance.clone();
        let module = instance.module().clone();
        let code = module
            .code(self.func_idx)
            .expect("checked when the frame was built; qed");
        let mut cursor = Cursor::new(&code.code);

        loop {
            let opcode = cursor
                .read_byte()
                .expect("validated code ends in a terminal `end`; qed");
            match opcode {
                opcodes::UNREACHABLE => return Err(TrapCode::Unreachable.into()),
                // Flattened away by the rewrite; nothing to do at runtime.
                opcodes::NOP | opcodes::BLOCK | opcodes::LOOP => {}
                opcodes::END => {
                    if cursor.is_at_end() {
                        break;
                    }
                }
                opcodes::IF => self.run_if(&mut cursor),
                opcodes::ELSE => self.run_else(&mut cursor),
                opcodes::BR => self.run_br(&mut cursor),
                opcodes::BR_IF => self.run_br_if(&mut cursor),
                opcodes::BR_TABLE => self.run_br_table(&mut cursor),
                opcodes::RETURN => self.run_br(&mut cursor),

                opcodes::CALL => self.run_call(&mut cursor, ctx)?,
                opcodes::CALL_INDIRECT => self.run_call_indirect(&mut cursor, ctx)?,

                opcodes::DROP => {
                    self.stack.pop();
                }
                opcodes::SELECT => self.run_select()?,

                opcodes::LOCAL_GET => {
                    let index = cursor.read_var_u32().expect(VALIDATED);
                    let value = self.stack.local(index);
                    self.stack.push(value)?;
                }
                opcodes::LOCAL_SET => {
                    let index = cursor.read_var_u32().expect(VALIDATED);
                    let value = self.stack.pop();
                    *self.stack.local_mut(index) = value;
                }
                opcodes::LOCAL_TEE => {
                    let index = cursor.read_var_u32().expect(VALIDATED);
                    let value = *self.stack.top();
                    *self.stack.local_mut(index) = value;
                }
                opcodes::GLOBAL_GET => {
                    let index = cursor.read_var_u32().expect(VALIDATED);
                    let global = self
                        .instance
                        .global(index)
                        .expect("due to validation the global exists; qed")
                        .clone();
                    self.stack.push(global.get_untyped())?;
                }
                opcodes::GLOBAL_SET => {
                    let index = cursor.read_var_u32().expect(VALIDATED);
                    let value = self.stack.pop();
                    self.instance
                        .global(index)
                        .expect("due to validation the global exists; qed")
                        .set_untyped(value);
                }

                opcodes::I32_LOAD => self.run_load::<i32>(&mut cursor)?,
                opcodes::I64_LOAD => self.run_load::<i64>(&mut cursor)?,
                opcodes::F32_LOAD => self.run_load::<F32>(&mut cursor)?,
                opcodes::F64_LOAD => self.run_load::<F64>(&mut cursor)?,
                opcodes::I32_LOAD8_S => self.run_load_extend::<i8, i32>(&mut cursor)?,
                opcodes::I32_LOAD8_U => self.run_load_extend::<u8, i32>(&mut cursor)?,
                opcodes::I32_LOAD16_S => self.run_load_extend::<i16, i32>(&mut cursor)?,
                opcodes::I32_LOAD16_U => self.run_load_extend::<u16, i32>(&mut cursor)?,
                opcodes::I64_LOAD8_S => self.run_load_extend::<i8, i64>(&mut cursor)?,
                opcodes::I64_LOAD8_U => self.run_load_extend::<u8, i64>(&mut cursor)?,
                opcodes::I64_LOAD16_S => self.run_load_extend::<i16, i64>(&mut cursor)?,
                opcodes::I64_LOAD16_U => self.run_load_extend::<u16, i64>(&mut cursor)?,
                opcodes::I64_LOAD32_S => self.run_load_extend::<i32, i64>(&mut cursor)?,
                opcodes::I64_LOAD32_U => self.run_load_extend::<u32, i64>(&mut cursor)?,

                opcodes::I32_STORE => self.run_store::<i32>(&mut cursor)?,
                opcodes::I64_STORE => self.run_store::<i64>(&mut cursor)?,
                opcodes::F32_STORE => self.run_store::<F32>(&mut cursor)?,
                opcodes::F64_STORE => self.run_store::<F64>(&mut cursor)?,
                opcodes::I32_STORE8 => self.run_store_wrap::<i32, i8>(&mut cursor)?,
                opcodes::I32_STORE16 => self.run_store_wrap::<i32, i16>(&mut cursor)?,
                opcodes::I64_STORE8 => self.run_store_wrap::<i64, i8>(&mut cursor)?,
                opcodes::I64_STORE16 => self.run_store_wrap::<i64, i16>(&mut cursor)?,
                opcodes::I64_STORE32 => self.run_store_wrap::<i64, i32>(&mut cursor)?,

                opcodes::MEMORY_SIZE => self.run_memory_size()?,
                opcodes::MEMORY_GROW => self.run_memory_grow()?,

                opcodes::I32_CONST => {
                    let value = cursor.read_var_i32().expect(VALIDATED);
                    self.stack.push(value.into())?;
                }
                opcodes::I64_CONST => {
                    let value = cursor.read_var_i64().expect(VALIDATED);
                    self.stack.push(value.into())?;
                }
                opcodes::F32_CONST => {
                    let value = cursor.read::<f32>().expect(VALIDATED);
                    self.stack.push(value.into())?;
                }
                opcodes::F64_CONST => {
                    let value = cursor.read::<f64>().expect(VALIDATED);
                    self.stack.push(value.into())?;
                }

                opcodes::I32_EQZ => self.run_eqz::<i32>()?,
                opcodes::I32_EQ => self.run_eq::<i32>()?,
                opcodes::I32_NE => self.run_ne::<i32>()?,
                opcodes::I32_LT_S => self.run_lt::<i32>()?,
                opcodes::I32_LT_U => self.run_lt::<u32>()?,
                opcodes::I32_GT_S => self.run_gt::<i32>()?,
                opcodes::I32_GT_U => self.run_gt::<u32>()?,
                opcodes::I32_LE_S => self.run_lte::<i32>()?,
                opcodes::I32_LE_U => self.run_lte::<u32>()?,
                opcodes::I32_GE_S => self.run_gte::<i32>()?,
                opcodes::I32_GE_U => self.run_gte::<u32>()?,

                opcodes::I64_EQZ => self.run_eqz::<i64>()?,
                opcodes::I64_EQ => self.run_eq::<i64>()?,
                opcodes::I64_NE => self.run_ne::<i64>()?,
                opcodes::I64_LT_S => self.run_lt::<i64>()?,
                opcodes::I64_LT_U => self.run_lt::<u64>()?,
                opcodes::I64_GT_S => self.run_gt::<i64>()?,
                opcodes::I64_GT_U => self.run_gt::<u64>()?,
                opcodes::I64_LE_S => self.run_lte::<i64>()?,
                opcodes::I64_LE_U => self.run_lte::<u64>()?,
                opcodes::I64_GE_S => self.run_gte::<i64>()?,
                opcodes::I64_GE_U => self.run_gte::<u64>()?,

                opcodes::F32_EQ => self.run_eq::<F32>()?,
                opcodes::F32_NE => self.run_ne::<F32>()?,
                opcodes::F32_LT => self.run_lt::<F32>()?,
                opcodes::F32_GT => self.run_gt::<F32>()?,
                opcodes::F32_LE => self.run_lte::<F32>()?,
                opcodes::F32_GE => self.run_gte::<F32>()?,

                opcodes::F64_EQ => self.run_eq::<F64>()?,
                opcodes::F64_NE => self.run_ne::<F64>()?,
                opcodes::F64_LT => self.run_lt::<F64>()?,
                opcodes::F64_GT => self.run_gt::<F64>()?,
                opcodes::F64_LE => self.run_lte::<F64>()?,
                opcodes::F64_GE => self.run_gte::<F64>()?,

                opcodes::I32_CLZ => self.run_clz::<i32>()?,
                opcodes::I32_CTZ => self.run_ctz::<i32>()?,
                opcodes::I32_POPCNT => self.run_popcnt::<i32>()?,
                opcodes::I32_ADD => self.run_add::<i32>()?,
                opcodes::I32_SUB => self.run_sub::<i32>()?,
                opcodes::I32_MUL => self.run_mul::<i32>()?,
                opcodes::I32_DIV_S => self.run_div::<i32, i32>()?,
                opcodes::I32_DIV_U => self.run_div::<i32, u32>()?,
                opcodes::I32_REM_S => self.run_rem::<i32, i32>()?,
                opcodes::I32_REM_U => self.run_rem::<i32, u32>()?,
                opcodes::I32_AND => self.run_and::<i32>()?,
                opcodes::I32_OR => self.run_or::<i32>()?,
                opcodes::I32_XOR => self.run_xor::<i32>()?,
                opcodes::I32_SHL => self.run_shl::<i32>(0x1F)?,
                opcodes::I32_SHR_S => self.run_shr::<i32, i32>(0x1F)?,
                opcodes::I32_SHR_U => self.run_shr::<i32, u32>(0x1F)?,
                opcodes::I32_ROTL => self.run_rotl::<i32>()?,
                opcodes::I32_ROTR => self.run_rotr::<i32>()?,

                opcodes::I64_CLZ => self.run_clz::<i64>()?,
                opcodes::I64_CTZ => self.run_ctz::<i64>()?,
                opcodes::I64_POPCNT => self.run_popcnt::<i64>()?,
                opcodes::I64_ADD => self.run_add::<i64>()?,
                opcodes::I64_SUB => self.run_sub::<i64>()?,
                opcodes::I64_MUL => self.run_mul::<i64>()?,
                opcodes::I64_DIV_S => self.run_div::<i64, i64>()?,
                opcodes::I64_DIV_U => self.run_div::<i64, u64>()?,
                opcodes::I64_REM_S => self.run_rem::<i64, i64>()?,
                opcodes::I64_REM_U => self.run_rem::<i64, u64>()?,
                opcodes::I64_AND => self.run_and::<i64>()?,
                opcodes::I64_OR => self.run_or::<i64>()?,
                opcodes::I64_XOR => self.run_xor::<i64>()?,
                opcodes::I64_SHL => self.run_shl::<i64>(0x3F)?,
                opcodes::I64_SHR_S => self.run_shr::<i64, i64>(0x3F)?,
                opcodes::I64_SHR_U => self.run_shr::<i64, u64>(0x3F)?,
                opcodes::I64_ROTL => self.run_rotl::<i64>()?,
                opcodes::I64_ROTR => self.run_rotr::<i64>()?,

                opcodes::F32_ABS => self.run_abs::<F32>()?,
                opcodes::F32_NEG => self.run_neg::<F32>()?,
                opcodes::F32_CEIL => self.run_ceil::<F32>()?,
                opcodes::F32_FLOOR => self.run_floor::<F32>()?,
                opcodes::F32_TRUNC => self.run_trunc::<F32>()?,
                opcodes::F32_NEAREST => self.run_nearest::<F32>()?,
                opcodes::F32_SQRT => self.run_sqrt::<F32>()?,
                opcodes::F32_ADD => self.run_add::<F32>()?,
                opcodes::F32_SUB => self.run_sub::<F32>()?,
                opcodes::F32_MUL => self.run_mul::<F32>()?,
                opcodes::F32_DIV => self.run_div::<F32, F32>()?,
                opcodes::F32_MIN => self.run_min::<F32>()?,
                opcodes::F32_MAX => self.run_max::<F32>()?,
                opcodes::F32_COPYSIGN => self.run_copysign::<F32>()?,

                opcodes::F64_ABS => self.run_abs::<F64>()?,
                opcodes::F64_NEG => self.run_neg::<F64>()?,
                opcodes::F64_CEIL => self.run_ceil::<F64>()?,
                opcodes::F64_FLOOR => self.run_floor::<F64>()?,
                opcodes::F64_TRUNC => self.run_trunc::<F64>()?,
                opcodes::F64_NEAREST => self.run_nearest::<F64>()?,
                opcodes::F64_SQRT => self.run_sqrt::<F64>()?,
                opcodes::F64_ADD => self.run_add::<F64>()?,
                opcodes::F64_SUB => self.run_sub::<F64>()?,
                opcodes::F64_MUL => self.run_mul::<F64>()?,
                opcodes::F64_DIV => self.run_div::<F64, F64>()?,
                opcodes::F64_MIN => self.run_min::<F64>()?,
                opcodes::F64_MAX => self.run_max::<F64>()?,
                opcodes::F64_COPYSIGN => self.run_copysign::<F64>()?,

                opcodes::I32_WRAP_I64 => self.run_wrap::<i64, i32>()?,
                opcodes::I32_TRUNC_F32_S => self.run_trunc_to_int::<F32, i32, i32>()?,
                opcodes::I32_TRUNC_F32_U => self.run_trunc_to_int::<F32, u32, i32>()?,
                opcodes::I32_TRUNC_F64_S => self.run_trunc_to_int::<F64, i32, i32>()?,
                opcodes::I32_TRUNC_F64_U => self.run_trunc_to_int::<F64, u32, i32>()?,
                opcodes::I64_EXTEND_I32_S => self.run_extend::<i32, i64, i64>()?,
                opcodes::I64_EXTEND_I32_U => self.run_extend::<u32, u64, i64>()?,
                opcodes::I64_TRUNC_F32_S => self.run_trunc_to_int::<F32, i64, i64>()?,
                opcodes::I64_TRUNC_F32_U => self.run_trunc_to_int::<F32, u64, i64>()?,
                opcodes::I64_TRUNC_F64_S => self.run_trunc_to_int::<F64, i64, i64>()?,
                opcodes::I64_TRUNC_F64_U => self.run_trunc_to_int::<F64, u64, i64>()?,
                opcodes::F32_CONVERT_I32_S => self.run_extend::<i32, F32, F32>()?,
                opcodes::F32_CONVERT_I32_U => self.run_extend::<u32, F32, F32>()?,
                opcodes::F32_CONVERT_I64_S => self.run_wrap::<i64, F32>()?,
                opcodes::F32_CONVERT_I64_U => self.run_wrap::<u64, F32>()?,
                opcodes::F32_DEMOTE_F64 => self.run_wrap::<F64, F32>()?,
                opcodes::F64_CONVERT_I32_S => self.run_extend::<i32, F64, F64>()?,
                opcodes::F64_CONVERT_I32_U => self.run_extend::<u32, F64, F64>()?,
                opcodes::F64_CONVERT_I64_S => self.run_extend::<i64, F64, F64>()?,
                opcodes::F64_CONVERT_I64_U => self.run_extend::<u64, F64, F64>()?,
                opcodes::F64_PROMOTE_F32 => self.run_extend::<F32, F64, F64>()?,

                opcodes::I32_REINTERPRET_F32 => self.run_reinterpret::<F32, i32>()?,
                opcodes::I64_REINTERPRET_F64 => self.run_reinterpret::<F64, i64>()?,
                opcodes::F32_REINTERPRET_I32 => self.run_reinterpret::<i32, F32>()?,
                opcodes::F64_REINTERPRET_I64 => self.run_reinterpret::<i64, F64>()?,

                invalid => unreachable!("invalid opcode {:#04x} in validated code", invalid),
            }
        }

        let result = self.func_type.return_type().map(|_| self.stack.pop());
        // At the terminal `end` the operand region holds exactly the
        // function results; guaranteed by validation.
        debug_assert_eq!(self.stack.len(), self.stack.locals_len());
        Ok(result)
    }

    // Branches take the target unconditionally; conditional variants decide
    // before calling this. If the branch transfers a result, the top cell is
    // written over the cell `stack_drop` positions below it.
    fn branch_to(&mut self, cursor: &mut Cursor, arity: u32, target: BranchImmediate) {
        self.stack.drop_keep(target.stack_drop, arity == 1);
        cursor.set_pos(target.code_offset as usize);
    }

    fn run_if(&mut self, cursor: &mut Cursor) {
        let else_target = cursor.read::<u32>().expect(VALIDATED);
        let condition = bool::from(self.stack.pop());
        if !condition {
            cursor.set_pos(else_target as usize);
        }
    }

    // Only ever reached by falling out of the taken `if` arm; skips over the
    // `else` arm to the matching `end`.
    fn run_else(&mut self, cursor: &mut Cursor) {
        let end_target = cursor.read::<u32>().expect(VALIDATED);
        cursor.set_pos(end_target as usize);
    }

    fn run_br(&mut self, cursor: &mut Cursor) {
        let arity = cursor.read::<u32>().expect(VALIDATED);
        let target = BranchImmediate::read(cursor).expect(VALIDATED);
        self.branch_to(cursor, arity, target);
    }

    fn run_br_if(&mut self, cursor: &mut Cursor) {
        let arity = cursor.read::<u32>().expect(VALIDATED);
        let target = BranchImmediate::read(cursor).expect(VALIDATED);
        let condition = bool::from(self.stack.pop());
        if condition {
            self.branch_to(cursor, arity, target);
        }
    }

    fn run_br_table(&mut self, cursor: &mut Cursor) {
        let table_size = cursor.read::<u32>().expect(VALIDATED);
        let arity = cursor.read::<u32>().expect(VALIDATED);
        // Entry `table_size` is the default target.
        let index = cmp::min(u32::from(self.stack.pop()), table_size);
        cursor.skip(index as usize * BRANCH_IMMEDIATE_SIZE);
        let target = BranchImmediate::read(cursor).expect(VALIDATED);
        self.branch_to(cursor, arity, target);
    }

    fn run_call(&mut self, cursor: &mut Cursor, ctx: &ExecutionContext) -> Result<(), Trap> {
        let func_idx = cursor.read_var_u32().expect(VALIDATED);
        let instance = self.instance.clone();
        self.invoke_function(&instance, func_idx, ctx)
    }

    fn run_call_indirect(
        &mut self,
        cursor: &mut Cursor,
        ctx: &ExecutionContext,
    ) -> Result<(), Trap> {
        let type_idx = cursor.read_var_u32().expect(VALIDATED);
        let elem_idx = u32::from(self.stack.pop());
        let table = self
            .instance
            .table()
            .expect("due to validation a table exists; qed")
            .clone();
        if elem_idx >= table.len() {
            return Err(TrapCode::TableAccessOutOfBounds.into());
        }
        let element = table
            .get(elem_idx)
            .expect("the index was bounds checked; qed")
            .ok_or(TrapCode::ElemUninitialized)?;
        let callee = element.instance().ok_or(TrapCode::ElemUninitialized)?;

        // The annotated type is resolved in the caller's module, the actual
        // type in the callee's; the call may cross instances.
        let actual = callee
            .module()
            .function_type(element.func_idx())
            .expect("table elements reference existing functions; qed");
        let expected = self
            .instance
            .module()
            .type_at(type_idx)
            .expect("due to validation the type exists; qed");
        if actual != expected {
            return Err(TrapCode::UnexpectedSignature.into());
        }

        self.invoke_function(&callee, element.func_idx(), ctx)
    }

    // Arguments are passed in place: the callee reads them from a window
    // over this frame's stack, and they are dropped only after a successful
    // return. A trapping callee leaves them where they were.
    fn invoke_function(
        &mut self,
        instance: &InstanceRef,
        func_idx: u32,
        ctx: &ExecutionContext,
    ) -> Result<(), Trap> {
        let num_args = instance
            .module()
            .function_type(func_idx)
            .expect("due to validation the callee exists; qed")
            .params()
            .len();
        debug_assert!(self.stack.len() >= num_args);
        let ret = invoke_untyped(instance, func_idx, self.stack.peek_top(num_args), ctx)?;
        self.stack.drop_values(num_args);
        if let Some(ret) = ret {
            self.stack.push(ret)?;
        }
        Ok(())
    }

    fn run_select(&mut self) -> Result<(), TrapCode> {
        let (left, mid, right) = self.stack.pop_triple();
        let condition = bool::from(right);
        let value = if condition { left } else { mid };
        self.stack.push(value)
    }

    fn run_load<T>(&mut self, cursor: &mut Cursor) -> Result<(), TrapCode>
    where
        T: LittleEndianConvert,
        UntypedValue: From<T>,
    {
        let offset = cursor.read_var_u32().expect(VALIDATED);
        let address = u32::from(self.stack.pop());
        let address = effective_address(offset, address)?;
        let memory = self
            .memory
            .as_ref()
            .expect("due to validation a memory exists; qed");
        let value: T = memory
            .get_value(address)
            .map_err(|_| TrapCode::MemoryAccessOutOfBounds)?;
        self.stack.push(value.into())
    }

    fn run_load_extend<T, U>(&mut self, cursor: &mut Cursor) -> Result<(), TrapCode>
    where
        T: LittleEndianConvert + ExtendInto<U>,
        UntypedValue: From<U>,
    {
        let offset = cursor.read_var_u32().expect(VALIDATED);
        let address = u32::from(self.stack.pop());
        let address = effective_address(offset, address)?;
        let memory = self
            .memory
            .as_ref()
            .expect("due to validation a memory exists; qed");
        let value: T = memory
            .get_value(address)
            .map_err(|_| TrapCode::MemoryAccessOutOfBounds)?;
        let extended: U = value.extend_into();
        self.stack.push(extended.into())
    }

    fn run_store<T>(&mut self, cursor: &mut Cursor) -> Result<(), TrapCode>
    where
        T: LittleEndianConvert + From<UntypedValue>,
    {
        let offset = cursor.read_var_u32().expect(VALIDATED);
        let value = T::from(self.stack.pop());
        let address = u32::from(self.stack.pop());
        let address = effective_address(offset, address)?;
        let memory = self
            .memory
            .as_ref()
            .expect("due to validation a memory exists; qed");
        memory
            .set_value(address, value)
            .map_err(|_| TrapCode::MemoryAccessOutOfBounds)
    }

    fn run_store_wrap<T, U>(&mut self, cursor: &mut Cursor) -> Result<(), TrapCode>
    where
        T: From<UntypedValue> + WrapInto<U>,
        U: LittleEndianConvert,
    {
        let offset = cursor.read_var_u32().expect(VALIDATED);
        let value = T::from(self.stack.pop()).wrap_into();
        let address = u32::from(self.stack.pop());
        let address = effective_address(offset, address)?;
        let memory = self
            .memory
            .as_ref()
            .expect("due to validation a memory exists; qed");
        memory
            .set_value(address, value)
            .map_err(|_| TrapCode::MemoryAccessOutOfBounds)
    }

    fn run_memory_size(&mut self) -> Result<(), TrapCode> {
        let memory = self
            .memory
            .as_ref()
            .expect("due to validation a memory exists; qed");
        let pages = memory.current_size().0 as u32;
        self.stack.push(pages.into())
    }

    fn run_memory_grow(&mut self) -> Result<(), TrapCode> {
        let additional = u32::from(self.stack.pop());
        let memory = self
            .memory
            .as_ref()
            .expect("due to validation a memory exists; qed");
        // Failure is indistinguishable from exceeding the pages limit: the
        // program sees -1 and keeps running.
        let result = match memory.grow(Pages(additional as usize)) {
            Ok(Pages(size_before)) => size_before as u32,
            Err(_) => u32::MAX,
        };
        self.stack.push(result.into())
    }

    fn run_unop<T, U>(&mut self, f: impl FnOnce(T) -> U) -> Result<(), TrapCode>
    where
        T: From<UntypedValue>,
        UntypedValue: From<U>,
    {
        let value = self.stack.pop_as::<T>();
        self.stack.push(f(value).into())
    }

    fn try_unop<T, U>(
        &mut self,
        f: impl FnOnce(T) -> Result<U, TrapCode>,
    ) -> Result<(), TrapCode>
    where
        T: From<UntypedValue>,
        UntypedValue: From<U>,
    {
        let value = self.stack.pop_as::<T>();
        self.stack.push(f(value)?.into())
    }

    fn run_binop<T, U>(&mut self, f: impl FnOnce(T, T) -> U) -> Result<(), TrapCode>
    where
        T: From<UntypedValue>,
        UntypedValue: From<U>,
    {
        let (left, right) = self.stack.pop_pair_as::<T>();
        self.stack.push(f(left, right).into())
    }

    fn try_binop<T, U>(
        &mut self,
        f: impl FnOnce(T, T) -> Result<U, TrapCode>,
    ) -> Result<(), TrapCode>
    where
        T: From<UntypedValue>,
        UntypedValue: From<U>,
    {
        let (left, right) = self.stack.pop_pair_as::<T>();
        self.stack.push(f(left, right)?.into())
    }

    fn run_relop<T>(&mut self, f: impl FnOnce(T, T) -> bool) -> Result<(), TrapCode>
    where
        T: From<UntypedValue>,
    {
        self.run_binop::<T, bool>(f)
    }

    fn run_eqz<T>(&mut self) -> Result<(), TrapCode>
    where
        T: From<UntypedValue> + Default + PartialEq,
    {
        self.run_unop(|value: T| value == T::default())
    }

    fn run_eq<T>(&mut self) -> Result<(), TrapCode>
    where
        T: From<UntypedValue> + PartialEq,
    {
        self.run_relop(|left: T, right: T| left == right)
    }

    fn run_ne<T>(&mut self) -> Result<(), TrapCode>
    where
        T: From<UntypedValue> + PartialEq,
    {
        self.run_relop(|left: T, right: T| left != right)
    }

    fn run_lt<T>(&mut self) -> Result<(), TrapCode>
    where
        T: From<UntypedValue> + PartialOrd,
    {
        self.run_relop(|left: T, right: T| left < right)
    }

    fn run_gt<T>(&mut self) -> Result<(), TrapCode>
    where
        T: From<UntypedValue> + PartialOrd,
    {
        self.run_relop(|left: T, right: T| left > right)
    }

    fn run_lte<T>(&mut self) -> Result<(), TrapCode>
    where
        T: From<UntypedValue> + PartialOrd,
    {
        self.run_relop(|left: T, right: T| left <= right)
    }

    fn run_gte<T>(&mut self) -> Result<(), TrapCode>
    where
        T: From<UntypedValue> + PartialOrd,
    {
        self.run_relop(|left: T, right: T| left >= right)
    }

    fn run_clz<T>(&mut self) -> Result<(), TrapCode>
    where
        T: Integer<T> + From<UntypedValue>,
        UntypedValue: From<T>,
    {
        self.run_unop(|value: T| value.leading_zeros())
    }

    fn run_ctz<T>(&mut self) -> Result<(), TrapCode>
    where
        T: Integer<T> + From<UntypedValue>,
        UntypedValue: From<T>,
    {
        self.run_unop(|value: T| value.trailing_zeros())
    }

    fn run_popcnt<T>(&mut self) -> Result<(), TrapCode>
    where
        T: Integer<T> + From<UntypedValue>,
        UntypedValue: From<T>,
    {
        self.run_unop(|value: T| value.count_ones())
    }

    fn run_add<T>(&mut self) -> Result<(), TrapCode>
    where
        T: ArithmeticOps<T> + From<UntypedValue>,
        UntypedValue: From<T>,
    {
        self.run_binop(|left: T, right: T| left.add(right))
    }

    fn run_sub<T>(&mut self) -> Result<(), TrapCode>
    where
        T: ArithmeticOps<T> + From<UntypedValue>,
        UntypedValue: From<T>,
    {
        self.run_binop(|left: T, right: T| left.sub(right))
    }

    fn run_mul<T>(&mut self) -> Result<(), TrapCode>
    where
        T: ArithmeticOps<T> + From<UntypedValue>,
        UntypedValue: From<T>,
    {
        self.run_binop(|left: T, right: T| left.mul(right))
    }

    // The stack view `T` and the arithmetic view `U` differ for integers:
    // `div_u` computes in the unsigned reinterpretation.
    fn run_div<T, U>(&mut self) -> Result<(), TrapCode>
    where
        T: TransmuteInto<U> + From<UntypedValue>,
        U: ArithmeticOps<U> + TransmuteInto<T>,
        UntypedValue: From<T>,
    {
        self.try_binop(|left: T, right: T| {
            let (left, right): (U, U) = (left.transmute_into(), right.transmute_into());
            left.div(right).map(U::transmute_into)
        })
    }

    fn run_rem<T, U>(&mut self) -> Result<(), TrapCode>
    where
        T: TransmuteInto<U> + From<UntypedValue>,
        U: Integer<U> + TransmuteInto<T>,
        UntypedValue: From<T>,
    {
        self.try_binop(|left: T, right: T| {
            let (left, right): (U, U) = (left.transmute_into(), right.transmute_into());
            left.rem(right).map(U::transmute_into)
        })
    }

    fn run_and<T>(&mut self) -> Result<(), TrapCode>
    where
        T: ops::BitAnd<T> + From<UntypedValue>,
        UntypedValue: From<<T as ops::BitAnd>::Output>,
    {
        self.run_binop(|left: T, right: T| left.bitand(right))
    }

    fn run_or<T>(&mut self) -> Result<(), TrapCode>
    where
        T: ops::BitOr<T> + From<UntypedValue>,
        UntypedValue: From<<T as ops::BitOr>::Output>,
    {
        self.run_binop(|left: T, right: T| left.bitor(right))
    }

    fn run_xor<T>(&mut self) -> Result<(), TrapCode>
    where
        T: ops::BitXor<T> + From<UntypedValue>,
        UntypedValue: From<<T as ops::BitXor>::Output>,
    {
        self.run_binop(|left: T, right: T| left.bitxor(right))
    }

    fn run_shl<T>(&mut self, mask: T) -> Result<(), TrapCode>
    where
        T: ops::Shl<T> + ops::BitAnd<T, Output = T> + From<UntypedValue>,
        UntypedValue: From<<T as ops::Shl<T>>::Output>,
    {
        self.run_binop(|left: T, right: T| left.shl(right & mask))
    }

    // Arithmetic or logical right shift is picked by the intermediate type
    // `U`: signed shifts in `i32`/`i64`, unsigned in `u32`/`u64`.
    fn run_shr<T, U>(&mut self, mask: U) -> Result<(), TrapCode>
    where
        T: TransmuteInto<U> + From<UntypedValue>,
        U: ops::Shr<U> + ops::BitAnd<U, Output = U>,
        <U as ops::Shr<U>>::Output: TransmuteInto<T>,
        UntypedValue: From<T>,
    {
        self.run_binop(|left: T, right: T| {
            let (left, right): (U, U) = (left.transmute_into(), right.transmute_into());
            left.shr(right & mask).transmute_into()
        })
    }

    fn run_rotl<T>(&mut self) -> Result<(), TrapCode>
    where
        T: Integer<T> + From<UntypedValue>,
        UntypedValue: From<T>,
    {
        self.run_binop(|left: T, right: T| left.rotl(right))
    }

    fn run_rotr<T>(&mut self) -> Result<(), TrapCode>
    where
        T: Integer<T> + From<UntypedValue>,
        UntypedValue: From<T>,
    {
        self.run_binop(|left: T, right: T| left.rotr(right))
    }

    fn run_abs<T>(&mut self) -> Result<(), TrapCode>
    where
        T: Float<T> + From<UntypedValue>,
        UntypedValue: From<T>,
    {
        self.run_unop(|value: T| value.abs())
    }

    fn run_neg<T>(&mut self) -> Result<(), TrapCode>
    where
        T: ops::Neg + From<UntypedValue>,
        UntypedValue: From<<T as ops::Neg>::Output>,
    {
        self.run_unop(|value: T| value.neg())
    }

    fn run_ceil<T>(&mut self) -> Result<(), TrapCode>
    where
        T: Float<T> + From<UntypedValue>,
        UntypedValue: From<T>,
    {
        self.run_unop(|value: T| value.ceil())
    }

    fn run_floor<T>(&mut self) -> Result<(), TrapCode>
    where
        T: Float<T> + From<UntypedValue>,
        UntypedValue: From<T>,
    {
        self.run_unop(|value: T| value.floor())
    }

    fn run_trunc<T>(&mut self) -> Result<(), TrapCode>
    where
        T: Float<T> + From<UntypedValue>,
        UntypedValue: From<T>,
    {
        self.run_unop(|value: T| value.trunc())
    }

    fn run_nearest<T>(&mut self) -> Result<(), TrapCode>
    where
        T: Float<T> + From<UntypedValue>,
        UntypedValue: From<T>,
    {
        self.run_unop(|value: T| value.nearest())
    }

    fn run_sqrt<T>(&mut self) -> Result<(), TrapCode>
    where
        T: Float<T> + From<UntypedValue>,
        UntypedValue: From<T>,
    {
        self.run_unop(|value: T| value.sqrt())
    }

    fn run_min<T>(&mut self) -> Result<(), TrapCode>
    where
        T: Float<T> + From<UntypedValue>,
        UntypedValue: From<T>,
    {
        self.run_binop(|left: T, right: T| left.min(right))
    }

    fn run_max<T>(&mut self) -> Result<(), TrapCode>
    where
        T: Float<T> + From<UntypedValue>,
        UntypedValue: From<T>,
    {
        self.run_binop(|left: T, right: T| left.max(right))
    }

    fn run_copysign<T>(&mut self) -> Result<(), TrapCode>
    where
        T: Float<T> + From<UntypedValue>,
        UntypedValue: From<T>,
    {
        self.run_binop(|left: T, right: T| left.copysign(right))
    }

    fn run_wrap<T, U>(&mut self) -> Result<(), TrapCode>
    where
        T: WrapInto<U> + From<UntypedValue>,
        UntypedValue: From<U>,
    {
        self.run_unop(|value: T| value.wrap_into())
    }

    fn run_trunc_to_int<T, U, V>(&mut self) -> Result<(), TrapCode>
    where
        T: TryTruncateInto<U, TrapCode> + From<UntypedValue>,
        U: TransmuteInto<V>,
        UntypedValue: From<V>,
    {
        self.try_unop(|value: T| value.try_truncate_into().map(U::transmute_into))
    }

    fn run_extend<T, U, V>(&mut self) -> Result<(), TrapCode>
    where
        T: ExtendInto<U> + From<UntypedValue>,
        U: TransmuteInto<V>,
        UntypedValue: From<V>,
    {
        self.run_unop(|value: T| value.extend_into().transmute_into())
    }

    fn run_reinterpret<T, U>(&mut self) -> Result<(), TrapCode>
    where
        T: TransmuteInto<U> + From<UntypedValue>,
        UntypedValue: From<U>,
    {
        self.run_unop(|value: T| value.transmute_into())
    }
}

/// The operand stack of one frame, with arguments and locals colocated at
/// its base.
///
/// Layout, low to high: `num_inputs` argument cells, `local_count` local
/// cells, then the operand region. Capacity is exact: the validator's
/// `max_stack_height` bounds the operand region, so a well-formed body can
/// never see a failed push.
struct OperandStack {
    buf: Box<[UntypedValue]>,
    /// Index of the first free cell.
    sp: usize,
    locals_len: usize,
}

impl OperandStack {
    fn new(capacity: usize) -> OperandStack {
        OperandStack {
            buf: alloc::vec![UntypedValue::default(); capacity].into_boxed_slice(),
            sp: 0,
            locals_len: 0,
        }
    }

    // Arguments land in the first cells; the remaining local cells keep
    // their zero initialization.
    fn init_locals(&mut self, args: &[UntypedValue], locals_len: usize) {
        debug_assert!(locals_len >= args.len());
        self.buf[..args.len()].copy_from_slice(args);
        self.sp = locals_len;
        self.locals_len = locals_len;
    }

    fn locals_len(&self) -> usize {
        self.locals_len
    }

    #[inline]
    fn len(&self) -> usize {
        self.sp
    }

    #[inline]
    fn push(&mut self, value: UntypedValue) -> Result<(), TrapCode> {
        let cell = self.buf.get_mut(self.sp).ok_or(TrapCode::StackOverflow)?;
        *cell = value;
        self.sp += 1;
        Ok(())
    }

    #[inline]
    fn pop(&mut self) -> UntypedValue {
        self.sp -= 1;
        self.buf[self.sp]
    }

    #[inline]
    fn pop_as<T>(&mut self) -> T
    where
        T: From<UntypedValue>,
    {
        T::from(self.pop())
    }

    #[inline]
    fn pop_pair_as<T>(&mut self) -> (T, T)
    where
        T: From<UntypedValue>,
    {
        let right = self.pop_as();
        let left = self.pop_as();
        (left, right)
    }

    #[inline]
    fn pop_triple(&mut self) -> (UntypedValue, UntypedValue, UntypedValue) {
        let right = self.pop();
        let mid = self.pop();
        let left = self.pop();
        (left, mid, right)
    }

    #[inline]
    fn top(&self) -> &UntypedValue {
        &self.buf[self.sp - 1]
    }

    #[inline]
    fn pick_mut(&mut self, depth: usize) -> &mut UntypedValue {
        &mut self.buf[self.sp - depth]
    }

    #[inline]
    fn local(&self, index: u32) -> UntypedValue {
        self.buf[index as usize]
    }

    #[inline]
    fn local_mut(&mut self, index: u32) -> &mut UntypedValue {
        &mut self.buf[index as usize]
    }

    /// The `stack_drop` primitive of branches: discards `drop` cells below
    /// the preserved top when `keep` is set, or the topmost `drop` cells
    /// otherwise.
    #[inline]
    fn drop_keep(&mut self, drop: u32, keep: bool) {
        if keep {
            let top = *self.top();
            *self.pick_mut(drop as usize + 1) = top;
        }
        self.sp -= drop as usize;
    }

    /// Returns the topmost `n` cells in push order: the argument window of a
    /// call about to happen.
    #[inline]
    fn peek_top(&self, n: usize) -> &[UntypedValue] {
        &self.buf[self.sp - n..self.sp]
    }

    #[inline]
    fn drop_values(&mut self, n: usize) {
        self.sp -= n;
    }
}
