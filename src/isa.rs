//! The rewritten instruction stream executed by the interpreter.
//!
//! Wasm is a structured stack machine: control flow is encoded as nested
//! `block`/`loop`/`if` constructs and branches name a label depth. That
//! shape is convenient to validate but slow to interpret, because taking a
//! branch means scanning for the matching `end`.
//!
//! The parser therefore rewrites every function body into a plain goto
//! machine before execution. Opcodes keep their standard Wasm encoding, but
//! the structural immediates are canonicalized:
//!
//! - `block`, `loop` and `nop` drop their immediates entirely and become
//!   runtime no-ops; their semantics live in the rewritten branch targets.
//! - `if` carries one fixed-width `u32`: the code offset of its `else` arm
//!   (or of the matching `end` when there is no `else`). `else` carries the
//!   code offset of the matching `end`.
//! - `br`, `br_if` and `return` carry a `u32` arity followed by a
//!   [`BranchImmediate`]. `br_table` carries a `u32` table size, a `u32`
//!   arity and `size + 1` branch immediates, the default target last.
//! - Alignment immediates of loads and stores and the reserved zero bytes of
//!   `call_indirect`, `memory.size` and `memory.grow` are dropped.
//! - Scalar immediates (indices, static memory offsets, `i32`/`i64`
//!   constants) stay LEB128 encoded; `f32`/`f64` constants stay fixed-width
//!   little endian.
//!
//! A branch immediate is a pair `(code_offset, stack_drop)`: the byte offset
//! within the function body where execution resumes, and the number of
//! operand cells to discard below the preserved result. Executing a branch
//! is therefore O(1) regardless of nesting depth.
//!
//! The stream layout is a stable contract between parser and interpreter;
//! [`CodeWriter`] is the producing side of it.

use crate::cursor::{Cursor, DecodeError};
use alloc::vec::Vec;

/// The encoded size in bytes of a [`BranchImmediate`].
pub const BRANCH_IMMEDIATE_SIZE: usize = 8;

/// A pre-computed branch target.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BranchImmediate {
    /// Byte offset within the function body where execution resumes.
    pub code_offset: u32,
    /// Number of operand cells discarded below the preserved result.
    pub stack_drop: u32,
}

impl BranchImmediate {
    pub(crate) fn read(cursor: &mut Cursor) -> Result<Self, DecodeError> {
        let code_offset = cursor.read::<u32>()?;
        let stack_drop = cursor.read::<u32>()?;
        Ok(BranchImmediate {
            code_offset,
            stack_drop,
        })
    }
}

/// Opcode bytes of the Wasm MVP instruction set.
///
/// Values match the binary format so a rewritten body stays diffable against
/// the original code section.
#[allow(missing_docs)]
pub mod opcodes {
    pub const UNREACHABLE: u8 = 0x00;
    pub const NOP: u8 = 0x01;
    pub const BLOCK: u8 = 0x02;
    pub const LOOP: u8 = 0x03;
    pub const IF: u8 = 0x04;
    pub const ELSE: u8 = 0x05;
    pub const END: u8 = 0x0B;
    pub const BR: u8 = 0x0C;
    pub const BR_IF: u8 = 0x0D;
    pub const BR_TABLE: u8 = 0x0E;
    pub const RETURN: u8 = 0x0F;
    pub const CALL: u8 = 0x10;
    pub const CALL_INDIRECT: u8 = 0x11;

    pub const DROP: u8 = 0x1A;
    pub const SELECT: u8 = 0x1B;

    pub const LOCAL_GET: u8 = 0x20;
    pub const LOCAL_SET: u8 = 0x21;
    pub const LOCAL_TEE: u8 = 0x22;
    pub const GLOBAL_GET: u8 = 0x23;
    pub const GLOBAL_SET: u8 = 0x24;

    pub const I32_LOAD: u8 = 0x28;
    pub const I64_LOAD: u8 = 0x29;
    pub const F32_LOAD: u8 = 0x2A;
    pub const F64_LOAD: u8 = 0x2B;
    pub const I32_LOAD8_S: u8 = 0x2C;
    pub const I32_LOAD8_U: u8 = 0x2D;
    pub const I32_LOAD16_S: u8 = 0x2E;
    pub const I32_LOAD16_U: u8 = 0x2F;
    pub const I64_LOAD8_S: u8 = 0x30;
    pub const I64_LOAD8_U: u8 = 0x31;
    pub const I64_LOAD16_S: u8 = 0x32;
    pub const I64_LOAD16_U: u8 = 0x33;
    pub const I64_LOAD32_S: u8 = 0x34;
    pub const I64_LOAD32_U: u8 = 0x35;
    pub const I32_STORE: u8 = 0x36;
    pub const I64_STORE: u8 = 0x37;
    pub const F32_STORE: u8 = 0x38;
    pub const F64_STORE: u8 = 0x39;
    pub const I32_STORE8: u8 = 0x3A;
    pub const I32_STORE16: u8 = 0x3B;
    pub const I64_STORE8: u8 = 0x3C;
    pub const I64_STORE16: u8 = 0x3D;
    pub const I64_STORE32: u8 = 0x3E;
    pub const MEMORY_SIZE: u8 = 0x3F;
    pub const MEMORY_GROW: u8 = 0x40;

    pub const I32_CONST: u8 = 0x41;
    pub const I64_CONST: u8 = 0x42;
    pub const F32_CONST: u8 = 0x43;
    pub const F64_CONST: u8 = 0x44;

    pub const I32_EQZ: u8 = 0x45;
    pub const I32_EQ: u8 = 0x46;
    pub const I32_NE: u8 = 0x47;
    pub const I32_LT_S: u8 = 0x48;
    pub const I32_LT_U: u8 = 0x49;
    pub const I32_GT_S: u8 = 0x4A;
    pub const I32_GT_U: u8 = 0x4B;
    pub const I32_LE_S: u8 = 0x4C;
    pub const I32_LE_U: u8 = 0x4D;
    pub const I32_GE_S: u8 = 0x4E;
    pub const I32_GE_U: u8 = 0x4F;

    pub const I64_EQZ: u8 = 0x50;
    pub const I64_EQ: u8 = 0x51;
    pub const I64_NE: u8 = 0x52;
    pub const I64_LT_S: u8 = 0x53;
    pub const I64_LT_U: u8 = 0x54;
    pub const I64_GT_S: u8 = 0x55;
    pub const I64_GT_U: u8 = 0x56;
    pub const I64_LE_S: u8 = 0x57;
    pub const I64_LE_U: u8 = 0x58;
    pub const I64_GE_S: u8 = 0x59;
    pub const I64_GE_U: u8 = 0x5A;

    pub const F32_EQ: u8 = 0x5B;
    pub const F32_NE: u8 = 0x5C;
    pub const F32_LT: u8 = 0x5D;
    pub const F32_GT: u8 = 0x5E;
    pub const F32_LE: u8 = 0x5F;
    pub const F32_GE: u8 = 0x60;

    pub const F64_EQ: u8 = 0x61;
    pub const F64_NE: u8 = 0x62;
    pub const F64_LT: u8 = 0x63;
    pub const F64_GT: u8 = 0x64;
    pub const F64_LE: u8 = 0x65;
    pub const F64_GE: u8 = 0x66;

    pub const I32_CLZ: u8 = 0x67;
    pub const I32_CTZ: u8 = 0x68;
    pub const I32_POPCNT: u8 = 0x69;
    pub const I32_ADD: u8 = 0x6A;
    pub const I32_SUB: u8 = 0x6B;
    pub const I32_MUL: u8 = 0x6C;
    pub const I32_DIV_S: u8 = 0x6D;
    pub const I32_DIV_U: u8 = 0x6E;
    pub const I32_REM_S: u8 = 0x6F;
    pub const I32_REM_U: u8 = 0x70;
    pub const I32_AND: u8 = 0x71;
    pub const I32_OR: u8 = 0x72;
    pub const I32_XOR: u8 = 0x73;
    pub const I32_SHL: u8 = 0x74;
    pub const I32_SHR_S: u8 = 0x75;
    pub const I32_SHR_U: u8 = 0x76;
    pub const I32_ROTL: u8 = 0x77;
    pub const I32_ROTR: u8 = 0x78;

    pub const I64_CLZ: u8 = 0x79;
    pub const I64_CTZ: u8 = 0x7A;
    pub const I64_POPCNT: u8 = 0x7B;
    pub const I64_ADD: u8 = 0x7C;
    pub const I64_SUB: u8 = 0x7D;
    pub const I64_MUL: u8 = 0x7E;
    pub const I64_DIV_S: u8 = 0x7F;
    pub const I64_DIV_U: u8 = 0x80;
    pub const I64_REM_S: u8 = 0x81;
    pub const I64_REM_U: u8 = 0x82;
    pub const I64_AND: u8 = 0x83;
    pub const I64_OR: u8 = 0x84;
    pub const I64_XOR: u8 = 0x85;
    pub const I64_SHL: u8 = 0x86;
    pub const I64_SHR_S: u8 = 0x87;
    pub const I64_SHR_U: u8 = 0x88;
    pub const I64_ROTL: u8 = 0x89;
    pub const I64_ROTR: u8 = 0x8A;

    pub const F32_ABS: u8 = 0x8B;
    pub const F32_NEG: u8 = 0x8C;
    pub const F32_CEIL: u8 = 0x8D;
    pub const F32_FLOOR: u8 = 0x8E;
    pub const F32_TRUNC: u8 = 0x8F;
    pub const F32_NEAREST: u8 = 0x90;
    pub const F32_SQRT: u8 = 0x91;
    pub const F32_ADD: u8 = 0x92;
    pub const F32_SUB: u8 = 0x93;
    pub const F32_MUL: u8 = 0x94;
    pub const F32_DIV: u8 = 0x95;
    pub const F32_MIN: u8 = 0x96;
    pub const F32_MAX: u8 = 0x97;
    pub const F32_COPYSIGN: u8 = 0x98;

    pub const F64_ABS: u8 = 0x99;
    pub const F64_NEG: u8 = 0x9A;
    pub const F64_CEIL: u8 = 0x9B;
    pub const F64_FLOOR: u8 = 0x9C;
    pub const F64_TRUNC: u8 = 0x9D;
    pub const F64_NEAREST: u8 = 0x9E;
    pub const F64_SQRT: u8 = 0x9F;
    pub const F64_ADD: u8 = 0xA0;
    pub const F64_SUB: u8 = 0xA1;
    pub const F64_MUL: u8 = 0xA2;
    pub const F64_DIV: u8 = 0xA3;
    pub const F64_MIN: u8 = 0xA4;
    pub const F64_MAX: u8 = 0xA5;
    pub const F64_COPYSIGN: u8 = 0xA6;

    pub const I32_WRAP_I64: u8 = 0xA7;
    pub const I32_TRUNC_F32_S: u8 = 0xA8;
    pub const I32_TRUNC_F32_U: u8 = 0xA9;
    pub const I32_TRUNC_F64_S: u8 = 0xAA;
    pub const I32_TRUNC_F64_U: u8 = 0xAB;
    pub const I64_EXTEND_I32_S: u8 = 0xAC;
    pub const I64_EXTEND_I32_U: u8 = 0xAD;
    pub const I64_TRUNC_F32_S: u8 = 0xAE;
    pub const I64_TRUNC_F32_U: u8 = 0xAF;
    pub const I64_TRUNC_F64_S: u8 = 0xB0;
    pub const I64_TRUNC_F64_U: u8 = 0xB1;
    pub const F32_CONVERT_I32_S: u8 = 0xB2;
    pub const F32_CONVERT_I32_U: u8 = 0xB3;
    pub const F32_CONVERT_I64_S: u8 = 0xB4;
    pub const F32_CONVERT_I64_U: u8 = 0xB5;
    pub const F32_DEMOTE_F64: u8 = 0xB6;
    pub const F64_CONVERT_I32_S: u8 = 0xB7;
    pub const F64_CONVERT_I32_U: u8 = 0xB8;
    pub const F64_CONVERT_I64_S: u8 = 0xB9;
    pub const F64_CONVERT_I64_U: u8 = 0xBA;
    pub const F64_PROMOTE_F32: u8 = 0xBB;

    pub const I32_REINTERPRET_F32: u8 = 0xBC;
    pub const I64_REINTERPRET_F64: u8 = 0xBD;
    pub const F32_REINTERPRET_I32: u8 = 0xBE;
    pub const F64_REINTERPRET_I64: u8 = 0xBF;
}

/// Emits a rewritten function body.
///
/// Forward branch targets are not known while the body is being emitted, so
/// every fixed-width `u32` slot can be reserved with [`hole_u32`] and filled
/// in later with [`patch_u32`] once the destination offset is known, in the
/// manner of a relocation table.
///
/// [`hole_u32`]: struct.CodeWriter.html#method.hole_u32
/// [`patch_u32`]: struct.CodeWriter.html#method.patch_u32
#[derive(Debug, Default)]
pub struct CodeWriter {
    code: Vec<u8>,
}

impl CodeWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the offset the next emitted byte will land on.
    pub fn pos(&self) -> u32 {
        self.code.len() as u32
    }

    /// Emits a bare opcode byte.
    pub fn op(&mut self, opcode: u8) -> &mut Self {
        self.code.push(opcode);
        self
    }

    /// Emits a LEB128 unsigned 32-bit immediate.
    pub fn var_u32(&mut self, mut value: u32) -> &mut Self {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.code.push(byte);
                return self;
            }
            self.code.push(byte | 0x80);
        }
    }

    /// Emits a LEB128 signed 32-bit immediate.
    pub fn var_i32(&mut self, value: i32) -> &mut Self {
        self.var_i64(value as i64)
    }

    /// Emits a LEB128 signed 64-bit immediate.
    pub fn var_i64(&mut self, mut value: i64) -> &mut Self {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            let sign_clear = byte & 0x40 == 0;
            if (value == 0 && sign_clear) || (value == -1 && !sign_clear) {
                self.code.push(byte);
                return self;
            }
            self.code.push(byte | 0x80);
        }
    }

    /// Emits a fixed-width little-endian `u32`.
    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Emits a fixed-width `u32` slot to be patched later; returns its offset.
    pub fn hole_u32(&mut self) -> u32 {
        let at = self.pos();
        self.u32(0);
        at
    }

    /// Overwrites the `u32` slot at `at` with `value`.
    ///
    /// # Panics
    ///
    /// Panics if `at` does not point at four emitted bytes, which would mean
    /// the relocation bookkeeping of the caller is broken.
    pub fn patch_u32(&mut self, at: u32, value: u32) {
        let at = at as usize;
        self.code[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Emits a branch immediate.
    pub fn branch(&mut self, code_offset: u32, stack_drop: u32) -> &mut Self {
        self.u32(code_offset);
        self.u32(stack_drop)
    }

    /// Emits an `i32.const` with its immediate.
    pub fn i32_const(&mut self, value: i32) -> &mut Self {
        self.op(opcodes::I32_CONST);
        self.var_i32(value)
    }

    /// Emits an `i64.const` with its immediate.
    pub fn i64_const(&mut self, value: i64) -> &mut Self {
        self.op(opcodes::I64_CONST);
        self.var_i64(value)
    }

    /// Emits an `f32.const` with its immediate.
    pub fn f32_const(&mut self, value: f32) -> &mut Self {
        self.op(opcodes::F32_CONST);
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Emits an `f64.const` with its immediate.
    pub fn f64_const(&mut self, value: f64) -> &mut Self {
        self.op(opcodes::F64_CONST);
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Emits an opcode followed by one LEB128 `u32` immediate.
    ///
    /// Covers `local.*`, `global.*`, `call`, `call_indirect` and the static
    /// offsets of loads and stores.
    pub fn op_var_u32(&mut self, opcode: u8, immediate: u32) -> &mut Self {
        self.op(opcode);
        self.var_u32(immediate)
    }

    /// Emits the terminal `end` and returns the finished body.
    pub fn finish(mut self) -> Vec<u8> {
        self.op(opcodes::END);
        self.code
    }
}
