//! # wasmint
//!
//! An interpreter for validated WebAssembly (MVP) modules.
//!
//! This crate executes function bodies that a parser/validator frontend has
//! already decoded, validated and rewritten into the flat instruction stream
//! described in [`isa`]. Parsing `.wasm` binaries, validation and segment
//! initialization live outside this crate; [`Module`] and [`CodeWriter`] fix
//! the shapes and the stream format such a frontend must produce.
//!
//! ## Data model
//!
//! A [`Module`] is the immutable decoded form of a Wasm module. An
//! [`Instance`] is its runtime counterpart: it owns the linear memory, table
//! and globals the module defines and borrows whatever it imports. Imported
//! functions are resolved at instance build time into [`ExecuteFunction`]
//! callables, which are either a function of another instance or an
//! embedder-provided [`HostFunction`].
//!
//! ## Execution
//!
//! [`execute`] runs one exported function invocation to completion. The
//! interpreter is synchronous and single threaded; a computation either
//! returns a value (or nothing, for a void function), or traps. Traps are
//! values, not panics: every Wasm-visible failure - `unreachable`, an
//! out-of-bounds access, a division or conversion edge case, a bad indirect
//! call, call stack exhaustion - unwinds to the caller as a [`Trap`].
//!
//! Host functions may re-enter the interpreter with
//! [`execute_with_context`], sharing one call depth budget through the
//! [`ExecutionContext`] they were handed.
//!
//! ## Example
//!
//! ```rust
//! use std::rc::Rc;
//! use wasmint::{
//!     execute, isa::CodeWriter, Code, FuncType, Instance, Module, Value, ValueType,
//! };
//!
//! // (func (result i32) (i32.const 1) (i32.const 2) (i32.add))
//! let mut body = CodeWriter::new();
//! body.i32_const(1).i32_const(2).op(wasmint::isa::opcodes::I32_ADD);
//!
//! let mut builder = Module::builder();
//! let ty = builder.push_type(FuncType::new(&[][..], Some(ValueType::I32)));
//! let func = builder.push_function(ty, Code::new(body.finish(), 0, 2));
//! let module = Rc::new(builder.build());
//!
//! let instance = Instance::builder(module).build().unwrap();
//! let result = execute(&instance, func, &[]).unwrap();
//! assert_eq!(result, Some(Value::I32(3)));
//! ```

#![warn(missing_docs)]
#![cfg_attr(not(feature = "std"), no_std)]
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_ret_no_self)]

#[cfg(not(feature = "std"))]
#[macro_use]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std as alloc;

use alloc::string::String;
use core::fmt;

pub mod cursor;
pub mod isa;

mod func;
mod global;
mod instance;
mod memory;
mod module;
mod runner;
mod table;

#[cfg(test)]
mod tests;

pub use self::{
    cursor::DecodeError,
    func::{ExecuteFunction, HostFunction},
    global::{GlobalInstance, GlobalRef},
    instance::{Instance, InstanceBuilder, InstanceRef},
    isa::CodeWriter,
    memory::{
        validate_memory,
        MemoryInstance,
        MemoryRef,
        LINEAR_MEMORY_MAX_PAGES,
        LINEAR_MEMORY_PAGE_SIZE,
    },
    module::{Code, Export, ExternKind, FuncType, GlobalType, Limits, Module, ModuleBuilder},
    runner::{execute, execute_with_context, ExecutionContext, DEFAULT_CALL_STACK_LIMIT},
    table::{TableElement, TableInstance, TableRef},
};

pub use wasmint_core::{
    FromValue,
    HostError,
    LittleEndianConvert,
    Trap,
    TrapCode,
    UntypedValue,
    Value,
    ValueType,
    F32,
    F64,
};

/// WebAssembly-specific sizes and units.
pub mod memory_units {
    pub use memory_units::{size_of, wasm32::*, ByteSize, Bytes, RoundUpTo};
}

/// Errors raised while building modules and instances or operating on
/// runtime objects from the embedder side.
///
/// Failures inside running Wasm code are [`Trap`]s, not `Error`s.
#[derive(Debug)]
pub enum Error {
    /// An instance could not be built from its module and imports.
    Instantiation(String),
    /// A linear memory operation failed.
    Memory(String),
    /// A table operation failed.
    Table(String),
    /// A global variable operation failed.
    Global(String),
    /// A trap escaped to an embedder API that reports errors.
    Trap(Trap),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Instantiation(message) => write!(f, "instantiation: {}", message),
            Error::Memory(message) => write!(f, "memory: {}", message),
            Error::Table(message) => write!(f, "table: {}", message),
            Error::Global(message) => write!(f, "global: {}", message),
            Error::Trap(trap) => write!(f, "trap: {}", trap),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl From<Trap> for Error {
    fn from(trap: Trap) -> Self {
        Error::Trap(trap)
    }
}
