//! Value model and numeric semantics shared by the `wasmint` interpreter.
//!
//! This crate defines the four Wasm value types and their runtime
//! representations, the untyped 64-bit stack cell, the NaN-preserving float
//! wrappers, the trait machinery for Wasm numeric operations (wrapping
//! arithmetic, trapping division and truncation, IEEE float edge cases) and
//! the trap model.

#![warn(missing_docs)]
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std as alloc;

mod host_error;
mod nan_preserving_float;
mod trap;
mod untyped;
mod value;

pub use self::{
    host_error::HostError,
    nan_preserving_float::{F32, F64},
    trap::{Trap, TrapCode},
    untyped::UntypedValue,
    value::{
        ArithmeticOps,
        ExtendInto,
        Float,
        FromValue,
        Integer,
        LittleEndianConvert,
        TransmuteInto,
        TryTruncateInto,
        Value,
        ValueType,
        WrapInto,
    },
};
