//! Executable functions: Wasm bodies and host functions.

use crate::{
    instance::InstanceRef,
    runner::{self, ExecutionContext},
};
use alloc::rc::Rc;
use core::fmt;
use wasmint_core::{Trap, UntypedValue};

/// A function provided by the embedder.
///
/// The implementing value is the host context: whatever state the function
/// needs lives in `self`. `args` is a window into the caller's operand
/// stack holding exactly one cell per declared parameter, in order; the cell
/// views match the parameter types. The return value must conform to the
/// declared return type (one value or none); a mismatch is reported to the
/// calling Wasm code as a signature trap.
///
/// A host function may re-enter the interpreter through
/// [`execute_with_context`](crate::execute_with_context) with the
/// [`ExecutionContext`] it was handed, so host recursion shares the Wasm
/// call depth budget.
pub trait HostFunction {
    /// Invokes the host function on behalf of `caller`.
    fn call(
        &self,
        caller: &InstanceRef,
        args: &[UntypedValue],
        ctx: &ExecutionContext,
    ) -> Result<Option<UntypedValue>, Trap>;
}

/// A resolved callable: a function of some instance, or a host function.
///
/// Instances store one of these per imported function; tables and embedders
/// use them to name call targets without fixing how the target is
/// implemented.
#[derive(Clone)]
pub enum ExecuteFunction {
    /// A Wasm function of an instance.
    Wasm {
        /// The instance the function belongs to.
        instance: InstanceRef,
        /// The function index within that instance.
        func_idx: u32,
    },
    /// An embedder-provided function.
    Host(Rc<dyn HostFunction>),
}

impl ExecuteFunction {
    /// Creates a callable for `func_idx` of `instance`.
    pub fn wasm(instance: InstanceRef, func_idx: u32) -> ExecuteFunction {
        ExecuteFunction::Wasm { instance, func_idx }
    }

    /// Creates a callable for a host function.
    pub fn host(func: Rc<dyn HostFunction>) -> ExecuteFunction {
        ExecuteFunction::Host(func)
    }

    pub(crate) fn call(
        &self,
        caller: &InstanceRef,
        args: &[UntypedValue],
        ctx: &ExecutionContext,
    ) -> Result<Option<UntypedValue>, Trap> {
        match self {
            ExecuteFunction::Wasm { instance, func_idx } => {
                runner::invoke_untyped(instance, *func_idx, args, ctx)
            }
            ExecuteFunction::Host(func) => func.call(caller, args, ctx),
        }
    }
}

impl fmt::Debug for ExecuteFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecuteFunction::Wasm { func_idx, .. } => f
                .debug_struct("ExecuteFunction::Wasm")
                .field("func_idx", func_idx)
                .finish(),
            ExecuteFunction::Host(_) => f.debug_struct("ExecuteFunction::Host").finish(),
        }
    }
}
