use crate::HostError;
use alloc::boxed::Box;
use core::fmt::{self, Display};

/// The failure classes a running Wasm computation can produce.
///
/// Traps are values, not exceptions: execution returns them to the embedder
/// and unwinds every Wasm frame on the way out. Wasm code itself cannot
/// observe or catch a trap.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TrapCode {
    /// Wasm code executed the `unreachable` opcode.
    ///
    /// `unreachable` is a special opcode which always traps upon execution,
    /// with a similar purpose as `ud2` in x86.
    Unreachable,

    /// Attempt to load from or store to an address outside the bounds of the
    /// linear memory.
    ///
    /// Since addresses are interpreted as unsigned integers, out of bounds
    /// access can't happen with negative addresses.
    MemoryAccessOutOfBounds,

    /// Attempt to access a table element at an index that lies outside of
    /// bounds. Raised by `call_indirect`.
    TableAccessOutOfBounds,

    /// Attempt to call through an uninitialized table element.
    ElemUninitialized,

    /// Attempt to divide by zero in `div` or `rem`, signed or unsigned.
    DivisionByZero,

    /// An integer arithmetic operation overflowed.
    ///
    /// Raised by signed division of -2<sup>N-1</sup> by -1, whose result
    /// +2<sup>N-1</sup> is not representable in N bits.
    IntegerOverflow,

    /// A float-to-integer truncation was applied to a NaN, an infinity, or a
    /// value outside the range of the target integer type.
    InvalidConversionToInt,

    /// The call depth limit was exceeded.
    ///
    /// This is likely caused by infinite or very deep recursion.
    StackOverflow,

    /// Attempt to invoke a function with a mismatching signature.
    ///
    /// Raised when an indirect call reaches a table element whose function
    /// type differs from the annotated type, when a host function returns a
    /// value shape different from its declared type, or when an entry point
    /// is handed ill-typed arguments.
    UnexpectedSignature,
}

impl TrapCode {
    /// Returns the trap message as specified by the WebAssembly specification.
    pub fn trap_message(&self) -> &'static str {
        match self {
            TrapCode::Unreachable => "unreachable",
            TrapCode::MemoryAccessOutOfBounds => "out of bounds memory access",
            TrapCode::TableAccessOutOfBounds => "undefined element",
            TrapCode::ElemUninitialized => "uninitialized element",
            TrapCode::DivisionByZero => "integer divide by zero",
            TrapCode::IntegerOverflow => "integer overflow",
            TrapCode::InvalidConversionToInt => "invalid conversion to integer",
            TrapCode::StackOverflow => "call stack exhausted",
            TrapCode::UnexpectedSignature => "indirect call type mismatch",
        }
    }
}

impl Display for TrapCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.trap_message())
    }
}

/// An error that aborted the current Wasm computation.
///
/// Either one of the Wasm-defined [`TrapCode`]s or an embedder-defined
/// [`HostError`] raised by a host function.
#[derive(Debug)]
pub enum Trap {
    /// A Wasm-defined trap.
    Code(TrapCode),
    /// An embedder-defined error raised from a host function.
    Host(Box<dyn HostError>),
}

impl Trap {
    /// Returns the [`TrapCode`] if `self` is a Wasm-defined trap.
    pub fn code(&self) -> Option<TrapCode> {
        match self {
            Trap::Code(code) => Some(*code),
            Trap::Host(_) => None,
        }
    }

    /// Returns `true` if `self` was raised by a host function.
    pub fn is_host(&self) -> bool {
        matches!(self, Trap::Host(_))
    }

    /// Returns a shared reference to the [`HostError`] if any.
    pub fn as_host(&self) -> Option<&dyn HostError> {
        match self {
            Trap::Host(error) => Some(&**error),
            Trap::Code(_) => None,
        }
    }

    /// Consumes `self` and returns the [`HostError`] if any.
    pub fn into_host(self) -> Option<Box<dyn HostError>> {
        match self {
            Trap::Host(error) => Some(error),
            Trap::Code(_) => None,
        }
    }
}

impl From<TrapCode> for Trap {
    fn from(code: TrapCode) -> Self {
        Trap::Code(code)
    }
}

impl<E> From<E> for Trap
where
    E: HostError,
{
    fn from(error: E) -> Self {
        Trap::Host(Box::new(error))
    }
}

impl Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Trap::Code(code) => Display::fmt(code, f),
            Trap::Host(error) => Display::fmt(error, f),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Trap {}
