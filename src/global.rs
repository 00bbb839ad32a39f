//! Global variables.

use crate::{module::GlobalType, Error};
use alloc::rc::Rc;
use core::cell::Cell;
use wasmint_core::{UntypedValue, Value};

/// Reference to a global variable (see [`GlobalInstance`] for details).
///
/// This reference has reference-counting semantics; an imported global and
/// the global it resolves to are the same cell.
#[derive(Clone, Debug)]
pub struct GlobalRef(Rc<GlobalInstance>);

impl ::core::ops::Deref for GlobalRef {
    type Target = GlobalInstance;
    fn deref(&self) -> &GlobalInstance {
        &self.0
    }
}

/// Runtime representation of a global variable.
///
/// A global holds one value of a fixed type together with a mutability flag.
/// Neither the type nor the mutability can change after creation; writes to
/// immutable globals and ill-typed writes are rejected.
#[derive(Debug)]
pub struct GlobalInstance {
    val: Cell<UntypedValue>,
    typ: GlobalType,
}

impl GlobalInstance {
    /// Allocates a global variable with the given initial value.
    pub fn alloc(val: Value, mutable: bool) -> GlobalRef {
        let typ = GlobalType::new(val.value_type(), mutable);
        GlobalRef(Rc::new(GlobalInstance {
            val: Cell::new(val.into()),
            typ,
        }))
    }

    /// Changes the value of this global variable.
    ///
    /// # Errors
    ///
    /// Returns `Err` if this global isn't mutable or if the type of `val`
    /// doesn't match the global's type.
    pub fn set(&self, val: Value) -> Result<(), Error> {
        if !self.typ.is_mutable() {
            return Err(Error::Global(
                "attempt to change an immutable variable".into(),
            ));
        }
        if self.typ.value_type() != val.value_type() {
            return Err(Error::Global("attempt to change variable type".into()));
        }
        self.val.set(val.into());
        Ok(())
    }

    /// Returns the value of this global variable.
    pub fn get(&self) -> Value {
        self.val.get().with_type(self.typ.value_type())
    }

    /// Returns the type of this global variable.
    pub fn global_type(&self) -> GlobalType {
        self.typ
    }

    /// Returns `true` if this global variable is mutable.
    pub fn is_mutable(&self) -> bool {
        self.typ.is_mutable()
    }

    pub(crate) fn get_untyped(&self) -> UntypedValue {
        self.val.get()
    }

    // Raw write used by `global.set`; mutability was established by
    // validation.
    pub(crate) fn set_untyped(&self, val: UntypedValue) {
        debug_assert!(self.typ.is_mutable());
        self.val.set(val);
    }
}
