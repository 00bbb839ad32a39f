//! Function tables.

use crate::{
    instance::{Instance, InstanceRef},
    module::Limits,
    Error,
};
use alloc::{format, rc::Rc, rc::Weak, vec, vec::Vec};
use core::{cell::RefCell, fmt};

/// Reference to a table (see [`TableInstance`] for details).
///
/// This reference has reference-counting semantics; a table shared through
/// imports is one allocation.
#[derive(Clone, Debug)]
pub struct TableRef(Rc<TableInstance>);

impl ::core::ops::Deref for TableRef {
    type Target = TableInstance;
    fn deref(&self) -> &TableInstance {
        &self.0
    }
}

/// One initialized table slot: a function of some instance.
///
/// The owning instance is held weakly so that a module whose own table
/// references its own functions does not keep itself alive. When the element
/// was written into an *imported* table, the writer additionally pins itself
/// with a strong back-reference so the target function survives even if the
/// writing instantiation subsequently trapped and was torn down everywhere
/// else.
#[derive(Clone)]
pub struct TableElement {
    instance: Weak<Instance>,
    func_idx: u32,
    shared_instance: Option<InstanceRef>,
}

impl TableElement {
    /// Creates an element referencing `func_idx` of `instance`.
    pub fn new(instance: &InstanceRef, func_idx: u32) -> TableElement {
        TableElement {
            instance: instance.downgrade(),
            func_idx,
            shared_instance: None,
        }
    }

    /// Creates an element that additionally keeps `instance` alive.
    ///
    /// Used when writing into a table the writer does not own.
    pub fn with_shared_instance(instance: &InstanceRef, func_idx: u32) -> TableElement {
        TableElement {
            instance: instance.downgrade(),
            func_idx,
            shared_instance: Some(instance.clone()),
        }
    }

    /// Returns the function index within the referenced instance.
    pub fn func_idx(&self) -> u32 {
        self.func_idx
    }

    /// Resolves the referenced instance, if it is still alive.
    pub(crate) fn instance(&self) -> Option<InstanceRef> {
        self.instance.upgrade().map(InstanceRef::from_rc)
    }
}

impl fmt::Debug for TableElement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TableElement")
            .field("func_idx", &self.func_idx)
            .field("shared", &self.shared_instance.is_some())
            .finish()
    }
}

/// Runtime representation of a table.
///
/// A table is an array of function references that Wasm code calls through
/// dynamically with `call_indirect`, emulating function pointers by way of
/// table indices. Slots start out uninitialized; calling through an
/// uninitialized slot traps.
pub struct TableInstance {
    limits: Limits,
    buffer: RefCell<Vec<Option<TableElement>>>,
}

impl fmt::Debug for TableInstance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TableInstance")
            .field("limits", &self.limits)
            .field("buffer.len", &self.buffer.borrow().len())
            .finish()
    }
}

impl TableInstance {
    /// Allocates a table with `initial` uninitialized elements.
    ///
    /// # Errors
    ///
    /// Returns `Err` if `initial` is greater than `maximum`.
    pub fn alloc(initial: u32, maximum: Option<u32>) -> Result<TableRef, Error> {
        let limits = Limits::new(initial, maximum);
        check_table_limits(&limits)?;
        Ok(TableRef(Rc::new(TableInstance {
            buffer: RefCell::new(vec![None; initial as usize]),
            limits,
        })))
    }

    /// Returns the table limits declared at allocation.
    pub(crate) fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Returns the current number of elements.
    pub fn current_size(&self) -> u32 {
        self.buffer.borrow().len() as u32
    }

    /// Increases the size of the table by `by` uninitialized elements.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the new size would exceed the declared maximum.
    pub fn grow(&self, by: u32) -> Result<(), Error> {
        let mut buffer = self.buffer.borrow_mut();
        let maximum = self.limits.maximum().unwrap_or(u32::MAX);
        let new_size = self
            .current_size()
            .checked_add(by)
            .filter(|new_size| *new_size <= maximum)
            .ok_or_else(|| {
                Error::Table(format!(
                    "trying to grow table by {} items when there are already {} items",
                    by,
                    self.current_size(),
                ))
            })?;
        buffer.resize(new_size as usize, None);
        Ok(())
    }

    /// Returns the element at `offset`, or `None` for an uninitialized slot.
    ///
    /// # Errors
    ///
    /// Returns `Err` if `offset` is out of bounds.
    pub fn get(&self, offset: u32) -> Result<Option<TableElement>, Error> {
        let buffer = self.buffer.borrow();
        let buffer_len = buffer.len();
        buffer.get(offset as usize).cloned().ok_or_else(|| {
            Error::Table(format!(
                "trying to read table item with index {} when there are only {} items",
                offset, buffer_len
            ))
        })
    }

    /// Sets the element at `offset`, overwriting any previous one.
    ///
    /// # Errors
    ///
    /// Returns `Err` if `offset` is out of bounds.
    pub fn set(&self, offset: u32, value: Option<TableElement>) -> Result<(), Error> {
        let mut buffer = self.buffer.borrow_mut();
        let buffer_len = buffer.len();
        let slot = buffer.get_mut(offset as usize).ok_or_else(|| {
            Error::Table(format!(
                "trying to update table item with index {} when there are only {} items",
                offset, buffer_len
            ))
        })?;
        *slot = value;
        Ok(())
    }

    pub(crate) fn len(&self) -> u32 {
        self.current_size()
    }
}

fn check_table_limits(limits: &Limits) -> Result<(), Error> {
    if let Some(maximum) = limits.maximum() {
        if limits.initial() > maximum {
            return Err(Error::Table(format!(
                "maximum limit {} is less than minimum {}",
                maximum,
                limits.initial(),
            )));
        }
    }
    Ok(())
}
