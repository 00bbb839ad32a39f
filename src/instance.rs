//! Instantiated modules.

use crate::{
    func::ExecuteFunction,
    global::{GlobalInstance, GlobalRef},
    memory::{MemoryInstance, MemoryRef, LINEAR_MEMORY_MAX_PAGES},
    memory_units::Pages,
    module::{FuncType, Module},
    table::{TableInstance, TableRef},
    Error,
};
use alloc::{format, rc::Rc, rc::Weak, vec::Vec};
use core::fmt;
use wasmint_core::Value;

/// Reference to an [`Instance`].
///
/// This reference has reference-counting semantics. Table elements and
/// imported-function bindings address functions through it, so an instance
/// stays alive for as long as anything can still call into it.
#[derive(Clone, Debug)]
pub struct InstanceRef(Rc<Instance>);

impl ::core::ops::Deref for InstanceRef {
    type Target = Instance;
    fn deref(&self) -> &Instance {
        &self.0
    }
}

impl InstanceRef {
    pub(crate) fn downgrade(&self) -> Weak<Instance> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn from_rc(rc: Rc<Instance>) -> InstanceRef {
        InstanceRef(rc)
    }
}

/// A resolved imported function together with its declared type.
#[derive(Debug, Clone)]
pub(crate) struct ImportedFunction {
    pub func: ExecuteFunction,
    pub func_type: FuncType,
}

/// Runtime counterpart of a [`Module`].
///
/// An instance owns the memory, table and globals it defines and borrows the
/// ones it imports; both ends of that distinction are reference-counted
/// handles, so teardown of a borrowing instance never touches the imported
/// objects.
///
/// Segment initialization and start-function invocation are the embedder's
/// (or an instantiation layer's) concern; the builder only allocates the
/// declared objects and binds the imports.
pub struct Instance {
    module: Rc<Module>,
    memory: Option<MemoryRef>,
    table: Option<TableRef>,
    globals: Vec<GlobalRef>,
    imported_functions: Vec<ImportedFunction>,
    imported_globals: Vec<GlobalRef>,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Instance")
            .field("memory", &self.memory)
            .field("table", &self.table)
            .field("globals", &self.globals.len())
            .field("imported_functions", &self.imported_functions.len())
            .field("imported_globals", &self.imported_globals.len())
            .finish()
    }
}

impl Instance {
    /// Starts building an instance of `module`.
    pub fn builder(module: Rc<Module>) -> InstanceBuilder {
        InstanceBuilder {
            module,
            memory: None,
            table: None,
            globals: None,
            memory_pages_limit: LINEAR_MEMORY_MAX_PAGES,
            imported_functions: Vec::new(),
            imported_globals: Vec::new(),
        }
    }

    /// Returns the module this instance was created from.
    pub fn module(&self) -> &Rc<Module> {
        &self.module
    }

    /// Returns the linear memory, owned or imported.
    pub fn memory(&self) -> Option<&MemoryRef> {
        self.memory.as_ref()
    }

    /// Returns the table, owned or imported.
    pub fn table(&self) -> Option<&TableRef> {
        self.table.as_ref()
    }

    /// Returns the global at `index` in the unified index space: imported
    /// globals first, module-defined globals after.
    pub fn global(&self, index: u32) -> Option<&GlobalRef> {
        let index = index as usize;
        let num_imported = self.imported_globals.len();
        if index < num_imported {
            self.imported_globals.get(index)
        } else {
            self.globals.get(index - num_imported)
        }
    }

    pub(crate) fn imported_function(&self, func_idx: u32) -> Option<&ImportedFunction> {
        self.imported_functions.get(func_idx as usize)
    }
}

/// Binds imports and allocates the declared objects of an [`Instance`].
pub struct InstanceBuilder {
    module: Rc<Module>,
    memory: Option<MemoryRef>,
    table: Option<TableRef>,
    globals: Option<Vec<GlobalRef>>,
    memory_pages_limit: Pages,
    imported_functions: Vec<ExecuteFunction>,
    imported_globals: Vec<GlobalRef>,
}

impl InstanceBuilder {
    /// Binds an imported linear memory instead of allocating one.
    pub fn with_memory(mut self, memory: MemoryRef) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Binds an imported table instead of allocating one.
    pub fn with_table(mut self, table: TableRef) -> Self {
        self.table = Some(table);
        self
    }

    /// Caps growth of an owned memory below the declared maximum.
    pub fn with_memory_pages_limit(mut self, pages_limit: Pages) -> Self {
        self.memory_pages_limit = pages_limit;
        self
    }

    /// Supplies pre-allocated module-defined globals, e.g. carrying
    /// initializer values. Without this, globals are allocated zero valued.
    pub fn with_globals(mut self, globals: Vec<GlobalRef>) -> Self {
        self.globals = Some(globals);
        self
    }

    /// Binds the next imported function; call once per import, in order.
    pub fn import_function(mut self, func: ExecuteFunction) -> Self {
        self.imported_functions.push(func);
        self
    }

    /// Binds the next imported global; call once per import, in order.
    pub fn import_global(mut self, global: GlobalRef) -> Self {
        self.imported_globals.push(global);
        self
    }

    /// Allocates the remaining declared objects and finishes the instance.
    ///
    /// # Errors
    ///
    /// Returns `Err` if import counts or supplied global types do not match
    /// the module, or if a declared memory or table cannot be allocated.
    pub fn build(self) -> Result<InstanceRef, Error> {
        let module = self.module;

        if self.imported_functions.len() != module.num_imported_functions() {
            return Err(Error::Instantiation(format!(
                "module imports {} functions, {} were bound",
                module.num_imported_functions(),
                self.imported_functions.len(),
            )));
        }
        let imported_functions = self
            .imported_functions
            .into_iter()
            .zip(module.imported_function_types())
            .map(|(func, func_type)| ImportedFunction {
                func,
                func_type: func_type.clone(),
            })
            .collect();

        let memory = match (self.memory, module.memory_limits()) {
            (Some(memory), _) => Some(memory),
            (None, Some(limits)) => Some(MemoryInstance::alloc_with_pages_limit(
                Pages(limits.initial() as usize),
                limits.maximum().map(|pages| Pages(pages as usize)),
                self.memory_pages_limit,
            )?),
            (None, None) => None,
        };

        let table = match (self.table, module.table_limits()) {
            (Some(table), _) => Some(table),
            (None, Some(limits)) => Some(TableInstance::alloc(
                limits.initial(),
                limits.maximum(),
            )?),
            (None, None) => None,
        };

        let globals = match self.globals {
            Some(globals) => {
                if globals.len() != module.num_globals() {
                    return Err(Error::Instantiation(format!(
                        "module defines {} globals, {} were supplied",
                        module.num_globals(),
                        globals.len(),
                    )));
                }
                for (index, global) in globals.iter().enumerate() {
                    let declared = module
                        .global(index as u32)
                        .expect("index is within num_globals; qed");
                    if global.global_type() != *declared {
                        return Err(Error::Instantiation(format!(
                            "global {} has type {:?}, module declares {:?}",
                            index,
                            global.global_type(),
                            declared,
                        )));
                    }
                }
                globals
            }
            None => (0..module.num_globals() as u32)
                .map(|index| {
                    let declared = module
                        .global(index)
                        .expect("index is within num_globals; qed");
                    GlobalInstance::alloc(
                        Value::default(declared.value_type()),
                        declared.is_mutable(),
                    )
                })
                .collect(),
        };

        Ok(InstanceRef(Rc::new(Instance {
            module,
            memory,
            table,
            globals,
            imported_functions,
            imported_globals: self.imported_globals,
        })))
    }
}
