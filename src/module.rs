//! Read-only decoded module shapes.
//!
//! Producing a [`Module`] from a `.wasm` byte stream is the job of a parser
//! and validator outside this crate; these types fix the shapes such a
//! frontend must yield. Function bodies arrive already rewritten into the
//! stream format described in [`isa`](crate::isa), with the validator's
//! computed operand stack ceiling attached.

use alloc::{borrow::Cow, string::String, vec::Vec};
use wasmint_core::ValueType;

/// Signature of a function: zero or more parameter types and an optional
/// return type.
///
/// Two function types are equal when their parameter lists and return types
/// are equal; `call_indirect` checks exactly this structural equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncType {
    params: Cow<'static, [ValueType]>,
    return_type: Option<ValueType>,
}

impl FuncType {
    /// Creates a new function type.
    ///
    /// ```rust
    /// use wasmint::{FuncType, ValueType};
    ///
    /// // (i32, i32) -> i32
    /// let binop = FuncType::new(&[ValueType::I32, ValueType::I32][..], Some(ValueType::I32));
    /// // () -> ()
    /// let thunk = FuncType::new(&[][..], None);
    /// # let _ = (binop, thunk);
    /// ```
    pub fn new<P: Into<Cow<'static, [ValueType]>>>(
        params: P,
        return_type: Option<ValueType>,
    ) -> FuncType {
        FuncType {
            params: params.into(),
            return_type,
        }
    }

    /// Returns the parameter types.
    pub fn params(&self) -> &[ValueType] {
        self.params.as_ref()
    }

    /// Returns the return type.
    pub fn return_type(&self) -> Option<ValueType> {
        self.return_type
    }
}

/// Type of a global variable: its value type and whether it may be mutated.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GlobalType {
    value_type: ValueType,
    mutable: bool,
}

impl GlobalType {
    /// Creates a new global variable type.
    pub fn new(value_type: ValueType, mutable: bool) -> GlobalType {
        GlobalType {
            value_type,
            mutable,
        }
    }

    /// Returns the value type of the global.
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Returns `true` if the global may be mutated.
    pub fn is_mutable(&self) -> bool {
        self.mutable
    }
}

/// Declared size bounds of a linear memory or table, in pages or elements.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Limits {
    initial: u32,
    maximum: Option<u32>,
}

impl Limits {
    /// Creates new limits.
    pub fn new(initial: u32, maximum: Option<u32>) -> Limits {
        Limits { initial, maximum }
    }

    /// Returns the initial size.
    pub fn initial(&self) -> u32 {
        self.initial
    }

    /// Returns the maximum size, if one was declared.
    pub fn maximum(&self) -> Option<u32> {
        self.maximum
    }
}

/// A rewritten function body.
#[derive(Debug, Clone)]
pub struct Code {
    /// The instruction stream in the format described in [`isa`](crate::isa).
    pub code: Vec<u8>,
    /// Number of non-parameter locals.
    pub local_count: u32,
    /// Operand stack ceiling computed by the validator; sizes the stack of an
    /// invocation together with the parameter and local counts.
    pub max_stack_height: u32,
}

impl Code {
    /// Creates a function body from its rewritten instruction stream.
    pub fn new(code: Vec<u8>, local_count: u32, max_stack_height: u32) -> Code {
        Code {
            code,
            local_count,
            max_stack_height,
        }
    }
}

/// The kind of definition an export names.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExternKind {
    /// An exported function.
    Func,
    /// An exported table.
    Table,
    /// An exported linear memory.
    Memory,
    /// An exported global.
    Global,
}

/// A named export.
#[derive(Debug, Clone)]
pub struct Export {
    name: String,
    kind: ExternKind,
    index: u32,
}

impl Export {
    /// Creates a new export entry.
    pub fn new(name: String, kind: ExternKind, index: u32) -> Export {
        Export { name, kind, index }
    }

    /// Returns the export name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns what kind of definition is exported.
    pub fn kind(&self) -> ExternKind {
        self.kind
    }

    /// Returns the index of the definition in its index space.
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// A validated, decoded module.
///
/// Immutable for the lifetime of every instance created from it. Function
/// indices cover imported functions first, module-defined functions after.
#[derive(Debug, Default)]
pub struct Module {
    types: Vec<FuncType>,
    imported_functions: Vec<u32>,
    functions: Vec<u32>,
    code: Vec<Code>,
    globals: Vec<GlobalType>,
    memory_limits: Option<Limits>,
    table_limits: Option<Limits>,
    exports: Vec<Export>,
}

impl Module {
    /// Starts building a module.
    pub fn builder() -> ModuleBuilder {
        ModuleBuilder {
            module: Module::default(),
        }
    }

    /// Returns the function type at the given type section index.
    pub fn type_at(&self, type_idx: u32) -> Option<&FuncType> {
        self.types.get(type_idx as usize)
    }

    /// Returns the type of the function with the given index, imported
    /// functions first.
    pub fn function_type(&self, func_idx: u32) -> Option<&FuncType> {
        let func_idx = func_idx as usize;
        let num_imported = self.imported_functions.len();
        let type_idx = if func_idx < num_imported {
            self.imported_functions[func_idx]
        } else {
            *self.functions.get(func_idx - num_imported)?
        };
        self.type_at(type_idx)
    }

    /// Returns the rewritten body of the module-defined function with the
    /// given index, or `None` for imported function indices.
    pub fn code(&self, func_idx: u32) -> Option<&Code> {
        let func_idx = (func_idx as usize).checked_sub(self.imported_functions.len())?;
        self.code.get(func_idx)
    }

    /// Returns the number of imported functions.
    pub fn num_imported_functions(&self) -> usize {
        self.imported_functions.len()
    }

    /// Returns the total number of functions, imported and defined.
    pub fn num_functions(&self) -> usize {
        self.imported_functions.len() + self.functions.len()
    }

    /// Returns the types of the imported functions, in import order.
    pub fn imported_function_types(&self) -> impl Iterator<Item = &FuncType> {
        self.imported_functions
            .iter()
            .map(move |type_idx| &self.types[*type_idx as usize])
    }

    /// Returns the type of the module-defined global at the given index.
    pub fn global(&self, index: u32) -> Option<&GlobalType> {
        self.globals.get(index as usize)
    }

    /// Returns the number of module-defined globals.
    pub fn num_globals(&self) -> usize {
        self.globals.len()
    }

    /// Returns the declared linear memory limits, if the module has a memory.
    pub fn memory_limits(&self) -> Option<Limits> {
        self.memory_limits
    }

    /// Returns the declared table limits, if the module has a table.
    pub fn table_limits(&self) -> Option<Limits> {
        self.table_limits
    }

    /// Returns the index of the exported function with the given name.
    pub fn export_func(&self, name: &str) -> Option<u32> {
        self.exports
            .iter()
            .find(|export| export.kind == ExternKind::Func && export.name == name)
            .map(Export::index)
    }
}

/// Assembles a [`Module`] from decoded pieces.
///
/// This is the hand-off point for a parser frontend; tests use it to build
/// modules directly. Cross-index consistency is the frontend's contract and
/// is asserted in [`build`].
///
/// [`build`]: struct.ModuleBuilder.html#method.build
#[derive(Debug)]
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    /// Adds a function type; returns its type index.
    pub fn push_type(&mut self, func_type: FuncType) -> u32 {
        self.module.types.push(func_type);
        self.module.types.len() as u32 - 1
    }

    /// Declares an imported function of the given type; returns its function
    /// index.
    ///
    /// All imported functions must be declared before the first call to
    /// [`push_function`](Self::push_function).
    pub fn import_function(&mut self, type_idx: u32) -> u32 {
        assert!(
            self.module.functions.is_empty(),
            "imported functions precede module-defined functions"
        );
        self.module.imported_functions.push(type_idx);
        self.module.imported_functions.len() as u32 - 1
    }

    /// Adds a module-defined function; returns its function index.
    pub fn push_function(&mut self, type_idx: u32, code: Code) -> u32 {
        self.module.functions.push(type_idx);
        self.module.code.push(code);
        (self.module.imported_functions.len() + self.module.functions.len()) as u32 - 1
    }

    /// Declares a module-defined global.
    pub fn push_global(&mut self, global_type: GlobalType) -> u32 {
        self.module.globals.push(global_type);
        self.module.globals.len() as u32 - 1
    }

    /// Declares the linear memory of the module.
    pub fn memory(&mut self, limits: Limits) -> &mut Self {
        self.module.memory_limits = Some(limits);
        self
    }

    /// Declares the table of the module.
    pub fn table(&mut self, limits: Limits) -> &mut Self {
        self.module.table_limits = Some(limits);
        self
    }

    /// Adds an export entry.
    pub fn export(&mut self, export: Export) -> &mut Self {
        self.module.exports.push(export);
        self
    }

    /// Finishes the module.
    ///
    /// # Panics
    ///
    /// Panics if a declared type index is out of range; a validated input
    /// can't produce one.
    pub fn build(self) -> Module {
        let module = self.module;
        let num_types = module.types.len() as u32;
        for type_idx in module
            .imported_functions
            .iter()
            .chain(module.functions.iter())
        {
            assert!(*type_idx < num_types, "function type index out of range");
        }
        module
    }
}
