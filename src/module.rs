use crate::elements::{External, InitExpr, Internal, Module};
use crate::func::{FuncBody, FuncInstance, FuncRef};
use crate::global::{GlobalInstance, GlobalRef};
use crate::host::Externals;
use crate::memory::{MemoryInstance, MemoryRef};
use crate::memory_units::Pages;
use crate::table::{TableInstance, TableRef};
use crate::types::Signature;
use crate::{Error, InstantiationError, RuntimeValue};
use core::cell::RefCell;
use core::fmt;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::rc::Rc;

pub(crate) const DEFAULT_MEMORY_INDEX: u32 = 0;

/// Reference to a [`ModuleInstance`].
///
/// This reference has a reference-counting semantics.
///
/// A [`ModuleInstance`] holds strong references to its components (globals,
/// memories, funcs, tables) while the components hold weak references back
/// to their containing module, so instances that might be needed at
/// execution time must be retained by the embedder.
#[derive(Clone, Debug)]
pub struct ModuleRef(pub(crate) Rc<ModuleInstance>);

impl ::core::ops::Deref for ModuleRef {
    type Target = ModuleInstance;
    fn deref(&self) -> &ModuleInstance {
        &self.0
    }
}

/// An external value is the runtime representation of an entity
/// that can be exported.
#[derive(Clone)]
pub enum ExternVal {
    /// [Function][`FuncInstance`].
    ///
    /// [`FuncInstance`]: struct.FuncInstance.html
    Func(FuncRef),
    /// [Table][`TableInstance`].
    ///
    /// [`TableInstance`]: struct.TableInstance.html
    Table(TableRef),
    /// [Memory][`MemoryInstance`].
    ///
    /// [`MemoryInstance`]: struct.MemoryInstance.html
    Memory(MemoryRef),
    /// [Global][`GlobalInstance`].
    ///
    /// [`GlobalInstance`]: struct.GlobalInstance.html
    Global(GlobalRef),
}

impl fmt::Debug for ExternVal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ExternVal {{ {} }}",
            match *self {
                ExternVal::Func(_) => "Func",
                ExternVal::Table(_) => "Table",
                ExternVal::Memory(_) => "Memory",
                ExternVal::Global(_) => "Global",
            }
        )
    }
}

impl ExternVal {
    /// Get underlying function reference if this `ExternVal` contains
    /// a function, or `None` if it is some other kind.
    pub fn as_func(&self) -> Option<&FuncRef> {
        match self {
            ExternVal::Func(func) => Some(func),
            _ => None,
        }
    }

    /// Get underlying table reference if this `ExternVal` contains
    /// a table, or `None` if it is some other kind.
    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            ExternVal::Table(table) => Some(table),
            _ => None,
        }
    }

    /// Get underlying memory reference if this `ExternVal` contains
    /// a memory, or `None` if it is some other kind.
    pub fn as_memory(&self) -> Option<&MemoryRef> {
        match self {
            ExternVal::Memory(memory) => Some(memory),
            _ => None,
        }
    }

    /// Get underlying global variable reference if this `ExternVal` contains
    /// a global, or `None` if it is some other kind.
    pub fn as_global(&self) -> Option<&GlobalRef> {
        match self {
            ExternVal::Global(global) => Some(global),
            _ => None,
        }
    }
}

/// A module instance is the runtime representation of a [module][`Module`] —
/// the store.
///
/// It is created by instantiating a module and collects the runtime
/// representations of all entities the module imports or defines: functions
/// (imported ones first, addressed by name and dispatched through
/// [`Externals`]), tables, memories and globals, plus the export table.
///
/// After a module is instantiated you can invoke its exported functions
/// with [`invoke_export`].
///
/// [`Module`]: struct.Module.html
/// [`invoke_export`]: #method.invoke_export
#[derive(Debug)]
pub struct ModuleInstance {
    signatures: RefCell<Vec<Rc<Signature>>>,
    funcs: RefCell<Vec<FuncRef>>,
    tables: RefCell<Vec<TableRef>>,
    memories: RefCell<Vec<MemoryRef>>,
    globals: RefCell<Vec<GlobalRef>>,
    exports: RefCell<BTreeMap<String, ExternVal>>,
}

impl ModuleInstance {
    fn default() -> Self {
        ModuleInstance {
            signatures: RefCell::new(Vec::new()),
            funcs: RefCell::new(Vec::new()),
            tables: RefCell::new(Vec::new()),
            memories: RefCell::new(Vec::new()),
            globals: RefCell::new(Vec::new()),
            exports: RefCell::new(BTreeMap::new()),
        }
    }

    /// Returns the memory at `idx` in the store's memory index space.
    ///
    /// Host functions use this to reach the module's default linear memory
    /// (index 0) whether or not it is exported.
    pub fn memory_by_index(&self, idx: u32) -> Option<MemoryRef> {
        self.memories.borrow().get(idx as usize).cloned()
    }

    pub(crate) fn table_by_index(&self, idx: u32) -> Option<TableRef> {
        self.tables.borrow().get(idx as usize).cloned()
    }

    /// Returns the global at `idx` in the store's global index space.
    pub fn global_by_index(&self, idx: u32) -> Option<GlobalRef> {
        self.globals.borrow().get(idx as usize).cloned()
    }

    /// Returns the function at `idx` in the store's function index space,
    /// imported functions first.
    pub fn func_by_index(&self, idx: u32) -> Option<FuncRef> {
        self.funcs.borrow().get(idx as usize).cloned()
    }

    pub(crate) fn signature_by_index(&self, idx: u32) -> Option<Rc<Signature>> {
        self.signatures.borrow().get(idx as usize).cloned()
    }

    fn push_func(&self, func: FuncRef) {
        self.funcs.borrow_mut().push(func);
    }

    fn push_signature(&self, signature: Rc<Signature>) {
        self.signatures.borrow_mut().push(signature)
    }

    fn push_table(&self, table: TableRef) {
        self.tables.borrow_mut().push(table)
    }

    fn push_memory(&self, memory: MemoryRef) {
        self.memories.borrow_mut().push(memory)
    }

    fn push_global(&self, global: GlobalRef) {
        self.globals.borrow_mut().push(global)
    }

    fn insert_export(&self, name: &str, extern_val: ExternVal) -> Result<(), InstantiationError> {
        match self.exports.borrow_mut().entry(name.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(extern_val);
                Ok(())
            }
            Entry::Occupied(_) => Err(InstantiationError::DuplicateExport(name.to_string())),
        }
    }

    fn alloc_module(loaded_module: &Module) -> Result<ModuleRef, Error> {
        let instance = ModuleRef(Rc::new(ModuleInstance::default()));

        for func_type in loaded_module.types() {
            instance.push_signature(Rc::new(Signature::from_elements(func_type)));
        }

        // Imported functions come first in the index space. They carry only
        // their import names and signature; resolution against the host
        // happens at call time.
        for import in loaded_module.imports() {
            let External::Function(type_idx) = *import.external();
            let signature = instance
                .signature_by_index(type_idx)
                .ok_or(InstantiationError::InvalidFunctionTypeIndex(type_idx))?;
            let func = FuncInstance::alloc_host(
                Rc::downgrade(&instance.0),
                signature,
                import.module().to_string(),
                import.field().to_string(),
            );
            instance.push_func(func);
        }

        for (type_idx, body) in loaded_module
            .functions()
            .iter()
            .zip(loaded_module.bodies())
        {
            let signature = instance
                .signature_by_index(*type_idx)
                .ok_or(InstantiationError::InvalidFunctionTypeIndex(*type_idx))?;

            let mut locals = Vec::new();
            for local in body.locals() {
                for _ in 0..local.count() {
                    locals.push(local.value_type());
                }
            }

            let func_body = FuncBody::new(locals, body.code().to_vec());
            let func =
                FuncInstance::alloc_internal(Rc::downgrade(&instance.0), signature, func_body);
            instance.push_func(func);
        }

        for table_type in loaded_module.tables() {
            let table = TableInstance::alloc(
                table_type.limits().initial(),
                table_type.limits().maximum(),
            )?;
            instance.push_table(table);
        }

        for limits in loaded_module.memories() {
            let initial = Pages(limits.initial() as usize);
            let maximum = limits.maximum().map(|m| Pages(m as usize));
            let memory = MemoryInstance::alloc(initial, maximum)?;
            instance.push_memory(memory);
        }

        // Globals see only the globals instantiated before them, in
        // declaration order.
        for entry in loaded_module.globals() {
            let init_val = eval_init_expr(entry.init_expr(), &instance)?;
            if init_val.value_type() != entry.global_type().content_type() {
                return Err(InstantiationError::InvalidGlobalInit.into());
            }
            let global = GlobalInstance::alloc(init_val, entry.global_type().is_mutable());
            instance.push_global(global);
        }

        for export in loaded_module.exports() {
            let field = export.field();
            let extern_val = match *export.internal() {
                Internal::Function(idx) => ExternVal::Func(
                    instance
                        .func_by_index(idx)
                        .ok_or_else(|| export_index_error(field, idx))?,
                ),
                Internal::Table(idx) => ExternVal::Table(
                    instance
                        .table_by_index(idx)
                        .ok_or_else(|| export_index_error(field, idx))?,
                ),
                Internal::Memory(idx) => ExternVal::Memory(
                    instance
                        .memory_by_index(idx)
                        .ok_or_else(|| export_index_error(field, idx))?,
                ),
                Internal::Global(idx) => ExternVal::Global(
                    instance
                        .global_by_index(idx)
                        .ok_or_else(|| export_index_error(field, idx))?,
                ),
            };
            instance.insert_export(field, extern_val)?;
        }

        for segment in loaded_module.data() {
            let offset = match eval_init_expr(segment.offset(), &instance)? {
                RuntimeValue::I32(offset) => offset as u32,
                _ => return Err(InstantiationError::InvalidGlobalInit.into()),
            };
            let memory = instance
                .memory_by_index(segment.index())
                .ok_or(InstantiationError::MemoryIndexOutOfRange(segment.index()))?;

            let memory_size: crate::memory_units::Bytes = memory.current_size().into();
            let end = u64::from(offset) + segment.value().len() as u64;
            if end > memory_size.0 as u64 {
                return Err(InstantiationError::DataSegmentOutOfBounds {
                    offset,
                    len: segment.value().len(),
                }
                .into());
            }
            memory.set(offset, segment.value())?;
        }

        Ok(instance)
    }

    /// Instantiate a [module][`Module`].
    ///
    /// Note that in case of successful instantiation this function returns a
    /// reference to a module whose `start` function has not been called. In
    /// order to complete instantiation the `start` function must be called;
    /// the separation exists because host imports usually need to be
    /// registered before `start` runs.
    ///
    /// See [`NotStartedModuleRef`] for details.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the module cannot be instantiated: a referenced
    /// type, memory or global is missing, two exports share a name, or a
    /// data segment does not fit into its memory.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use wasmite::{Module, ModuleInstance, NopExternals};
    /// # fn func() -> Result<(), wasmite::Error> {
    /// # let module = Module::from_buffer([0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00]).unwrap();
    ///
    /// // ModuleInstance::new returns an instance whose `start` function
    /// // has not been called.
    /// let not_started = ModuleInstance::new(&module)?;
    /// // Call `start` function if any.
    /// let instance = not_started.run_start(&mut NopExternals)?;
    ///
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(loaded_module: &Module) -> Result<NotStartedModuleRef, Error> {
        let instance = ModuleInstance::alloc_module(loaded_module)?;
        Ok(NotStartedModuleRef {
            loaded_module,
            instance,
        })
    }

    /// Invoke exported function by a name.
    ///
    /// This function finds an exported function by name, and calls it with
    /// the provided arguments and external state. The returned values are in
    /// natural (declaration) order.
    ///
    /// # Errors
    ///
    /// Returns `Err` if:
    ///
    /// - there is no export with the given name or it is not a function,
    /// - the given arguments don't match the function signature,
    /// - a trap occurred at execution time.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use wasmite::{Module, ModuleInstance, NopExternals, RuntimeValue};
    /// # let wasm = wat::parse_str(r#"
    /// #   (module
    /// #       (func (export "add") (param i32 i32) (result i32)
    /// #           local.get 0
    /// #           local.get 1
    /// #           i32.add))
    /// # "#).unwrap();
    /// # let module = Module::from_buffer(&wasm).unwrap();
    /// # let instance = ModuleInstance::new(&module).unwrap().assert_no_start();
    /// assert_eq!(
    ///     instance
    ///         .invoke_export(
    ///             "add",
    ///             &[RuntimeValue::I32(5), RuntimeValue::I32(3)],
    ///             &mut NopExternals,
    ///         )
    ///         .unwrap(),
    ///     vec![RuntimeValue::I32(8)],
    /// );
    /// ```
    pub fn invoke_export<E: Externals>(
        &self,
        func_name: &str,
        args: &[RuntimeValue],
        externals: &mut E,
    ) -> Result<Vec<RuntimeValue>, Error> {
        let func_instance = self.func_by_name(func_name)?;

        FuncInstance::invoke(&func_instance, args, externals).map_err(Error::Trap)
    }

    fn func_by_name(&self, func_name: &str) -> Result<FuncRef, Error> {
        let extern_val = self
            .export_by_name(func_name)
            .ok_or_else(|| Error::Function(format!("Module doesn't have export {}", func_name)))?;

        match extern_val {
            ExternVal::Func(func_instance) => Ok(func_instance),
            unexpected => Err(Error::Function(format!(
                "Export {} is not a function, but {:?}",
                func_name, unexpected
            ))),
        }
    }

    /// Find export by a name.
    ///
    /// Returns `None` if there is no export with such name.
    pub fn export_by_name(&self, name: &str) -> Option<ExternVal> {
        self.exports.borrow().get(name).cloned()
    }
}

fn export_index_error(name: &str, index: u32) -> Error {
    Error::Function(format!(
        "Export {} refers to index {} which does not exist",
        name, index
    ))
}

fn eval_init_expr(
    init_expr: &InitExpr,
    instance: &ModuleInstance,
) -> Result<RuntimeValue, InstantiationError> {
    let value = match *init_expr {
        InitExpr::I32Const(value) => RuntimeValue::I32(value),
        InitExpr::I64Const(value) => RuntimeValue::I64(value),
        InitExpr::F32Const(bits) => RuntimeValue::decode_f32(bits),
        InitExpr::F64Const(bits) => RuntimeValue::decode_f64(bits),
        InitExpr::GlobalGet(idx) => instance
            .global_by_index(idx)
            .ok_or(InstantiationError::InvalidGlobalInit)?
            .get(),
    };
    Ok(value)
}

/// Mostly instantiated [`ModuleRef`].
///
/// At this point memories are allocated and data segments are copied, but
/// the `start` function (if any) has not run. To get a fully instantiated
/// module, call [`run_start`]; if you are sure the module has no `start`
/// function, [`assert_no_start`] skips that step.
///
/// [`run_start`]: #method.run_start
/// [`assert_no_start`]: #method.assert_no_start
pub struct NotStartedModuleRef<'a> {
    loaded_module: &'a Module,
    instance: ModuleRef,
}

impl<'a> NotStartedModuleRef<'a> {
    /// Returns a reference to the underlying instance.
    ///
    /// This is an escape hatch: the module may depend on initialization done
    /// by its `start` function, which has not run yet.
    pub fn not_started_instance(&self) -> &ModuleRef {
        &self.instance
    }

    /// Whether the module declares a `start` function.
    pub fn has_start(&self) -> bool {
        self.loaded_module.start().is_some()
    }

    /// Executes the `start` function (if any) and returns the fully
    /// instantiated module.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the `start` function traps or its index is out of
    /// range.
    pub fn run_start<E: Externals>(self, externals: &mut E) -> Result<ModuleRef, Error> {
        if let Some(start_idx) = self.loaded_module.start() {
            let func = self.instance.func_by_index(start_idx).ok_or_else(|| {
                Error::Function(format!("start function index {} out of range", start_idx))
            })?;
            FuncInstance::invoke(&func, &[], externals).map_err(Error::Trap)?;
        }
        Ok(self.instance)
    }

    /// Returns the fully instantiated module without running `start`.
    ///
    /// # Panics
    ///
    /// Panics if the module declares a `start` function.
    pub fn assert_no_start(self) -> ModuleRef {
        assert!(
            self.loaded_module.start().is_none(),
            "assert_no_start called on module with `start` function"
        );
        self.instance
    }
}
