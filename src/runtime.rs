use crate::elements::Module;
use crate::func::{FuncInstance, FuncRef};
use crate::host::{Imports, RuntimeArgs};
use crate::module::{ModuleInstance, ModuleRef};
use crate::{Error, RuntimeValue, Trap};

/// A module instance paired with its host imports.
///
/// `Runtime` is the one-stop embedder surface: decode a [`Module`], build a
/// `Runtime` from it, register host functions, and call exports. For
/// finer-grained control (sharing one [`Imports`] registry across modules,
/// custom [`Externals`][`crate::Externals`] implementations), use
/// [`ModuleInstance`] directly.
///
/// # Examples
///
/// ```rust
/// use wasmite::{Module, Runtime, RuntimeValue};
///
/// let wasm = wat::parse_str(
///     r#"
///     (module
///         (import "env" "add" (func $add (param i32) (result i32)))
///         (func (export "call_add") (param i32) (result i32)
///             local.get 0
///             call $add))
///     "#,
/// )
/// .unwrap();
///
/// let module = Module::from_buffer(&wasm).unwrap();
/// let mut runtime = Runtime::new(&module).unwrap();
/// runtime.add_import("env", "add", |_store, args| {
///     let n: i32 = args.nth_checked(0)?;
///     Ok(vec![RuntimeValue::I32(n + n)])
/// });
/// let results = runtime.call("call_add", &[RuntimeValue::I32(3)]).unwrap();
/// assert_eq!(results, vec![RuntimeValue::I32(6)]);
/// ```
pub struct Runtime {
    instance: ModuleRef,
    imports: Imports,
    start_func: Option<FuncRef>,
}

impl Runtime {
    /// Decode-independent constructor: instantiates `module` into a fresh
    /// store.
    ///
    /// The module's `start` function, if any, is *not* run here — host
    /// imports usually have to be registered first. Call
    /// [`start`][`Runtime::start`] once registration is done; it is also
    /// harmless on modules without a `start` section.
    ///
    /// # Errors
    ///
    /// Returns `Err` if instantiation fails.
    pub fn new(module: &Module) -> Result<Runtime, Error> {
        let not_started = ModuleInstance::new(module)?;
        let instance = not_started.not_started_instance().clone();
        let start_func = match module.start() {
            Some(index) => Some(instance.func_by_index(index).ok_or_else(|| {
                Error::Function(format!("start function index {} out of range", index))
            })?),
            None => None,
        };
        Ok(Runtime {
            instance,
            imports: Imports::new(),
            start_func,
        })
    }

    /// Register a host function under `(module, field)` import names.
    ///
    /// See [`Imports::add_import`].
    pub fn add_import<F>(&mut self, module: &str, field: &str, func: F)
    where
        F: FnMut(&ModuleRef, RuntimeArgs) -> Result<Vec<RuntimeValue>, Trap> + 'static,
    {
        self.imports.add_import(module, field, func);
    }

    /// Runs the module's `start` function, if one is declared and has not
    /// run yet.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the `start` function traps.
    pub fn start(&mut self) -> Result<(), Error> {
        if let Some(func) = self.start_func.take() {
            FuncInstance::invoke(&func, &[], &mut self.imports).map_err(Error::Trap)?;
        }
        Ok(())
    }

    /// Invokes the exported function `name` with `args`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the export is missing or not a function, the
    /// argument types disagree with its signature, or execution traps.
    pub fn call(&mut self, name: &str, args: &[RuntimeValue]) -> Result<Vec<RuntimeValue>, Error> {
        self.instance.invoke_export(name, args, &mut self.imports)
    }

    /// The underlying store, for inspecting exported memories and globals.
    pub fn instance(&self) -> &ModuleRef {
        &self.instance
    }
}
