use crate::module::ModuleRef;
use crate::value::{FromRuntimeValue, RuntimeValue};
use crate::{Trap, TrapKind};
use downcast_rs::{impl_downcast, DowncastSync};
use std::collections::BTreeMap;

/// Wrapper around slice of [`RuntimeValue`] for using it
/// as an argument list conveniently.
#[derive(Debug)]
pub struct RuntimeArgs<'a>(&'a [RuntimeValue]);

impl<'a> From<&'a [RuntimeValue]> for RuntimeArgs<'a> {
    fn from(inner: &'a [RuntimeValue]) -> Self {
        RuntimeArgs(inner)
    }
}

impl<'a> AsRef<[RuntimeValue]> for RuntimeArgs<'a> {
    fn as_ref(&self) -> &[RuntimeValue] {
        self.0
    }
}

impl<'a> RuntimeArgs<'a> {
    /// Extract argument by index `idx`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if cast is invalid or not enough arguments.
    pub fn nth_checked<T>(&self, idx: usize) -> Result<T, Trap>
    where
        T: FromRuntimeValue,
    {
        self.nth_value_checked(idx)?
            .try_into()
            .ok_or_else(|| TrapKind::TypeMismatch.into())
    }

    /// Extract argument as a [`RuntimeValue`] by index `idx`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if this list has not enough arguments.
    pub fn nth_value_checked(&self, idx: usize) -> Result<RuntimeValue, Trap> {
        if self.0.len() <= idx {
            return Err(TrapKind::TypeMismatch.into());
        }
        Ok(self.0[idx])
    }

    /// Extract argument by index `idx`.
    ///
    /// # Panics
    ///
    /// Panics if cast is invalid or not enough arguments.
    pub fn nth<T>(&self, idx: usize) -> T
    where
        T: FromRuntimeValue,
    {
        let value = self.nth_value_checked(idx).expect("Invalid argument index");
        value.try_into().expect("Unexpected argument type")
    }

    /// Total number of arguments
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Trait that allows the host to return custom error.
///
/// It should be useful for representing custom traps,
/// troubles at instantiation time or other host specific conditions.
///
/// Types that implement this trait can automatically be converted to
/// `wasmite::Error` and `wasmite::Trap` and will be represented as a boxed
/// `HostError`. You can then use the various methods on `wasmite::Error` to
/// get your custom error type back.
///
/// # Examples
///
/// ```rust
/// use std::fmt;
/// use wasmite::{Error, HostError};
///
/// #[derive(Debug)]
/// struct MyError {
///     code: u32,
/// }
///
/// impl fmt::Display for MyError {
///     fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
///         write!(f, "MyError, code={}", self.code)
///     }
/// }
///
/// impl HostError for MyError {}
///
/// fn failable_fn() -> Result<(), Error> {
///     let my_error = MyError { code: 1312 };
///     Err(my_error.into())
/// }
///
/// match failable_fn() {
///     Err(err) => {
///         let my_error = err
///             .as_host_error()
///             .expect("expected host error")
///             .downcast_ref::<MyError>()
///             .unwrap();
///         assert_eq!(my_error.code, 1312);
///     }
///     _ => panic!(),
/// }
/// ```
pub trait HostError: 'static + core::fmt::Display + core::fmt::Debug + DowncastSync {}
impl_downcast!(HostError);

/// Trait that allows to implement host functions.
///
/// An imported function is addressed by the `(module, field)` name pair of
/// its import entry; the interpreter calls [`invoke_import`] with those
/// names, the store the module was instantiated into, and the argument
/// values popped off the operand stack. The returned values are pushed back
/// onto the stack after being checked against the import's signature.
///
/// [`invoke_import`]: Externals::invoke_import
pub trait Externals {
    /// Perform invoke of a host function addressed by its import names.
    fn invoke_import(
        &mut self,
        store: &ModuleRef,
        module: &str,
        field: &str,
        args: RuntimeArgs,
    ) -> Result<Vec<RuntimeValue>, Trap>;
}

/// Implementation of [`Externals`] that traps on every import call.
///
/// Useful for modules that import nothing.
pub struct NopExternals;

impl Externals for NopExternals {
    fn invoke_import(
        &mut self,
        _store: &ModuleRef,
        module: &str,
        _field: &str,
        _args: RuntimeArgs,
    ) -> Result<Vec<RuntimeValue>, Trap> {
        Err(TrapKind::ImportModuleNotFound(module.to_string()).into())
    }
}

type HostFunc = Box<dyn FnMut(&ModuleRef, RuntimeArgs) -> Result<Vec<RuntimeValue>, Trap>>;

/// A registry of host functions keyed by `(module, field)` import names.
///
/// This is the [`Externals`] implementation behind
/// [`Runtime::add_import`][`crate::Runtime::add_import`].
///
/// # Examples
///
/// ```rust
/// use wasmite::{Imports, RuntimeValue};
///
/// let mut imports = Imports::new();
/// imports.add_import("env", "answer", |_store, _args| {
///     Ok(vec![RuntimeValue::I32(42)])
/// });
/// ```
#[derive(Default)]
pub struct Imports {
    modules: BTreeMap<String, BTreeMap<String, HostFunc>>,
}

impl Imports {
    /// Create an empty registry.
    pub fn new() -> Imports {
        Imports::default()
    }

    /// Register a host function under `(module, field)`.
    ///
    /// The function receives the store and the call arguments, and returns
    /// the values to push, matching the import's declared signature. A
    /// function registered twice under the same names replaces the earlier
    /// one.
    pub fn add_import<F>(&mut self, module: &str, field: &str, func: F)
    where
        F: FnMut(&ModuleRef, RuntimeArgs) -> Result<Vec<RuntimeValue>, Trap> + 'static,
    {
        self.modules
            .entry(module.to_string())
            .or_default()
            .insert(field.to_string(), Box::new(func));
    }
}

impl Externals for Imports {
    fn invoke_import(
        &mut self,
        store: &ModuleRef,
        module: &str,
        field: &str,
        args: RuntimeArgs,
    ) -> Result<Vec<RuntimeValue>, Trap> {
        let fields = self
            .modules
            .get_mut(module)
            .ok_or_else(|| Trap::new(TrapKind::ImportModuleNotFound(module.to_string())))?;
        let func = fields.get_mut(field).ok_or_else(|| {
            Trap::new(TrapKind::ImportFunctionNotFound(
                module.to_string(),
                field.to_string(),
            ))
        })?;
        func(store, args)
    }
}
