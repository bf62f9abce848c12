use crate::elements::ValueType;
use crate::host::Externals;
use crate::isa::Instruction;
use crate::module::{ModuleInstance, ModuleRef};
use crate::runner::{check_function_args, check_function_results, Interpreter};
use crate::types::Signature;
use crate::{RuntimeValue, Trap};
use core::fmt;
use std::rc::{Rc, Weak};

/// Reference to a function (See [`FuncInstance`] for details).
///
/// This reference has a reference-counting semantics.
#[derive(Clone, Debug)]
pub struct FuncRef(Rc<FuncInstance>);

impl ::core::ops::Deref for FuncRef {
    type Target = FuncInstance;
    fn deref(&self) -> &FuncInstance {
        &self.0
    }
}

/// Runtime representation of a function.
///
/// Functions are the unit of organization of code in WebAssembly. Each
/// function takes a sequence of values as parameters and either returns
/// values or traps.
///
/// Functions can be defined either:
///
/// - by a wasm module — an *internal* function carrying its decoded body, or
/// - by the host environment — an import addressed by module and field name,
///   dispatched through [`Externals`] when called.
pub struct FuncInstance(FuncInstanceInternal);

pub(crate) enum FuncInstanceInternal {
    Internal {
        signature: Rc<Signature>,
        module: Weak<ModuleInstance>,
        body: Rc<FuncBody>,
    },
    Host {
        signature: Rc<Signature>,
        module: Weak<ModuleInstance>,
        module_name: String,
        field_name: String,
    },
}

impl fmt::Debug for FuncInstance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.as_internal() {
            FuncInstanceInternal::Internal { signature, .. } => {
                // We can't print the module here: doing so would recurse
                // back into this function instance.
                write!(f, "Internal {{ signature={:?} }}", signature)
            }
            FuncInstanceInternal::Host {
                signature,
                module_name,
                field_name,
                ..
            } => {
                write!(
                    f,
                    "Host {{ {}.{} signature={:?} }}",
                    module_name, field_name, signature
                )
            }
        }
    }
}

impl FuncInstance {
    /// Returns [signature] of this function instance.
    ///
    /// This function instance can only be called with matching signatures.
    ///
    /// [signature]: struct.Signature.html
    pub fn signature(&self) -> &Signature {
        match self.as_internal() {
            FuncInstanceInternal::Internal { signature, .. } => signature,
            FuncInstanceInternal::Host { signature, .. } => signature,
        }
    }

    pub(crate) fn as_internal(&self) -> &FuncInstanceInternal {
        &self.0
    }

    pub(crate) fn alloc_internal(
        module: Weak<ModuleInstance>,
        signature: Rc<Signature>,
        body: FuncBody,
    ) -> FuncRef {
        let func = FuncInstanceInternal::Internal {
            signature,
            module,
            body: Rc::new(body),
        };
        FuncRef(Rc::new(FuncInstance(func)))
    }

    pub(crate) fn alloc_host(
        module: Weak<ModuleInstance>,
        signature: Rc<Signature>,
        module_name: String,
        field_name: String,
    ) -> FuncRef {
        let func = FuncInstanceInternal::Host {
            signature,
            module,
            module_name,
            field_name,
        };
        FuncRef(Rc::new(FuncInstance(func)))
    }

    /// Invoke this function.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the `args` types do not match the function
    /// [`signature`], or if a [`Trap`] occurred at execution time.
    ///
    /// [`signature`]: #method.signature
    pub fn invoke<E: Externals>(
        func: &FuncRef,
        args: &[RuntimeValue],
        externals: &mut E,
    ) -> Result<Vec<RuntimeValue>, Trap> {
        check_function_args(func.signature(), args)?;
        match func.as_internal() {
            FuncInstanceInternal::Internal { .. } => {
                let mut interpreter = Interpreter::new(func, args)?;
                interpreter.start_execution(externals)
            }
            FuncInstanceInternal::Host {
                signature,
                module,
                module_name,
                field_name,
            } => {
                let module = ModuleRef(module.upgrade().expect("module deallocated"));
                let results =
                    externals.invoke_import(&module, module_name, field_name, args.into())?;
                check_function_results(signature, &results)?;
                Ok(results)
            }
        }
    }
}

/// An internal function's executable body: the flattened locals template and
/// the decoded instruction stream.
///
/// Locals are stored as one type per slot — the `(count, type)` runs of the
/// binary format are expanded at instantiation time — so pushing a call
/// frame is a plain iteration over zero values.
#[derive(Clone, Debug)]
pub struct FuncBody {
    pub(crate) locals: Vec<ValueType>,
    pub(crate) code: Rc<[Instruction]>,
}

impl FuncBody {
    pub(crate) fn new(locals: Vec<ValueType>, code: Vec<Instruction>) -> FuncBody {
        FuncBody {
            locals,
            code: code.into(),
        }
    }

    /// The flattened local slots, one type per zero-initialized slot.
    pub fn locals(&self) -> &[ValueType] {
        &self.locals
    }

    /// The instruction stream, terminated by `end` at function scope.
    pub fn code(&self) -> &[Instruction] {
        &self.code
    }
}
