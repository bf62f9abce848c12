//! # wasmite
//!
//! This library loads WebAssembly modules in binary format and invokes their
//! exported functions.
//!
//! The crate is split along the lifecycle of a module:
//!
//! - [`Module`] — the immutable result of decoding a binary module: typed
//!   sections and fully decoded instruction streams.
//! - [`ModuleInstance`] — the store: function, table, memory and global
//!   instances materialized from a module, plus its export table.
//! - The interpreter — a structured stack machine with an explicit label
//!   stack per call frame, driven through [`ModuleInstance::invoke_export`]
//!   or the [`Runtime`] facade.
//! - The host bridge — imported functions are addressed by
//!   `(module, field)` name and dispatched through [`Externals`];
//!   [`Imports`] is the closure-based registry most embedders want.
//!
//! ## Example
//!
//! ```rust
//! use wasmite::{Module, Runtime, RuntimeValue};
//!
//! let wasm = wat::parse_str(
//!     r#"
//!     (module
//!         (func (export "add") (param i32 i32) (result i32)
//!             local.get 0
//!             local.get 1
//!             i32.add))
//!     "#,
//! )
//! .unwrap();
//!
//! let module = Module::from_buffer(&wasm).unwrap();
//! let mut runtime = Runtime::new(&module).unwrap();
//! let results = runtime
//!     .call("add", &[RuntimeValue::I32(3), RuntimeValue::I32(4)])
//!     .unwrap();
//! assert_eq!(results, vec![RuntimeValue::I32(7)]);
//! ```

#![warn(missing_docs)]
#![allow(clippy::len_without_is_empty)]

use core::fmt;
use std::error;
use std::io;

/// Error type which can be thrown by wasm code or by the host environment.
///
/// Under some conditions, wasm execution may produce a `Trap`, which
/// immediately aborts execution. Traps can't be handled by WebAssembly code,
/// but are reported to the embedder.
#[derive(Debug)]
pub struct Trap {
    kind: TrapKind,
}

impl Trap {
    /// Create new trap.
    pub fn new(kind: TrapKind) -> Trap {
        Trap { kind }
    }

    /// Returns kind of this trap.
    pub fn kind(&self) -> &TrapKind {
        &self.kind
    }

    /// Converts into kind of this trap.
    pub fn into_kind(self) -> TrapKind {
        self.kind
    }
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Trap: {:?}", self.kind)
    }
}

impl error::Error for Trap {}

/// The reason execution was aborted.
///
/// See [`Trap`] for details.
#[derive(Debug)]
pub enum TrapKind {
    /// Wasm code executed the `unreachable` opcode.
    Unreachable,

    /// An instruction needed more operands than the stack held.
    ///
    /// The interpreter does not validate instruction streams ahead of time,
    /// so an ill-formed module surfaces here instead of at load time.
    StackUnderflow,

    /// The operand or call stack outgrew its configured limit.
    StackOverflow,

    /// An operand on the stack had a different type than the instruction
    /// expected, or a host function returned values that disagree with the
    /// import's signature.
    TypeMismatch,

    /// `local.get`/`local.set`/`local.tee` addressed a slot past the frame's
    /// locals.
    LocalIndexOutOfRange(u32),

    /// `global.get`/`global.set` addressed a global not present in the store.
    GlobalIndexOutOfRange(u32),

    /// `call` addressed a function not present in the store.
    FunctionIndexOutOfRange(u32),

    /// A load or store touched an address outside the linear memory.
    ///
    /// Addresses are unsigned, so out of bounds access can't happen with
    /// negative addresses; the failing access is always past the end of the
    /// buffer.
    MemoryAccessOutOfBounds,

    /// `global.set` on a global declared immutable.
    ImmutableGlobal,

    /// A branch targeted a label depth past the frame's label stack, or a
    /// block-like instruction had no matching `end`.
    UndefinedLabel,

    /// Integer division or remainder by zero.
    DivisionByZero,

    /// `INT_MIN / -1`, or a float truncation whose result does not fit the
    /// target integer type.
    IntegerOverflow,

    /// A non-saturating truncation of NaN to an integer.
    InvalidConversionToInt,

    /// A `call` resolved to an import whose module has not been registered.
    ImportModuleNotFound(String),

    /// A `call` resolved to an import whose module is registered but does
    /// not provide the named function.
    ImportFunctionNotFound(String, String),

    /// Error specified by the host.
    ///
    /// Typically returned from an implementation of [`Externals`].
    Host(Box<dyn HostError>),
}

impl TrapKind {
    /// Whether this trap is specified by the host.
    pub fn is_host(&self) -> bool {
        matches!(self, TrapKind::Host(_))
    }
}

/// Errors produced while decoding a binary module.
///
/// Decoding aborts on the first error; no partial [`Module`] is returned.
#[derive(Debug)]
pub enum DecodeError {
    /// An underlying read failed.
    Io(io::Error),
    /// The stream ended in the middle of a structure.
    UnexpectedEof,
    /// The first four bytes were not `\0asm`.
    InvalidMagic([u8; 4]),
    /// The version field was not 1.
    UnsupportedVersion(u32),
    /// A LEB128 group ran past the byte budget of its target width.
    MalformedLeb128,
    /// A section code outside the known range.
    UnsupportedSection(u8),
    /// The same section kind appeared twice.
    DuplicateSection(u8),
    /// A section's payload disagreed with its declared size.
    SectionSizeMismatch,
    /// A function type did not start with `0x60`.
    InvalidFuncType(u8),
    /// A value type byte outside `0x7C..=0x7F`.
    InvalidValueType(u8),
    /// A limits flag other than `0x00` or `0x01`.
    InvalidLimitsFlag(u8),
    /// A global mutability flag other than `0x00` or `0x01`.
    InvalidMutability(u8),
    /// A table element type other than `funcref`.
    InvalidElemType(u8),
    /// An initializer expression that is not a single constant or
    /// `global.get` followed by `end`.
    InvalidInitExpr(u8),
    /// An import or export name that is not valid UTF-8.
    InvalidUtf8,
    /// An opcode byte outside the recognized instruction set.
    UnknownOpcode(u8),
    /// An unknown subopcode in the `0xFC` prefix group.
    UnknownExtendedOpcode(u32),
    /// An import descriptor kind other than function.
    UnsupportedImportKind(u8),
    /// An export descriptor kind outside `0x00..=0x03`.
    UnsupportedExportKind(u8),
    /// The function and code sections declare different numbers of
    /// functions.
    FunctionCountMismatch {
        /// Entries in the function section.
        functions: usize,
        /// Bodies in the code section.
        bodies: usize,
    },
}

impl From<io::Error> for DecodeError {
    fn from(error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::UnexpectedEof {
            DecodeError::UnexpectedEof
        } else {
            DecodeError::Io(error)
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecodeError::Io(error) => write!(f, "read failed: {}", error),
            DecodeError::UnexpectedEof => write!(f, "unexpected end of input"),
            DecodeError::InvalidMagic(found) => {
                write!(f, "invalid magic header: {:02x?}", found)
            }
            DecodeError::UnsupportedVersion(version) => {
                write!(f, "unsupported version: {}", version)
            }
            DecodeError::MalformedLeb128 => write!(f, "malformed LEB128 integer"),
            DecodeError::UnsupportedSection(code) => {
                write!(f, "unsupported section code: {}", code)
            }
            DecodeError::DuplicateSection(code) => {
                write!(f, "duplicate section code: {}", code)
            }
            DecodeError::SectionSizeMismatch => {
                write!(f, "section payload disagrees with declared size")
            }
            DecodeError::InvalidFuncType(byte) => {
                write!(f, "invalid function type marker: 0x{:02x}", byte)
            }
            DecodeError::InvalidValueType(byte) => {
                write!(f, "invalid value type: 0x{:02x}", byte)
            }
            DecodeError::InvalidLimitsFlag(byte) => {
                write!(f, "invalid limits flag: 0x{:02x}", byte)
            }
            DecodeError::InvalidMutability(byte) => {
                write!(f, "invalid mutability flag: 0x{:02x}", byte)
            }
            DecodeError::InvalidElemType(byte) => {
                write!(f, "invalid element type: 0x{:02x}", byte)
            }
            DecodeError::InvalidInitExpr(byte) => {
                write!(f, "invalid initializer expression opcode: 0x{:02x}", byte)
            }
            DecodeError::InvalidUtf8 => write!(f, "name is not valid UTF-8"),
            DecodeError::UnknownOpcode(byte) => write!(f, "unknown opcode: 0x{:02x}", byte),
            DecodeError::UnknownExtendedOpcode(code) => {
                write!(f, "unknown 0xfc-prefixed opcode: {}", code)
            }
            DecodeError::UnsupportedImportKind(byte) => {
                write!(f, "unsupported import kind: 0x{:02x}", byte)
            }
            DecodeError::UnsupportedExportKind(byte) => {
                write!(f, "unsupported export kind: 0x{:02x}", byte)
            }
            DecodeError::FunctionCountMismatch { functions, bodies } => write!(
                f,
                "function section declares {} functions but code section has {} bodies",
                functions, bodies
            ),
        }
    }
}

impl error::Error for DecodeError {}

/// Errors produced while building a store from a decoded module.
#[derive(Debug)]
pub enum InstantiationError {
    /// Two exports share a name.
    DuplicateExport(String),
    /// A function referenced a type index past the type section.
    InvalidFunctionTypeIndex(u32),
    /// A data segment would be copied past the end of its memory.
    DataSegmentOutOfBounds {
        /// Evaluated segment offset.
        offset: u32,
        /// Length of the segment's initializer bytes.
        len: usize,
    },
    /// A global or data-segment initializer referenced a global that is not
    /// instantiated yet, or evaluated to the wrong type.
    InvalidGlobalInit,
    /// A data segment referenced a memory not present in the store.
    MemoryIndexOutOfRange(u32),
}

impl fmt::Display for InstantiationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InstantiationError::DuplicateExport(name) => {
                write!(f, "duplicate export: {}", name)
            }
            InstantiationError::InvalidFunctionTypeIndex(index) => {
                write!(f, "invalid function type index: {}", index)
            }
            InstantiationError::DataSegmentOutOfBounds { offset, len } => write!(
                f,
                "data segment [{}..{}] does not fit in memory",
                offset,
                u64::from(*offset) + *len as u64
            ),
            InstantiationError::InvalidGlobalInit => {
                write!(f, "invalid global initializer expression")
            }
            InstantiationError::MemoryIndexOutOfRange(index) => {
                write!(f, "invalid memory index: {}", index)
            }
        }
    }
}

impl error::Error for InstantiationError {}

/// Internal interpreter error.
#[derive(Debug)]
pub enum Error {
    /// Module decoding error. Might occur only at load time.
    Decode(DecodeError),
    /// Error while instantiating a module.
    Instantiation(InstantiationError),
    /// Function-level error.
    Function(String),
    /// Memory-level error.
    Memory(String),
    /// Global-level error.
    Global(String),
    /// Trap.
    Trap(Trap),
    /// Custom embedder error.
    Host(Box<dyn HostError>),
}

impl Error {
    /// Returns a reference to a [`HostError`] if this `Error` represents
    /// some host error.
    ///
    /// I.e. if this error has variant [`Error::Host`] or [`Error::Trap`]
    /// with a [`TrapKind::Host`] kind.
    pub fn as_host_error(&self) -> Option<&dyn HostError> {
        match self {
            Error::Host(host_err) => Some(&**host_err),
            Error::Trap(Trap {
                kind: TrapKind::Host(host_err),
            }) => Some(&**host_err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Decode(error) => write!(f, "Decode: {}", error),
            Error::Instantiation(error) => write!(f, "Instantiation: {}", error),
            Error::Function(s) => write!(f, "Function: {}", s),
            Error::Memory(s) => write!(f, "Memory: {}", s),
            Error::Global(s) => write!(f, "Global: {}", s),
            Error::Trap(trap) => write!(f, "Trap: {:?}", trap),
            Error::Host(error) => write!(f, "User: {}", error),
        }
    }
}

impl error::Error for Error {}

impl<U> From<U> for Error
where
    U: host::HostError + Sized,
{
    fn from(e: U) -> Self {
        Error::Host(Box::new(e))
    }
}

impl<U> From<U> for Trap
where
    U: host::HostError + Sized,
{
    fn from(e: U) -> Self {
        Trap::new(TrapKind::Host(Box::new(e)))
    }
}

impl From<Trap> for Error {
    fn from(e: Trap) -> Error {
        Error::Trap(e)
    }
}

impl From<TrapKind> for Trap {
    fn from(e: TrapKind) -> Trap {
        Trap::new(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Error {
        Error::Decode(e)
    }
}

impl From<InstantiationError> for Error {
    fn from(e: InstantiationError) -> Error {
        Error::Instantiation(e)
    }
}

mod elements;
mod func;
mod global;
mod host;
mod isa;
pub mod leb128;
mod memory;
mod module;
pub mod nan_preserving_float;
mod runner;
mod runtime;
mod table;
mod types;
mod value;
mod wasi;

#[cfg(test)]
mod tests;

pub use self::elements::{
    DataSegment, Export, External, FuncType, GlobalEntry, GlobalType, ImportEntry, InitExpr,
    Internal, Limits, Local, Module, TableType, ValueType,
};
pub use self::func::{FuncBody, FuncInstance, FuncRef};
pub use self::global::{GlobalInstance, GlobalRef};
pub use self::host::{Externals, HostError, Imports, NopExternals, RuntimeArgs};
pub use self::isa::{BlockType, Instruction, MemArg};
pub use self::memory::{MemoryInstance, MemoryRef, LINEAR_MEMORY_PAGE_SIZE};
pub use self::module::{ExternVal, ModuleInstance, ModuleRef, NotStartedModuleRef};
pub use self::runner::{DEFAULT_CALL_STACK_LIMIT, DEFAULT_VALUE_STACK_LIMIT};
pub use self::runtime::Runtime;
pub use self::table::{TableInstance, TableRef};
pub use self::types::Signature;
pub use self::value::{FromRuntimeValue, LittleEndianConvert, RuntimeValue};
pub use self::wasi::{WasiError, WasiSnapshotPreview1};

/// WebAssembly-specific sizes and units.
pub mod memory_units {
    pub use memory_units::wasm32::*;
    pub use memory_units::{size_of, ByteSize, Bytes, RoundUpTo};
}
