//! A minimal `wasi_snapshot_preview1` host module.
//!
//! This is the example host module for the import bridge: it exposes
//! `fd_write` over a table of file descriptors backed by `io::Write`
//! sinks. It is enough to run the classic "hello world" module that prints
//! through file descriptor 1.

use crate::host::{HostError, RuntimeArgs};
use crate::module::ModuleRef;
use crate::runtime::Runtime;
use crate::value::RuntimeValue;
use crate::{Trap, TrapKind};
use core::fmt;
use std::io::{self, Write};

/// Errors reported by the WASI host functions, surfaced to the embedder as
/// [`TrapKind::Host`] traps.
#[derive(Debug)]
pub enum WasiError {
    /// A file descriptor outside the descriptor table.
    BadFileDescriptor(i32),
    /// Writing to the descriptor's sink failed.
    Io(io::Error),
}

impl fmt::Display for WasiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WasiError::BadFileDescriptor(fd) => write!(f, "invalid file descriptor: {}", fd),
            WasiError::Io(error) => write!(f, "i/o error: {}", error),
        }
    }
}

impl HostError for WasiError {}

/// The `wasi_snapshot_preview1` example host module.
///
/// The descriptor table starts with the conventional three entries: fd 0
/// (stdin, a sink — this module never reads), fd 1 (stdout) and fd 2
/// (stderr). Tests and embedders can substitute their own writers with
/// [`with_file_table`][`WasiSnapshotPreview1::with_file_table`].
pub struct WasiSnapshotPreview1 {
    file_table: Vec<Box<dyn Write + Send>>,
}

impl Default for WasiSnapshotPreview1 {
    fn default() -> Self {
        Self::new()
    }
}

impl WasiSnapshotPreview1 {
    /// Creates the host module with the process's stdout and stderr.
    pub fn new() -> WasiSnapshotPreview1 {
        WasiSnapshotPreview1 {
            file_table: vec![
                Box::new(io::sink()),
                Box::new(io::stdout()),
                Box::new(io::stderr()),
            ],
        }
    }

    /// Creates the host module over a caller-provided descriptor table.
    pub fn with_file_table(file_table: Vec<Box<dyn Write + Send>>) -> WasiSnapshotPreview1 {
        WasiSnapshotPreview1 { file_table }
    }

    /// Registers this host module's functions on `runtime` under the
    /// `wasi_snapshot_preview1` module name.
    pub fn register(self, runtime: &mut Runtime) {
        let mut wasi = self;
        runtime.add_import("wasi_snapshot_preview1", "fd_write", move |store, args| {
            wasi.fd_write(store, args)
        });
    }

    /// `fd_write(fd, iovs_ptr, iovs_len, nwritten_ptr) -> errno`.
    ///
    /// Walks `iovs_len` iovec records of two little-endian u32s (buffer
    /// start and length) at `iovs_ptr`, writes each referenced memory slice
    /// to the descriptor, stores the accumulated byte count at
    /// `nwritten_ptr` and returns errno 0.
    pub fn fd_write(
        &mut self,
        store: &ModuleRef,
        args: RuntimeArgs,
    ) -> Result<Vec<RuntimeValue>, Trap> {
        let fd: i32 = args.nth_checked(0)?;
        let iovs: u32 = args.nth_checked(1)?;
        let iovs_len: u32 = args.nth_checked(2)?;
        let nwritten_ptr: u32 = args.nth_checked(3)?;

        let memory = store
            .memory_by_index(0)
            .ok_or(TrapKind::MemoryAccessOutOfBounds)?;

        let file = usize::try_from(fd)
            .ok()
            .and_then(|fd| self.file_table.get_mut(fd))
            .ok_or(WasiError::BadFileDescriptor(fd))?;

        let mut iov_ptr = iovs;
        let mut nwritten: u32 = 0;
        for _ in 0..iovs_len {
            let start: u32 = memory
                .get_value(iov_ptr)
                .map_err(|_| TrapKind::MemoryAccessOutOfBounds)?;
            let len: u32 = memory
                .get_value(iov_ptr.wrapping_add(4))
                .map_err(|_| TrapKind::MemoryAccessOutOfBounds)?;
            iov_ptr = iov_ptr.wrapping_add(8);

            let bytes = memory
                .get(start, len as usize)
                .map_err(|_| TrapKind::MemoryAccessOutOfBounds)?;
            file.write_all(&bytes).map_err(WasiError::Io)?;
            nwritten = nwritten.wrapping_add(len);
        }

        memory
            .set_value(nwritten_ptr, nwritten as i32)
            .map_err(|_| TrapKind::MemoryAccessOutOfBounds)?;

        Ok(vec![RuntimeValue::I32(0)])
    }
}
