use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use wasmite::{Module, Runtime, WasiSnapshotPreview1};

/// Runs the `_start` entry point of a WebAssembly module with the built-in
/// WASI preview1 host functions.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// The WebAssembly file to execute.
    #[clap(value_parser)]
    wasm_file: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let wasm_bytes = fs::read(&args.wasm_file)
        .with_context(|| format!("failed to read Wasm file {}", args.wasm_file))?;
    let module = Module::from_buffer(&wasm_bytes)
        .map_err(|error| anyhow!("failed to decode {}: {}", args.wasm_file, error))?;

    let mut runtime =
        Runtime::new(&module).map_err(|error| anyhow!("failed to instantiate: {}", error))?;
    WasiSnapshotPreview1::new().register(&mut runtime);

    runtime
        .start()
        .map_err(|error| anyhow!("start function trapped: {}", error))?;
    runtime
        .call("_start", &[])
        .map_err(|error| anyhow!("failed during execution of _start: {}", error))?;

    Ok(())
}
