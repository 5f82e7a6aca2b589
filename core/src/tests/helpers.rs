//! Test helpers for end-to-end tests
//!
//! Common utilities for instrumenting programs and building VMs

use crate::asm::assemble;
use crate::bytecode::{MethodId, Program};
use crate::instrument::{instrument_program, InstrumentOptions, InstrumentReport};
use crate::vm::Vm;

/// Assemble, instrument, serialize/deserialize, and create a VM
///
/// This helper:
/// - Assembles the source and collects its `.await`/`.entry` declarations
/// - Instruments every declared method (failing classes fail the test)
/// - Round-trips the rewritten program through JSON
/// - Creates a VM over the result
pub fn instrumented_vm(source: &str) -> (Vm, InstrumentReport) {
    let (program, report) = instrumented(source);
    (Vm::new(program), report)
}

pub fn instrumented(source: &str) -> (Program, InstrumentReport) {
    let assembly = assemble(source).expect("Assembly failed");
    let options = InstrumentOptions { fail_fast: true };
    let (program, report) = instrument_program(&assembly.program, &assembly.specs, &options)
        .expect("Instrumentation failed");

    let json = serde_json::to_string(&program).expect("Program serialization failed");
    let program: Program = serde_json::from_str(&json).expect("Program deserialization failed");
    (program, report)
}

/// VM over the program exactly as written.
pub fn plain_vm(source: &str) -> Vm {
    Vm::new(assemble(source).expect("Assembly failed").program)
}

pub fn run_of(owner: &str) -> MethodId {
    MethodId::new(owner, "run", "()V")
}
