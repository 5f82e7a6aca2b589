pub mod analyzer;
pub mod asm;
pub mod bytecode;
pub mod cli;
pub mod config;
pub mod error;
pub mod frame;
pub mod instrument;
pub mod runtime;
pub mod specs;
pub mod transformer;
pub mod vm;

#[cfg(test)]
mod tests;

// Re-export main types
pub use analyzer::{analyze_method, MethodAnalyzeResult};
pub use asm::{assemble, disassemble, Assembly};
pub use bytecode::{Class, Insn, Method, MethodId, Program};
pub use error::{Error, ErrorKind, Result};
pub use instrument::{instrument_program, InstrumentOptions, InstrumentReport};
pub use runtime::{Coro, Dispatcher, Throw, Value};
pub use specs::{MethodDecl, RestorePointSpec, SpecProvider, SpecTable};
pub use transformer::transform_method;
pub use vm::{Console, Vm};
