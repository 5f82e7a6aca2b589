//! End-to-end tests: assemble, instrument, then run coroutines on the interpreter
//!
//! Organized by feature area

mod dispatcher_tests;
mod helpers;
mod suspend_tests;
