//! Pure, deterministic logic: value tree, literal evaluation, output
//! parsing, envelope extraction, and task state types. No I/O; everything
//! here is testable in isolation.

pub mod envelope;
pub mod parser;
pub mod state;
pub mod value;
