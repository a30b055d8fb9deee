//! Self-correcting code-synthesis harness.
//!
//! This crate drives a generative model through a bounded retry loop per
//! benchmark question: retrieve repository context, generate a Python
//! function, normalize its format, execute it in an isolated sandbox,
//! parse the printed result, and feed failures back as critiques until
//! the answer is complete or the iteration budget runs out. The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (output parsing, envelope
//!   extraction, task state). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (generation/retrieval HTTP
//!   clients, docker sandbox, prompt rendering, persistence). Isolated to
//!   enable scripted doubles in tests.
//!
//! Orchestration modules ([`pipeline`], [`run`]) coordinate core logic
//! with the service adapters to implement the CLI.

pub mod core;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
