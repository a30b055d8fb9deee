//! Side-effecting adapters: service clients, the docker sandbox, prompt
//! rendering, config, question discovery, and result persistence.
//! Isolated from core logic to enable scripted doubles in tests.

pub mod config;
pub mod generate;
pub mod process;
pub mod prompt;
pub mod questions;
pub mod results;
pub mod retrieve;
pub mod sandbox;
