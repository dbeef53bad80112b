//! synthloop library crate
//!
//! Exposes the synthesis loop and its parts so benchmarks and external
//! tooling can drive them without going through the CLI.

pub mod config;
pub mod coverage;
pub mod error;
pub mod harness;
pub mod llm;
pub mod normalize;
pub mod runner;
pub mod synth;
pub mod target;
pub mod testing;
pub mod util;
