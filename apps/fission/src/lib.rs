//! # Fission Application Library
//!
//! Pieces of the `fission` binary that are reusable from tests: the CLI
//! definitions, the concrete stage kinds and the lattice demo.

pub mod cli;
pub mod demo;
pub mod stages;
