//! Subcommand modules for the `biomodal` binary.

pub mod align;
pub mod collapse;
