// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`runner`] defines the [`ProcessRunner`] trait the coordinator drives,
//!   and [`CommandRunner`], which runs the real build command and backend.
//! - [`process`] owns a single live backend ([`SupervisedProcess`]).
//! - [`stream`] forwards child output and captures stderr diagnostics.

pub mod process;
pub mod runner;
pub mod stream;

pub use process::SupervisedProcess;
pub use runner::{BoxFuture, CommandRunner, ProcessRunner, RunnerConfig};
pub use stream::{Diagnostics, OutputStreams};
