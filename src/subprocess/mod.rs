//! Local process execution
//!
//! Every external program the transports spawn (`ssh`, mostly) goes through a
//! [`ProcessRunner`], so tests can swap in [`MockProcessRunner`] and assert on
//! the exact command lines without a network.

pub mod builder;
pub mod error;
pub mod mock;
pub mod runner;

#[cfg(test)]
mod tests;

pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
pub use mock::{MockCommandConfig, MockProcessRunner};
pub use runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner, TokioProcessRunner};
