// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`backend`] defines the [`TaskExecutor`] contract the coordinator
//!   calls for every task of every unit; tests replace it with fakes.
//! - [`task_runner`] runs one unit's pipeline with timeouts and
//!   cancellation, reporting back via `RunEvent::UnitCompleted`.
//! - [`process`] is the production executor, spawning `puppet` and shell
//!   commands with `tokio::process::Command`.

pub mod backend;
pub mod process;
pub mod task_runner;

pub use backend::{TaskExecutor, TaskInvocation, TaskOutcome};
pub use process::ProcessExecutor;
pub use task_runner::run_unit;
