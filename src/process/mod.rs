//! Supervised interactive child processes.
//!
//! - `output`: per-process output multiplexer and subscriber fan-out.
//! - `registry`: shared handle-to-process table.
//! - `signal`: process-group termination signals.
//! - `supervisor`: spawn / input / list / kill operations.

pub mod output;
pub mod registry;
pub mod signal;
pub mod supervisor;

pub use output::{EventReceiver, OutputMux, OutputStream, ProcessEvent, ProcessHandle};
pub use registry::{ProcessInfo, ProcessRegistry};
pub use supervisor::{ProcessSupervisor, SpawnedProcess};
