//! Strategy engine: static validation, capability-restricted script execution and the
//! technical indicators exposed to strategy scripts.

pub mod capabilities;
pub mod indicators;
pub mod sandbox;
pub mod traits;
pub mod validator;

pub use capabilities::{Budget, Capability};
pub use sandbox::{
    parse_signals, ExecutionReport, ExecutionState, SandboxConfig, SandboxError, ScriptSandbox,
};
pub use traits::SignalGenerator;
pub use validator::{CodeValidator, ValidatedStrategy, ValidationResult};
