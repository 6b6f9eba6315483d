pub mod conversation;
pub mod error;
pub mod policy;
pub mod prompt;
pub mod sandbox;
pub mod substitute;

pub use conversation::{Intent, Pipeline, RejectionStage, Reply, Session, SessionState};
pub use error::ExecutionError;
pub use policy::{DenyRule, DenylistPolicy, SafetyPolicy, Verdict};
pub use prompt::{ReadRequest, extract_read_request};
pub use sandbox::{ExecutionResult, Executor, PythonSandbox, Runtime, SandboxConfig};
pub use substitute::substitute_value;
