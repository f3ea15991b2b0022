//! State machine module.

pub mod handlers;
pub mod machine;

pub use handlers::{StepContext, run_step};
pub use machine::{DeploymentState, process_batch, step_pending_deployments};
