//! Workflow orchestration for key enrollment and keyfile provisioning.

mod add_key;
mod create_keyfile;
mod provision;

pub use add_key::{add_key, add_key_with};
pub use create_keyfile::create_keyfile;
pub use provision::{
    provision_crypttab, BatchPolicy, DeviceOutcome, DeviceResult, ProvisionReport,
};

/// Severity levels used when reporting workflow events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowLevel {
    Info,
    Success,
    Warn,
    Error,
}

/// Single line of output produced by a workflow step.
#[derive(Debug, Clone)]
pub struct WorkflowEvent {
    pub level: WorkflowLevel,
    pub message: String,
}

/// Aggregated report returned by any workflow entry point.
#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub title: String,
    pub events: Vec<WorkflowEvent>,
}

pub(crate) fn event(level: WorkflowLevel, message: impl Into<String>) -> WorkflowEvent {
    WorkflowEvent {
        level,
        message: message.into(),
    }
}
