//! Multi-phase workflow engine with durable suspension.

mod coordinator;
mod input;

pub use coordinator::{DiscoveryParams, WorkflowCoordinator, WorkflowError};
pub use input::HumanInput;
