//! Data models for rfpscout.

mod notification;
mod portal;
mod rfp;
mod scan;
mod workflow;

pub use notification::{Notification, NotificationKind};
pub use portal::{Portal, PortalFilters, PortalSelectors, PortalStatus};
pub use rfp::{DiscoveredRfp, Rfp};
pub use scan::{
    LogLevel, ScanEvent, ScanEventRecord, ScanOutcome, ScanSession, ScanStatus, ScanStep,
};
pub use workflow::{WorkflowPhase, WorkflowState, WorkflowStatus};
