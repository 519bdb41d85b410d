//! Portal scanning: session registry, executor, and scheduler.

pub mod executor;
pub mod extract;
pub mod registry;
pub mod scheduler;

pub use executor::{ExecutorError, HttpFetcher, PageFetcher, PortalScanExecutor};
pub use registry::{RegistryError, ScanRegistry, ScanSubscription};
pub use scheduler::{PortalScheduler, ScheduledJob};
