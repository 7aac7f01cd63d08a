pub mod scheduler;
pub mod service;

pub use scheduler::{Scheduler, SchedulerConfig, SchedulerSummary};
pub use service::{DispatchService, NewPort, NewSeaplane, OrderView, PortView, SeaplaneView, Snapshot};
