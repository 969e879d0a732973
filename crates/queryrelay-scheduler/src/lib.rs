//! Scheduler (component E): turns recurrence rules into firing
//! timers, serialises job runs through a non-overlap rule, and owns the
//! on-disk catalogue (jobs, connections, settings).

mod error;
mod firing;
mod recurrence;
mod scheduler;
mod store;

pub use error::{SchedulerError, SchedulerResult};
pub use firing::{FireCallback, FiringRegistry};
pub use recurrence::next_fire_after;
pub use scheduler::Scheduler;
pub use store::CatalogueStore;
