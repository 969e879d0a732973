//! Logger (component H): the append-only, bounded-tail-read log
//! file the hosting UI reads. Distinct from the workspace's ambient
//! `tracing` output — this is business-level, UI-queryable logging.

mod error;
mod logger;
mod types;

pub use error::{LogError, LogResult};
pub use logger::Logger;
pub use types::LogLevel;
