//! Progress stream (component B): live job/connection progress,
//! checkpoint persistence, cancellation flags, and execution history.

mod checkpoint;
mod error;
mod events;
mod history;
mod stream;
mod types;

pub use checkpoint::Checkpoint;
pub use error::{StateError, StateResult};
pub use events::ProgressEvent;
pub use history::ExecutionHistory;
pub use stream::ProgressStream;
pub use types::{
    ConnectionProgress, ConnectionState, ExecutionHistoryRecord, JobProgress, JobState,
};
