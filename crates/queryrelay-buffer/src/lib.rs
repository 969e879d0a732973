//! Data buffer (component C): coalesces streaming-eligible destination
//! output per job, flushing on a size or time trigger with crash-recoverable
//! backups and bounded retry.

mod buffer;
mod error;
mod sub_buffer;
mod types;

pub use buffer::{BufferConfig, DataBuffer};
pub use error::{BufferError, BufferResult};
pub use sub_buffer::{SharedSubBuffer, SubBuffer};
pub use types::{BufferBackup, BufferedItem};
