//! Shared domain types, catalogue persistence, and error kinds for
//! queryrelay — the scheduler/pool/executor/buffer/queue substrate.

pub mod catalogue;
pub mod error;
pub mod fsatomic;
pub mod ids;
pub mod rows;
pub mod secret;
pub mod types;

pub use catalogue::{Catalogue, Settings};
pub use error::{CoreError, CoreResult};
pub use ids::{ConnectionId, JobId, QueuedUnitId, RunId};
pub use rows::{content_hash, Row, RowSet};
pub use secret::SecretString;
pub use types::{
    Connection, Credentials, Destination, DestinationKind, Endpoint, EndpointType, GroupTag, Job,
    NamedQuery, QuerySpec, RecurrenceRule, TestOutcome, TimeOfDay, TriggerPolicy, WriteMode,
};
