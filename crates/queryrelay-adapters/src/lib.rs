//! Destination adapter contract and concrete sink implementations
//! (component G).

mod columns;
mod contract;
mod csv_adapter;
mod error;
mod excel;
mod google_sheets;
mod http;
mod registry;

pub use contract::{ConnectionItem, DestinationAdapter, DispatchMeta, SendResult};
pub use csv_adapter::CsvAdapter;
pub use error::{AdapterError, AdapterResult};
pub use excel::ExcelAdapter;
pub use google_sheets::GoogleSheetsAdapter;
pub use http::{CustomApiAdapter, WebhookAdapter};
pub use registry::AdapterRegistry;
