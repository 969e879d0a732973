//! A small registry mapping `DestinationKind` to the adapter that handles
//! it, so the executor and buffer can dispatch by kind without a match
//! statement of their own.

use std::collections::HashMap;
use std::sync::Arc;

use queryrelay_core::DestinationKind;

use crate::contract::DestinationAdapter;
use crate::csv_adapter::CsvAdapter;
use crate::excel::ExcelAdapter;
use crate::google_sheets::GoogleSheetsAdapter;
use crate::http::{CustomApiAdapter, WebhookAdapter};

#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<DestinationKind, Arc<dyn DestinationAdapter>>,
}

impl AdapterRegistry {
    /// The real adapter set shipped with this crate.
    pub fn default_set() -> Self {
        let mut adapters: HashMap<DestinationKind, Arc<dyn DestinationAdapter>> = HashMap::new();
        adapters.insert(DestinationKind::Webhook, Arc::new(WebhookAdapter::default()));
        adapters.insert(DestinationKind::CustomApi, Arc::new(CustomApiAdapter::default()));
        adapters.insert(DestinationKind::GoogleSheets, Arc::new(GoogleSheetsAdapter::default()));
        adapters.insert(DestinationKind::Csv, Arc::new(CsvAdapter));
        adapters.insert(DestinationKind::Excel, Arc::new(ExcelAdapter));
        Self { adapters }
    }

    pub fn get(&self, kind: DestinationKind) -> Option<Arc<dyn DestinationAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    pub fn insert(&mut self, kind: DestinationKind, adapter: Arc<dyn DestinationAdapter>) {
        self.adapters.insert(kind, adapter);
    }
}
