//! Test doubles for the coordinator seams

use std::sync::Mutex;

use async_trait::async_trait;

use st_core::error::{CatalogError, ConnectionError};
use st_core::traits::{CatalogSource, CommandSink};
use st_core::{CatalogEntry, ClientId};
use st_protocol::Command;

/// Records every command instead of sending it
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(ClientId, Command)>>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every send fails as if the connection were gone
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<(ClientId, Command)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl CommandSink for RecordingSink {
    fn send(&self, client: &ClientId, command: Command) -> Result<(), ConnectionError> {
        if self.fail {
            return Err(ConnectionError::Closed(client.clone()));
        }
        self.sent.lock().unwrap().push((client.clone(), command));
        Ok(())
    }
}

/// Catalog feed serving a fixed list, or failing
pub struct StaticCatalog {
    entries: Mutex<Option<Vec<CatalogEntry>>>,
}

impl StaticCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self {
            entries: Mutex::new(Some(entries)),
        }
    }

    /// Make subsequent fetches fail
    pub fn break_feed(&self) {
        *self.entries.lock().unwrap() = None;
    }
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    fn describe(&self) -> String {
        "static catalog".to_string()
    }

    async fn fetch(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        match self.entries.lock().unwrap().clone() {
            Some(entries) => Ok(entries),
            None => Err(CatalogError::Parse {
                path: "static".into(),
                message: "feed unavailable".to_string(),
            }),
        }
    }
}
