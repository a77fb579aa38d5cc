//! Catalog feed trait

use async_trait::async_trait;

use crate::error::CatalogError;
use crate::types::CatalogEntry;

/// External feed of measurement targets and their priority scores
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Human-readable description of where entries come from
    fn describe(&self) -> String;

    /// Fetch the current list of targets
    async fn fetch(&self) -> Result<Vec<CatalogEntry>, CatalogError>;
}
