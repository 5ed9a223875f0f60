//! Paginated record sources.

pub mod filemaker;

pub use filemaker::FileMakerClient;

use std::fmt;

use async_trait::async_trait;
use serde_json::json;

use crate::error::SyncResult;
use crate::search::SearchPredicate;
use crate::types::Record;

/// Direction of a sort field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascend,
    Descend,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Ascend => "ascend",
            SortOrder::Descend => "descend",
        }
    }
}

/// Sort applied to a paginated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Ascend,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({ "fieldName": self.field, "sortOrder": self.order.as_str() })
    }
}

/// One page of a search against a source table.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    /// Source table (layout) name.
    pub table: String,
    pub predicate: SearchPredicate,
    /// Maximum number of records in the page.
    pub limit: usize,
    /// Zero-based position of the first record of the page.
    pub offset: usize,
    pub sort: Option<SortSpec>,
}

impl PageRequest {
    /// Returns the request for the page following this one.
    pub fn next_page(&self) -> PageRequest {
        PageRequest {
            offset: self.offset + self.limit,
            ..self.clone()
        }
    }
}

/// A source of records that can be read page by page.
///
/// An empty page means there are no records at or past the requested offset.
#[async_trait]
pub trait SourceClient: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    async fn fetch_page(&self, request: &PageRequest) -> SyncResult<Vec<Record>>;

    /// Ends the session with the source. The default implementation does nothing.
    async fn close(&self) -> SyncResult<()> {
        Ok(())
    }
}
