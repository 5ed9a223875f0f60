//! Configuration types shared by the sync engine and its binary.

mod audit;
mod base;
mod batch;
mod checkpoint;
mod destination;
mod search;
mod source;
mod sync;
mod table;

pub use audit::AuditConfig;
pub use base::ValidationError;
pub use batch::BatchConfig;
pub use checkpoint::CheckpointConfig;
#[cfg(feature = "mysql")]
pub use destination::IntoConnectOptions;
pub use destination::{ColumnStoreConfig, RowStoreConfig, SnowflakeTokenType, StagingTableKind};
pub use search::SearchConfig;
pub use source::SourceConfig;
pub use sync::SyncConfig;
pub use table::{
    CodeExtractionConfig, ColumnMappingConfig, CriterionConfig, SearchGroupConfig, TableConfig,
};
