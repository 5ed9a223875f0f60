//! Incremental, checkpointed synchronization of paginated source tables into a row store and
//! a column store.

pub mod audit;
pub mod concurrency;
pub mod destination;
pub mod error;
mod macros;
pub mod mapping;
pub mod orchestrator;
pub mod report;
pub mod schema;
pub mod search;
pub mod source;
pub mod state;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
