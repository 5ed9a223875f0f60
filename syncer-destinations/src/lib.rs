//! SQL executors for the sync destinations.
//!
//! Each executor implements [`syncer::destination::SqlExecutor`] so the loaders, schema adapter
//! and checkpoint store stay independent of the driver behind them.

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "snowflake")]
pub mod snowflake;
