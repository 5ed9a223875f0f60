//! Test doubles and fixtures shared by unit and integration tests.
//!
//! - [`executor`] scripts SQL results so loaders and stores can be tested without a database.
//! - [`source`] serves records from memory and evaluates find requests like the real source.
//! - [`table`] builds descriptors and run contexts.
pub mod executor;
pub mod source;
pub mod table;
