//! Core data types shared by the extraction and load paths.

mod record;
mod table;
mod time;
mod value;

pub use record::*;
pub use table::*;
pub use time::*;
pub use value::*;
