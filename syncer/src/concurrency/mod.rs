//! Coordination primitives for stopping a run cleanly.

pub mod shutdown;
