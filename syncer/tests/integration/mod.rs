mod checkpoint_test;
mod common;
mod failure_test;
mod sync_test;
