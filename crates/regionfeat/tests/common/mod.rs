//! Shared utilities for regionfeat integration tests.
//!
//! - `TestHarness` lays out an image directory, image list and output
//!   directory inside a temp dir
//! - `MockProvider` stands in for the detection backend and counts calls

pub mod harness;
pub mod mock;

pub use harness::TestHarness;
pub use mock::MockProvider;
