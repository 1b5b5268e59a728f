//! Test Helper Utilities
//!
//! Shared utilities for scp-ingest integration tests

#![allow(dead_code)]

pub mod db_utils;
pub mod fakes;

pub use db_utils::{create_test_db, labels, reload, seed_de_study, seed_file, seed_study, DeFixture};
pub use fakes::{create_test_router, FakeBatchClient, RecordingSubmitter};
