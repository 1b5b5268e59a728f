//! # SCP Common Library
//!
//! Shared code for the study-file ingest orchestrator:
//! - Error and result types
//! - Configuration loading
//! - Event types and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
