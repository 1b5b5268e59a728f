//! Orchestration services

pub mod batch_client;
pub mod bundle_resolver;
pub mod dispatch;
pub mod eligibility;
pub mod reconcile;
pub mod submission;

pub use batch_client::{BatchClient, HttpBatchClient};
pub use bundle_resolver::BundleResolver;
pub use dispatch::{DispatchOptions, DispatchResult, DispatchRouter, DispatchStatus};
pub use eligibility::{BackfillSummary, DeEngine, DeOptions, DeRequest};
pub use reconcile::reconcile_stranded_claims;
pub use submission::{JobSubmitter, QueuedSubmitter};
