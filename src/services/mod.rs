//! Pipeline steps and the collaborators they talk to.

pub mod auth;
pub mod eligibility;
pub mod gcs;
pub mod local_store;
pub mod notifier;
pub mod pipeline;
pub mod publish;
pub mod pubsub;
pub mod rotator;
pub mod staging;
pub mod storage;
pub mod transform;
