//! Core data models for the auto-rotate pipeline.
//!
//! `ObjectRef` is what the trigger delivers and what the notification
//! carries; `TransformResult` is what a successful rotation reports.

pub mod object_ref;
pub mod transform;

pub use object_ref::{Metadata, Metageneration, ObjectRef};
pub use transform::{Orientation, TransformResult};
