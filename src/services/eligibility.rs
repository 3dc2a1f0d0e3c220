//! Decides from event metadata alone whether an object needs processing.

use crate::models::ObjectRef;
use std::fmt;

/// Metageneration of an object that was never rewritten after creation.
pub const BASELINE_METAGENERATION: i64 = 1;

/// Accepted content-type prefixes, matched case-sensitively.
const JPEG_CONTENT_TYPES: [&str; 2] = ["image/jpeg", "image/jpg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    /// Rewritten since creation, most likely by this pipeline.
    AlreadyProcessed,
    UnsupportedContentType,
}

impl fmt::Display for Eligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eligible => "eligible",
            Self::AlreadyProcessed => "already rotated",
            Self::UnsupportedContentType => "not a jpeg",
        })
    }
}

/// First matching rule wins.
pub fn check(object: &ObjectRef) -> Eligibility {
    if object.metageneration() > BASELINE_METAGENERATION {
        return Eligibility::AlreadyProcessed;
    }
    if !is_jpeg(&object.content_type) {
        return Eligibility::UnsupportedContentType;
    }
    Eligibility::Eligible
}

pub fn should_process(object: &ObjectRef) -> bool {
    check(object) == Eligibility::Eligible
}

fn is_jpeg(content_type: &str) -> bool {
    JPEG_CONTENT_TYPES
        .iter()
        .any(|prefix| content_type.starts_with(prefix))
}
