//! The per-event processing pipeline.
//!
//! filter → stage → transform → replace → notify → release, each step
//! awaited before the next. Nothing here coordinates across invocations:
//! two deliveries of the same write can both pass the metageneration check
//! and both replace the object.

use crate::errors::PipelineError;
use crate::models::{ObjectRef, TransformResult};
use crate::services::eligibility::{self, Eligibility};
use crate::services::notifier::Publisher;
use crate::services::publish::PublishAndReplace;
use crate::services::rotator::Rotator;
use crate::services::staging::{StagedFile, Stager};
use crate::services::storage::ObjectStorage;
use crate::services::transform::TransformInvoker;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Skipped(Eligibility),
    Processed(TransformResult),
}

pub struct Pipeline {
    stager: Stager,
    invoker: TransformInvoker,
    replacer: PublishAndReplace,
}

impl Pipeline {
    /// Wire the pipeline to its collaborators.
    ///
    /// Fails when no notification topic is configured.
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        publisher: Arc<dyn Publisher>,
        rotator: Arc<dyn Rotator>,
        staging_dir: impl Into<PathBuf>,
        topic: Option<String>,
    ) -> Result<Self, PipelineError> {
        let topic = topic
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PipelineError::Config("notification topic is not set".into()))?;

        Ok(Self {
            stager: Stager::new(storage.clone(), staging_dir),
            invoker: TransformInvoker::new(rotator),
            replacer: PublishAndReplace::new(storage, publisher, topic),
        })
    }

    pub fn staging_dir(&self) -> &Path {
        self.stager.dir()
    }

    pub fn topic(&self) -> &str {
        self.replacer.topic()
    }

    /// Process one event, returning the first step failure.
    pub async fn run(&self, object: &ObjectRef) -> Result<PipelineOutcome, PipelineError> {
        let eligibility = eligibility::check(object);
        if eligibility != Eligibility::Eligible {
            return Ok(PipelineOutcome::Skipped(eligibility));
        }

        let staged = self.stager.stage(object).await?;
        let processed = self.process(object, &staged).await;
        let released = staged.release().await;

        match (processed, released) {
            (Ok(result), Ok(())) => Ok(PipelineOutcome::Processed(result)),
            (Ok(_), Err(cleanup)) => Err(cleanup.into()),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(cleanup)) => {
                warn!(error = %cleanup, "staged file cleanup failed after an earlier error");
                Err(err)
            }
        }
    }

    async fn process(
        &self,
        object: &ObjectRef,
        staged: &StagedFile,
    ) -> Result<TransformResult, PipelineError> {
        let result = self.invoker.transform(staged).await?;
        self.replacer.publish(object, staged).await?;
        Ok(result)
    }

    /// Process one event and log the outcome. Errors stop here; the trigger
    /// is never asked to redeliver.
    pub async fn handle(&self, object: &ObjectRef) -> Option<PipelineOutcome> {
        let path = object.path();
        match self.run(object).await {
            Ok(PipelineOutcome::Skipped(reason)) => {
                info!(
                    object = %path,
                    metageneration = object.metageneration(),
                    content_type = %object.content_type,
                    %reason,
                    "skipping object"
                );
                Some(PipelineOutcome::Skipped(reason))
            }
            Ok(PipelineOutcome::Processed(result)) => {
                info!(
                    object = %path,
                    orientation = %result.orientation,
                    height = result.height,
                    width = result.width,
                    "object rotated"
                );
                Some(PipelineOutcome::Processed(result))
            }
            Err(err) if err.is_benign() => {
                info!(object = %path, reason = %err, "nothing to rotate");
                None
            }
            Err(err) => {
                error!(object = %path, error = %err, "auto-rotate failed");
                None
            }
        }
    }

    /// Feed events from an in-process trigger through the pipeline, one at a time.
    pub async fn consume(self: Arc<Self>, mut events: UnboundedReceiver<ObjectRef>) {
        while let Some(object) = events.recv().await {
            self.handle(&object).await;
        }
        info!("event channel closed");
    }
}
