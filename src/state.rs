use crate::services::{local_store::LocalStore, pipeline::Pipeline};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,

    /// Present only when running against the local backend.
    pub local: Option<LocalStore>,
}
