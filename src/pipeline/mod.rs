//! Ingestion jobs and the query path, wired together behind [`RagApi`].

mod jobs;
mod service;
mod types;

pub use jobs::{IngestionJob, JobRegistry};
pub use service::{RagApi, RagService, RagServiceBuilder};
pub use types::{
    JobReport, OverallReadiness, PipelineError, QueryRequest, SkipStage, SkippedFragment, Upload,
};
