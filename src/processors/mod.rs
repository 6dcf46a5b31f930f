//! Data processing modules.

pub mod metrics;
pub mod pipeline;

// Re-export key types for convenience
pub use metrics::{
    process_tracks, EnrichedRow, EnrichedTable, Kinematics, MetricsEngine, MetricsError,
    MetricsOptions, TrackBoundary,
};
pub use pipeline::{process_batch, process_file, Job, ProcessRequest, RunMode, RunSummary};
