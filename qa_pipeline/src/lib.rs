pub mod config;
pub mod decision;
pub mod health;
pub mod pipeline;
pub mod state;

pub use config::PipelineConfig;
pub use decision::{PipelineDecision, PipelineErrorKind, SimilarMatch, SourceTag};
pub use health::{check_liveness, check_readiness, HealthState, Mode};
pub use pipeline::{AdmitRequest, QaPipeline};
pub use state::{ready, AskMachine};
