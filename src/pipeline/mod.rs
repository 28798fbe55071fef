pub mod applier;
pub mod backup;
pub mod error;
pub mod generator;
pub mod metrics;
pub mod orchestrator;
pub mod scanner;
pub mod service;
pub mod types;
pub mod validator;

pub use applier::{ApplyOptions, ImprovementApplier};
pub use backup::{BackupStore, FileBackupStore};
pub use error::PipelineError;
pub use generator::ImprovementGenerator;
pub use metrics::{MetricsSnapshot, ServiceMetrics};
pub use orchestrator::{CycleOptions, CycleOrchestrator};
pub use scanner::{OpportunityScanner, ScanOptions};
pub use service::{
    CycleRequest, CycleResponse, ImproveRequest, ImproveResponse, ImprovementService,
    ScanRequest, ScanResponse,
};
pub use types::{
    ApplyResult, BackupRef, CycleResult, FileOutcome, FileValidation, Improvement,
    Opportunity, OutcomeStatus, SubOpportunity, ValidationReport,
};
pub use validator::{GeneratedFile, ImprovementValidator};
