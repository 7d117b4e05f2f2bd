pub mod commit_analyzer;
pub mod ingestion;

pub use commit_analyzer::{CommitAnalyzer, CommitType, EnrichedCommit};
pub use ingestion::{Ingested, IngestionCoordinator, IngestionRequest};
