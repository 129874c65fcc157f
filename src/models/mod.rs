//! Domain models shared across the pipeline.

mod document;

pub use document::{
    CandidateDocument, DocumentType, EnrichedDocument, StageResult, StageStatus, StoredRecord,
    WorkingDocument,
};
