mod ingestion_service;
mod retrieval_service;

pub use ingestion_service::{IngestionService, SpooledUpload, UploadMetadata};
pub use retrieval_service::{Download, RetrievalService};
