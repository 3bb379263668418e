//! Time-boxed file transfers: upload, share link resolution and reclamation

pub mod dtos;
pub mod handlers;
pub mod models;
pub mod registry;
pub mod routes;
pub mod services;
pub mod workers;

pub use registry::{InMemoryTransferRegistry, PgTransferRegistry, TransferRegistry};
pub use routes::{routes, TransferState};
pub use services::{IngestionService, RetrievalService};
pub use workers::ReclamationSweeper;
