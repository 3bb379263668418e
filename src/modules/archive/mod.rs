//! Single-entry zip packaging for uploads
//!
//! The packager reads a fully staged upload and writes a new staged file
//! holding a deflate-compressed zip with exactly one entry. Only the
//! complete package is ever handed to a blob store.

use std::fs::File;
use std::io::{self, Write};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::core::error::{AppError, Result};
use crate::modules::storage::{SpoolDir, SpooledFile};
use crate::shared::validation::sanitize_filename;

/// Content type of packaged transfers
pub const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

#[derive(Debug, Default, Clone, Copy)]
pub struct ArchivePackager;

fn packaging_failed(e: impl std::fmt::Display) -> AppError {
    AppError::PackagingFailed(e.to_string())
}

impl ArchivePackager {
    pub fn new() -> Self {
        Self
    }

    /// Name of the single entry inside the archive for a given original filename
    pub fn entry_name(original_name: &str) -> String {
        sanitize_filename(original_name)
    }

    /// Package `source` into a single-entry archive staged next to it in `spool`.
    ///
    /// On failure the partially written archive is removed and `source` is left intact.
    pub async fn package(
        &self,
        id: &Uuid,
        source: &SpooledFile,
        original_name: &str,
        spool: &SpoolDir,
    ) -> Result<SpooledFile> {
        let entry_name = Self::entry_name(original_name);
        let source_path = source.path().to_path_buf();
        let large_file = source.len() >= u32::MAX as u64;
        let target = spool.create_temp(id, ".zip")?;

        let packaged = tokio::task::spawn_blocking(move || -> Result<SpooledFile> {
            let (file, path) = target.into_parts();
            let mut reader = File::open(&source_path).map_err(packaging_failed)?;

            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .large_file(large_file);

            let mut writer = ZipWriter::new(file);
            writer
                .start_file(entry_name, options)
                .map_err(packaging_failed)?;
            io::copy(&mut reader, &mut writer).map_err(packaging_failed)?;

            let mut file = writer.finish().map_err(packaging_failed)?;
            file.flush().map_err(packaging_failed)?;
            file.sync_all().map_err(packaging_failed)?;
            let len = file.metadata().map_err(packaging_failed)?.len();

            Ok(SpooledFile::new(path, len))
        })
        .await
        .map_err(|e| AppError::PackagingFailed(format!("Packaging task failed: {}", e)))??;

        tracing::debug!(
            "Packaged transfer {} ({} -> {} bytes)",
            id,
            source.len(),
            packaged.len()
        );

        Ok(packaged)
    }
}
