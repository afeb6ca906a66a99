//! Write packages to disk as vendor-neutral JSON.
//!
//! A package lands in `<output_dir>/<package>/<version>/`:
//!
//! - `package.json` holds the header (kind, version range, deletion manifest,
//!   metadata updates and counts).
//! - `entries.jsonl` holds one JSON object per line, a `document` line per
//!   shipped document (with its text when it is small enough to ship
//!   whole), followed by its `chunk` lines when it was chunked.
//!
//! Everything is written into a hidden staging directory first and renamed
//! into place by `finish`, so consumers never see a half-written package.
//! Vendor-specific exporters (vector databases, AI platforms) read this
//! layout; they are not part of this crate.

use chrono::Utc;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use skillpack_core::delta::{MetadataUpdate, PackageHeader, PackageKind, PackageSink};
use skillpack_core::{Chunk, DocumentMetadata, Error as CoreError, SemVer};

use crate::progress::{UpdateProgressEvent, UpdateProgressReporter};

#[derive(Serialize)]
struct PackageFile<'a> {
    package: &'a str,
    package_id: String,
    kind: PackageKind,
    base_version: String,
    target_version: String,
    created_at: String,
    documents: u64,
    chunks: u64,
    deletion_manifest: &'a [String],
    metadata_updates: &'a [MetadataUpdate],
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum EntryLine<'a> {
    Document {
        path: &'a str,
        metadata: &'a DocumentMetadata,
        chunked: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<&'a str>,
    },
    Chunk {
        #[serde(flatten)]
        chunk: &'a Chunk,
        hash: String,
    },
}

/// Directory a package version is published to.
pub fn package_dir(output_dir: &Path, package: &str, version: SemVer) -> PathBuf {
    output_dir.join(package).join(version.to_string())
}

/// Streams a package into `package.json` + `entries.jsonl`.
pub struct JsonlPackageWriter<'a> {
    package: String,
    output_dir: PathBuf,
    staging: PathBuf,
    final_dir: Option<PathBuf>,
    entries: Option<BufWriter<File>>,
    header: Option<PackageHeader>,
    documents: u64,
    chunks: u64,
    total_documents: u64,
    progress: &'a dyn UpdateProgressReporter,
    finished: bool,
}

impl<'a> JsonlPackageWriter<'a> {
    /// `total_documents` is only used for progress reporting.
    pub fn new(
        output_dir: &Path,
        package: &str,
        total_documents: u64,
        progress: &'a dyn UpdateProgressReporter,
    ) -> Self {
        let staging = output_dir
            .join(package)
            .join(format!(".staging-{}", uuid::Uuid::new_v4()));
        Self {
            package: package.to_string(),
            output_dir: output_dir.to_path_buf(),
            staging,
            final_dir: None,
            entries: None,
            header: None,
            documents: 0,
            chunks: 0,
            total_documents,
            progress,
            finished: false,
        }
    }

    /// Where the package was published, once `finish` has run.
    pub fn published_dir(&self) -> Option<&Path> {
        if self.finished {
            self.final_dir.as_deref()
        } else {
            None
        }
    }

    fn io_err(&self, file: &Path, source: std::io::Error) -> CoreError {
        CoreError::Io {
            path: file.display().to_string(),
            source,
        }
    }

    fn write_line(&mut self, line: &EntryLine<'_>) -> skillpack_core::Result<()> {
        let file = self.staging.join("entries.jsonl");
        let json = serde_json::to_string(line)
            .map_err(|e| self.io_err(&file, std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        let result = match self.entries.as_mut() {
            Some(out) => writeln!(out, "{}", json),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "package entries written before begin",
            )),
        };
        result.map_err(|e| self.io_err(&file, e))
    }

    fn document_done(&mut self) {
        self.documents += 1;
        self.progress.report(UpdateProgressEvent::Packaging {
            package: self.package.clone(),
            n: self.documents,
            total: self.total_documents,
        });
    }
}

impl PackageSink for JsonlPackageWriter<'_> {
    fn begin(&mut self, header: &PackageHeader) -> skillpack_core::Result<()> {
        std::fs::create_dir_all(&self.staging).map_err(|e| self.io_err(&self.staging, e))?;
        let path = self.staging.join("entries.jsonl");
        let file = File::create(&path).map_err(|e| self.io_err(&path, e))?;
        self.entries = Some(BufWriter::new(file));
        self.final_dir = Some(package_dir(
            &self.output_dir,
            &self.package,
            header.target_version,
        ));
        self.header = Some(header.clone());
        Ok(())
    }

    fn whole_document(
        &mut self,
        path: &str,
        metadata: &DocumentMetadata,
        text: String,
    ) -> skillpack_core::Result<()> {
        self.write_line(&EntryLine::Document {
            path,
            metadata,
            chunked: false,
            text: Some(text.as_str()),
        })?;
        self.document_done();
        Ok(())
    }

    fn chunked_document(
        &mut self,
        path: &str,
        metadata: &DocumentMetadata,
    ) -> skillpack_core::Result<()> {
        self.write_line(&EntryLine::Document {
            path,
            metadata,
            chunked: true,
            text: None,
        })?;
        self.document_done();
        Ok(())
    }

    fn chunk(&mut self, chunk: Chunk) -> skillpack_core::Result<()> {
        let hash = chunk.hash();
        self.write_line(&EntryLine::Chunk {
            chunk: &chunk,
            hash,
        })?;
        self.chunks += 1;
        Ok(())
    }

    fn finish(&mut self) -> skillpack_core::Result<()> {
        let entries_path = self.staging.join("entries.jsonl");
        if let Some(mut out) = self.entries.take() {
            out.flush().map_err(|e| self.io_err(&entries_path, e))?;
            out.get_ref()
                .sync_all()
                .map_err(|e| self.io_err(&entries_path, e))?;
        }

        let (header, final_dir) = match (self.header.as_ref(), self.final_dir.clone()) {
            (Some(h), Some(d)) => (h, d),
            _ => {
                return Err(self.io_err(
                    &self.staging,
                    std::io::Error::new(std::io::ErrorKind::Other, "package finished before begin"),
                ))
            }
        };

        let file = PackageFile {
            package: &self.package,
            package_id: uuid::Uuid::new_v4().to_string(),
            kind: header.kind,
            base_version: header.base_version.to_string(),
            target_version: header.target_version.to_string(),
            created_at: Utc::now().to_rfc3339(),
            documents: self.documents,
            chunks: self.chunks,
            deletion_manifest: &header.deletion_manifest,
            metadata_updates: &header.metadata_updates,
        };
        let header_path = self.staging.join("package.json");
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| self.io_err(&header_path, std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        std::fs::write(&header_path, json).map_err(|e| self.io_err(&header_path, e))?;

        // A leftover directory for this version comes from an update whose
        // manifest was never committed; it is safe to replace.
        if final_dir.exists() {
            std::fs::remove_dir_all(&final_dir).map_err(|e| self.io_err(&final_dir, e))?;
        }
        std::fs::rename(&self.staging, &final_dir).map_err(|e| self.io_err(&final_dir, e))?;
        self.finished = true;
        tracing::info!(dir = %final_dir.display(), documents = self.documents, chunks = self.chunks, "package written");
        Ok(())
    }
}

impl Drop for JsonlPackageWriter<'_> {
    fn drop(&mut self) {
        if !self.finished && self.staging.exists() {
            let _ = std::fs::remove_dir_all(&self.staging);
        }
    }
}
