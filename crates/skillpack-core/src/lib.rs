//! # skillpack core
//!
//! Pure, synchronous logic for incremental skill-package updates: data
//! models, content hashing, streaming chunking, change detection, version
//! bumping and delta packaging.
//!
//! This crate performs no network access and has no async runtime or
//! database dependencies. The only I/O it does is reading file-backed
//! [`models::Document`]s as a stream.
//!
//! ## Pipeline
//!
//! ```text
//! documents ──▶ ContentHasher ──▶ detect(previous manifest) ──▶ VersionPolicy
//!                                                                  │
//!                         ┌──────────── Major ─────────────────────┤
//!                         ▼                                        ▼ Minor / Patch
//!                    write_full                               write_delta
//!                         └──────────▶ PackageSink ◀───────────────┘
//!                                   (StreamingChunker for large docs)
//! ```

pub mod changeset;
pub mod chunk;
pub mod delta;
pub mod error;
pub mod hash;
pub mod models;
pub mod version;

pub use changeset::detect;
pub use chunk::{BoundaryMode, ChunkConfig, ChunkUnit, StreamingChunker};
pub use delta::{build_delta, build_full, DeltaPackage, PackageSink};
pub use error::{Error, Result};
pub use hash::{ContentHasher, NormalizationPolicy};
pub use models::{ChangeSet, Chunk, ContentDigest, Document, DocumentMetadata, Manifest, SemVer};
pub use version::{apply_bump, decide_bump, BumpKind, VersionPolicy};
