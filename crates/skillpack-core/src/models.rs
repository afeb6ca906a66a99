//! Core data models shared by the hasher, detector, version manager and packager.
//!
//! These types are the values that flow through an incremental update:
//! [`Document`]s come in from a source, [`ContentDigest`]s and a
//! [`Manifest`] describe what was seen last time, and [`Chunk`]s go out to
//! the export layer.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Where a document's text lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentContent {
    /// Text already held in memory (e.g. produced by a scraper).
    Text(String),
    /// Text backed by a file, read lazily and streamed.
    File(PathBuf),
}

/// Optional structured metadata attached to a document.
///
/// Changes to metadata alone never change the content hash; they are
/// tracked separately through [`ContentDigest::metadata_hash`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl DocumentMetadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.category.is_none()
            && self.language.is_none()
            && self.tags.is_empty()
    }

    /// SHA-256 of the canonical JSON encoding, or `None` when empty.
    pub fn digest(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        // Field order is fixed by the struct definition, so the encoding is stable.
        let encoded = serde_json::to_vec(self).ok()?;
        Some(hex::encode(Sha256::digest(&encoded)))
    }
}

/// A named unit of documentation content within a skill package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Package-relative path, unique within a package (`/` separated).
    pub path: String,
    pub content: DocumentContent,
    pub metadata: DocumentMetadata,
    /// Modification time reported by the source, if it has one.
    pub modified_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn from_text(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: DocumentContent::Text(text.into()),
            metadata: DocumentMetadata::default(),
            modified_at: None,
        }
    }

    pub fn from_file(path: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            content: DocumentContent::File(file.into()),
            metadata: DocumentMetadata::default(),
            modified_at: None,
        }
    }

    pub fn with_metadata(mut self, metadata: DocumentMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_modified_at(mut self, modified_at: DateTime<Utc>) -> Self {
        self.modified_at = Some(modified_at);
        self
    }

    /// Open the document content as a buffered byte stream.
    pub fn reader(&self) -> Result<Box<dyn BufRead + '_>> {
        match &self.content {
            DocumentContent::Text(text) => Ok(Box::new(text.as_bytes())),
            DocumentContent::File(file) => {
                let handle = File::open(file).map_err(|e| Error::io(&self.path, e))?;
                Ok(Box::new(BufReader::new(handle)))
            }
        }
    }

    /// Load the full text. Only used for documents below the chunk threshold.
    pub fn read_text(&self) -> Result<String> {
        match &self.content {
            DocumentContent::Text(text) => Ok(text.clone()),
            DocumentContent::File(_) => {
                let mut text = String::new();
                self.reader()?
                    .read_to_string(&mut text)
                    .map_err(|e| Error::io(&self.path, e))?;
                Ok(text)
            }
        }
    }

    /// Character count capped at `limit + 1`: reading stops as soon as the
    /// content is known to be longer than `limit`.
    pub fn char_len_up_to(&self, limit: usize) -> Result<usize> {
        let cap = limit.saturating_add(1);
        match &self.content {
            DocumentContent::Text(text) => Ok(text.chars().take(cap).count()),
            DocumentContent::File(_) => {
                let mut reader = self.reader()?;
                let mut count = 0usize;
                decode_blocks(&mut reader, |text| {
                    count = count.saturating_add(text.chars().count());
                    count < cap
                })
                .map_err(|e| Error::io(&self.path, e))?;
                Ok(count.min(cap))
            }
        }
    }
}

/// Decode `reader` as UTF-8 one buffered block at a time, handing every
/// decoded piece to `f` until it returns `false`. An incomplete multi-byte
/// sequence at the end of a block is carried into the next one.
///
/// Returns the number of bytes consumed.
pub(crate) fn decode_blocks<F>(reader: &mut dyn BufRead, mut f: F) -> io::Result<u64>
where
    F: FnMut(&str) -> bool,
{
    let mut carry: Vec<u8> = Vec::new();
    let mut size = 0u64;
    loop {
        let data = reader.fill_buf()?;
        if data.is_empty() {
            if !carry.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "stream ends inside a UTF-8 sequence",
                ));
            }
            return Ok(size);
        }
        let n = data.len();
        carry.extend_from_slice(data);
        reader.consume(n);
        size += n as u64;

        let valid = match std::str::from_utf8(&carry) {
            Ok(_) => carry.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        };
        let decoded = std::str::from_utf8(&carry[..valid])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if !f(decoded) {
            return Ok(size);
        }
        carry.drain(..valid);
    }
}

/// Digest of one document's canonical content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDigest {
    /// Filled from the manifest map key; not repeated on disk.
    #[serde(skip)]
    pub path: String,
    pub hash: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_hash: Option<String>,
}

/// Semantic version of a skill package.
///
/// Derived ordering compares major, then minor, then patch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemVer {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SemVer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().trim_start_matches('v').split('.').collect();
        if parts.len() != 3 {
            return Err(Error::Manifest(format!("invalid version '{}'", s)));
        }
        let parse = |p: &str| {
            p.parse::<u64>()
                .map_err(|_| Error::Manifest(format!("invalid version '{}'", s)))
        };
        Ok(Self::new(parse(parts[0])?, parse(parts[1])?, parse(parts[2])?))
    }
}

/// Last-known state of a skill package.
///
/// Replaced wholesale after every successful update; never mutated in place
/// by the detector or packager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: SemVer,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub digests: BTreeMap<String, ContentDigest>,
    /// Hashing policy the digests were produced with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalization: Option<String>,
}

impl Manifest {
    /// The state before the first build: version `0.0.0`, no digests.
    pub fn empty() -> Self {
        Self {
            version: SemVer::default(),
            generated_at: DateTime::<Utc>::default(),
            digests: BTreeMap::new(),
            normalization: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let mut manifest: Manifest =
            serde_json::from_str(json).map_err(|e| Error::Manifest(e.to_string()))?;
        for (path, digest) in manifest.digests.iter_mut() {
            digest.path = path.clone();
        }
        Ok(manifest)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Manifest(e.to_string()))
    }
}

/// Set-difference between the current documents and a previous manifest.
///
/// `added`, `modified`, `deleted` and `unchanged` are pairwise disjoint and
/// sorted. `retagged` is the subset of `unchanged` whose metadata changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
    pub retagged: Vec<String>,
}

/// A bounded, overlapping slice of a document's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub source_path: String,
    pub index: usize,
    pub text: String,
    /// Absolute character offset of the first character.
    pub start_offset: usize,
    /// Absolute character offset one past the last character.
    pub end_offset: usize,
    /// Leading characters repeated from the previous chunk.
    pub overlap_with_previous: usize,
    /// No safe boundary was found and the window was hard-cut.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unsafe_cut: bool,
}

impl Chunk {
    /// SHA-256 of the chunk text, used downstream for embedding staleness.
    pub fn hash(&self) -> String {
        hex::encode(Sha256::digest(self.text.as_bytes()))
    }

    pub fn char_len(&self) -> usize {
        self.end_offset - self.start_offset
    }
}
