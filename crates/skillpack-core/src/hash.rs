//! Content hashing for change detection.
//!
//! A [`ContentHasher`] turns a [`Document`] into a [`ContentDigest`]: the
//! SHA-256 of the document's *canonical* text, its raw byte size and a
//! timestamp. File content is decoded one buffered block at a time and fed
//! through a small state machine, so memory use does not depend on document
//! or line length.
//!
//! # Canonical normalization
//!
//! Under [`NormalizationPolicy::Canonical`] (the default) the following are
//! applied before hashing, so that purely cosmetic re-saves do not register
//! as modifications:
//!
//! 1. A leading UTF-8 byte-order mark is dropped.
//! 2. `\r\n` and lone `\r` line endings become `\n`.
//! 3. Trailing spaces and tabs on every line are removed.
//! 4. Blank lines at the end of the document are removed.
//!
//! Everything else, including indentation and internal blank lines, is
//! significant. [`NormalizationPolicy::Raw`] hashes the bytes unchanged.

use std::fmt;
use std::io::BufRead;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::{decode_blocks, ContentDigest, Document, DocumentContent};

/// How document text is normalized before hashing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationPolicy {
    #[default]
    Canonical,
    Raw,
}

impl NormalizationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizationPolicy::Canonical => "canonical",
            NormalizationPolicy::Raw => "raw",
        }
    }
}

impl fmt::Display for NormalizationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NormalizationPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "canonical" => Ok(NormalizationPolicy::Canonical),
            "raw" => Ok(NormalizationPolicy::Raw),
            other => Err(Error::Config(format!(
                "unknown normalization policy '{}'; expected canonical or raw",
                other
            ))),
        }
    }
}

/// Computes [`ContentDigest`]s under a fixed [`NormalizationPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHasher {
    policy: NormalizationPolicy,
}

impl ContentHasher {
    pub fn new(policy: NormalizationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> NormalizationPolicy {
        self.policy
    }

    /// Digest a document. Fails with [`Error::Io`] if the content cannot be
    /// read completely; partial content is never hashed.
    pub fn hash(&self, document: &Document) -> Result<ContentDigest> {
        let (hash, size) = match &document.content {
            DocumentContent::Text(text) => (self.hash_text(text), text.len() as u64),
            DocumentContent::File(_) => {
                let mut reader = document.reader()?;
                self.hash_reader(&mut reader)
                    .map_err(|e| Error::io(&document.path, e))?
            }
        };

        tracing::debug!(path = %document.path, %hash, size, "hashed document");

        Ok(ContentDigest {
            path: document.path.clone(),
            hash,
            size,
            last_modified: document.modified_at.unwrap_or_else(Utc::now),
            metadata_hash: document.metadata.digest(),
        })
    }

    /// Digest of a string under this hasher's policy.
    pub fn hash_text(&self, text: &str) -> String {
        match self.policy {
            NormalizationPolicy::Raw => hex::encode(Sha256::digest(text.as_bytes())),
            NormalizationPolicy::Canonical => {
                let mut canonical = CanonicalFeed::default();
                canonical.feed(text);
                canonical.finish()
            }
        }
    }

    /// Stream `reader` into SHA-256, returning the hex digest and the raw
    /// byte count. Invalid UTF-8 is an error under both policies.
    pub fn hash_reader(&self, reader: &mut dyn BufRead) -> std::io::Result<(String, u64)> {
        match self.policy {
            NormalizationPolicy::Raw => {
                let mut hasher = Sha256::new();
                let size = decode_blocks(reader, |text| {
                    hasher.update(text.as_bytes());
                    true
                })?;
                Ok((hex::encode(hasher.finalize()), size))
            }
            NormalizationPolicy::Canonical => {
                let mut canonical = CanonicalFeed::default();
                let size = decode_blocks(reader, |text| {
                    canonical.feed(text);
                    true
                })?;
                Ok((canonical.finish(), size))
            }
        }
    }
}

/// Incremental canonicalizer fed arbitrary pieces of text.
///
/// Nothing is buffered. `committed` holds the canonical output up to the
/// last character that is certainly kept. Newlines after it are only
/// counted, and a run of spaces or tabs is written into `held`, a copy of
/// `committed` extended by the pending newlines and the run. The next
/// visible character promotes `held`; a line break or the end of input
/// discards it. A `\r` is a line break on its own, and a `\n` directly after
/// it is skipped, even when the two arrive in different pieces.
#[derive(Default)]
struct CanonicalFeed {
    committed: Sha256,
    held: Option<Sha256>,
    pending_newlines: u64,
    after_cr: bool,
    started: bool,
}

impl CanonicalFeed {
    fn feed(&mut self, text: &str) {
        let mut run = Run::Empty;
        for (i, c) in text.char_indices() {
            if !self.started {
                self.started = true;
                if c == '\u{feff}' {
                    continue;
                }
            }
            if self.after_cr {
                self.after_cr = false;
                if c == '\n' {
                    continue;
                }
            }
            match c {
                '\n' | '\r' => {
                    self.flush(text, run, i);
                    run = Run::Empty;
                    self.held = None;
                    self.pending_newlines += 1;
                    self.after_cr = c == '\r';
                }
                ' ' | '\t' => {
                    if !matches!(run, Run::Blank(_)) {
                        self.flush(text, run, i);
                        run = Run::Blank(i);
                    }
                }
                _ => {
                    if !matches!(run, Run::Visible(_)) {
                        self.flush(text, run, i);
                        run = Run::Visible(i);
                    }
                }
            }
        }
        self.flush(text, run, text.len());
    }

    fn flush(&mut self, text: &str, run: Run, end: usize) {
        match run {
            Run::Empty => {}
            Run::Visible(from) => self.commit(&text[from..end]),
            Run::Blank(from) => self.hold(&text[from..end]),
        }
    }

    fn commit(&mut self, visible: &str) {
        match self.held.take() {
            Some(held) => self.committed = held,
            None => push_newlines(&mut self.committed, self.pending_newlines),
        }
        self.pending_newlines = 0;
        self.committed.update(visible.as_bytes());
    }

    fn hold(&mut self, blanks: &str) {
        let pending = self.pending_newlines;
        let committed = &self.committed;
        let held = self.held.get_or_insert_with(|| {
            let mut held = committed.clone();
            push_newlines(&mut held, pending);
            held
        });
        held.update(blanks.as_bytes());
    }

    fn finish(self) -> String {
        hex::encode(self.committed.finalize())
    }
}

/// Span of the current piece not yet handed to the hasher.
#[derive(Clone, Copy)]
enum Run {
    Empty,
    Visible(usize),
    Blank(usize),
}

fn push_newlines(hasher: &mut Sha256, mut count: u64) {
    const NEWLINES: [u8; 64] = [b'\n'; 64];
    while count > 0 {
        let n = count.min(NEWLINES.len() as u64) as usize;
        hasher.update(&NEWLINES[..n]);
        count -= n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentMetadata;
    use std::io::Write;

    fn canonical(text: &str) -> String {
        ContentHasher::default().hash_text(text)
    }

    #[test]
    fn test_deterministic() {
        let doc = Document::from_text("a.md", "# Title\n\nBody text.\n");
        let hasher = ContentHasher::default();
        let a = hasher.hash(&doc).unwrap();
        let b = hasher.hash(&doc).unwrap();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.hash.len(), 64);
        assert_eq!(a.size, "# Title\n\nBody text.\n".len() as u64);
        assert_eq!(a.hash, hasher.hash_text("# Title\n\nBody text."));
    }

    #[test]
    fn test_known_sha256() {
        // sha256("abc")
        assert_eq!(
            canonical("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(canonical("abc\n\n\n"), canonical("abc"));
    }

    #[test]
    fn test_line_endings_normalized() {
        let unix = canonical("one\ntwo\nthree\n");
        assert_eq!(unix, canonical("one\r\ntwo\r\nthree\r\n"));
        assert_eq!(unix, canonical("one\rtwo\rthree"));
    }

    #[test]
    fn test_trailing_whitespace_ignored() {
        assert_eq!(canonical("a  \nb\t\n"), canonical("a\nb"));
        assert_eq!(canonical("\u{feff}a\nb"), canonical("a\nb"));
    }

    #[test]
    fn test_significant_whitespace_kept() {
        assert_ne!(canonical("a\nb"), canonical("a\n\nb"));
        assert_ne!(canonical("a\nb"), canonical("a\n  b"));
        assert_ne!(canonical("a\nb"), canonical("\na\nb"));
        assert_ne!(canonical("a b"), canonical("a  b"));
    }

    #[test]
    fn test_raw_policy_is_byte_exact() {
        let raw = ContentHasher::new(NormalizationPolicy::Raw);
        assert_ne!(raw.hash_text("a\r\n"), raw.hash_text("a\n"));
        assert_eq!(raw.hash_text("abc"), canonical("abc"));
    }

    #[test]
    fn test_file_and_text_agree() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("doc.md");
        let body = "# Heading \r\n\r\nSome text\twith tabs\t\r\n\r\n";
        std::fs::File::create(&file)
            .unwrap()
            .write_all(body.as_bytes())
            .unwrap();

        let hasher = ContentHasher::default();
        let from_file = hasher.hash(&Document::from_file("doc.md", &file)).unwrap();
        let from_text = hasher.hash(&Document::from_text("doc.md", body)).unwrap();
        assert_eq!(from_file.hash, from_text.hash);
        assert_eq!(from_file.size, body.len() as u64);
        assert_eq!(from_file.hash, hasher.hash_text("# Heading\n\nSome text\twith tabs"));
    }

    #[test]
    fn test_block_edges_do_not_change_hash() {
        let samples = [
            "# Title \r\n\r\nbody\t \r\n",
            "\u{feff}first\rsecond\r\rthird  \n\n",
            "  indented\n\tkept\n \t \nend",
            "añ€😀 \r\n😀\t\r",
            "\r\n\r\nlate start",
        ];
        for policy in [NormalizationPolicy::Canonical, NormalizationPolicy::Raw] {
            let hasher = ContentHasher::new(policy);
            for sample in samples {
                let expected = hasher.hash_text(sample);
                for capacity in [1, 2, 3, 5] {
                    let mut reader =
                        std::io::BufReader::with_capacity(capacity, sample.as_bytes());
                    let (hash, size) = hasher.hash_reader(&mut reader).unwrap();
                    assert_eq!(hash, expected, "{:?} at capacity {}", sample, capacity);
                    assert_eq!(size, sample.len() as u64);
                }
            }
        }
    }

    #[test]
    fn test_canonical_matches_line_model() {
        // Reference: split into lines, trim each, drop trailing empty lines.
        fn by_lines(text: &str) -> String {
            let text = text.strip_prefix('\u{feff}').unwrap_or(text);
            let unix = text.replace("\r\n", "\n").replace('\r', "\n");
            let mut lines: Vec<&str> = unix
                .split('\n')
                .map(|l| l.trim_end_matches([' ', '\t']))
                .collect();
            while lines.last() == Some(&"") {
                lines.pop();
            }
            hex::encode(Sha256::digest(lines.join("\n").as_bytes()))
        }
        let alphabet = ['a', ' ', '\t', '\n', '\r', 'é'];
        let mut seed = 7u64;
        for _ in 0..500 {
            let len = (seed % 12) as usize;
            let text: String = (0..len)
                .map(|_| {
                    seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    alphabet[(seed >> 33) as usize % alphabet.len()]
                })
                .collect();
            assert_eq!(canonical(&text), by_lines(&text), "{:?}", text);
            seed = seed.wrapping_add(len as u64 + 1);
        }
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        let bytes: &[u8] = b"ok\xff\xfe";
        for policy in [NormalizationPolicy::Canonical, NormalizationPolicy::Raw] {
            let mut reader = std::io::BufReader::with_capacity(2, bytes);
            let err = ContentHasher::new(policy).hash_reader(&mut reader).unwrap_err();
            assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        }
    }

    #[test]
    fn test_unreadable_document_fails() {
        let doc = Document::from_file("missing.md", "/nonexistent/skillpack/missing.md");
        let err = ContentHasher::default().hash(&doc).unwrap_err();
        assert_eq!(err.path(), Some("missing.md"));
    }

    #[test]
    fn test_metadata_does_not_change_content_hash() {
        let plain = Document::from_text("a.md", "text");
        let tagged = Document::from_text("a.md", "text").with_metadata(DocumentMetadata {
            category: Some("guides".into()),
            ..Default::default()
        });
        let hasher = ContentHasher::default();
        let p = hasher.hash(&plain).unwrap();
        let t = hasher.hash(&tagged).unwrap();
        assert_eq!(p.hash, t.hash);
        assert!(p.metadata_hash.is_none());
        assert!(t.metadata_hash.is_some());
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!(
            "raw".parse::<NormalizationPolicy>().unwrap(),
            NormalizationPolicy::Raw
        );
        assert!(matches!(
            "fuzzy".parse::<NormalizationPolicy>(),
            Err(Error::Config(_))
        ));
    }
}
