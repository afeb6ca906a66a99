//! Delta and full package assembly.
//!
//! A package is a vendor-neutral description of what an export layer has to
//! do: write these documents (whole, or as chunks), drop these paths, and
//! refresh metadata on these others. Delta packages carry only `added` and
//! `modified` content; unchanged documents are never read.
//!
//! Packages are produced by pushing into a [`PackageSink`] one entry (and
//! one chunk) at a time, so large packages can be written without holding
//! every chunk in memory. [`build_delta`] and [`build_full`] collect the
//! same stream into an in-memory [`DeltaPackage`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::chunk::{reassemble, StreamingChunker};
use crate::error::{Error, Result};
use crate::models::{ChangeSet, Chunk, Document, DocumentMetadata, SemVer};

/// Whether a package replaces everything or patches the previous version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    Full,
    Delta,
}

/// New metadata for a document whose content did not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataUpdate {
    pub path: String,
    pub metadata: DocumentMetadata,
}

/// Everything about a package that is known before content is streamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageHeader {
    pub kind: PackageKind,
    pub base_version: SemVer,
    pub target_version: SemVer,
    pub deletion_manifest: Vec<String>,
    pub metadata_updates: Vec<MetadataUpdate>,
}

/// Content of one document in a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntryBody {
    Whole { text: String },
    Chunked { chunks: Vec<Chunk> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEntry {
    pub path: String,
    pub metadata: DocumentMetadata,
    pub body: EntryBody,
}

impl ContentEntry {
    /// The document text this entry carries.
    pub fn text(&self) -> String {
        match &self.body {
            EntryBody::Whole { text } => text.clone(),
            EntryBody::Chunked { chunks } => reassemble(chunks),
        }
    }
}

/// An in-memory package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaPackage {
    pub kind: PackageKind,
    pub base_version: SemVer,
    pub target_version: SemVer,
    pub content_entries: Vec<ContentEntry>,
    pub deletion_manifest: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata_updates: Vec<MetadataUpdate>,
}

impl DeltaPackage {
    /// Apply this package to `previous` (path → text).
    ///
    /// A delta writes every content entry over `previous` and then removes
    /// every deleted path, which must exist. A full package replaces
    /// `previous` entirely; its deletion manifest only records what went
    /// away since the base version and must not name a shipped path.
    pub fn apply(&self, mut previous: BTreeMap<String, String>) -> Result<BTreeMap<String, String>> {
        if self.kind == PackageKind::Full {
            previous.clear();
        }
        for entry in &self.content_entries {
            previous.insert(entry.path.clone(), entry.text());
        }
        for path in &self.deletion_manifest {
            let removed = previous.remove(path).is_some();
            match self.kind {
                PackageKind::Delta if !removed => {
                    return Err(Error::invariant(
                        path,
                        "deletion of a path the base package does not contain",
                    ))
                }
                PackageKind::Full if removed => {
                    return Err(Error::invariant(path, "full package ships a deleted path"))
                }
                _ => {}
            }
        }
        Ok(previous)
    }
}

/// Receiver of a streamed package. Calls arrive in order: `begin`, then any
/// number of documents (`whole_document`, or `chunked_document` followed by
/// its `chunk`s), then `finish`.
pub trait PackageSink {
    fn begin(&mut self, header: &PackageHeader) -> Result<()>;
    fn whole_document(&mut self, path: &str, metadata: &DocumentMetadata, text: String) -> Result<()>;
    fn chunked_document(&mut self, path: &str, metadata: &DocumentMetadata) -> Result<()>;
    fn chunk(&mut self, chunk: Chunk) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

/// Counts reported after a package has been streamed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PackageStats {
    pub documents: usize,
    pub whole_documents: usize,
    pub chunked_documents: usize,
    pub chunks: usize,
    pub deletions: usize,
    pub metadata_updates: usize,
}

/// Stream a delta for `change_set` into `sink`.
///
/// Fails with [`Error::Invariant`] before anything is written if a path
/// the change set ships (added, modified, retagged) is missing from
/// `documents`, or a deleted path is still present.
pub fn write_delta(
    change_set: &ChangeSet,
    documents: &BTreeMap<String, Document>,
    chunker: &StreamingChunker,
    base_version: SemVer,
    target_version: SemVer,
    sink: &mut dyn PackageSink,
) -> Result<PackageStats> {
    let content = change_set.content_paths();
    for path in content
        .iter()
        .copied()
        .chain(change_set.retagged.iter().map(String::as_str))
    {
        if !documents.contains_key(path) {
            return Err(Error::invariant(path, "changed path has no current document"));
        }
    }
    for path in &change_set.deleted {
        if documents.contains_key(path) {
            return Err(Error::invariant(path, "deleted path still has a document"));
        }
    }

    let metadata_updates = change_set
        .retagged
        .iter()
        .filter_map(|path| documents.get(path))
        .map(|doc| MetadataUpdate {
            path: doc.path.clone(),
            metadata: doc.metadata.clone(),
        })
        .collect();

    let header = PackageHeader {
        kind: PackageKind::Delta,
        base_version,
        target_version,
        deletion_manifest: change_set.deleted.clone(),
        metadata_updates,
    };
    let docs = content.iter().filter_map(|path| documents.get(*path));
    stream(header, docs, chunker, sink)
}

/// Stream a full package containing every document in `documents`.
/// `deleted` lists previously shipped paths the consumer should drop.
pub fn write_full(
    documents: &BTreeMap<String, Document>,
    deleted: &[String],
    chunker: &StreamingChunker,
    base_version: SemVer,
    target_version: SemVer,
    sink: &mut dyn PackageSink,
) -> Result<PackageStats> {
    let header = PackageHeader {
        kind: PackageKind::Full,
        base_version,
        target_version,
        deletion_manifest: deleted.to_vec(),
        metadata_updates: Vec::new(),
    };
    stream(header, documents.values(), chunker, sink)
}

fn stream<'a, I>(
    header: PackageHeader,
    documents: I,
    chunker: &StreamingChunker,
    sink: &mut dyn PackageSink,
) -> Result<PackageStats>
where
    I: Iterator<Item = &'a Document>,
{
    let mut stats = PackageStats {
        deletions: header.deletion_manifest.len(),
        metadata_updates: header.metadata_updates.len(),
        ..PackageStats::default()
    };
    sink.begin(&header)?;

    for doc in documents {
        stats.documents += 1;
        if chunker.should_chunk_document(doc)? {
            sink.chunked_document(&doc.path, &doc.metadata)?;
            for chunk in chunker.chunk(doc)? {
                sink.chunk(chunk?)?;
                stats.chunks += 1;
            }
            stats.chunked_documents += 1;
        } else {
            sink.whole_document(&doc.path, &doc.metadata, doc.read_text()?)?;
            stats.whole_documents += 1;
        }
    }

    sink.finish()?;
    tracing::info!(
        kind = ?header.kind,
        base = %header.base_version,
        target = %header.target_version,
        documents = stats.documents,
        chunks = stats.chunks,
        deletions = stats.deletions,
        "package assembled"
    );
    Ok(stats)
}

/// Collects a streamed package into a [`DeltaPackage`].
#[derive(Debug, Default)]
struct Collector {
    package: Option<DeltaPackage>,
}

impl Collector {
    fn package(&mut self) -> Result<&mut DeltaPackage> {
        self.package
            .as_mut()
            .ok_or_else(|| Error::invariant("", "package content before header"))
    }

    fn into_package(self) -> Result<DeltaPackage> {
        self.package
            .ok_or_else(|| Error::invariant("", "package was never started"))
    }
}

impl PackageSink for Collector {
    fn begin(&mut self, header: &PackageHeader) -> Result<()> {
        self.package = Some(DeltaPackage {
            kind: header.kind,
            base_version: header.base_version,
            target_version: header.target_version,
            content_entries: Vec::new(),
            deletion_manifest: header.deletion_manifest.clone(),
            metadata_updates: header.metadata_updates.clone(),
        });
        Ok(())
    }

    fn whole_document(&mut self, path: &str, metadata: &DocumentMetadata, text: String) -> Result<()> {
        self.package()?.content_entries.push(ContentEntry {
            path: path.to_string(),
            metadata: metadata.clone(),
            body: EntryBody::Whole { text },
        });
        Ok(())
    }

    fn chunked_document(&mut self, path: &str, metadata: &DocumentMetadata) -> Result<()> {
        self.package()?.content_entries.push(ContentEntry {
            path: path.to_string(),
            metadata: metadata.clone(),
            body: EntryBody::Chunked { chunks: Vec::new() },
        });
        Ok(())
    }

    fn chunk(&mut self, chunk: Chunk) -> Result<()> {
        let path = chunk.source_path.clone();
        match self.package()?.content_entries.last_mut() {
            Some(ContentEntry {
                path: entry_path,
                body: EntryBody::Chunked { chunks },
                ..
            }) if *entry_path == path => {
                chunks.push(chunk);
                Ok(())
            }
            _ => Err(Error::invariant(path, "chunk outside its document entry")),
        }
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Build an in-memory delta package. See [`write_delta`].
pub fn build_delta(
    change_set: &ChangeSet,
    documents: &BTreeMap<String, Document>,
    chunker: &StreamingChunker,
    base_version: SemVer,
    target_version: SemVer,
) -> Result<DeltaPackage> {
    let mut collector = Collector::default();
    write_delta(
        change_set,
        documents,
        chunker,
        base_version,
        target_version,
        &mut collector,
    )?;
    collector.into_package()
}

/// Build an in-memory full package. See [`write_full`].
pub fn build_full(
    documents: &BTreeMap<String, Document>,
    deleted: &[String],
    chunker: &StreamingChunker,
    base_version: SemVer,
    target_version: SemVer,
) -> Result<DeltaPackage> {
    let mut collector = Collector::default();
    write_full(
        documents,
        deleted,
        chunker,
        base_version,
        target_version,
        &mut collector,
    )?;
    collector.into_package()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkConfig;

    fn chunker() -> StreamingChunker {
        StreamingChunker::new(ChunkConfig {
            chunk_size: 16,
            overlap: 4,
            ..ChunkConfig::default()
        })
        .unwrap()
    }

    fn docs(entries: &[(&str, &str)]) -> BTreeMap<String, Document> {
        entries
            .iter()
            .map(|(p, t)| (p.to_string(), Document::from_text(*p, *t)))
            .collect()
    }

    fn texts(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(p, t)| (p.to_string(), t.to_string()))
            .collect()
    }

    #[test]
    fn test_delta_ships_only_changed_content() {
        let current = docs(&[
            ("a.md", "alpha"),
            ("b.md", "beta, rewritten and now long enough to be chunked"),
            ("d.md", "delta"),
        ]);
        let cs = ChangeSet {
            added: vec!["d.md".into()],
            modified: vec!["b.md".into()],
            deleted: vec!["c.md".into()],
            unchanged: vec!["a.md".into()],
            retagged: Vec::new(),
        };
        let pkg = build_delta(
            &cs,
            &current,
            &chunker(),
            SemVer::new(1, 0, 0),
            SemVer::new(1, 1, 0),
        )
        .unwrap();

        assert_eq!(pkg.kind, PackageKind::Delta);
        let shipped: Vec<&str> = pkg.content_entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(shipped, vec!["b.md", "d.md"]);
        assert_eq!(pkg.deletion_manifest, vec!["c.md"]);
        assert!(matches!(pkg.content_entries[0].body, EntryBody::Chunked { .. }));
        assert!(matches!(pkg.content_entries[1].body, EntryBody::Whole { .. }));
        assert_eq!(pkg.target_version, SemVer::new(1, 1, 0));
    }

    #[test]
    fn test_apply_reproduces_current_set() {
        let before = [("a.md", "alpha"), ("b.md", "beta"), ("c.md", "gamma")];
        let after = [
            ("a.md", "alpha"),
            ("b.md", "beta, rewritten and now long enough to be chunked"),
            ("d.md", "delta"),
        ];
        let cs = ChangeSet {
            added: vec!["d.md".into()],
            modified: vec!["b.md".into()],
            deleted: vec!["c.md".into()],
            unchanged: vec!["a.md".into()],
            retagged: Vec::new(),
        };
        let pkg = build_delta(
            &cs,
            &docs(&after),
            &chunker(),
            SemVer::new(1, 0, 0),
            SemVer::new(1, 1, 0),
        )
        .unwrap();
        assert_eq!(pkg.apply(texts(&before)).unwrap(), texts(&after));
    }

    #[test]
    fn test_missing_document_is_invariant_violation() {
        let cs = ChangeSet {
            modified: vec!["ghost.md".into()],
            ..ChangeSet::default()
        };
        let err = build_delta(
            &cs,
            &docs(&[("a.md", "alpha")]),
            &chunker(),
            SemVer::default(),
            SemVer::new(0, 1, 0),
        )
        .unwrap_err();
        match err {
            Error::Invariant { path, .. } => assert_eq!(path, "ghost.md"),
            other => panic!("expected invariant violation, got {:?}", other),
        }
    }

    #[test]
    fn test_deleted_but_present_is_invariant_violation() {
        let cs = ChangeSet {
            deleted: vec!["a.md".into()],
            ..ChangeSet::default()
        };
        let result = build_delta(
            &cs,
            &docs(&[("a.md", "alpha")]),
            &chunker(),
            SemVer::default(),
            SemVer::new(0, 1, 0),
        );
        assert!(matches!(result, Err(Error::Invariant { .. })));
    }

    #[test]
    fn test_deletion_only_delta() {
        let cs = ChangeSet {
            deleted: vec!["c.md".into()],
            unchanged: vec!["a.md".into(), "b.md".into()],
            ..ChangeSet::default()
        };
        let pkg = build_delta(
            &cs,
            &docs(&[("a.md", "alpha"), ("b.md", "beta")]),
            &chunker(),
            SemVer::new(1, 1, 0),
            SemVer::new(1, 2, 0),
        )
        .unwrap();
        assert!(pkg.content_entries.is_empty());
        assert_eq!(pkg.deletion_manifest, vec!["c.md"]);
    }

    #[test]
    fn test_retagged_carries_metadata_only() {
        let mut current = docs(&[("a.md", "alpha")]);
        current.get_mut("a.md").unwrap().metadata.category = Some("guides".into());
        let cs = ChangeSet {
            unchanged: vec!["a.md".into()],
            retagged: vec!["a.md".into()],
            ..ChangeSet::default()
        };
        let pkg = build_delta(
            &cs,
            &current,
            &chunker(),
            SemVer::new(1, 0, 0),
            SemVer::new(1, 0, 1),
        )
        .unwrap();
        assert!(pkg.content_entries.is_empty());
        assert_eq!(pkg.metadata_updates.len(), 1);
        assert_eq!(
            pkg.metadata_updates[0].metadata.category.as_deref(),
            Some("guides")
        );
    }

    #[test]
    fn test_full_package_has_everything() {
        let current = docs(&[("a.md", "alpha"), ("b.md", "beta")]);
        let pkg = build_full(
            &current,
            &["old.md".to_string()],
            &chunker(),
            SemVer::new(1, 2, 0),
            SemVer::new(2, 0, 0),
        )
        .unwrap();
        assert_eq!(pkg.kind, PackageKind::Full);
        assert_eq!(pkg.content_entries.len(), 2);
        let rebuilt = pkg
            .apply(texts(&[("old.md", "x"), ("a.md", "stale")]))
            .unwrap();
        assert_eq!(rebuilt, texts(&[("a.md", "alpha"), ("b.md", "beta")]));
    }

    #[test]
    fn test_full_package_replaces_previous_state() {
        let current = docs(&[("a.md", "alpha")]);
        let pkg = build_full(
            &current,
            &[],
            &chunker(),
            SemVer::new(1, 0, 0),
            SemVer::new(2, 0, 0),
        )
        .unwrap();
        // Paths the consumer holds but the package does not ship are gone,
        // whether or not the deletion manifest names them.
        let rebuilt = pkg
            .apply(texts(&[("a.md", "stale"), ("stray.md", "left over")]))
            .unwrap();
        assert_eq!(rebuilt, texts(&[("a.md", "alpha")]));

        let mut contradictory = pkg.clone();
        contradictory.deletion_manifest = vec!["a.md".into()];
        assert!(matches!(
            contradictory.apply(BTreeMap::new()),
            Err(Error::Invariant { .. })
        ));
    }

    #[test]
    fn test_apply_rejects_unknown_deletion() {
        let pkg = DeltaPackage {
            kind: PackageKind::Delta,
            base_version: SemVer::default(),
            target_version: SemVer::new(0, 1, 0),
            content_entries: Vec::new(),
            deletion_manifest: vec!["nope.md".into()],
            metadata_updates: Vec::new(),
        };
        assert!(pkg.apply(BTreeMap::new()).is_err());
    }
}
