//! Filesystem document source.
//!
//! Walks a package root, applies include/exclude globs, and returns
//! file-backed [`Document`]s. File contents are not read here; hashing and
//! chunking stream them later.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

use skillpack_core::{Document, DocumentMetadata};

use crate::config::PackageConfig;

/// Scan a package root into documents keyed by their relative path.
pub fn scan_package(package: &PackageConfig) -> Result<BTreeMap<String, Document>> {
    let root = &package.root;
    if !root.exists() {
        bail!("Package root does not exist: {}", root.display());
    }

    let include_set = build_globset(&package.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/.skillpack/**".to_string(),
    ];
    default_excludes.extend(package.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut documents = BTreeMap::new();

    let walker = WalkDir::new(root)
        .follow_links(package.follow_symlinks)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative_key(relative);

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        let mut doc = Document::from_file(rel_str.clone(), path)
            .with_metadata(metadata_for(&rel_str, &package.tags));
        if let Some(modified) = modified_at(path) {
            doc = doc.with_modified_at(modified);
        }
        documents.insert(rel_str, doc);
    }

    tracing::debug!(root = %root.display(), documents = documents.len(), "scanned package");
    Ok(documents)
}

/// `/`-separated relative path, identical on every platform.
fn relative_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// The top-level directory as category, the file extension as language and
/// the package's configured tags.
fn metadata_for(rel_path: &str, tags: &[String]) -> DocumentMetadata {
    let category = rel_path
        .split_once('/')
        .map(|(dir, _)| dir.to_string());
    let language = Path::new(rel_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| match ext {
            "md" | "mdx" => "markdown".to_string(),
            "rst" => "restructuredtext".to_string(),
            "txt" => "text".to_string(),
            other => other.to_lowercase(),
        });
    DocumentMetadata {
        category,
        language,
        tags: tags.to_vec(),
        ..Default::default()
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
