//! Update pipeline orchestration.
//!
//! Coordinates one package update: scan → hash → detect → decide bump →
//! package → commit manifest. The stored manifest is only replaced after
//! the package has been written, so a failed update leaves the previous
//! state untouched and the same update can simply be re-run.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use skillpack_core::delta::{write_delta, write_full, PackageStats};
use skillpack_core::{
    apply_bump, detect, BumpKind, ChangeSet, ContentDigest, ContentHasher, Document,
    Error as CoreError, Manifest, SemVer, StreamingChunker,
};

use crate::config::Config;
use crate::connector_fs;
use crate::export::JsonlPackageWriter;
use crate::manifest_store::{self, PackageLock};
use crate::progress::{UpdateProgressEvent, UpdateProgressReporter};

/// Per-run overrides of the configuration.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Ignore stored digests and rebuild the whole package.
    pub full: bool,
    /// Plan only; write neither package nor manifest.
    pub dry_run: bool,
    /// Abort on the first unreadable document. ORed with `[update] strict`.
    pub strict: bool,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
}

/// A document that could not be read during hashing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPath {
    pub path: String,
    pub error: String,
    /// The previous digest was kept so the path is reported unchanged.
    pub carried_forward: bool,
}

/// Everything decided before any output is written.
#[derive(Debug)]
pub struct UpdatePlan {
    pub package: String,
    pub previous: Manifest,
    /// Readable current documents.
    pub documents: BTreeMap<String, Document>,
    /// Current digests, including carried-forward ones for failed paths.
    pub digests: BTreeMap<String, ContentDigest>,
    pub change_set: ChangeSet,
    pub bump: BumpKind,
    pub base_version: SemVer,
    pub target_version: SemVer,
    pub failed: Vec<FailedPath>,
}

/// Outcome of `run_update`.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub package: String,
    pub change_set: ChangeSet,
    pub bump: BumpKind,
    pub base_version: SemVer,
    pub target_version: SemVer,
    pub failed: Vec<FailedPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<PackageStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_dir: Option<PathBuf>,
    pub dry_run: bool,
}

impl UpdateReport {
    fn from_plan(plan: &UpdatePlan, dry_run: bool) -> Self {
        Self {
            package: plan.package.clone(),
            change_set: plan.change_set.clone(),
            bump: plan.bump,
            base_version: plan.base_version,
            target_version: plan.target_version,
            failed: plan.failed.clone(),
            stats: None,
            package_dir: None,
            dry_run,
        }
    }
}

/// Build the chunker for this run, applying CLI overrides.
pub fn chunker_for(config: &Config, options: &UpdateOptions) -> Result<StreamingChunker> {
    let mut chunking = config.chunking;
    if let Some(size) = options.chunk_size {
        chunking.chunk_size = size;
    }
    if let Some(overlap) = options.chunk_overlap {
        chunking.overlap = overlap;
    }
    StreamingChunker::new(chunking).context("Invalid chunking options")
}

/// Scan, hash and classify a package without writing anything.
pub fn plan_update(
    config: &Config,
    package: &str,
    options: &UpdateOptions,
    progress: &dyn UpdateProgressReporter,
) -> Result<UpdatePlan> {
    let package_config = config.package(package)?;
    let previous = manifest_store::load_manifest(&config.workspace.state_dir, package)?;
    let hasher = ContentHasher::new(config.hashing.normalization);
    let strict = options.strict || config.update.strict;

    let mut full = options.full;
    if let Some(stored) = previous.normalization.as_deref() {
        if stored != hasher.policy().as_str() && !previous.is_empty() {
            tracing::warn!(
                package,
                stored,
                current = hasher.policy().as_str(),
                "normalization policy changed, rebuilding package"
            );
            full = true;
        }
    }

    progress.report(UpdateProgressEvent::Scanning {
        package: package.to_string(),
    });
    let mut documents = connector_fs::scan_package(package_config)
        .with_context(|| format!("Failed to scan package '{}'", package))?;

    let (digests, failed) = hash_documents(
        package,
        &hasher,
        &mut documents,
        &previous,
        strict,
        progress,
    )?;

    let detected = detect(&digests, &previous);
    let (change_set, bump) = if full {
        let change_set = ChangeSet {
            added: digests.keys().cloned().collect(),
            deleted: detected.deleted,
            ..ChangeSet::default()
        };
        let bump = if change_set.total_paths() == 0 {
            BumpKind::None
        } else {
            BumpKind::Major
        };
        (change_set, bump)
    } else {
        let bump = config
            .versioning
            .decide_bump(&detected, detected.total_paths());
        (detected, bump)
    };

    let base_version = previous.version;
    let target_version = apply_bump(base_version, bump);
    tracing::info!(
        package,
        added = change_set.added.len(),
        modified = change_set.modified.len(),
        deleted = change_set.deleted.len(),
        unchanged = change_set.unchanged.len(),
        bump = ?bump,
        %base_version,
        %target_version,
        "update planned"
    );

    Ok(UpdatePlan {
        package: package.to_string(),
        previous,
        documents,
        digests,
        change_set,
        bump,
        base_version,
        target_version,
        failed,
    })
}

/// Hash every document.
///
/// Strict: the first unreadable document aborts. Resilient: an unreadable
/// document that was in the previous manifest keeps its previous digest; a
/// new one is left out. Either way it is removed from `documents` and
/// listed in the returned failures.
pub fn hash_documents(
    package: &str,
    hasher: &ContentHasher,
    documents: &mut BTreeMap<String, Document>,
    previous: &Manifest,
    strict: bool,
    progress: &dyn UpdateProgressReporter,
) -> Result<(BTreeMap<String, ContentDigest>, Vec<FailedPath>)> {
    let total = documents.len() as u64;
    let mut digests = BTreeMap::new();
    let mut failed = Vec::new();

    for (n, (path, document)) in documents.iter().enumerate() {
        match hasher.hash(document) {
            Ok(digest) => {
                digests.insert(path.clone(), digest);
            }
            Err(e @ CoreError::Io { .. }) => {
                if strict {
                    return Err(e).with_context(|| {
                        format!("Update aborted (strict mode): cannot read '{}'", path)
                    });
                }
                let carried = previous.digests.get(path).cloned();
                tracing::warn!(
                    path = %path,
                    error = %e,
                    carried_forward = carried.is_some(),
                    "skipping unreadable document"
                );
                failed.push(FailedPath {
                    path: path.clone(),
                    error: e.to_string(),
                    carried_forward: carried.is_some(),
                });
                if let Some(digest) = carried {
                    digests.insert(path.clone(), digest);
                }
            }
            Err(e) => return Err(e.into()),
        }

        let n = n as u64 + 1;
        if n % 100 == 0 || n == total {
            progress.report(UpdateProgressEvent::Hashing {
                package: package.to_string(),
                n,
                total,
            });
        }
    }

    for entry in &failed {
        documents.remove(&entry.path);
    }
    Ok((digests, failed))
}

/// The manifest committed after a successful update. Unchanged digests are
/// carried forward verbatim unless their metadata changed.
pub fn next_manifest(plan: &UpdatePlan, normalization: &str) -> Manifest {
    let retagged: BTreeSet<&str> = plan.change_set.retagged.iter().map(String::as_str).collect();
    let digests = plan
        .digests
        .iter()
        .map(|(path, current)| {
            let digest = match plan.previous.digests.get(path) {
                Some(old) if old.hash == current.hash && !retagged.contains(path.as_str()) => {
                    old.clone()
                }
                _ => current.clone(),
            };
            (path.clone(), digest)
        })
        .collect();

    Manifest {
        version: plan.target_version,
        generated_at: Utc::now(),
        digests,
        normalization: Some(normalization.to_string()),
    }
}

/// Run one update of `package` end to end.
pub fn run_update(
    config: &Config,
    package: &str,
    options: &UpdateOptions,
    progress: &dyn UpdateProgressReporter,
) -> Result<UpdateReport> {
    config.package(package)?;
    let chunker = chunker_for(config, options)?;

    if options.dry_run {
        let plan = plan_update(config, package, options, progress)?;
        return Ok(UpdateReport::from_plan(&plan, true));
    }

    let _lock = PackageLock::acquire(&config.workspace.state_dir, package)?;
    let plan = plan_update(config, package, options, progress)?;
    let mut report = UpdateReport::from_plan(&plan, false);

    if plan.bump == BumpKind::None {
        tracing::info!(package, version = %plan.base_version, "no changes, nothing written");
        return Ok(report);
    }

    let shipped = if plan.bump.is_full_rebuild() {
        plan.documents.len()
    } else {
        plan.change_set.content_paths().len()
    };
    let mut writer =
        JsonlPackageWriter::new(&config.workspace.output_dir, package, shipped as u64, progress);

    let stats = if plan.bump.is_full_rebuild() {
        let missing: Vec<&str> = plan
            .failed
            .iter()
            .filter(|f| f.carried_forward)
            .map(|f| f.path.as_str())
            .collect();
        if !missing.is_empty() {
            bail!(
                "Cannot rebuild '{}' in full: unreadable documents would be dropped: {}",
                package,
                missing.join(", ")
            );
        }
        write_full(
            &plan.documents,
            &plan.change_set.deleted,
            &chunker,
            plan.base_version,
            plan.target_version,
            &mut writer,
        )
    } else {
        write_delta(
            &plan.change_set,
            &plan.documents,
            &chunker,
            plan.base_version,
            plan.target_version,
            &mut writer,
        )
    }
    .with_context(|| format!("Failed to write package '{}' {}", package, plan.target_version))?;

    report.package_dir = writer.published_dir().map(|p| p.to_path_buf());
    report.stats = Some(stats);

    let manifest = next_manifest(&plan, config.hashing.normalization.as_str());
    manifest_store::save_manifest(&config.workspace.state_dir, package, &manifest)?;

    Ok(report)
}

/// Human-readable summary on stdout.
pub fn print_report(report: &UpdateReport) {
    let cs = &report.change_set;
    if report.dry_run {
        println!("update {} (dry-run)", report.package);
    } else {
        println!("update {}", report.package);
    }
    println!("  added: {}", cs.added.len());
    println!("  modified: {}", cs.modified.len());
    println!("  deleted: {}", cs.deleted.len());
    println!("  unchanged: {}", cs.unchanged.len());
    if !cs.retagged.is_empty() {
        println!("  metadata only: {}", cs.retagged.len());
    }
    println!(
        "  bump: {:?} ({} -> {})",
        report.bump, report.base_version, report.target_version
    );
    if let Some(stats) = &report.stats {
        println!(
            "  packaged: {} documents ({} chunked, {} chunks), {} deletions",
            stats.documents, stats.chunked_documents, stats.chunks, stats.deletions
        );
    }
    if let Some(dir) = &report.package_dir {
        println!("  output: {}", dir.display());
    }
    for failure in &report.failed {
        println!("  skipped: {} ({})", failure.path, failure.error);
    }
    if report.bump == BumpKind::None {
        println!("up to date");
    } else {
        println!("ok");
    }
}
