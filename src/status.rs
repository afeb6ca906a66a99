//! `packages`, `status` and `manifest` commands.

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

use skillpack_core::SemVer;

use crate::config::Config;
use crate::manifest_store;
use crate::progress::NoProgress;
use crate::update::{plan_update, UpdateOptions, UpdateReport};

#[derive(Debug, Clone, Serialize)]
pub struct PackageStatus {
    pub name: String,
    pub root: PathBuf,
    pub healthy: bool,
    /// Version of the last committed update, if any.
    pub version: Option<SemVer>,
    pub tracked_documents: usize,
}

/// One row per configured package, in name order.
pub fn list_packages(config: &Config) -> Result<Vec<PackageStatus>> {
    let mut rows = Vec::new();
    for (name, package) in &config.packages {
        let manifest = manifest_store::load_manifest(&config.workspace.state_dir, name)?;
        rows.push(PackageStatus {
            name: name.clone(),
            root: package.root.clone(),
            healthy: package.root.is_dir(),
            version: (!manifest.is_empty()).then_some(manifest.version),
            tracked_documents: manifest.digests.len(),
        });
    }
    Ok(rows)
}

pub fn print_packages(rows: &[PackageStatus]) {
    println!("{:<20} {:<10} {:<10} {:<8} ROOT", "PACKAGE", "VERSION", "DOCUMENTS", "HEALTHY");
    for row in rows {
        let version = row
            .version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<10} {:<10} {:<8} {}",
            row.name,
            version,
            row.tracked_documents,
            row.healthy,
            row.root.display()
        );
    }
}

/// What `update` would do right now. Reads documents, writes nothing.
pub fn package_status(config: &Config, package: &str, full: bool) -> Result<UpdateReport> {
    let options = UpdateOptions {
        full,
        dry_run: true,
        ..UpdateOptions::default()
    };
    let plan = plan_update(config, package, &options, &NoProgress)?;
    Ok(UpdateReport {
        package: plan.package,
        change_set: plan.change_set,
        bump: plan.bump,
        base_version: plan.base_version,
        target_version: plan.target_version,
        failed: plan.failed,
        stats: None,
        package_dir: None,
        dry_run: true,
    })
}

pub fn print_status(report: &UpdateReport) {
    let cs = &report.change_set;
    println!(
        "{}  {} -> {}  ({:?})",
        report.package, report.base_version, report.target_version, report.bump
    );
    for path in &cs.added {
        println!("  A {}", path);
    }
    for path in &cs.modified {
        println!("  M {}", path);
    }
    for path in &cs.deleted {
        println!("  D {}", path);
    }
    for path in &cs.retagged {
        println!("  T {}", path);
    }
    for failure in &report.failed {
        println!("  ! {} ({})", failure.path, failure.error);
    }
    println!("  {} unchanged", cs.unchanged.len());
}

/// The stored manifest as pretty JSON.
pub fn manifest_json(config: &Config, package: &str) -> Result<String> {
    config.package(package)?;
    let manifest = manifest_store::load_manifest(&config.workspace.state_dir, package)?;
    Ok(manifest.to_json()?)
}
