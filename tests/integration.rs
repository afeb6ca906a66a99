use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn skillpack_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("skillpack");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let docs = root.join("docs");
    fs::create_dir_all(docs.join("guide")).unwrap();
    fs::write(
        docs.join("index.md"),
        "# Handbook\n\nStart here. The guide covers installation and upgrades.\n",
    )
    .unwrap();
    fs::write(
        docs.join("guide/install.md"),
        "# Install\n\nRun the installer, then verify the version.\n",
    )
    .unwrap();
    fs::write(
        docs.join("guide/upgrade.md"),
        "# Upgrade\n\nRead the changelog before upgrading.\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[workspace]
state_dir = "{root}/state"
output_dir = "{root}/dist"

[chunking]
chunk_size = 400
overlap = 40

[packages.handbook]
root = "{root}/docs"
"#,
        root = root.display()
    );
    let config_path = root.join("skillpack.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_skillpack(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = skillpack_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run skillpack binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn update_json(config_path: &Path, extra: &[&str]) -> serde_json::Value {
    let mut args = vec!["update", "handbook", "--json", "--progress", "off"];
    args.extend_from_slice(extra);
    let (stdout, stderr, success) = run_skillpack(config_path, &args);
    assert!(success, "update failed: {}", stderr);
    serde_json::from_str(&stdout).unwrap()
}

#[test]
fn test_packages_lists_configured() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_skillpack(&config_path, &["packages"]);
    assert!(success, "packages failed: {}", stderr);
    assert!(stdout.contains("PACKAGE"));
    assert!(stdout.contains("handbook"));
    assert!(stdout.contains("true"));
}

#[test]
fn test_first_update_writes_full_package() {
    let (tmp, config_path) = setup_test_env();
    let report = update_json(&config_path, &[]);
    assert_eq!(report["bump"], "major");
    assert_eq!(report["target_version"]["major"], 1);
    assert_eq!(report["change_set"]["added"].as_array().unwrap().len(), 3);

    let package = tmp.path().join("dist/handbook/1.0.0");
    assert!(package.join("package.json").exists());
    assert!(package.join("entries.jsonl").exists());
    assert!(tmp.path().join("state/handbook/manifest.json").exists());
    assert!(!tmp.path().join("state/handbook/update.lock").exists());
}

#[test]
fn test_update_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    update_json(&config_path, &[]);
    let report = update_json(&config_path, &[]);
    assert_eq!(report["bump"], "none");
    assert!(report.get("package_dir").is_none());

    let (stdout, _, success) = run_skillpack(&config_path, &["update", "handbook"]);
    assert!(success);
    assert!(stdout.contains("up to date"));
}

#[test]
fn test_update_incremental() {
    let (tmp, config_path) = setup_test_env();
    update_json(&config_path, &[]);

    fs::write(
        tmp.path().join("docs/guide/upgrade.md"),
        "# Upgrade\n\nRead the changelog, then back up your data.\n",
    )
    .unwrap();
    let report = update_json(&config_path, &[]);
    assert_eq!(report["bump"], "minor");
    assert_eq!(report["change_set"]["modified"][0], "guide/upgrade.md");
    assert!(tmp.path().join("dist/handbook/1.1.0/package.json").exists());

    let (stdout, _, _) = run_skillpack(&config_path, &["manifest", "handbook"]);
    let manifest: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(manifest["version"]["minor"], 1);
    assert!(manifest["digests"]["guide/upgrade.md"]["hash"].is_string());
}

#[test]
fn test_update_dry_run() {
    let (tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) =
        run_skillpack(&config_path, &["update", "handbook", "--dry-run"]);
    assert!(success, "dry run failed: {}", stderr);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("added: 3"));
    assert!(!tmp.path().join("dist").exists());
    assert!(!tmp.path().join("state").exists());
}

#[test]
fn test_update_full_bumps_major() {
    let (_tmp, config_path) = setup_test_env();
    update_json(&config_path, &[]);
    let report = update_json(&config_path, &["--full"]);
    assert_eq!(report["bump"], "major");
    assert_eq!(report["target_version"]["major"], 2);
}

#[test]
fn test_status_shows_changes() {
    let (tmp, config_path) = setup_test_env();
    update_json(&config_path, &[]);
    fs::remove_file(tmp.path().join("docs/guide/install.md")).unwrap();
    fs::write(tmp.path().join("docs/faq.md"), "# FAQ\n").unwrap();

    let (stdout, stderr, success) = run_skillpack(&config_path, &["status", "handbook"]);
    assert!(success, "status failed: {}", stderr);
    assert!(stdout.contains("A faq.md"));
    assert!(stdout.contains("D guide/install.md"));
    assert!(stdout.contains("1.0.0 -> "));
}

#[test]
fn test_unknown_package_fails() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_skillpack(&config_path, &["update", "nope"]);
    assert!(!success);
    assert!(stderr.contains("Unknown package"));
}

#[test]
fn test_chunk_command() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("long.md");
    fs::write(&file, "abcdefghij".repeat(10)).unwrap();

    let (stdout, stderr, success) = run_skillpack(
        &config_path,
        &[
            "chunk",
            file.to_str().unwrap(),
            "--chunk-size",
            "40",
            "--chunk-overlap",
            "10",
            "--json",
        ],
    );
    assert!(success, "chunk failed: {}", stderr);
    let chunks: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[1]["start_offset"], 30);
    assert_eq!(chunks[1]["overlap_with_previous"], 10);
    assert_eq!(chunks[2]["end_offset"], 100);
}

#[test]
fn test_chunk_rejects_bad_overlap() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("long.md");
    fs::write(&file, "text").unwrap();
    let (_, stderr, success) = run_skillpack(
        &config_path,
        &["chunk", file.to_str().unwrap(), "--chunk-size", "10", "--chunk-overlap", "10"],
    );
    assert!(!success);
    assert!(stderr.contains("overlap"));
}

#[test]
fn test_completions() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, _, success) = run_skillpack(&config_path, &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("skillpack"));
}
