//! Update progress reporting.
//!
//! Reports what `skillpack update` is doing so users see how far hashing and
//! packaging have come on large documentation trees. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for an update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateProgressEvent {
    /// Walking the package root. Total unknown.
    Scanning { package: String },
    /// n documents hashed out of total.
    Hashing {
        package: String,
        n: u64,
        total: u64,
    },
    /// n documents written to the package out of total.
    Packaging {
        package: String,
        n: u64,
        total: u64,
    },
}

/// Reports update progress. Implementations write to stderr (human or JSON).
pub trait UpdateProgressReporter: Send + Sync {
    fn report(&self, event: UpdateProgressEvent);
}

/// Human-friendly progress on stderr: "update react  hashing  1,234 / 5,000 documents".
pub struct StderrProgress;

impl UpdateProgressReporter for StderrProgress {
    fn report(&self, event: UpdateProgressEvent) {
        let line = match &event {
            UpdateProgressEvent::Scanning { package } => {
                format!("update {}  scanning...\n", package)
            }
            UpdateProgressEvent::Hashing { package, n, total } => format!(
                "update {}  hashing  {} / {} documents\n",
                package,
                format_number(*n),
                format_number(*total)
            ),
            UpdateProgressEvent::Packaging { package, n, total } => format!(
                "update {}  packaging  {} / {} documents\n",
                package,
                format_number(*n),
                format_number(*total)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl UpdateProgressReporter for JsonProgress {
    fn report(&self, event: UpdateProgressEvent) {
        let obj = match &event {
            UpdateProgressEvent::Scanning { package } => serde_json::json!({
                "event": "progress",
                "package": package,
                "phase": "scanning"
            }),
            UpdateProgressEvent::Hashing { package, n, total } => serde_json::json!({
                "event": "progress",
                "package": package,
                "phase": "hashing",
                "n": n,
                "total": total
            }),
            UpdateProgressEvent::Packaging { package, n, total } => serde_json::json!({
                "event": "progress",
                "package": package,
                "phase": "packaging",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl UpdateProgressReporter for NoProgress {
    fn report(&self, _event: UpdateProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn UpdateProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
