use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::warn;

pub const LOG_DIR_ENV: &str = "PHARMRESEARCH_LOG_DIR";
pub const RETENTION_ENV: &str = "PHARMRESEARCH_LOG_RETENTION_DAYS";
pub const DEFAULT_LOG_DIR: &str = "data/logs";
pub const DEFAULT_RETENTION_DAYS: u64 = 90;

static REDACTION_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("api_key", r"(?i)(api[_-]?key\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)"),
        ("secret", r"(?i)(secret\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)"),
        ("bearer", r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)"),
        ("sk_token", r"(sk-[A-Za-z0-9]{16,})"),
    ]
    .into_iter()
    .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|regex| (name, regex)))
    .collect()
});

/// Where run logs go and how long they are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLogSettings {
    pub dir: PathBuf,
    /// Zero disables pruning.
    pub retention_days: u64,
}

impl Default for RunLogSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_LOG_DIR),
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl RunLogSettings {
    /// Apply `PHARMRESEARCH_LOG_DIR` / `PHARMRESEARCH_LOG_RETENTION_DAYS` on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var(LOG_DIR_ENV) {
            self.dir = PathBuf::from(dir);
        }
        if let Some(days) = std::env::var(RETENTION_ENV)
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
        {
            self.retention_days = days;
        }
        self
    }
}

/// One completed research run, as written to the run log.
#[derive(Debug, Clone)]
pub struct RunLogInput {
    pub run_id: String,
    pub molecule: String,
    pub therapy_area: String,
    pub goal: String,
    pub outcome: String,
    pub summary: Option<String>,
    pub unavailable_modules: Vec<String>,
    pub sources: Vec<String>,
    pub trace_path: Option<String>,
}

#[derive(Serialize)]
struct RunLogRecord {
    timestamp: String,
    run_id: String,
    molecule: String,
    therapy_area: String,
    goal: String,
    outcome: String,
    summary: Option<String>,
    unavailable_modules: Vec<String>,
    sources: Vec<String>,
    trace_path: Option<String>,
    redactions: Vec<&'static str>,
}

#[derive(Serialize)]
struct AuditLogRecord {
    timestamp: String,
    run_id: String,
    redactions: Vec<&'static str>,
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let line = serde_json::to_string(value)?;
    writeln!(writer, "{}", line)
        .with_context(|| format!("failed to append log entry to {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

fn sanitize_text(input: &str, redactions: &mut BTreeSet<&'static str>) -> String {
    let mut output = input.to_string();
    for (name, regex) in REDACTION_PATTERNS.iter() {
        let mut matched = false;
        output = regex
            .replace_all(&output, |caps: &Captures| {
                matched = true;
                if caps.len() > 2 {
                    format!("{}[REDACTED]", &caps[1])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .to_string();
        if matched {
            redactions.insert(*name);
        }
    }
    output
}

/// Append the run to `<dir>/YYYY/MM/runs.jsonl`, noting any redactions in
/// `audit.jsonl`, then prune files older than the retention window.
pub fn log_run_completion(settings: &RunLogSettings, input: RunLogInput) -> Result<PathBuf> {
    let timestamp = Utc::now();
    let mut redactions = BTreeSet::new();
    let mut clean = |value: &str| sanitize_text(value, &mut redactions);

    let record = RunLogRecord {
        timestamp: timestamp.to_rfc3339(),
        run_id: input.run_id.clone(),
        molecule: clean(&input.molecule),
        therapy_area: clean(&input.therapy_area),
        goal: clean(&input.goal),
        outcome: input.outcome,
        summary: input.summary.as_deref().map(&mut clean),
        unavailable_modules: input.unavailable_modules,
        sources: input.sources.iter().map(|s| clean(s.as_str())).collect(),
        trace_path: input.trace_path,
        redactions: Vec::new(),
    };
    let record = RunLogRecord {
        redactions: redactions.into_iter().collect(),
        ..record
    };

    let month_dir = settings
        .dir
        .join(format!("{:04}", timestamp.year()))
        .join(format!("{:02}", timestamp.month()));
    let run_log_path = month_dir.join("runs.jsonl");
    append_json_line(&run_log_path, &record)?;

    if !record.redactions.is_empty() {
        let audit = AuditLogRecord {
            timestamp: record.timestamp.clone(),
            run_id: input.run_id.clone(),
            redactions: record.redactions.clone(),
        };
        append_json_line(&month_dir.join("audit.jsonl"), &audit)?;
        warn!(
            run_id = %input.run_id,
            fields = ?record.redactions,
            "redacted potential secrets from run log"
        );
    }

    enforce_retention(&settings.dir, settings.retention_days)?;
    Ok(run_log_path)
}

fn enforce_retention(base_dir: &Path, retention_days: u64) -> Result<()> {
    if retention_days == 0 || !base_dir.exists() {
        return Ok(());
    }
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(retention_days.saturating_mul(86_400)))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    prune_directory(base_dir, cutoff)
}

fn prune_directory(dir: &Path, cutoff: SystemTime) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            prune_directory(&path, cutoff)?;
            if path.read_dir()?.next().is_none() {
                fs::remove_dir(&path).ok();
            }
        } else if metadata.is_file()
            && metadata
                .modified()
                .map(|time| time < cutoff)
                .unwrap_or(false)
        {
            fs::remove_file(&path).ok();
        }
    }

    Ok(())
}
