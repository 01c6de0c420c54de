//! Log cleanup: drop noisy lines and expire old log files.
//!
//! Files under the log directory that match `[logs].include_globs` are
//! either deleted (when older than the retention window) or filtered line
//! by line against `[logs].drop_patterns`. Filtered files are rewritten
//! through a sibling temp file and an atomic rename. Matching runs on raw
//! bytes, so kept lines are written back exactly as read even when a log
//! is not valid UTF-8.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::bytes::RegexSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

use crate::config::LogsConfig;

/// Result of filtering one log text.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanOutcome {
    pub kept: Vec<u8>,
    pub removed: usize,
    pub total: usize,
}

/// Drop every line matching any pattern. Kept lines retain their endings.
pub fn clean_text(text: &[u8], patterns: &RegexSet) -> CleanOutcome {
    let mut kept = Vec::with_capacity(text.len());
    let mut removed = 0;
    let mut total = 0;

    for line in text.split_inclusive(|b| *b == b'\n') {
        total += 1;
        let body = line.strip_suffix(b"\n").unwrap_or(line);
        let body = body.strip_suffix(b"\r").unwrap_or(body);
        if patterns.is_match(body) {
            removed += 1;
        } else {
            kept.extend_from_slice(line);
        }
    }

    CleanOutcome {
        kept,
        removed,
        total,
    }
}

/// Options for a cleanup run, after CLI overrides are merged with config.
#[derive(Debug, Clone)]
pub struct CleanOptions {
    pub dir: PathBuf,
    pub include_globs: Vec<String>,
    pub patterns: Vec<String>,
    pub retention_days: Option<u64>,
    pub dry_run: bool,
}

impl CleanOptions {
    pub fn from_config(
        config: &LogsConfig,
        dir: Option<PathBuf>,
        patterns: Vec<String>,
        retention_days: Option<u64>,
        dry_run: bool,
    ) -> Self {
        Self {
            dir: dir.unwrap_or_else(|| config.dir.clone()),
            include_globs: config.include_globs.clone(),
            patterns: if patterns.is_empty() {
                config.drop_patterns.clone()
            } else {
                patterns
            },
            retention_days: retention_days.or(config.retention_days),
            dry_run,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CleanSummary {
    pub files_scanned: usize,
    pub files_rewritten: usize,
    pub files_deleted: usize,
    pub lines_removed: usize,
}

/// Clean every matching file under `opts.dir`.
pub fn clean_dir(opts: &CleanOptions) -> Result<CleanSummary> {
    if !opts.dir.is_dir() {
        anyhow::bail!("log directory does not exist: {}", opts.dir.display());
    }

    let patterns = RegexSet::new(&opts.patterns).context("invalid drop pattern")?;
    let include = build_globset(&opts.include_globs)?;
    let cutoff = opts
        .retention_days
        .map(|days| SystemTime::now() - Duration::from_secs(days * 24 * 60 * 60));

    let mut summary = CleanSummary::default();

    for entry in WalkDir::new(&opts.dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(&opts.dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if !include.is_match(&rel) {
            continue;
        }
        summary.files_scanned += 1;

        if let Some(cutoff) = cutoff {
            let modified = entry.metadata()?.modified()?;
            if modified < cutoff {
                if !opts.dry_run {
                    std::fs::remove_file(entry.path())
                        .with_context(|| format!("Failed to delete {}", entry.path().display()))?;
                }
                tracing::debug!(file = %rel, "expired log file");
                println!("  {:<40} expired", rel);
                summary.files_deleted += 1;
                continue;
            }
        }

        let removed = clean_file(entry.path(), &patterns, opts.dry_run)?;
        if removed > 0 {
            println!("  {:<40} -{} lines", rel, removed);
            summary.files_rewritten += 1;
            summary.lines_removed += removed;
        }
    }

    Ok(summary)
}

/// Filter one file in place. Returns the number of lines removed.
pub fn clean_file(path: &Path, patterns: &RegexSet, dry_run: bool) -> Result<usize> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let outcome = clean_text(&bytes, patterns);

    if outcome.removed == 0 || dry_run {
        return Ok(outcome.removed);
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".pio-tmp");
    let tmp = path.with_file_name(tmp_name);
    std::fs::write(&tmp, &outcome.kept)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    let permissions = std::fs::metadata(path)?.permissions();
    std::fs::set_permissions(&tmp, permissions)
        .with_context(|| format!("Failed to set permissions on {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    Ok(outcome.removed)
}

pub fn run_log_clean(opts: &CleanOptions) -> Result<()> {
    let header = if opts.dry_run {
        "log-clean (dry-run)"
    } else {
        "log-clean"
    };
    println!("{} {}", header, opts.dir.display());

    let summary = clean_dir(opts)?;

    println!("  files scanned: {}", summary.files_scanned);
    println!("  files rewritten: {}", summary.files_rewritten);
    println!("  files deleted: {}", summary.files_deleted);
    println!("  lines removed: {}", summary.lines_removed);
    Ok(())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(patterns: &[&str]) -> RegexSet {
        RegexSet::new(patterns).unwrap()
    }

    #[test]
    fn drops_matching_lines_and_keeps_endings() {
        let text = "start\r\nGET /health 200\r\nwork done\nGET /health 200";
        let out = clean_text(text.as_bytes(), &set(&["GET /health"]));
        assert_eq!(out.kept, b"start\r\nwork done\n");
        assert_eq!(out.removed, 2);
        assert_eq!(out.total, 4);
    }

    #[test]
    fn no_patterns_keeps_everything() {
        let text = "a\nb\n";
        let out = clean_text(text.as_bytes(), &RegexSet::empty());
        assert_eq!(out.kept, text.as_bytes());
        assert_eq!(out.removed, 0);
    }

    #[test]
    fn anchored_blank_line_pattern() {
        let out = clean_text(b"a\n\n   \nb\n", &set(&[r"^\s*$"]));
        assert_eq!(out.kept, b"a\nb\n");
        assert_eq!(out.removed, 2);
    }

    #[test]
    fn clean_dir_rewrites_only_matching_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("api")).unwrap();
        std::fs::write(root.join("api/app.log"), "keep\nnoise\nkeep2\n").unwrap();
        std::fs::write(root.join("clean.log"), "keep\n").unwrap();
        std::fs::write(root.join("notes.txt"), "noise\n").unwrap();

        let opts = CleanOptions {
            dir: root.to_path_buf(),
            include_globs: vec!["**/*.log".into()],
            patterns: vec!["^noise$".into()],
            retention_days: None,
            dry_run: false,
        };
        let summary = clean_dir(&opts).unwrap();

        assert_eq!(summary.files_scanned, 2);
        assert_eq!(summary.files_rewritten, 1);
        assert_eq!(summary.lines_removed, 1);
        assert_eq!(
            std::fs::read_to_string(root.join("api/app.log")).unwrap(),
            "keep\nkeep2\n"
        );
        assert_eq!(std::fs::read_to_string(root.join("notes.txt")).unwrap(), "noise\n");
        assert!(!root.join("api/app.log.pio-tmp").exists());
    }

    #[test]
    fn dry_run_leaves_files_untouched() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("a.log");
        std::fs::write(&path, "noise\nkeep\n").unwrap();

        let removed = clean_file(&path, &set(&["noise"]), true).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "noise\nkeep\n");
    }

    #[test]
    fn rewrite_preserves_non_utf8_bytes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("raw.log");
        std::fs::write(&path, b"noise\nuser=\xff\xfe ok\n").unwrap();

        let removed = clean_file(&path, &set(&["^noise$"]), false).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(std::fs::read(&path).unwrap(), b"user=\xff\xfe ok\n");
    }

    #[cfg(unix)]
    #[test]
    fn rewrite_keeps_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("app.log");
        std::fs::write(&path, "noise\nkeep\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o640)).unwrap();

        clean_file(&path, &set(&["noise"]), false).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep\n");
    }

    fn backdate(path: &Path, days: u64) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(days * 24 * 60 * 60))
            .unwrap();
    }

    fn retention_opts(dir: &Path, dry_run: bool) -> CleanOptions {
        CleanOptions {
            dir: dir.to_path_buf(),
            include_globs: vec!["**/*.log".into()],
            patterns: vec!["^noise$".into()],
            retention_days: Some(7),
            dry_run,
        }
    }

    #[test]
    fn expired_files_are_deleted() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::write(root.join("old.log"), "noise\nkeep\n").unwrap();
        std::fs::write(root.join("new.log"), "noise\nkeep\n").unwrap();
        backdate(&root.join("old.log"), 30);

        let summary = clean_dir(&retention_opts(root, false)).unwrap();

        assert_eq!(summary.files_scanned, 2);
        assert_eq!(summary.files_deleted, 1);
        assert_eq!(summary.files_rewritten, 1);
        assert!(!root.join("old.log").exists());
        assert_eq!(std::fs::read_to_string(root.join("new.log")).unwrap(), "keep\n");
    }

    #[test]
    fn dry_run_counts_expired_files_without_deleting() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::write(root.join("old.log"), "keep\n").unwrap();
        backdate(&root.join("old.log"), 30);

        let summary = clean_dir(&retention_opts(root, true)).unwrap();

        assert_eq!(summary.files_deleted, 1);
        assert!(root.join("old.log").exists());
    }

    #[test]
    fn missing_dir_is_an_error() {
        let opts = CleanOptions {
            dir: PathBuf::from("/definitely/not/here"),
            include_globs: vec!["**/*.log".into()],
            patterns: vec![],
            retention_days: None,
            dry_run: true,
        };
        assert!(clean_dir(&opts).is_err());
    }

    #[test]
    fn cli_patterns_override_config() {
        let cfg = LogsConfig::default();
        let opts = CleanOptions::from_config(&cfg, None, vec!["x".into()], Some(3), false);
        assert_eq!(opts.patterns, vec!["x"]);
        assert_eq!(opts.retention_days, Some(3));
        assert_eq!(opts.dir, cfg.dir);

        let opts = CleanOptions::from_config(&cfg, None, vec![], None, false);
        assert_eq!(opts.patterns, cfg.drop_patterns);
    }
}
