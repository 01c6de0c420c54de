//! `pio upload <dir>`: push paper images to object storage.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::storage::{detect_content_type, ObjectStore};

/// A local file paired with the object key it will be stored under.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadItem {
    pub path: PathBuf,
    pub key: String,
}

/// Join a prefix and a relative path into an object key with `/` separators.
pub fn object_key(prefix: &str, rel: &str) -> String {
    let rel = rel.replace('\\', "/");
    let rel = rel.trim_start_matches('/');
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        rel.to_string()
    } else {
        format!("{}/{}", prefix, rel)
    }
}

/// Find image files under `dir`, sorted by key.
pub fn collect_uploads(dir: &Path, include_globs: &[String], prefix: &str) -> Result<Vec<UploadItem>> {
    if !dir.is_dir() {
        bail!("image directory does not exist: {}", dir.display());
    }
    let include = build_globset(include_globs)?;

    let mut items = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        // Image globs are matched case-insensitively (IMG_01.PNG).
        if !include.is_match(rel.to_ascii_lowercase()) {
            continue;
        }
        items.push(UploadItem {
            path: entry.path().to_path_buf(),
            key: object_key(prefix, &rel),
        });
    }

    items.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(items)
}

pub async fn run_upload(
    config: &Config,
    dir: &Path,
    prefix: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let prefix = prefix.unwrap_or_else(|| config.storage.prefix.clone());
    let items = collect_uploads(dir, &config.storage.include_globs, &prefix)?;

    if dry_run {
        println!("upload (dry-run)");
        for item in &items {
            println!("  {} -> {}", item.path.display(), item.key);
        }
        println!("  files: {}", items.len());
        return Ok(());
    }

    let store = ObjectStore::new(&config.storage)?;

    println!("upload");
    let summary = upload_items(&store, &items).await;
    println!("  uploaded: {}", summary.uploaded);
    println!("  failed: {}", summary.failed);

    if summary.failed > 0 {
        bail!("{} of {} uploads failed", summary.failed, items.len());
    }
    Ok(())
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct UploadSummary {
    pub uploaded: u64,
    pub failed: u64,
}

/// Upload every item, counting failures instead of stopping at the first.
pub async fn upload_items(store: &ObjectStore, items: &[UploadItem]) -> UploadSummary {
    let mut summary = UploadSummary::default();

    for item in items {
        let body = match std::fs::read(&item.path) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(path = %item.path.display(), "cannot read image: {}", e);
                summary.failed += 1;
                continue;
            }
        };
        let content_type = detect_content_type(&item.key);

        match store.put_object(&item.key, body, content_type).await {
            Ok(()) => {
                println!("  {} -> {}", item.key, store.object_url(&item.key));
                summary.uploaded += 1;
            }
            Err(e) => {
                tracing::warn!(key = %item.key, "upload failed: {:#}", e);
                summary.failed += 1;
            }
        }
    }

    summary
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(&pattern.to_ascii_lowercase())?);
    }
    Ok(builder.build()?)
}
