//! Storage manager — workspace quota enforcement and retention cleanup.
//!
//! The data directory holds downloads, document uploads, and caches.  The
//! quota acts as an admission gate: a write that would push the workspace
//! past quota is refused with a failure result so the model can adapt.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::config::StorageConfig;

/// Subdirectories created under the data dir.
const DIRS: &[&str] = &[
    "downloads",
    "documents/uploads",
    "documents/collections",
    "cache",
    "exports",
];

/// Quota verdict from [`StorageManager::check_quota`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaStatus {
    Ok,
    Warning,
    Exceeded,
}

pub struct StorageManager {
    config: StorageConfig,
    base: PathBuf,
}

impl StorageManager {
    pub fn new(config: StorageConfig, project_root: &Path) -> Self {
        let base = PathBuf::from(&config.data_dir);
        let base = if base.is_absolute() {
            base
        } else {
            project_root.join(base)
        };
        Self { config, base }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    /// Create the data directory layout.  Called at startup.
    pub async fn initialize(&self) -> std::io::Result<()> {
        let base = self.base.clone();
        tokio::task::spawn_blocking(move || {
            for subdir in DIRS {
                std::fs::create_dir_all(base.join(subdir))?;
            }
            Ok::<(), std::io::Error>(())
        })
        .await
        .map_err(|e| std::io::Error::other(format!("storage init task panicked: {e}")))??;
        log::info!("storage initialized at {}", self.base.display());
        Ok(())
    }

    /// Sum the workspace size in one directory walk and classify it against
    /// the quota.  Quota 0 disables checking.
    pub fn check_quota(&self) -> (f64, f64, QuotaStatus) {
        let quota_mb = self.config.workspace_quota_mb as f64;
        if self.config.workspace_quota_mb == 0 {
            return (0.0, quota_mb, QuotaStatus::Ok);
        }

        let used_bytes = dir_size(&self.base);
        let used_mb = used_bytes as f64 / (1024.0 * 1024.0);
        let pct = used_mb / quota_mb * 100.0;

        let status = if pct >= 100.0 {
            QuotaStatus::Exceeded
        } else if pct >= self.config.alert_threshold_pct {
            QuotaStatus::Warning
        } else {
            QuotaStatus::Ok
        };
        (used_mb, quota_mb, status)
    }

    /// Validate a prospective write against the per-file cap and the quota.
    pub fn validate_write(&self, size_bytes: u64) -> Result<(), String> {
        let max_bytes = self.config.max_file_size_mb * 1024 * 1024;
        if size_bytes > max_bytes {
            return Err(format!(
                "file of {size_bytes} bytes exceeds max size of {} MB",
                self.config.max_file_size_mb
            ));
        }

        if self.config.workspace_quota_mb > 0 {
            let (used_mb, quota_mb, status) = self.check_quota();
            let new_mb = used_mb + size_bytes as f64 / (1024.0 * 1024.0);
            if status == QuotaStatus::Exceeded || new_mb > quota_mb {
                return Err(format!(
                    "workspace quota exceeded: {used_mb:.1} MB used of {quota_mb:.0} MB"
                ));
            }
        }
        Ok(())
    }

    /// Remove files past retention and trim the cache; returns counts per
    /// category.
    pub async fn cleanup_expired(&self) -> Vec<(String, usize)> {
        let base = self.base.clone();
        let download_age = Duration::from_secs(self.config.download_retention_hours * 3600);
        let upload_age = Duration::from_secs(self.config.upload_retention_hours * 3600);
        let cache_max = self.config.cache_max_mb * 1024 * 1024;

        tokio::task::spawn_blocking(move || {
            let mut counts = Vec::new();
            counts.push((
                "downloads".to_owned(),
                clean_old_files(&base.join("downloads"), download_age),
            ));
            counts.push((
                "uploads".to_owned(),
                clean_old_files(&base.join("documents/uploads"), upload_age),
            ));
            counts.push(("cache".to_owned(), trim_cache(&base.join("cache"), cache_max)));
            counts
        })
        .await
        .unwrap_or_default()
    }
}

fn dir_size(dir: &Path) -> u64 {
    let mut total = 0;
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            total += dir_size(&path);
        } else if let Ok(meta) = entry.metadata() {
            total += meta.len();
        }
    }
    total
}

/// Recursively remove files older than `max_age`.  Returns the count removed.
fn clean_old_files(dir: &Path, max_age: Duration) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let now = SystemTime::now();
    let mut count = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            count += clean_old_files(&path, max_age);
            // Drop directories emptied by the sweep.
            let _ = std::fs::remove_dir(&path);
        } else if let Ok(meta) = entry.metadata() {
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or(Duration::ZERO);
            if age > max_age && std::fs::remove_file(&path).is_ok() {
                count += 1;
            }
        }
    }
    count
}

/// Remove oldest cache files until the total size fits `max_bytes`.
fn trim_cache(dir: &Path, max_bytes: u64) -> usize {
    let mut files: Vec<(PathBuf, SystemTime, u64)> = Vec::new();
    collect_files(dir, &mut files);
    let mut total: u64 = files.iter().map(|(_, _, size)| size).sum();
    if total <= max_bytes {
        return 0;
    }

    files.sort_by_key(|(_, mtime, _)| *mtime);
    let mut count = 0;
    for (path, _, size) in files {
        if total <= max_bytes {
            break;
        }
        if std::fs::remove_file(&path).is_ok() {
            total = total.saturating_sub(size);
            count += 1;
        }
    }
    count
}

fn collect_files(dir: &Path, out: &mut Vec<(PathBuf, SystemTime, u64)>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else if let Ok(meta) = entry.metadata() {
            let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            out.push((path, mtime, meta.len()));
        }
    }
}
