//! Segment directory housekeeping.

use crate::error::Result;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

/// Remove one job's segment directory. Missing directories are fine.
pub async fn remove_segments(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {
            debug!("Removed segment directory {}", dir.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Remove per-job segment directories under `root` untouched for longer than `max_age`.
///
/// Directories listed in `keep` are left alone regardless of age.
pub async fn prune_stale(root: &Path, max_age: Duration, keep: &[String]) -> Result<usize> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let now = SystemTime::now();
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if keep.contains(&name) {
            continue;
        }
        let age = metadata
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();
        if age >= max_age {
            remove_segments(&entry.path()).await?;
            removed += 1;
        }
    }

    if removed > 0 {
        info!("Pruned {} stale segment directories", removed);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prune_respects_age_and_keep_list() {
        let root = tempfile::tempdir().unwrap();
        for name in ["job-a", "job-b"] {
            std::fs::create_dir(root.path().join(name)).unwrap();
        }
        std::fs::write(root.path().join("stray.txt"), "x").unwrap();

        // Nothing is old enough yet.
        assert_eq!(prune_stale(root.path(), Duration::from_secs(3600), &[]).await.unwrap(), 0);

        let removed = prune_stale(root.path(), Duration::ZERO, &["job-b".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(!root.path().join("job-a").exists());
        assert!(root.path().join("job-b").exists());
        assert!(root.path().join("stray.txt").exists());
    }

    #[tokio::test]
    async fn test_remove_missing_dir_is_ok() {
        let root = tempfile::tempdir().unwrap();
        assert!(remove_segments(&root.path().join("absent")).await.is_ok());
    }
}
