//! Replay a dump file off the async runtime
//!
//! The whole replay is synchronous, so it runs on the blocking pool and the
//! finished repository is handed back to the caller.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;
use svnlift_core::{BranchConfig, Repository};
use tokio::task;

/// Revisions between progress lines
const PROGRESS_EVERY: u64 = 500;

pub async fn replay_dump(path: PathBuf, config: BranchConfig) -> Result<Repository<File>> {
    task::spawn_blocking(move || replay_dump_blocking(&path, config))
        .await
        .map_err(|e| anyhow::anyhow!("Replay task failed: {:?}", e))?
}

fn replay_dump_blocking(path: &Path, config: BranchConfig) -> Result<Repository<File>> {
    let start_time = Instant::now();
    let mut repo = Repository::open(path, config)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut replayed = 0u64;
    while let Some(rev) = repo
        .replay_next()
        .with_context(|| format!("replaying {}", path.display()))?
    {
        replayed += 1;
        if replayed % PROGRESS_EVERY == 0 {
            let elapsed = start_time.elapsed().as_secs_f64();
            tracing::info!(
                "Progress: r{} | {} revisions ({} nodes) in {:.1}s | {:.0} rev/min",
                rev,
                replayed,
                repo.node_count(),
                elapsed,
                replayed as f64 / (elapsed / 60.0)
            );
        }
    }

    tracing::info!(
        "Replay complete: {} revisions, {} nodes, {} blobs in {:.1}s",
        replayed,
        repo.node_count(),
        repo.blobs().len(),
        start_time.elapsed().as_secs_f64()
    );
    Ok(repo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use svnlift_core::{DumpWriter, NodeAction, NodeRecord, PropertySet};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_replay_dump_returns_repository() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("small.dump");
        let mut writer = DumpWriter::new(File::create(&path).unwrap());
        writer.write_preamble("cli-test").unwrap();
        writer.write_revision(0, &PropertySet::new()).unwrap();
        writer.write_node(&NodeRecord::dir("trunk", NodeAction::Add)).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let repo = replay_dump(path, BranchConfig::default()).await.unwrap();
        assert_eq!(repo.head(), Some(0));
        assert_eq!(repo.branches().live_branches().count(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_reports_path() {
        let err = replay_dump(PathBuf::from("/nonexistent/x.dump"), BranchConfig::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/x.dump"));
    }
}
