//! Bidirectional directory sync.
//!
//! Walks the local tree and the remote listing, handing each paired path to
//! the reconciler. Local directory permissions are not carried to the remote
//! side beyond the entry's own mode bits, and intermediate directories
//! created for downloads get default permissions.

use crate::crypto::KeySet;
use crate::error::ClientError;
use crate::sync::{SyncTarget, Syncer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// What a directory sync accomplished. On abort the error rides along with
/// the count of chunks that made it across before the failure.
#[derive(Debug)]
pub struct DirSyncReport {
    pub chunks_transferred: u64,
    pub aborted: Option<ClientError>,
}

/// Sync a local directory tree against a remote prefix, both directions.
pub async fn sync_directory(
    syncer: &Syncer<'_>,
    keys: &KeySet,
    remote_files: Vec<crate::api::FileInfo>,
    local_dir: &Path,
    remote_dir: &str,
) -> DirSyncReport {
    let mut total = 0u64;
    let mut processed: HashSet<String> = HashSet::new();

    // Decrypt the remote listing up front; a name that fails to open was
    // sealed under a different passphrase and cannot be reconciled.
    let mut remote_names: Vec<String> = Vec::with_capacity(remote_files.len());
    for info in &remote_files {
        match keys.open_filename(&info.file_name) {
            Ok(name) => remote_names.push(name),
            Err(e) => {
                return DirSyncReport {
                    chunks_transferred: total,
                    aborted: Some(e.into()),
                }
            }
        }
    }

    // Pass 1: the local tree drives. WalkDir iterates without recursing, so
    // arbitrarily deep trees cannot exhaust the stack.
    for entry in WalkDir::new(local_dir).into_iter().filter_map(|e| e.ok()) {
        let remote_path = pair_remote_path(local_dir, entry.path(), remote_dir);
        match syncer
            .sync_path(entry.path(), &remote_path, SyncTarget::Current)
            .await
        {
            Ok(outcome) => {
                total += outcome.chunks_transferred;
                processed.insert(remote_path);
            }
            Err(e) => {
                warn!("sync failed for {}: {}", remote_path, e);
                return DirSyncReport {
                    chunks_transferred: total,
                    aborted: Some(e),
                };
            }
        }
    }

    // Pass 2: remote entries under the prefix that the local walk never
    // touched, i.e. files that only exist server-side.
    for name in remote_names {
        if !under_prefix(&name, remote_dir) || processed.contains(&name) {
            continue;
        }
        let Some(local_path) = local_path_for(&name, remote_dir, local_dir) else {
            continue;
        };

        if let Some(parent) = local_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return DirSyncReport {
                    chunks_transferred: total,
                    aborted: Some(e.into()),
                };
            }
        }

        match syncer
            .sync_path(&local_path, &name, SyncTarget::Current)
            .await
        {
            Ok(outcome) => total += outcome.chunks_transferred,
            Err(e) => {
                warn!("sync failed for {}: {}", name, e);
                return DirSyncReport {
                    chunks_transferred: total,
                    aborted: Some(e),
                };
            }
        }
    }

    info!("directory sync moved {} chunks", total);
    DirSyncReport {
        chunks_transferred: total,
        aborted: None,
    }
}

/// Map a local path under `local_dir` to its remote counterpart by swapping
/// the prefix.
pub fn pair_remote_path(local_dir: &Path, local_path: &Path, remote_dir: &str) -> String {
    let base = remote_dir.trim_end_matches('/');
    let relative = local_path.strip_prefix(local_dir).unwrap_or(local_path);
    if relative.as_os_str().is_empty() {
        return base.to_string();
    }
    let tail = relative.to_string_lossy().replace('\\', "/");
    format!("{}/{}", base, tail)
}

/// Whether a remote name sits at or below the remote prefix.
fn under_prefix(name: &str, remote_dir: &str) -> bool {
    let base = remote_dir.trim_end_matches('/');
    name == base || name.starts_with(&format!("{}/", base))
}

/// Map a remote name back to the paired local path.
fn local_path_for(name: &str, remote_dir: &str, local_dir: &Path) -> Option<PathBuf> {
    let base = remote_dir.trim_end_matches('/');
    if name == base {
        return Some(local_dir.to_path_buf());
    }
    let tail = name.strip_prefix(&format!("{}/", base))?;
    Some(local_dir.join(tail))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_remote_path() {
        let local = Path::new("/home/me/docs");
        assert_eq!(
            pair_remote_path(local, Path::new("/home/me/docs/a/b.txt"), "/backup/docs"),
            "/backup/docs/a/b.txt"
        );
        assert_eq!(
            pair_remote_path(local, Path::new("/home/me/docs"), "/backup/docs/"),
            "/backup/docs"
        );
    }

    #[test]
    fn test_under_prefix() {
        assert!(under_prefix("/backup/docs/a.txt", "/backup/docs"));
        assert!(under_prefix("/backup/docs", "/backup/docs/"));
        assert!(!under_prefix("/backup/docs-old/a.txt", "/backup/docs"));
        assert!(!under_prefix("/other/a.txt", "/backup/docs"));
    }

    #[test]
    fn test_local_path_for() {
        let local = Path::new("/home/me/docs");
        assert_eq!(
            local_path_for("/backup/docs/a/b.txt", "/backup/docs", local),
            Some(PathBuf::from("/home/me/docs/a/b.txt"))
        );
        assert_eq!(
            local_path_for("/backup/docs", "/backup/docs", local),
            Some(local.to_path_buf())
        );
        assert_eq!(local_path_for("/elsewhere/x", "/backup/docs", local), None);
    }
}
