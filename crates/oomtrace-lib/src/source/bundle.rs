//! Offline evidence from extracted sosreport bundles
//!
//! A bundle root is any directory containing the kubelet journal at
//! [`KUBELET_JOURNAL`]. Source keys for bundles use the root path as the
//! source name, so [`BundleFetcher`] needs no state of its own.

use super::{LogFetcher, LogKind, SourceKey};
use crate::error::{Result, TraceError};
use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::fs;
use tracing::debug;

/// Kubelet journal, relative to the bundle root; marks a bundle root
pub const KUBELET_JOURNAL: &str = "sos_commands/openshift/journalctl_--no-pager_--unit_kubelet";
/// Hostname recorded by sos
pub const HOSTNAME_FILE: &str = "hostname";
/// Kernel ring buffer at collection time
pub const DMESG: &str = "sos_commands/kernel/dmesg";
/// Kernel messages of the current boot from the persisted journal
pub const BOOT_KERNEL_LOG: &str = "sos_commands/logs/journalctl_--no-pager_--boot_-k";
/// Directory of per-container `crictl logs` captures
pub const CONTAINER_LOG_DIR: &str = "sos_commands/crio/containers";

/// One extracted sosreport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub root: PathBuf,
    pub hostname: String,
}

impl Bundle {
    /// Source name used in [`SourceKey`]s for this bundle
    pub fn source_name(&self) -> String {
        self.root.to_string_lossy().into_owned()
    }

    pub fn key(&self, kind: LogKind) -> SourceKey {
        SourceKey::new(self.source_name(), kind)
    }

    async fn load(root: PathBuf) -> Self {
        let hostname = match fs::read_to_string(root.join(HOSTNAME_FILE)).await {
            Ok(content) if !content.trim().is_empty() => content.trim().to_string(),
            _ => {
                let dir_name = root
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                hostname_from_dir_name(&dir_name)
            }
        };
        Self { root, hostname }
    }
}

/// Derive a hostname from a bundle directory name
///
/// `sosreport-worker-1-2024-05-01-abcdef` becomes `worker-1`.
pub fn hostname_from_dir_name(dir_name: &str) -> String {
    static DATE_STAMP: OnceLock<Regex> = OnceLock::new();
    let re = DATE_STAMP.get_or_init(|| {
        Regex::new(r"-\d{4}-\d{2}-\d{2}(?:-[A-Za-z0-9]+)?$").expect("static pattern must compile")
    });
    let name = dir_name.strip_prefix("sosreport-").unwrap_or(dir_name);
    re.replace(name, "").into_owned()
}

/// Recursively find bundle roots under `dir`, sorted by path
pub async fn discover_bundles(dir: &Path) -> Result<Vec<Bundle>> {
    if !fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Err(TraceError::InputDirMissing(dir.to_path_buf()));
    }

    let mut roots = Vec::new();
    scan_dir(dir, &mut roots).await?;
    roots.sort();

    let mut bundles = Vec::with_capacity(roots.len());
    for root in roots {
        let bundle = Bundle::load(root).await;
        debug!(root = %bundle.root.display(), hostname = %bundle.hostname, "Discovered bundle");
        bundles.push(bundle);
    }

    if bundles.is_empty() {
        return Err(TraceError::NoBundles(dir.to_path_buf()));
    }
    Ok(bundles)
}

async fn scan_dir(path: &Path, roots: &mut Vec<PathBuf>) -> Result<()> {
    if fs::metadata(path.join(KUBELET_JOURNAL)).await.is_ok() {
        roots.push(path.to_path_buf());
        return Ok(());
    }

    let mut entries = fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let entry_path = entry.path();
        // Skip symlinks: sos links into its own tree
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            if let Err(e) = Box::pin(scan_dir(&entry_path, roots)).await {
                debug!(path = %entry_path.display(), error = %e, "Skipping unreadable directory");
            }
        }
    }
    Ok(())
}

/// Path of a log kind relative to a bundle root
pub fn relative_path(kind: &LogKind) -> PathBuf {
    match kind {
        LogKind::Journal => PathBuf::from(KUBELET_JOURNAL),
        LogKind::Kernel => PathBuf::from(DMESG),
        LogKind::BootKernel => PathBuf::from(BOOT_KERNEL_LOG),
        LogKind::ContainerLog(id) => {
            Path::new(CONTAINER_LOG_DIR).join(format!("crictl_logs_-t_{}", id))
        }
    }
}

/// Reads bundle files from disk
#[derive(Debug, Clone, Copy, Default)]
pub struct BundleFetcher;

#[async_trait]
impl LogFetcher for BundleFetcher {
    async fn fetch(&self, key: &SourceKey) -> Result<String> {
        let path = Path::new(&key.source).join(relative_path(&key.kind));
        let bytes = fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
            .map_err(|e| TraceError::unavailable(key.to_string(), format!("{:#}", e)))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(path, content).await.unwrap();
    }

    #[test]
    fn test_hostname_from_dir_name() {
        assert_eq!(hostname_from_dir_name("sosreport-worker-1-2024-05-01-abcdef"), "worker-1");
        assert_eq!(hostname_from_dir_name("sosreport-node3-2023-11-30"), "node3");
        assert_eq!(hostname_from_dir_name("custom-name"), "custom-name");
    }

    #[tokio::test]
    async fn test_discover_nested_bundles() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("case-123/sosreport-worker-a-2024-05-01-aaaaaa");
        let b = temp.path().join("sosreport-worker-b-2024-05-02-bbbbbb");
        write(&a, KUBELET_JOURNAL, "a").await;
        write(&b, KUBELET_JOURNAL, "b").await;
        write(&b, HOSTNAME_FILE, "worker-b.example.com\n").await;
        write(temp.path(), "notes/readme.txt", "not a bundle").await;

        let bundles = discover_bundles(temp.path()).await.unwrap();
        let hosts: Vec<_> = bundles.iter().map(|b| b.hostname.as_str()).collect();
        assert_eq!(bundles.len(), 2);
        assert!(hosts.contains(&"worker-a"));
        assert!(hosts.contains(&"worker-b.example.com"));
    }

    #[tokio::test]
    async fn test_discover_errors() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            discover_bundles(temp.path()).await,
            Err(TraceError::NoBundles(_))
        ));
        assert!(matches!(
            discover_bundles(&temp.path().join("missing")).await,
            Err(TraceError::InputDirMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_bundle_files() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), KUBELET_JOURNAL, "kubelet text").await;
        write(temp.path(), DMESG, "dmesg text").await;

        let source = temp.path().to_string_lossy().into_owned();
        let fetcher = BundleFetcher;
        let journal = fetcher.fetch(&SourceKey::journal(source.clone())).await.unwrap();
        let kernel = fetcher.fetch(&SourceKey::new(source.clone(), LogKind::Kernel)).await.unwrap();
        assert_eq!(journal, "kubelet text");
        assert_eq!(kernel, "dmesg text");

        let missing = fetcher.fetch(&SourceKey::new(source, LogKind::BootKernel)).await;
        assert!(matches!(missing, Err(TraceError::SourceUnavailable { .. })));
    }
}
