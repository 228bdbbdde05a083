//! Evidence sources: raw log text from cluster nodes or sosreport bundles
//!
//! A [`LogFetcher`] performs the actual retrieval. [`EvidenceCache`] wraps a
//! fetcher for the lifetime of one run so that each (source, log kind) pair
//! is retrieved at most once no matter how many jobs are checked against it.

mod bundle;
mod node;

pub use bundle::{
    discover_bundles, hostname_from_dir_name, Bundle, BundleFetcher, BOOT_KERNEL_LOG,
    CONTAINER_LOG_DIR, DMESG, HOSTNAME_FILE, KUBELET_JOURNAL,
};
pub use node::{ensure_on_path, NodeLogFetcher};

use crate::error::Result;
use crate::models::ContainerId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Which log of a source is wanted
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogKind {
    /// Kubelet / node system journal
    Journal,
    /// Kernel ring buffer (dmesg)
    Kernel,
    /// Kernel messages of the whole boot, from the persisted journal
    BootKernel,
    /// Application log of one container
    ContainerLog(ContainerId),
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogKind::Journal => f.write_str("journal"),
            LogKind::Kernel => f.write_str("kernel"),
            LogKind::BootKernel => f.write_str("boot-kernel"),
            LogKind::ContainerLog(id) => write!(f, "container-log:{}", id.short()),
        }
    }
}

/// One unit of log text: a node name or bundle root, plus the log kind
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey {
    pub source: String,
    pub kind: LogKind,
}

impl SourceKey {
    pub fn new(source: impl Into<String>, kind: LogKind) -> Self {
        Self {
            source: source.into(),
            kind,
        }
    }

    pub fn journal(source: impl Into<String>) -> Self {
        Self::new(source, LogKind::Journal)
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.source, self.kind)
    }
}

/// Trait for log retrieval implementations
#[async_trait]
pub trait LogFetcher: Send + Sync {
    /// Retrieve the full text for a source; every call does real work
    async fn fetch(&self, key: &SourceKey) -> Result<String>;
}

/// Per-run memo of fetched log text
///
/// Successful fetches are stored for the rest of the run. Failures are
/// returned to the caller and not stored, so a later call retries.
pub struct EvidenceCache<F> {
    fetcher: F,
    entries: HashMap<SourceKey, Arc<str>>,
    retrievals: usize,
}

impl<F: LogFetcher> EvidenceCache<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            entries: HashMap::new(),
            retrievals: 0,
        }
    }

    /// Text for `key`, retrieving it on first use
    pub async fn fetch(&mut self, key: &SourceKey) -> Result<Arc<str>> {
        if let Some(text) = self.entries.get(key) {
            return Ok(Arc::clone(text));
        }

        self.retrievals += 1;
        let text: Arc<str> = self.fetcher.fetch(key).await?.into();
        debug!(source = %key, bytes = text.len(), "Fetched evidence");
        self.entries.insert(key.clone(), Arc::clone(&text));
        Ok(text)
    }

    /// Like [`fetch`](Self::fetch) for logs that may legitimately be absent
    pub async fn fetch_optional(&mut self, key: &SourceKey) -> Option<Arc<str>> {
        match self.fetch(key).await {
            Ok(text) => Some(text),
            Err(e) => {
                debug!(source = %key, error = %e, "Optional evidence not available");
                None
            }
        }
    }

    /// Number of underlying retrievals attempted so far
    pub fn retrievals(&self) -> usize {
        self.retrievals
    }

    pub fn is_cached(&self, key: &SourceKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }
}


#[cfg(test)]
mod tests {
    use super::testing::StaticFetcher;
    use super::*;

    #[tokio::test]
    async fn test_fetch_is_memoized() {
        let key = SourceKey::journal("worker-1");
        let mut cache = EvidenceCache::new(StaticFetcher::new().with(key.clone(), "line one"));

        let first = cache.fetch(&key).await.unwrap();
        let second = cache.fetch(&key).await.unwrap();

        assert_eq!(&*first, "line one");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.retrievals(), 1);
        assert_eq!(cache.fetcher().calls_for("worker-1"), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let key = SourceKey::journal("worker-9");
        let mut cache = EvidenceCache::new(StaticFetcher::new());

        assert!(cache.fetch(&key).await.is_err());
        assert!(cache.fetch_optional(&key).await.is_none());
        assert!(!cache.is_cached(&key));
        assert_eq!(cache.retrievals(), 2);
    }

    #[tokio::test]
    async fn test_kinds_are_cached_separately() {
        let journal = SourceKey::journal("bundle");
        let kernel = SourceKey::new("bundle", LogKind::Kernel);
        let mut cache = EvidenceCache::new(
            StaticFetcher::new()
                .with(journal.clone(), "kubelet")
                .with(kernel.clone(), "dmesg"),
        );

        assert_eq!(&*cache.fetch(&journal).await.unwrap(), "kubelet");
        assert_eq!(&*cache.fetch(&kernel).await.unwrap(), "dmesg");
        assert_eq!(cache.retrievals(), 2);
    }
}
