//! Live node journal retrieval through the cluster CLI
//!
//! Runs `<program> adm node-logs <node>` and spools stdout into a file under
//! a private temporary directory. The directory is removed when the fetcher
//! is dropped, and a command still running is killed when its fetch is
//! dropped. The CLI drops both on exit, on error and on SIGINT, SIGTERM or
//! SIGHUP.

use super::{LogFetcher, LogKind, SourceKey};
use crate::error::{Result, TraceError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};

/// Fetches node journals by invoking the cluster CLI
pub struct NodeLogFetcher {
    program: String,
    args: Vec<String>,
    workdir: TempDir,
}

impl NodeLogFetcher {
    /// Create a fetcher running `<program> adm node-logs <node>`
    pub fn new(program: impl Into<String>) -> Result<Self> {
        Self::with_args(program, ["adm", "node-logs"])
    }

    /// Create a fetcher with custom arguments placed before the node name
    pub fn with_args<I, S>(program: impl Into<String>, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let workdir = tempfile::Builder::new().prefix("oomtrace-").tempdir()?;
        debug!(path = %workdir.path().display(), "Created node log spool directory");
        Ok(Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            workdir,
        })
    }

    /// Spool directory for fetched journals
    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    fn spool_path(&self, node: &str) -> PathBuf {
        let safe: String = node
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        self.workdir.path().join(format!("{}.journal", safe))
    }
}

#[async_trait]
impl LogFetcher for NodeLogFetcher {
    async fn fetch(&self, key: &SourceKey) -> Result<String> {
        // Node journals already interleave kernel messages
        if key.kind != LogKind::Journal {
            return Err(TraceError::unavailable(
                key.to_string(),
                "only the node journal is retrievable in live mode",
            ));
        }

        let spool = self.spool_path(&key.source);
        let file = std::fs::File::create(&spool)?;

        info!(node = %key.source, program = %self.program, "Fetching node journal");
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&key.source)
            .stdin(Stdio::null())
            .stdout(Stdio::from(file))
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TraceError::unavailable(&key.source, format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TraceError::unavailable(
                &key.source,
                format!("{} exited with {}: {}", self.program, output.status, stderr.trim()),
            ));
        }

        let bytes = tokio::fs::read(&spool).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Locate `program` on PATH, or fail with [`TraceError::ToolMissing`]
pub fn ensure_on_path(program: &str) -> Result<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return if candidate.is_file() {
            Ok(candidate.to_path_buf())
        } else {
            Err(TraceError::ToolMissing(program.to_string()))
        };
    }

    std::env::var_os("PATH")
        .iter()
        .flat_map(std::env::split_paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
        .ok_or_else(|| TraceError::ToolMissing(program.to_string()))
}
