pub mod error;
pub mod isolate;
pub mod process;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use common::config::{SandboxBackend, SandboxConfig};
use error::SandboxError;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use isolate::IsolateSandbox;
pub use process::ProcessSandbox;

/// File names used inside every box.
pub const STDIN_FILE: &str = "input.txt";
pub const STDOUT_FILE: &str = "stdout.txt";
pub const STDERR_FILE: &str = "stderr.txt";

/// A prepared, empty box owned by one worker slot.
#[derive(Debug, Clone)]
pub struct SandboxBox {
    pub id: u32,
    /// Host path of the box working directory.
    pub root: PathBuf,
}

/// Limits for a single run. Sizes are in kilobytes, times in milliseconds.
#[derive(Debug, Clone, Default)]
pub struct ResourceLimits {
    /// CPU time limit.
    pub time_limit_ms: u64,
    /// Wall-clock limit after which the process group is killed.
    pub wall_time_limit_ms: u64,
    pub memory_limit_kb: u64,
    /// Also cap the address space. Off for runtimes that reserve large
    /// virtual regions up front (JVM, V8).
    pub address_space_limit: bool,
    pub output_limit_kb: u64,
    pub process_limit: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub limits: ResourceLimits,
    /// File inside the box fed on stdin. `None` means empty stdin.
    pub stdin: Option<String>,
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Ok,
    /// Exited with a non-zero code.
    RuntimeError,
    /// Killed by a signal other than the limit enforcers.
    Signaled,
    TimedOut,
    MemoryExceeded,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub time_used_ms: u64,
    pub wall_time_ms: u64,
    pub memory_used_kb: u64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    pub fn cancelled() -> Self {
        Self {
            status: ExecutionStatus::Cancelled,
            exit_code: None,
            signal: None,
            time_used_ms: 0,
            wall_time_ms: 0,
            memory_used_kb: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == ExecutionStatus::Ok && self.exit_code.unwrap_or(0) == 0
    }
}

/// An isolation backend for untrusted programs.
///
/// Each box is a private directory that no other box can see. Boxes are
/// identified by small integers so that backends with a fixed pool of box
/// slots (isolate) can map them directly.
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create(&self, box_id: u32) -> Result<SandboxBox, SandboxError>;

    async fn write_file(
        &self,
        sandbox: &SandboxBox,
        name: &str,
        contents: &[u8],
    ) -> Result<(), SandboxError> {
        let path = box_path(sandbox, name)?;
        tokio::fs::write(&path, contents).await.map_err(|err| {
            SandboxError::Execution(format!("failed to write {}: {err}", path.display()))
        })
    }

    /// Run `argv` inside the box. Program failures are reported in the
    /// result; `Err` is reserved for infrastructure problems.
    async fn run(
        &self,
        sandbox: &SandboxBox,
        argv: &[String],
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SandboxError>;

    async fn remove(&self, sandbox: SandboxBox) -> Result<(), SandboxError>;
}

/// Build the configured backend. The process backend is refused unless
/// `allow_unconfined` is set.
pub fn from_config(config: &SandboxConfig) -> Result<Arc<dyn Sandbox>, SandboxError> {
    match config.backend {
        SandboxBackend::Isolate => Ok(Arc::new(IsolateSandbox::new(config.isolate_bin.clone()))),
        SandboxBackend::Process if !config.allow_unconfined => Err(SandboxError::Initialization(
            "the process backend does not confine the host filesystem; \
             set sandbox.allow_unconfined = true to use it for development"
                .into(),
        )),
        SandboxBackend::Process => {
            // SAFETY: geteuid has no preconditions.
            let box_uid_base = (unsafe { libc::geteuid() } == 0).then_some(config.box_uid_base);
            if box_uid_base.is_none() {
                warn!("Not running as root, process-backend boxes share one uid");
            }
            Ok(Arc::new(ProcessSandbox::new(
                config.work_dir.clone(),
                config.isolate_network,
                box_uid_base,
            )))
        }
    }
}

/// Resolve a plain file name inside the box.
pub(crate) fn box_path(sandbox: &SandboxBox, name: &str) -> Result<PathBuf, SandboxError> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(SandboxError::Execution(format!(
            "invalid file name in box: {name:?}"
        )));
    }
    Ok(sandbox.root.join(name))
}

/// Read at most `limit_kb` kilobytes of a captured stream. Missing files read as empty.
pub(crate) async fn read_capped(path: &Path, limit_kb: u64) -> Result<String, SandboxError> {
    let file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
        Err(err) => {
            return Err(SandboxError::Execution(format!(
                "failed to open {}: {err}",
                path.display()
            )));
        }
    };
    let mut buf = Vec::new();
    file.take(limit_kb.saturating_mul(1024))
        .read_to_end(&mut buf)
        .await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_backend_requires_opt_in() {
        let mut config = SandboxConfig {
            backend: SandboxBackend::Process,
            ..SandboxConfig::default()
        };
        assert!(matches!(
            from_config(&config),
            Err(SandboxError::Initialization(_))
        ));

        config.allow_unconfined = true;
        assert_eq!(from_config(&config).unwrap().name(), "process");

        let default = from_config(&SandboxConfig::default()).unwrap();
        assert_eq!(default.name(), "isolate");
    }

    #[test]
    fn test_box_path_rejects_traversal() {
        let b = SandboxBox {
            id: 0,
            root: PathBuf::from("/tmp/box"),
        };
        assert!(box_path(&b, "main.c").is_ok());
        assert!(box_path(&b, "../etc/passwd").is_err());
        assert!(box_path(&b, "..").is_err());
        assert!(box_path(&b, "").is_err());
    }

    #[tokio::test]
    async fn test_read_capped_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        tokio::fs::write(&path, vec![b'a'; 3000]).await.unwrap();

        assert_eq!(read_capped(&path, 1).await.unwrap().len(), 1024);
        assert_eq!(read_capped(&path, 16).await.unwrap().len(), 3000);
        assert_eq!(
            read_capped(&dir.path().join("missing"), 1).await.unwrap(),
            ""
        );
    }
}
