use super::error::SandboxError;
use super::{
    ExecutionResult, ExecutionStatus, ResourceLimits, RunOptions, STDERR_FILE, STDOUT_FILE,
    Sandbox, SandboxBox, read_capped,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Backend driving the `isolate` tool with control groups.
///
/// Each box gets its own uid, PID, mount and network namespaces. Memory is
/// limited through the cgroup, so OOM kills are reported precisely.
#[derive(Debug, Clone)]
pub struct IsolateSandbox {
    bin: String,
}

impl IsolateSandbox {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    fn command(&self, box_id: u32) -> Command {
        let mut command = Command::new(&self.bin);
        command.arg(format!("--box-id={box_id}")).arg("--cg");
        command
    }

    fn meta_path(box_id: u32) -> PathBuf {
        std::env::temp_dir().join(format!("codearena-isolate-{box_id}.meta"))
    }
}

fn add_resource_limit_args(command: &mut Command, limits: &ResourceLimits) {
    if limits.time_limit_ms > 0 {
        command.arg(format!("--time={:.3}", limits.time_limit_ms as f64 / 1000.0));
    }
    if limits.wall_time_limit_ms > 0 {
        command.arg(format!(
            "--wall-time={:.3}",
            limits.wall_time_limit_ms as f64 / 1000.0
        ));
    }
    if limits.memory_limit_kb > 0 {
        command.arg(format!("--cg-mem={}", limits.memory_limit_kb));
    }
    if limits.output_limit_kb > 0 {
        command.arg(format!("--fsize={}", limits.output_limit_kb));
    }
    if limits.process_limit > 0 {
        command.arg(format!("--processes={}", limits.process_limit));
    }
}

/// Raw key/value content of an isolate meta file.
#[derive(Debug, Default)]
struct Meta {
    raw: HashMap<String, String>,
    oom_killed: bool,
}

impl Meta {
    fn parse(content: &str) -> Self {
        let mut meta = Meta::default();
        for line in content.lines() {
            if let Some((key, value)) = line.split_once(':') {
                let key = key.trim();
                if key == "cg-oom-killed" {
                    meta.oom_killed = true;
                }
                meta.raw.insert(key.to_string(), value.trim().to_string());
            } else if line.trim() == "cg-oom-killed" {
                meta.oom_killed = true;
            }
        }
        meta
    }

    fn get_i32(&self, key: &str) -> Option<i32> {
        self.raw.get(key).and_then(|v| v.parse().ok())
    }

    fn get_u64(&self, key: &str) -> Option<u64> {
        self.raw.get(key).and_then(|v| v.parse().ok())
    }

    fn get_ms(&self, key: &str) -> u64 {
        self.raw
            .get(key)
            .and_then(|v| v.parse::<f64>().ok())
            .map(|secs| (secs * 1000.0).round() as u64)
            .unwrap_or(0)
    }

    fn status(&self) -> &str {
        self.raw.get("status").map(String::as_str).unwrap_or("OK")
    }

    fn into_result(self) -> Result<ExecutionResult, SandboxError> {
        let status = match self.status() {
            "XX" => {
                return Err(SandboxError::Unknown(format!(
                    "isolate internal error: {}",
                    self.raw.get("message").cloned().unwrap_or_default()
                )));
            }
            _ if self.oom_killed => ExecutionStatus::MemoryExceeded,
            "TO" => ExecutionStatus::TimedOut,
            "SG" => ExecutionStatus::Signaled,
            "RE" => ExecutionStatus::RuntimeError,
            _ => ExecutionStatus::Ok,
        };

        Ok(ExecutionResult {
            status,
            exit_code: self.get_i32("exitcode"),
            signal: self.get_i32("exitsig"),
            time_used_ms: self.get_ms("time"),
            wall_time_ms: self.get_ms("time-wall"),
            memory_used_kb: self
                .get_u64("cg-mem")
                .or_else(|| self.get_u64("max-rss"))
                .unwrap_or(0),
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

async fn read_meta_file(meta_path: &Path) -> Result<Meta, SandboxError> {
    let content = fs::read_to_string(meta_path).await.map_err(|err| {
        SandboxError::Execution(format!("failed to read isolate meta file: {err}"))
    })?;
    Ok(Meta::parse(&content))
}

#[async_trait]
impl Sandbox for IsolateSandbox {
    fn name(&self) -> &'static str {
        "isolate"
    }

    async fn create(&self, box_id: u32) -> Result<SandboxBox, SandboxError> {
        // A box left behind by a crashed run would make --init fail.
        let _ = self.command(box_id).arg("--cleanup").output().await;

        let output = self
            .command(box_id)
            .arg("--init")
            .output()
            .await
            .map_err(|err| {
                SandboxError::Initialization(format!("failed to execute isolate --init: {err}"))
            })?;

        if !output.status.success() {
            return Err(SandboxError::Initialization(format!(
                "isolate --init failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let path_text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if path_text.is_empty() {
            return Err(SandboxError::Initialization(
                "isolate --init did not return sandbox path".to_string(),
            ));
        }

        Ok(SandboxBox {
            id: box_id,
            root: PathBuf::from(path_text).join("box"),
        })
    }

    async fn run(
        &self,
        sandbox: &SandboxBox,
        argv: &[String],
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SandboxError> {
        if argv.is_empty() {
            return Err(SandboxError::Execution(
                "isolate --run requires at least one program argument".to_string(),
            ));
        }

        let meta_path = Self::meta_path(sandbox.id);
        let _ = fs::remove_file(&meta_path).await;

        let mut command = self.command(sandbox.id);
        command.arg(format!("--meta={}", meta_path.to_string_lossy()));
        add_resource_limit_args(&mut command, &options.limits);

        for (key, value) in &options.env {
            command.arg(format!("--env={key}={value}"));
        }
        if let Some(stdin) = &options.stdin {
            command.arg(format!("--stdin={stdin}"));
        }
        command
            .arg(format!("--stdout={STDOUT_FILE}"))
            .arg(format!("--stderr={STDERR_FILE}"))
            .arg("--run")
            .arg("--")
            .args(argv)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|err| {
            SandboxError::Execution(format!("failed to execute isolate --run: {err}"))
        })?;

        let output = tokio::select! {
            output = child.wait_with_output() => output.map_err(|err| {
                SandboxError::Execution(format!("failed to wait for isolate --run: {err}"))
            })?,
            _ = cancel.cancelled() => {
                debug!(box_id = sandbox.id, "Run cancelled, killing isolate");
                return Ok(ExecutionResult::cancelled());
            }
        };

        match output.status.code() {
            Some(0) | Some(1) => {
                let mut result = read_meta_file(&meta_path).await?.into_result()?;
                let limit = options.limits.output_limit_kb.max(1);
                result.stdout = read_capped(&sandbox.root.join(STDOUT_FILE), limit).await?;
                result.stderr = read_capped(&sandbox.root.join(STDERR_FILE), limit).await?;
                Ok(result)
            }
            _ => Err(SandboxError::Unknown(format!(
                "isolate internal error: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }

    async fn remove(&self, sandbox: SandboxBox) -> Result<(), SandboxError> {
        let _ = fs::remove_file(Self::meta_path(sandbox.id)).await;

        let output = self
            .command(sandbox.id)
            .arg("--cleanup")
            .output()
            .await
            .map_err(|err| {
                SandboxError::Execution(format!("failed to execute isolate --cleanup: {err}"))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(box_id = sandbox.id, stderr = %stderr.trim(), "isolate --cleanup failed");
            return Err(SandboxError::Execution(format!(
                "isolate --cleanup failed: {}",
                stderr.trim()
            )));
        }

        Ok(())
    }
}
