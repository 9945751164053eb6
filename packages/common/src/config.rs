use serde::Deserialize;
use std::path::PathBuf;

/// How a judged submission is scored.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScoringPolicy {
    /// Full problem points when accepted, zero otherwise.
    #[default]
    AllOrNothing,
    /// `points * passed / total`, rounded down.
    Partial,
}

/// Judge pipeline configuration shared by intake and workers.
#[derive(Debug, Deserialize, Clone)]
pub struct JudgeConfig {
    /// Number of concurrent workers. Default: 4.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Maximum number of queued jobs. Default: 256.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long intake waits for a queue slot before rejecting. Default: 0 (reject at once).
    #[serde(default)]
    pub enqueue_timeout_ms: u64,
    /// Stop at the first failing test case. Default: false.
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub scoring: ScoringPolicy,
    /// Cancel older unfinished submissions by the same user for the same problem. Default: false.
    #[serde(default)]
    pub supersede_previous: bool,
    /// Maximum source size in bytes. Default: 64 KiB.
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,
    /// Retries after a sandbox infrastructure failure. Default: 1.
    #[serde(default = "default_sandbox_retries")]
    pub sandbox_retries: u8,
    /// Base delay for retry backoff in milliseconds. Default: 200.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Maximum delay for retry backoff in milliseconds. Default: 5000.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

fn default_workers() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    256
}
fn default_max_source_bytes() -> usize {
    64 * 1024
}
fn default_sandbox_retries() -> u8 {
    1
}
fn default_retry_base_delay_ms() -> u64 {
    200
}
fn default_retry_max_delay_ms() -> u64 {
    5000
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            enqueue_timeout_ms: 0,
            fail_fast: false,
            scoring: ScoringPolicy::default(),
            supersede_previous: false,
            max_source_bytes: default_max_source_bytes(),
            sandbox_retries: default_sandbox_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

/// Which isolation mechanism runs untrusted code.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SandboxBackend {
    /// The `isolate` tool with control groups.
    #[default]
    Isolate,
    /// Plain subprocess with rlimits and per-box uids. The host filesystem
    /// stays visible, so it only starts with `allow_unconfined`.
    Process,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    #[serde(default)]
    pub backend: SandboxBackend,
    /// Isolate executable path. Default: "isolate".
    #[serde(default = "default_isolate_bin")]
    pub isolate_bin: String,
    /// Parent directory for process-backend boxes. Default: system temp dir.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Run programs in a fresh network namespace (process backend). Default: true.
    #[serde(default = "default_true")]
    pub isolate_network: bool,
    /// Permit the process backend. Development only. Default: false.
    #[serde(default)]
    pub allow_unconfined: bool,
    /// First uid given to process-backend boxes when running as root;
    /// box `n` runs as `box_uid_base + n`. Default: 60000.
    #[serde(default = "default_box_uid_base")]
    pub box_uid_base: u32,
    /// Time limit for the compile step in milliseconds. Default: 10000.
    #[serde(default = "default_compile_time_limit_ms")]
    pub compile_time_limit_ms: u64,
    /// Memory limit for the compile step in megabytes. Default: 1024.
    #[serde(default = "default_compile_memory_limit_mb")]
    pub compile_memory_limit_mb: u64,
    /// Largest file a program may write, including stdout. Default: 16 MiB.
    #[serde(default = "default_output_limit_kb")]
    pub output_limit_kb: u64,
    /// Maximum processes/threads inside a box. Default: 64.
    #[serde(default = "default_process_limit")]
    pub process_limit: u32,
    /// Extra wall-clock time granted on top of the CPU limit. Default: 1000.
    #[serde(default = "default_wall_time_grace_ms")]
    pub wall_time_grace_ms: u64,
}

fn default_isolate_bin() -> String {
    "isolate".into()
}
fn default_work_dir() -> PathBuf {
    std::env::temp_dir()
}
fn default_true() -> bool {
    true
}
fn default_box_uid_base() -> u32 {
    60_000
}
fn default_compile_time_limit_ms() -> u64 {
    10_000
}
fn default_compile_memory_limit_mb() -> u64 {
    1024
}
fn default_output_limit_kb() -> u64 {
    16 * 1024
}
fn default_process_limit() -> u32 {
    64
}
fn default_wall_time_grace_ms() -> u64 {
    1000
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: SandboxBackend::default(),
            isolate_bin: default_isolate_bin(),
            work_dir: default_work_dir(),
            isolate_network: default_true(),
            allow_unconfined: false,
            box_uid_base: default_box_uid_base(),
            compile_time_limit_ms: default_compile_time_limit_ms(),
            compile_memory_limit_mb: default_compile_memory_limit_mb(),
            output_limit_kb: default_output_limit_kb(),
            process_limit: default_process_limit(),
            wall_time_grace_ms: default_wall_time_grace_ms(),
        }
    }
}

/// Absolute paths of compilers and interpreters used inside the sandbox.
#[derive(Debug, Deserialize, Clone)]
pub struct ToolchainConfig {
    #[serde(default = "default_gcc")]
    pub gcc: String,
    #[serde(default = "default_gxx")]
    pub gxx: String,
    #[serde(default = "default_javac")]
    pub javac: String,
    #[serde(default = "default_java")]
    pub java: String,
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_node")]
    pub node: String,
    /// PATH exported to sandboxed programs. Default: "/usr/local/bin:/usr/bin:/bin".
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_gcc() -> String {
    "/usr/bin/gcc".into()
}
fn default_gxx() -> String {
    "/usr/bin/g++".into()
}
fn default_javac() -> String {
    "/usr/bin/javac".into()
}
fn default_java() -> String {
    "/usr/bin/java".into()
}
fn default_python() -> String {
    "/usr/bin/python3".into()
}
fn default_node() -> String {
    "/usr/bin/node".into()
}
fn default_path() -> String {
    "/usr/local/bin:/usr/bin:/bin".into()
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            gcc: default_gcc(),
            gxx: default_gxx(),
            javac: default_javac(),
            java: default_java(),
            python: default_python(),
            node: default_node(),
            path: default_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_sections_fall_back_to_defaults() {
        let judge: JudgeConfig = toml::from_str("workers = 2\nscoring = \"partial\"").unwrap();
        assert_eq!(judge.workers, 2);
        assert_eq!(judge.scoring, ScoringPolicy::Partial);
        assert_eq!(judge.queue_capacity, 256);
        assert_eq!(judge.sandbox_retries, 1);

        let sandbox: SandboxConfig = toml::from_str("isolate_bin = \"/opt/isolate\"").unwrap();
        assert_eq!(sandbox.backend, SandboxBackend::Isolate);
        assert!(sandbox.isolate_network);
        assert!(!sandbox.allow_unconfined);
        assert_eq!(sandbox.box_uid_base, 60_000);
    }
}
