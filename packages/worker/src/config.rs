use common::config::{JudgeConfig, SandboxConfig, ToolchainConfig};
use serde::Deserialize;

/// Everything a worker needs to judge a submission.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct WorkerSettings {
    #[serde(default)]
    pub judge: JudgeConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub toolchain: ToolchainConfig,
}
