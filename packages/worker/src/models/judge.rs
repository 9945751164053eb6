//! Compile and run one submission against every test case of its problem.

use common::{Language, Verdict};
use common::judge_result::TestCaseResult;
use common::problem::{Problem, TestCase};
use common::submission::Submission;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::WorkerSettings;
use crate::models::checker::compare_output;
use crate::models::runtime::LanguageRuntime;
use crate::models::sandbox::error::SandboxError;
use crate::models::sandbox::{
    ExecutionResult, ExecutionStatus, ResourceLimits, RunOptions, STDIN_FILE, Sandbox, SandboxBox,
};

/// Longest stderr excerpt kept per test case.
const STDERR_EXCERPT_BYTES: usize = 1024;

/// What running a submission produced, before scoring.
#[derive(Debug)]
pub enum JudgeReport {
    /// The compiler rejected the source. Holds its diagnostics.
    CompileError(String),
    /// One result per test case, in test order. Tests not run under
    /// fail-fast are marked skipped.
    Completed(Vec<TestCaseResult>),
    Cancelled,
}

/// Judge `submission` inside box `box_id`.
///
/// The box is removed on every path. `Err` means the sandbox itself failed
/// and the whole attempt may be retried.
#[instrument(
    skip_all,
    fields(submission_id = submission.id, language = %submission.language, box_id = box_id)
)]
pub async fn judge_submission(
    sandbox: &dyn Sandbox,
    settings: &WorkerSettings,
    box_id: u32,
    submission: &Submission,
    problem: &Problem,
    cancel: &CancellationToken,
) -> Result<JudgeReport, SandboxError> {
    let sandbox_box = sandbox.create(box_id).await?;
    debug!(root = %sandbox_box.root.display(), backend = sandbox.name(), "Box ready");

    let report = run_in_box(sandbox, &sandbox_box, settings, submission, problem, cancel).await;

    if let Err(e) = sandbox.remove(sandbox_box).await {
        warn!(error = %e, "Failed to remove box");
    }
    report
}

async fn run_in_box(
    sandbox: &dyn Sandbox,
    sandbox_box: &SandboxBox,
    settings: &WorkerSettings,
    submission: &Submission,
    problem: &Problem,
    cancel: &CancellationToken,
) -> Result<JudgeReport, SandboxError> {
    let language = submission.language;
    let toolchain = &settings.toolchain;

    sandbox
        .write_file(sandbox_box, language.source_file(), submission.code.as_bytes())
        .await?;

    if let Some(argv) = language.compile_argv(toolchain) {
        let result = sandbox
            .run(sandbox_box, &argv, &compile_options(settings), cancel)
            .await?;
        if result.status == ExecutionStatus::Cancelled {
            return Ok(JudgeReport::Cancelled);
        }
        if !result.success() {
            info!(status = ?result.status, "Compilation failed");
            return Ok(JudgeReport::CompileError(compile_diagnostics(&result)));
        }
    }

    let run_argv = language.run_argv(toolchain, problem.memory_limit_mb);
    let options = test_options(settings, problem, language.address_space_limit());
    let total = problem.test_cases.len();
    let mut results = Vec::with_capacity(total);

    for (index, test) in problem.test_cases.iter().enumerate() {
        if cancel.is_cancelled() {
            return Ok(JudgeReport::Cancelled);
        }

        sandbox
            .write_file(sandbox_box, STDIN_FILE, test.input.as_bytes())
            .await?;
        let exec = sandbox.run(sandbox_box, &run_argv, &options, cancel).await?;
        if exec.status == ExecutionStatus::Cancelled {
            return Ok(JudgeReport::Cancelled);
        }

        let result = classify(index, exec, test, problem, language);
        debug!(
            index,
            verdict = ?result.verdict,
            time_ms = result.time_used,
            memory_kb = result.memory_used,
            "Test case finished"
        );
        let failed = !result.passed;
        results.push(result);

        if failed && settings.judge.fail_fast {
            results.extend((index + 1..total).map(TestCaseResult::skipped));
            break;
        }
    }

    Ok(JudgeReport::Completed(results))
}

fn base_env(settings: &WorkerSettings) -> Vec<(String, String)> {
    vec![
        ("PATH".to_string(), settings.toolchain.path.clone()),
        ("LANG".to_string(), "C.UTF-8".to_string()),
    ]
}

fn compile_options(settings: &WorkerSettings) -> RunOptions {
    let sandbox = &settings.sandbox;
    RunOptions {
        limits: ResourceLimits {
            time_limit_ms: sandbox.compile_time_limit_ms,
            wall_time_limit_ms: sandbox.compile_time_limit_ms.saturating_mul(2),
            memory_limit_kb: sandbox.compile_memory_limit_mb.saturating_mul(1024),
            address_space_limit: false,
            output_limit_kb: sandbox.output_limit_kb,
            process_limit: sandbox.process_limit,
        },
        stdin: None,
        env: base_env(settings),
    }
}

fn test_options(
    settings: &WorkerSettings,
    problem: &Problem,
    address_space_limit: bool,
) -> RunOptions {
    let sandbox = &settings.sandbox;
    RunOptions {
        limits: ResourceLimits {
            time_limit_ms: problem.time_limit_ms,
            wall_time_limit_ms: problem.time_limit_ms.saturating_add(sandbox.wall_time_grace_ms),
            memory_limit_kb: problem.memory_limit_kb(),
            address_space_limit,
            output_limit_kb: sandbox.output_limit_kb,
            process_limit: sandbox.process_limit,
        },
        stdin: Some(STDIN_FILE.to_string()),
        env: base_env(settings),
    }
}

fn compile_diagnostics(result: &ExecutionResult) -> String {
    match result.status {
        ExecutionStatus::TimedOut => "Compilation timed out".to_string(),
        ExecutionStatus::MemoryExceeded => "Compilation exceeded the memory limit".to_string(),
        _ => {
            let mut out = result.stderr.trim_end().to_string();
            let stdout = result.stdout.trim_end();
            if !stdout.is_empty() {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(stdout);
            }
            out
        }
    }
}

fn excerpt(s: &str) -> Option<String> {
    if s.is_empty() {
        return None;
    }
    let mut end = s.len().min(STDERR_EXCERPT_BYTES);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    Some(s[..end].to_string())
}

/// Turn one execution into a test verdict. Limits are checked before the
/// exit status, and the output is only compared for clean exits. A failed
/// run whose stderr shows a refused allocation counts as a memory verdict,
/// since an address-space cap stops the program before its RSS grows.
fn classify(
    index: usize,
    exec: ExecutionResult,
    test: &TestCase,
    problem: &Problem,
    language: Language,
) -> TestCaseResult {
    let verdict = if exec.status == ExecutionStatus::TimedOut
        || exec.time_used_ms > problem.time_limit_ms
        || exec.wall_time_ms > problem.time_limit_ms
    {
        Verdict::Timeout
    } else if exec.status == ExecutionStatus::MemoryExceeded
        || exec.memory_used_kb > problem.memory_limit_kb()
        || (!exec.success() && language.ran_out_of_memory(&exec.stderr))
    {
        Verdict::MemoryExceeded
    } else if !exec.success() {
        Verdict::RuntimeError
    } else if compare_output(&exec.stdout, &test.expected_output) {
        Verdict::Accepted
    } else {
        Verdict::WrongAnswer
    };

    TestCaseResult {
        index,
        verdict,
        passed: verdict.is_accepted(),
        stderr: excerpt(&exec.stderr),
        actual_output: exec.stdout,
        time_used: exec.time_used_ms,
        memory_used: exec.memory_used_kb,
    }
}
