//! In-memory sandbox that interprets a tiny script language instead of
//! running real programs. Used by pipeline and server tests.
//!
//! The first file written to a box is the program. One command per line:
//!
//! | line             | effect                                            |
//! |------------------|---------------------------------------------------|
//! | `print <text>`   | write `<text>` and a newline to stdout            |
//! | `cat`            | copy stdin to stdout                              |
//! | `sum`            | print the sum of the integers on stdin            |
//! | `sleep <ms>`     | wait in real time (wall clock only)               |
//! | `spin <ms>`      | account CPU time without waiting                  |
//! | `alloc <kb>`     | raise peak memory                                 |
//! | `eprint <text>`  | write to stderr                                   |
//! | `exit <code>`    | stop with the given exit code                     |
//! | `crash`          | stop with SIGSEGV                                 |
//! | `panic`          | panic the calling task                            |
//!
//! A program whose first line is `compile_error <msg>` fails the compile
//! step. Unknown lines are ignored.

use super::error::SandboxError;
use super::{ExecutionResult, ExecutionStatus, RunOptions, Sandbox, SandboxBox, box_path};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct BoxState {
    program: Option<String>,
    files: HashMap<String, Vec<u8>>,
}

#[derive(Default)]
pub struct ScriptedSandbox {
    boxes: Mutex<HashMap<u32, BoxState>>,
    failing_creates: AtomicUsize,
    history: Mutex<Vec<String>>,
    removed: AtomicUsize,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` box creations fail with an initialization error.
    pub fn failing_creates(self, n: usize) -> Self {
        self.failing_creates.store(n, Ordering::SeqCst);
        self
    }

    /// Programs executed against test input, in execution order.
    pub fn history(&self) -> Vec<String> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// Number of boxes that were removed.
    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    /// Boxes currently alive.
    pub fn open_boxes(&self) -> usize {
        self.boxes.lock().map(|b| b.len()).unwrap_or_default()
    }

    fn lock_boxes(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<u32, BoxState>>, SandboxError> {
        self.boxes
            .lock()
            .map_err(|_| SandboxError::Unknown("scripted box registry poisoned".into()))
    }
}

struct Outcome {
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
    signal: Option<i32>,
    cpu_ms: u64,
    wall_ms: u64,
    memory_kb: u64,
    timed_out: bool,
}

async fn interpret(
    program: &str,
    stdin: &str,
    options: &RunOptions,
    cancel: &CancellationToken,
) -> Option<Outcome> {
    let limits = &options.limits;
    let mut out = Outcome {
        stdout: String::new(),
        stderr: String::new(),
        exit_code: Some(0),
        signal: None,
        cpu_ms: 1,
        wall_ms: 1,
        memory_kb: 1024,
        timed_out: false,
    };

    for line in program.lines() {
        let (cmd, arg) = line.trim().split_once(' ').unwrap_or((line.trim(), ""));
        match cmd {
            "print" => {
                out.stdout.push_str(arg);
                out.stdout.push('\n');
            }
            "eprint" => {
                out.stderr.push_str(arg);
                out.stderr.push('\n');
            }
            "cat" => out.stdout.push_str(stdin),
            "sum" => {
                let total: i64 = stdin
                    .split_whitespace()
                    .filter_map(|t| t.parse::<i64>().ok())
                    .sum();
                out.stdout.push_str(&format!("{total}\n"));
            }
            "sleep" => {
                let ms: u64 = arg.parse().unwrap_or(0);
                let budget = limits.wall_time_limit_ms.saturating_sub(out.wall_ms);
                let waited = ms.min(budget);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(waited)) => {}
                    _ = cancel.cancelled() => return None,
                }
                out.wall_ms += waited;
                if ms > budget {
                    out.timed_out = true;
                    break;
                }
            }
            "spin" => {
                let ms: u64 = arg.parse().unwrap_or(0);
                out.cpu_ms += ms;
                out.wall_ms += ms;
                if limits.time_limit_ms > 0 && out.cpu_ms > limits.time_limit_ms {
                    out.timed_out = true;
                    break;
                }
            }
            "alloc" => {
                out.memory_kb += arg.parse::<u64>().unwrap_or(0);
            }
            "exit" => {
                out.exit_code = Some(arg.parse().unwrap_or(1));
                break;
            }
            "crash" => {
                out.exit_code = None;
                out.signal = Some(11);
                break;
            }
            "panic" => panic!("scripted sandbox panic"),
            _ => {}
        }
        if cancel.is_cancelled() {
            return None;
        }
    }
    Some(out)
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn create(&self, box_id: u32) -> Result<SandboxBox, SandboxError> {
        let remaining = self.failing_creates.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_creates.store(remaining - 1, Ordering::SeqCst);
            return Err(SandboxError::Initialization(format!(
                "scripted failure creating box {box_id}"
            )));
        }
        self.lock_boxes()?.insert(box_id, BoxState::default());
        Ok(SandboxBox {
            id: box_id,
            root: PathBuf::from(format!("/scripted/{box_id}")),
        })
    }

    async fn write_file(
        &self,
        sandbox: &SandboxBox,
        name: &str,
        contents: &[u8],
    ) -> Result<(), SandboxError> {
        box_path(sandbox, name)?;
        let mut boxes = self.lock_boxes()?;
        let state = boxes
            .get_mut(&sandbox.id)
            .ok_or_else(|| SandboxError::Execution(format!("box {} not created", sandbox.id)))?;
        if state.program.is_none() {
            state.program = Some(String::from_utf8_lossy(contents).into_owned());
        }
        state.files.insert(name.to_string(), contents.to_vec());
        Ok(())
    }

    async fn run(
        &self,
        sandbox: &SandboxBox,
        _argv: &[String],
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SandboxError> {
        let (program, stdin) = {
            let boxes = self.lock_boxes()?;
            let state = boxes.get(&sandbox.id).ok_or_else(|| {
                SandboxError::Execution(format!("box {} not created", sandbox.id))
            })?;
            let program = state.program.clone().unwrap_or_default();
            let stdin = options
                .stdin
                .as_ref()
                .and_then(|name| state.files.get(name))
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned());
            (program, stdin)
        };

        // No stdin file means this is the compile step.
        let Some(stdin) = stdin else {
            let first = program.lines().next().unwrap_or_default().trim();
            let mut result = ExecutionResult {
                status: ExecutionStatus::Ok,
                exit_code: Some(0),
                signal: None,
                time_used_ms: 1,
                wall_time_ms: 1,
                memory_used_kb: 1024,
                stdout: String::new(),
                stderr: String::new(),
            };
            if let Some(msg) = first.strip_prefix("compile_error") {
                result.status = ExecutionStatus::RuntimeError;
                result.exit_code = Some(1);
                result.stderr = format!("main: error:{msg}\n");
            }
            return Ok(result);
        };

        if let Ok(mut history) = self.history.lock() {
            history.push(program.clone());
        }

        let Some(out) = interpret(&program, &stdin, options, cancel).await else {
            return Ok(ExecutionResult::cancelled());
        };

        let limits = &options.limits;
        let status = if out.timed_out {
            ExecutionStatus::TimedOut
        } else if limits.memory_limit_kb > 0 && out.memory_kb > limits.memory_limit_kb {
            ExecutionStatus::MemoryExceeded
        } else if out.signal.is_some() {
            ExecutionStatus::Signaled
        } else if out.exit_code != Some(0) {
            ExecutionStatus::RuntimeError
        } else {
            ExecutionStatus::Ok
        };

        Ok(ExecutionResult {
            status,
            exit_code: out.exit_code,
            signal: out.signal,
            time_used_ms: out.cpu_ms,
            wall_time_ms: out.wall_ms,
            memory_used_kb: out.memory_kb,
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }

    async fn remove(&self, sandbox: SandboxBox) -> Result<(), SandboxError> {
        self.lock_boxes()?.remove(&sandbox.id);
        self.removed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
