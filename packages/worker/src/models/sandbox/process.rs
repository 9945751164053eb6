use super::error::SandboxError;
use super::{
    ExecutionResult, ExecutionStatus, RunOptions, STDERR_FILE, STDOUT_FILE, Sandbox, SandboxBox,
    box_path, read_capped,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const OPEN_FILES_LIMIT: u64 = 64;
/// Virtual memory granted on top of the memory limit when the address space
/// is capped, so shared libraries and stacks still map.
const ADDRESS_SPACE_SLACK_KB: u64 = 64 * 1024;

/// Subprocess backend for development and CI hosts without `isolate`.
///
/// Each box is a private 0700 directory. With a uid base (root only) box `n`
/// is owned by and runs as uid `base + n`, so boxes cannot read, write or
/// signal each other. Programs run with a cleared environment in their own
/// process group, under rlimits applied between fork and exec, and optionally
/// inside fresh user and network namespaces. The rest of the host filesystem
/// stays visible. Peak memory is the child's maximum resident set size.
pub struct ProcessSandbox {
    work_dir: PathBuf,
    isolate_network: bool,
    box_uid_base: Option<u32>,
    boxes: Mutex<HashMap<u32, TempDir>>,
}

impl ProcessSandbox {
    pub fn new(work_dir: PathBuf, isolate_network: bool, box_uid_base: Option<u32>) -> Self {
        Self {
            work_dir,
            isolate_network,
            box_uid_base,
            boxes: Mutex::new(HashMap::new()),
        }
    }

    fn box_uid(&self, box_id: u32) -> Option<u32> {
        self.box_uid_base.map(|base| base.saturating_add(box_id))
    }
}

/// Limits applied in the child before exec. Plain values only: the closure
/// runs after fork and must not allocate.
#[derive(Clone, Copy)]
struct ChildLimits {
    uid: Option<u32>,
    process_limit: u64,
    cpu_secs: u64,
    address_space_bytes: Option<u64>,
    file_size_bytes: u64,
    isolate_network: bool,
}

fn set_rlimit(resource: libc::__rlimit_resource_t, soft: u64, hard: u64) -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    // SAFETY: setrlimit only reads the struct we pass.
    if unsafe { libc::setrlimit(resource, &limit) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Supplementary groups, then gid, then uid.
fn drop_credentials(id: u32) -> io::Result<()> {
    // SAFETY: plain syscalls on integer arguments and a null group list.
    let failed = unsafe {
        libc::setgroups(0, std::ptr::null()) != 0
            || libc::setresgid(id, id, id) != 0
            || libc::setresuid(id, id, id) != 0
    };
    if failed {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn apply_child_limits(limits: ChildLimits) -> io::Result<()> {
    if let Some(uid) = limits.uid {
        drop_credentials(uid)?;
        // Counted per uid, so it only means something for a private uid.
        set_rlimit(libc::RLIMIT_NPROC, limits.process_limit, limits.process_limit)?;
    }
    if limits.isolate_network {
        // SAFETY: unshare has no memory-safety preconditions.
        if unsafe { libc::unshare(libc::CLONE_NEWUSER | libc::CLONE_NEWNET) } != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    set_rlimit(libc::RLIMIT_CPU, limits.cpu_secs, limits.cpu_secs + 1)?;
    if let Some(bytes) = limits.address_space_bytes {
        set_rlimit(libc::RLIMIT_AS, bytes, bytes)?;
    }
    set_rlimit(libc::RLIMIT_FSIZE, limits.file_size_bytes, limits.file_size_bytes)?;
    set_rlimit(libc::RLIMIT_CORE, 0, 0)?;
    set_rlimit(libc::RLIMIT_NOFILE, OPEN_FILES_LIMIT, OPEN_FILES_LIMIT)?;
    Ok(())
}

/// How a reaped child ended, with its resource usage.
#[derive(Debug)]
struct Reaped {
    exit_code: Option<i32>,
    signal: Option<i32>,
    cpu_ms: u64,
    max_rss_kb: u64,
}

fn timeval_ms(tv: libc::timeval) -> u64 {
    (tv.tv_sec as u64) * 1000 + (tv.tv_usec as u64) / 1000
}

/// Block until `pid` exits and collect its rusage.
fn wait_child(pid: libc::pid_t) -> io::Result<Reaped> {
    let mut status: libc::c_int = 0;
    // SAFETY: rusage is plain old data; zeroed is a valid value.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    loop {
        // SAFETY: both out-pointers are valid for the duration of the call.
        let rc = unsafe { libc::wait4(pid, &mut status, 0, &mut usage) };
        if rc == pid {
            break;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }

    let (exit_code, signal) = if libc::WIFEXITED(status) {
        (Some(libc::WEXITSTATUS(status)), None)
    } else if libc::WIFSIGNALED(status) {
        (None, Some(libc::WTERMSIG(status)))
    } else {
        (None, None)
    };

    Ok(Reaped {
        exit_code,
        signal,
        cpu_ms: timeval_ms(usage.ru_utime) + timeval_ms(usage.ru_stime),
        max_rss_kb: usage.ru_maxrss.max(0) as u64,
    })
}

fn kill_group(pgid: libc::pid_t) {
    // SAFETY: kill has no memory-safety preconditions. ESRCH is expected
    // once the group is gone.
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}

enum Ending {
    Exited,
    WallTimeout,
    Cancelled,
}

fn classify(
    reaped: &Reaped,
    ending: &Ending,
    options: &RunOptions,
) -> ExecutionStatus {
    let limits = &options.limits;
    if matches!(ending, Ending::Cancelled) {
        return ExecutionStatus::Cancelled;
    }
    if matches!(ending, Ending::WallTimeout)
        || reaped.signal == Some(libc::SIGXCPU)
        || (limits.time_limit_ms > 0 && reaped.cpu_ms > limits.time_limit_ms)
    {
        return ExecutionStatus::TimedOut;
    }
    if limits.memory_limit_kb > 0 && reaped.max_rss_kb > limits.memory_limit_kb {
        return ExecutionStatus::MemoryExceeded;
    }
    if reaped.signal.is_some() {
        return ExecutionStatus::Signaled;
    }
    match reaped.exit_code {
        Some(0) | None => ExecutionStatus::Ok,
        Some(_) => ExecutionStatus::RuntimeError,
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn create(&self, box_id: u32) -> Result<SandboxBox, SandboxError> {
        std::fs::create_dir_all(&self.work_dir).map_err(|err| {
            SandboxError::Initialization(format!(
                "failed to create work dir {}: {err}",
                self.work_dir.display()
            ))
        })?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("codearena-box-{box_id}-"))
            .tempdir_in(&self.work_dir)
            .map_err(|err| SandboxError::Initialization(format!("failed to create box: {err}")))?;

        if let Some(uid) = self.box_uid(box_id) {
            std::os::unix::fs::chown(dir.path(), Some(uid), Some(uid)).map_err(|err| {
                SandboxError::Initialization(format!("failed to hand box {box_id} to uid {uid}: {err}"))
            })?;
        }

        let root = dir.path().to_path_buf();
        let mut boxes = self
            .boxes
            .lock()
            .map_err(|_| SandboxError::Unknown("box registry poisoned".into()))?;
        if boxes.insert(box_id, dir).is_some() {
            warn!(box_id, "Replaced a box that was never removed");
        }
        Ok(SandboxBox { id: box_id, root })
    }

    async fn run(
        &self,
        sandbox: &SandboxBox,
        argv: &[String],
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SandboxError> {
        let (program, args) = argv.split_first().ok_or_else(|| {
            SandboxError::Execution("run requires at least one program argument".to_string())
        })?;

        let limits = &options.limits;
        let stdin = match &options.stdin {
            Some(name) => Stdio::from(File::open(box_path(sandbox, name)?)?),
            None => Stdio::null(),
        };
        let stdout = File::create(sandbox.root.join(STDOUT_FILE))?;
        let stderr = File::create(sandbox.root.join(STDERR_FILE))?;

        let child_limits = ChildLimits {
            uid: self.box_uid(sandbox.id),
            process_limit: u64::from(limits.process_limit.max(1)),
            cpu_secs: limits.time_limit_ms.div_ceil(1000).max(1) + 1,
            address_space_bytes: limits.address_space_limit.then(|| {
                (limits.memory_limit_kb + ADDRESS_SPACE_SLACK_KB).saturating_mul(1024)
            }),
            file_size_bytes: limits.output_limit_kb.max(1).saturating_mul(1024),
            isolate_network: self.isolate_network,
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&sandbox.root)
            .env_clear()
            .env("HOME", &sandbox.root)
            .envs(options.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(stdin)
            .stdout(stdout)
            .stderr(stderr)
            .process_group(0);
        // SAFETY: the closure only issues raw syscalls on copied values.
        unsafe {
            command.pre_exec(move || apply_child_limits(child_limits));
        }

        let started = Instant::now();
        let child = command.spawn().map_err(|err| {
            SandboxError::Execution(format!("failed to spawn {program}: {err}"))
        })?;
        let pid = child.id() as libc::pid_t;
        // Reaped through wait4 below, not through `Child`.
        drop(child);

        let mut waiter = tokio::task::spawn_blocking(move || wait_child(pid));
        let wall_limit = Duration::from_millis(limits.wall_time_limit_ms.max(1));

        let (joined, ending) = tokio::select! {
            joined = &mut waiter => (joined, Ending::Exited),
            _ = tokio::time::sleep(wall_limit) => {
                debug!(box_id = sandbox.id, pid, "Wall time limit hit, killing process group");
                kill_group(pid);
                (waiter.await, Ending::WallTimeout)
            }
            _ = cancel.cancelled() => {
                debug!(box_id = sandbox.id, pid, "Run cancelled, killing process group");
                kill_group(pid);
                (waiter.await, Ending::Cancelled)
            }
        };
        let wall_time_ms = started.elapsed().as_millis() as u64;
        // Leftover background processes share the group.
        kill_group(pid);

        let reaped = joined
            .map_err(|err| SandboxError::Unknown(format!("wait task failed: {err}")))?
            .map_err(|err| SandboxError::Execution(format!("wait4 failed: {err}")))?;

        let status = classify(&reaped, &ending, options);
        if status == ExecutionStatus::Cancelled {
            return Ok(ExecutionResult::cancelled());
        }

        let output_limit = limits.output_limit_kb.max(1);
        Ok(ExecutionResult {
            status,
            exit_code: reaped.exit_code,
            signal: reaped.signal,
            time_used_ms: reaped.cpu_ms,
            wall_time_ms,
            memory_used_kb: reaped.max_rss_kb,
            stdout: read_capped(&sandbox.root.join(STDOUT_FILE), output_limit).await?,
            stderr: read_capped(&sandbox.root.join(STDERR_FILE), output_limit).await?,
        })
    }

    async fn remove(&self, sandbox: SandboxBox) -> Result<(), SandboxError> {
        let dir = self
            .boxes
            .lock()
            .map_err(|_| SandboxError::Unknown("box registry poisoned".into()))?
            .remove(&sandbox.id);
        match dir {
            Some(dir) => dir.close().map_err(|err| {
                SandboxError::Execution(format!("failed to remove box {}: {err}", sandbox.id))
            }),
            None => Ok(()),
        }
    }
}
