//! Background command execution.
//!
//! Commands launched here run off the synchronous path: `spawn` returns an
//! identifier immediately and the registry keeps a live record that the
//! task's own reader/exit tasks update. Output buffers are byte-capped and
//! trimmed from the front, so the most recently written bytes survive. A
//! per-task deadline force-terminates the process and records a sentinel
//! exit code.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};

pub type TaskId = String;

/// Exit code recorded when the deadline kills a task (the coreutils
/// `timeout` convention).
pub const TIMEOUT_EXIT_CODE: i32 = 124;

const DEFAULT_OUTPUT_CAP: usize = 64 * 1024;
const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(600);
const KILL_GRACE: Duration = Duration::from_millis(200);

static ANSI_ESCAPES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[a-zA-Z]|\x1b\][^\x07]*\x07").expect("valid ANSI regex")
});

fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPES.replace_all(text, "").into_owned()
}

/// Byte-capped buffer that keeps the tail: once the cap is exceeded the
/// oldest bytes are dropped, preserving UTF-8 boundaries.
#[derive(Debug, Default)]
struct OutputBuffer {
    text: String,
    cap: usize,
    trimmed: bool,
}

impl OutputBuffer {
    fn new(cap: usize) -> Self {
        Self {
            text: String::new(),
            cap,
            trimmed: false,
        }
    }

    fn push_line(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');

        if self.text.len() > self.cap {
            let mut cut = self.text.len() - self.cap;
            while cut < self.text.len() && !self.text.is_char_boundary(cut) {
                cut += 1;
            }
            self.text.drain(..cut);
            self.trimmed = true;
        }
    }

    fn snapshot(&self) -> String {
        strip_ansi(&self.text)
    }
}

/// Point-in-time view of a background task.
#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub id: TaskId,
    pub command: String,
    pub pid: Option<u32>,
    pub done: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    /// Oldest output was dropped to honor the buffer cap.
    pub output_trimmed: bool,
    pub elapsed: Duration,
}

struct TaskRecord {
    command: String,
    pid: Option<u32>,
    done: bool,
    exit_code: Option<i32>,
    timed_out: bool,
    stdout: OutputBuffer,
    stderr: OutputBuffer,
    started_at: Instant,
    finished_at: Option<Instant>,
}

/// Registry of background tasks. Records are never removed while the
/// registry lives, so a completed task stays queryable.
#[derive(Clone)]
pub struct ProcessRegistry {
    tasks: Arc<RwLock<HashMap<TaskId, TaskRecord>>>,
    output_cap: usize,
    default_timeout: Duration,
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_OUTPUT_CAP, DEFAULT_TASK_TIMEOUT)
    }

    pub fn with_limits(output_cap: usize, default_timeout: Duration) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            output_cap,
            default_timeout,
        }
    }

    /// Launch a command detached and return its id immediately.
    pub async fn spawn(&self, command: String, working_dir: PathBuf) -> Result<TaskId> {
        self.spawn_with_timeout(command, working_dir, self.default_timeout)
            .await
    }

    pub async fn spawn_with_timeout(
        &self,
        command: String,
        working_dir: PathBuf,
        deadline: Duration,
    ) -> Result<TaskId> {
        let id = uuid::Uuid::new_v4().to_string();

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&command);
            // Own process group so the whole tree can be signalled.
            #[cfg(unix)]
            c.process_group(0);
            c
        };

        cmd.current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow!("failed to spawn '{}': {}", command, e))?;
        let pid = child.id();

        tracing::info!(id = %id, pid = ?pid, command = %command, "Background task started");

        let record = TaskRecord {
            command: command.clone(),
            pid,
            done: false,
            exit_code: None,
            timed_out: false,
            stdout: OutputBuffer::new(self.output_cap),
            stderr: OutputBuffer::new(self.output_cap),
            started_at: Instant::now(),
            finished_at: None,
        };
        self.tasks.write().await.insert(id.clone(), record);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_handle = tokio::spawn(Self::collect_output(
            self.tasks.clone(),
            id.clone(),
            stdout,
            StreamKind::Stdout,
        ));
        let stderr_handle = tokio::spawn(Self::collect_output(
            self.tasks.clone(),
            id.clone(),
            stderr,
            StreamKind::Stderr,
        ));

        let tasks = self.tasks.clone();
        let task_id = id.clone();
        tokio::spawn(async move {
            let (exit_code, timed_out) = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => (status.code(), false),
                    Err(e) => {
                        tracing::error!(id = %task_id, "Wait failed: {}", e);
                        (None, false)
                    }
                },
                _ = sleep(deadline) => {
                    tracing::warn!(
                        id = %task_id,
                        deadline_ms = deadline.as_millis() as u64,
                        "Background task exceeded deadline, terminating"
                    );
                    terminate_process_tree(&mut child).await;
                    (Some(TIMEOUT_EXIT_CODE), true)
                }
            };

            // Let the readers drain whatever is left in the pipes.
            let _ = timeout(Duration::from_secs(2), stdout_handle).await;
            let _ = timeout(Duration::from_secs(2), stderr_handle).await;

            let mut tasks = tasks.write().await;
            if let Some(record) = tasks.get_mut(&task_id) {
                record.done = true;
                record.exit_code = exit_code;
                record.timed_out = timed_out;
                record.finished_at = Some(Instant::now());
            }
            tracing::info!(id = %task_id, exit_code = ?exit_code, timed_out, "Background task finished");
        });

        Ok(id)
    }

    async fn collect_output<R>(
        tasks: Arc<RwLock<HashMap<TaskId, TaskRecord>>>,
        id: TaskId,
        pipe: Option<R>,
        kind: StreamKind,
    ) where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let Some(pipe) = pipe else {
            return;
        };

        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut tasks = tasks.write().await;
            if let Some(record) = tasks.get_mut(&id) {
                match kind {
                    StreamKind::Stdout => record.stdout.push_line(&line),
                    StreamKind::Stderr => record.stderr.push_line(&line),
                }
            }
        }
    }

    /// Snapshot a task by id.
    pub async fn status(&self, id: &str) -> Option<TaskStatus> {
        self.tasks.read().await.get(id).map(|r| snapshot(id, r))
    }

    pub async fn list(&self) -> Vec<TaskStatus> {
        self.tasks
            .read()
            .await
            .iter()
            .map(|(id, r)| snapshot(id, r))
            .collect()
    }

    /// Signal a running task's process group. Completion is recorded by the
    /// task's own monitor when the process actually exits.
    pub async fn kill(&self, id: &str) -> Result<()> {
        let pid = {
            let tasks = self.tasks.read().await;
            let record = tasks.get(id).ok_or_else(|| anyhow!("task not found"))?;
            if record.done {
                return Err(anyhow!("task already finished"));
            }
            record.pid.ok_or_else(|| anyhow!("task has no pid"))?
        };

        signal_process_tree(pid);
        tracing::info!(id = %id, pid, "Kill signal sent");
        Ok(())
    }

    /// Terminate every running task (shutdown path).
    pub async fn kill_all(&self) {
        let running: Vec<(TaskId, u32)> = {
            let tasks = self.tasks.read().await;
            tasks
                .iter()
                .filter(|(_, r)| !r.done)
                .filter_map(|(id, r)| r.pid.map(|pid| (id.clone(), pid)))
                .collect()
        };

        for (id, pid) in running {
            signal_process_tree(pid);
            tracing::info!(id = %id, pid, "Killed task on shutdown");
        }
    }
}

#[derive(Clone, Copy)]
enum StreamKind {
    Stdout,
    Stderr,
}

fn snapshot(id: &str, record: &TaskRecord) -> TaskStatus {
    TaskStatus {
        id: id.to_string(),
        command: record.command.clone(),
        pid: record.pid,
        done: record.done,
        exit_code: record.exit_code,
        timed_out: record.timed_out,
        stdout: record.stdout.snapshot(),
        stderr: record.stderr.snapshot(),
        output_trimmed: record.stdout.trimmed || record.stderr.trimmed,
        elapsed: record
            .finished_at
            .map(|end| end.duration_since(record.started_at))
            .unwrap_or_else(|| record.started_at.elapsed()),
    }
}

/// Best-effort TERM to the whole process group, falling back to the single
/// process.
fn signal_process_tree(pid: u32) {
    #[cfg(unix)]
    {
        let group = format!("-{}", pid);
        let ok = std::process::Command::new("kill")
            .arg("-TERM")
            .arg(&group)
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        if !ok {
            let _ = std::process::Command::new("kill")
                .arg("-TERM")
                .arg(pid.to_string())
                .status();
        }
    }
    #[cfg(windows)]
    {
        let _ = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .output();
    }
}

async fn terminate_process_tree(child: &mut Child) {
    if let Some(pid) = child.id() {
        signal_process_tree(pid);
        sleep(KILL_GRACE).await;
    }
    if timeout(KILL_GRACE, child.wait()).await.is_err() {
        let _ = child.kill().await;
        let _ = child.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn wait_until_done(registry: &ProcessRegistry, id: &str) -> TaskStatus {
        timeout(Duration::from_secs(10), async {
            loop {
                if let Some(status) = registry.status(id).await {
                    if status.done {
                        return status;
                    }
                }
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("task did not finish in time")
    }

    #[tokio::test]
    async fn spawn_returns_immediately_and_captures_output() {
        let registry = ProcessRegistry::new();
        let id = registry
            .spawn("printf 'one\\ntwo\\n'".to_string(), PathBuf::from("."))
            .await
            .unwrap();

        let status = wait_until_done(&registry, &id).await;
        assert!(status.done);
        assert_eq!(status.exit_code, Some(0));
        assert!(!status.timed_out);
        assert!(status.stdout.contains("one"));
        assert!(status.stdout.contains("two"));
    }

    #[tokio::test]
    async fn deadline_kill_records_sentinel_exit_code() {
        let registry = ProcessRegistry::new();
        let id = registry
            .spawn_with_timeout(
                "sleep 30".to_string(),
                PathBuf::from("."),
                Duration::from_millis(100),
            )
            .await
            .unwrap();

        let status = wait_until_done(&registry, &id).await;
        assert!(status.done);
        assert!(status.timed_out);
        assert_eq!(status.exit_code, Some(TIMEOUT_EXIT_CODE));
    }

    #[tokio::test]
    async fn output_cap_keeps_most_recent_bytes() {
        let registry = ProcessRegistry::with_limits(64, DEFAULT_TASK_TIMEOUT);
        let id = registry
            .spawn("seq 1 200".to_string(), PathBuf::from("."))
            .await
            .unwrap();

        let status = wait_until_done(&registry, &id).await;
        assert!(status.output_trimmed);
        assert!(status.stdout.len() <= 64);
        assert!(status.stdout.contains("200"));
        assert!(!status.stdout.starts_with("1\n"));
    }

    #[tokio::test]
    async fn stderr_is_captured_separately() {
        let registry = ProcessRegistry::new();
        let id = registry
            .spawn("echo out; echo err >&2".to_string(), PathBuf::from("."))
            .await
            .unwrap();

        let status = wait_until_done(&registry, &id).await;
        assert!(status.stdout.contains("out"));
        assert!(status.stderr.contains("err"));
        assert!(!status.stdout.contains("err"));
    }

    #[tokio::test]
    async fn unknown_id_has_no_status() {
        let registry = ProcessRegistry::new();
        assert!(registry.status("missing").await.is_none());
        assert!(registry.kill("missing").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_stops_a_running_task() {
        let registry = ProcessRegistry::new();
        let id = registry
            .spawn("sleep 30".to_string(), PathBuf::from("."))
            .await
            .unwrap();

        // Give the process a moment to start.
        sleep(Duration::from_millis(100)).await;
        registry.kill(&id).await.unwrap();

        let status = wait_until_done(&registry, &id).await;
        assert!(status.done);
        assert!(!status.timed_out);
    }

    #[test]
    fn buffer_trims_oldest_bytes() {
        let mut buffer = OutputBuffer::new(10);
        buffer.push_line("aaaa");
        buffer.push_line("bbbb");
        buffer.push_line("cccc");

        let text = buffer.snapshot();
        assert!(buffer.trimmed);
        assert!(text.len() <= 10);
        assert!(text.contains("cccc"));
        assert!(!text.contains("aaaa"));
    }

    #[test]
    fn ansi_sequences_are_stripped_from_snapshots() {
        let mut buffer = OutputBuffer::new(1024);
        buffer.push_line("\x1b[31mred\x1b[0m plain");
        assert_eq!(buffer.snapshot(), "red plain\n");
    }
}
