//! Process management layer
//!
//! Launches the language server, forwards its stderr and watches for exit,
//! completely separate from the RPC concerns. The stdio pipes are handed out
//! once as a duplex stream.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

use crate::io::duplex::{ChildDuplex, child_duplex};

// ============================================================================
// Process State Management
// ============================================================================

/// How to stop a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Ask the process to terminate (SIGTERM)
    Graceful,
    /// Kill the process immediately (SIGKILL)
    #[allow(dead_code)]
    Force,
}

/// Process lifecycle states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Process has not been started yet
    NotStarted,
    /// Process is currently running
    Running { pid: u32 },
    /// Process has exited or was stopped
    Stopped,
}

impl ProcessState {
    /// Get the process ID if the process is running
    pub fn pid(&self) -> Option<u32> {
        match self {
            ProcessState::Running { pid } => Some(*pid),
            _ => None,
        }
    }

    /// Check if the process is currently running
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running { .. })
    }
}

/// How a supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exit code zero
    Clean,
    /// Non-zero exit code
    Failed(i32),
    /// Terminated by a signal
    Signaled(i32),
    /// Neither a code nor a signal was reported
    Unknown,
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            return ProcessExit::Clean;
        }
        if let Some(code) = status.code() {
            return ProcessExit::Failed(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ProcessExit::Signaled(signal);
            }
        }
        ProcessExit::Unknown
    }
}

// ============================================================================
// Process Management
// ============================================================================

/// Error types for process management
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to launch '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Process not started")]
    NotStarted,

    #[error("Process already started")]
    AlreadyStarted,

    #[error("Stdin not available")]
    StdinNotAvailable,

    #[error("Stdout not available")]
    StdoutNotAvailable,

    #[error("Stderr not available")]
    StderrNotAvailable,
}

type StderrHandler = Box<dyn Fn(String) + Send + Sync>;

/// Manages a child process spawned via Command
pub struct ChildProcessManager {
    /// Command to execute
    command: String,

    /// Command arguments
    args: Vec<String>,

    /// Working directory for the process (optional)
    working_directory: Option<PathBuf>,

    /// Log every byte crossing the stdio pipes
    trace_io: bool,

    /// Thread-safe process state, also updated by the wait task
    state: Arc<Mutex<ProcessState>>,

    /// Stdio duplex (created when the process starts, taken once)
    duplex: Option<ChildDuplex>,

    /// Stderr line handler; raw forwarding to our stderr when absent
    stderr_handler: Option<StderrHandler>,

    /// Stderr forwarding task handle
    stderr_task: Option<JoinHandle<()>>,

    /// Exit monitor task handle
    wait_task: Option<JoinHandle<Option<ProcessExit>>>,
}

impl ChildProcessManager {
    /// Create a new child process manager
    ///
    /// # Arguments
    /// * `command` - The command to execute
    /// * `args` - Command line arguments
    /// * `working_dir` - Optional working directory for the process
    pub fn new(command: String, args: Vec<String>, working_dir: Option<PathBuf>) -> Self {
        Self {
            command,
            args,
            working_directory: working_dir,
            trace_io: false,
            state: Arc::new(Mutex::new(ProcessState::NotStarted)),
            duplex: None,
            stderr_handler: None,
            stderr_task: None,
            wait_task: None,
        }
    }

    /// Enable pass-through logging of the stdio traffic
    pub fn with_io_tracing(mut self, enabled: bool) -> Self {
        self.trace_io = enabled;
        self
    }

    /// Install a handler for stderr lines
    ///
    /// Must be called before `start`. Without a handler the child's stderr is
    /// copied verbatim to our own stderr.
    #[allow(dead_code)]
    pub fn on_stderr_line<F>(&mut self, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.stderr_handler = Some(Box::new(handler));
    }

    /// Get current process state (thread-safe)
    pub fn get_state(&self) -> ProcessState {
        match self.state.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_state(&self, new_state: ProcessState) {
        Self::store_state(&self.state, new_state);
    }

    fn store_state(state: &Mutex<ProcessState>, new_state: ProcessState) {
        match state.lock() {
            Ok(mut guard) => *guard = new_state,
            Err(poisoned) => *poisoned.into_inner() = new_state,
        }
    }

    /// Check if the process is currently running
    pub fn is_running(&self) -> bool {
        self.get_state().is_running()
    }

    /// Start the external process
    pub async fn start(&mut self) -> Result<(), ProcessError> {
        if self.is_running() {
            return Err(ProcessError::AlreadyStarted);
        }

        info!("Starting process: {} {:?}", self.command, self.args);

        let mut command_builder = Command::new(&self.command);
        command_builder
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(working_dir) = &self.working_directory {
            command_builder.current_dir(working_dir);
        }

        let mut child = command_builder
            .spawn()
            .map_err(|source| ProcessError::Launch {
                command: self.command.clone(),
                source,
            })?;

        let pid = child.id().ok_or_else(|| {
            ProcessError::Io(io::Error::other("Failed to get process ID"))
        })?;
        info!("Process started with PID: {}", pid);
        self.set_state(ProcessState::Running { pid });

        // Extract stdio streams before moving the child into the wait task
        let stdin = child.stdin.take().ok_or(ProcessError::StdinNotAvailable)?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::StdoutNotAvailable)?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ProcessError::StderrNotAvailable)?;

        self.duplex = Some(child_duplex(stdin, stdout, self.trace_io));

        // Always drain stderr so the child never blocks on a full pipe
        self.spawn_stderr_forwarder(stderr);
        self.spawn_wait_task(child, pid);

        Ok(())
    }

    /// Hand out the stdio duplex; succeeds once per started process
    pub fn take_duplex(&mut self) -> Result<ChildDuplex, ProcessError> {
        self.duplex.take().ok_or(ProcessError::NotStarted)
    }

    fn spawn_stderr_forwarder(&mut self, stderr: ChildStderr) {
        if self.stderr_task.is_some() {
            return;
        }

        let handler = self.stderr_handler.take();

        let task = tokio::spawn(async move {
            match handler {
                Some(handler) => {
                    trace!("ChildProcessManager: forwarding stderr lines to handler");
                    let mut lines = BufReader::new(stderr).lines();
                    loop {
                        match lines.next_line().await {
                            Ok(Some(line)) => handler(line),
                            Ok(None) => break,
                            Err(e) => {
                                error!("Failed to read from stderr: {}", e);
                                break;
                            }
                        }
                    }
                }
                None => {
                    trace!("ChildProcessManager: copying stderr to parent stderr");
                    let mut reader = stderr;
                    let mut parent_stderr = tokio::io::stderr();
                    if let Err(e) = tokio::io::copy(&mut reader, &mut parent_stderr).await {
                        error!("Failed to forward stderr: {}", e);
                    }
                }
            }

            trace!("ChildProcessManager: stderr forwarding finished");
        });

        self.stderr_task = Some(task);
    }

    /// Spawn the detached task that observes child exit
    ///
    /// The outcome is logged and recorded in the state; nothing waits on it.
    fn spawn_wait_task(&mut self, mut child: Child, pid: u32) {
        let state = Arc::clone(&self.state);

        let task = tokio::spawn(async move {
            trace!("ChildProcessManager: Starting wait task for PID {}", pid);

            let outcome = match child.wait().await {
                Ok(status) => {
                    let exit = ProcessExit::from(status);
                    match exit {
                        ProcessExit::Clean => info!("Process PID {} exited", pid),
                        other => warn!("Process PID {} exited with error: {:?}", pid, other),
                    }
                    Some(exit)
                }
                Err(e) => {
                    error!("Error waiting for child process {}: {}", pid, e);
                    None
                }
            };

            Self::store_state(&state, ProcessState::Stopped);
            outcome
        });

        self.wait_task = Some(task);
    }

    /// Wait for the exit monitor to observe the process ending
    pub async fn wait_for_exit(&mut self) -> Option<ProcessExit> {
        let task = self.wait_task.take()?;
        task.await.ok().flatten()
    }

    /// Stop the external process
    pub async fn stop(&mut self, mode: StopMode) -> Result<(), ProcessError> {
        let pid = self.get_state().pid().ok_or(ProcessError::NotStarted)?;

        match mode {
            StopMode::Graceful => info!("Gracefully stopping process with PID: {}", pid),
            StopMode::Force => info!("Force killing process with PID: {}", pid),
        }

        // Dropping the duplex closes the child's stdin
        self.duplex.take();

        #[cfg(unix)]
        {
            let signal = match mode {
                StopMode::Graceful => libc::SIGTERM,
                StopMode::Force => libc::SIGKILL,
            };
            Self::send_signal(pid, signal);
        }
        #[cfg(not(unix))]
        {
            warn!("Process termination signals are only implemented on unix");
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        // The wait task will also record Stopped when it sees the exit
        self.set_state(ProcessState::Stopped);

        Ok(())
    }

    /// Synchronous force kill for Drop implementations
    pub fn kill_sync(&mut self) {
        let Some(pid) = self.get_state().pid() else {
            return;
        };

        info!("Synchronously force killing process with PID: {}", pid);

        #[cfg(unix)]
        Self::send_signal(pid, libc::SIGKILL);

        #[cfg(not(unix))]
        warn!("Synchronous process kill is only implemented on unix");

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        self.set_state(ProcessState::Stopped);
    }

    #[cfg(unix)]
    fn send_signal(pid: u32, signal: libc::c_int) {
        let Ok(raw_pid) = libc::pid_t::try_from(pid) else {
            warn!("PID {} does not fit in pid_t", pid);
            return;
        };
        // SAFETY: kill(2) has no memory-safety preconditions
        let rc = unsafe { libc::kill(raw_pid, signal) };
        if rc == 0 {
            info!("Sent signal {} to process {}", signal, pid);
        } else {
            warn!(
                "Failed to signal process {}: {}",
                pid,
                io::Error::last_os_error()
            );
        }
    }
}

impl Drop for ChildProcessManager {
    fn drop(&mut self) {
        if self.is_running() {
            self.kill_sync();
        }
    }
}
