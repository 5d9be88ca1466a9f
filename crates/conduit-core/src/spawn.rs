//! Peer process spawning and line I/O.
//!
//! The bridge never touches a child process directly. It talks to a
//! [`PeerHandle`] for writes and consumes a channel of [`ProcessEvent`]s for
//! everything coming back, which lets tests script a fake peer without
//! spawning anything.
//!
//! [`AgentProcess`] is the real implementation:
//! - the process runs inside a login shell (see [`crate::shell`])
//! - stdout and stderr are read line by line on background threads
//! - an exit watcher reports [`ProcessEvent::Exit`] once the child is gone
//! - stdin writes are synchronous and newline-terminated

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::BridgeError;
use crate::shell::{build_login_shell_command, PeerExit};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const STDOUT_DRAIN_GRACE: Duration = Duration::from_millis(500);
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// Events produced by a peer process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A line was read from stdout
    Stdout(String),
    /// A line was read from stderr
    Stderr(String),
    /// The process exited
    Exit(PeerExit),
}

/// Write side of a peer connection.
pub trait PeerHandle: Send + Sync {
    /// Write one line (a newline is appended) to the peer's stdin.
    fn write_line(&self, line: &str) -> Result<(), BridgeError>;

    /// Ask the peer to stop. Must not block and must be safe to call twice.
    fn terminate(&self);
}

/// Configuration for spawning the peer process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Path to the agent binary
    pub binary_path: String,
    /// Arguments to pass to the binary
    pub args: Vec<String>,
    /// Working directory for the process
    pub working_dir: Option<String>,
    /// Custom shell prefix (e.g., "/bin/zsh -l -c")
    pub shell_prefix: Option<String>,
}

impl SpawnConfig {
    pub fn new(binary_path: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            args,
            working_dir: None,
            shell_prefix: None,
        }
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn shell_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.shell_prefix = Some(prefix.into());
        self
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(unix)]
fn exit_from_status(status: std::process::ExitStatus) -> PeerExit {
    use std::os::unix::process::ExitStatusExt;
    PeerExit {
        code: status.code(),
        signal: status.signal(),
    }
}

#[cfg(not(unix))]
fn exit_from_status(status: std::process::ExitStatus) -> PeerExit {
    PeerExit {
        code: status.code(),
        signal: None,
    }
}

/// A running peer process.
pub struct AgentProcess {
    child: Arc<Mutex<Option<Child>>>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    stopping: Arc<AtomicBool>,
}

impl AgentProcess {
    /// Spawn the peer and start its reader and exit-watcher threads.
    ///
    /// Returns the process handle plus the receiver every stdout/stderr line
    /// and the final exit are delivered on.
    pub fn spawn(
        config: SpawnConfig,
    ) -> Result<(Self, UnboundedReceiver<ProcessEvent>), BridgeError> {
        let mut cmd = build_login_shell_command(
            &config.binary_path,
            &config.args,
            config.working_dir.as_deref(),
            config.shell_prefix.as_deref(),
        )?;
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| BridgeError::Spawn(format!("{}: {}", config.binary_path, e)))?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Spawn("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BridgeError::Spawn("Failed to capture stderr".to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let child = Arc::new(Mutex::new(Some(child)));
        let stdin = Arc::new(Mutex::new(stdin));
        let stdout_done = Arc::new(AtomicBool::new(false));

        let tx_stdout = tx.clone();
        let stdout_done_flag = Arc::clone(&stdout_done);
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                if tx_stdout.send(ProcessEvent::Stdout(line)).is_err() {
                    break;
                }
            }
            stdout_done_flag.store(true, Ordering::SeqCst);
        });

        let tx_stderr = tx.clone();
        thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                if tx_stderr.send(ProcessEvent::Stderr(line)).is_err() {
                    break;
                }
            }
        });

        spawn_exit_watcher(Arc::clone(&child), Arc::clone(&stdin), stdout_done, tx);

        Ok((
            Self {
                child,
                stdin,
                stopping: Arc::new(AtomicBool::new(false)),
            },
            rx,
        ))
    }

    /// Whether the child is still running.
    pub fn is_running(&self) -> bool {
        lock(&self.child).is_some()
    }
}

/// Poll the child for exit, then report it after stdout has drained.
fn spawn_exit_watcher(
    child: Arc<Mutex<Option<Child>>>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    stdout_done: Arc<AtomicBool>,
    tx: UnboundedSender<ProcessEvent>,
) {
    thread::spawn(move || {
        let exit = loop {
            {
                let mut guard = lock(&child);
                let Some(running) = guard.as_mut() else {
                    return;
                };
                match running.try_wait() {
                    Ok(Some(status)) => {
                        guard.take();
                        break exit_from_status(status);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        log::warn!("Failed to poll agent process: {}", err);
                        guard.take();
                        break PeerExit {
                            code: None,
                            signal: None,
                        };
                    }
                }
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        };
        lock(&stdin).take();

        // Lines written just before exit must reach the bridge before Exit does.
        let mut waited = Duration::ZERO;
        while !stdout_done.load(Ordering::SeqCst) && waited < STDOUT_DRAIN_GRACE {
            thread::sleep(Duration::from_millis(10));
            waited += Duration::from_millis(10);
        }
        let _ = tx.send(ProcessEvent::Exit(exit));
    });
}

impl PeerHandle for AgentProcess {
    fn write_line(&self, line: &str) -> Result<(), BridgeError> {
        let mut guard = lock(&self.stdin);
        let stdin = guard
            .as_mut()
            .ok_or_else(|| BridgeError::Transport("No active stdin".to_string()))?;
        writeln!(stdin, "{}", line)
            .and_then(|_| stdin.flush())
            .map_err(|e| BridgeError::Transport(format!("Failed to write to stdin: {}", e)))
    }

    /// Close stdin, send SIGINT on Unix, and force-kill after a grace period.
    fn terminate(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        lock(&self.stdin).take();

        #[cfg(unix)]
        {
            if let Some(child) = lock(&self.child).as_ref() {
                let pid = child.id() as libc::pid_t;
                // SAFETY: `pid` belongs to a child we spawned and have not reaped.
                unsafe {
                    libc::kill(pid, libc::SIGINT);
                }
            }
        }

        let child = Arc::clone(&self.child);
        thread::spawn(move || {
            let mut waited = Duration::ZERO;
            while waited < GRACEFUL_STOP_TIMEOUT {
                if lock(&child).is_none() {
                    return;
                }
                thread::sleep(EXIT_POLL_INTERVAL);
                waited += EXIT_POLL_INTERVAL;
            }
            if let Some(running) = lock(&child).as_mut() {
                let _ = running.kill();
            }
        });
    }
}
