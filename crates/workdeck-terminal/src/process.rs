//! Process Handle
//!
//! Owns one spawned shell process. Input is queued to a writer task so
//! `write` never blocks the caller; stdout and stderr are read by two reader
//! tasks and funnelled through a single supervisor task, which fans every
//! chunk out to the current subscription list in the order it was read and
//! reports the exit code exactly once.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::lock;

const READ_BUFFER_SIZE: usize = 4096;

/// How long the supervisor keeps draining pipes after the process exited.
/// Background jobs can hold the pipes open indefinitely.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Concrete description of the process to launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnSpec {
    /// Executable path or name
    pub program: String,
    /// Command-line arguments
    pub args: Vec<String>,
    /// Variables added on top of the inherited environment
    pub env: Vec<(String, String)>,
    /// Working directory (inherited when `None`)
    pub cwd: Option<PathBuf>,
}

impl SpawnSpec {
    /// Spec for `program` with no arguments and the inherited environment
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    /// Append arguments
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Control signals a client can deliver to the shell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Ctrl+C
    Interrupt,
    /// Ctrl+Z
    Stop,
    /// Ctrl+\
    Quit,
}

impl SignalKind {
    /// Map a control byte found in input data to its signal
    #[must_use]
    pub fn from_control_byte(byte: u8) -> Option<Self> {
        match byte {
            0x03 => Some(Self::Interrupt),
            0x1a => Some(Self::Stop),
            0x1c => Some(Self::Quit),
            _ => None,
        }
    }

    #[cfg(unix)]
    fn as_signal(self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal;
        match self {
            Self::Interrupt => Signal::SIGINT,
            Self::Stop => Signal::SIGTSTP,
            Self::Quit => Signal::SIGQUIT,
        }
    }
}

/// Event delivered to output subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A chunk read from stdout or stderr
    Output(String),
    /// The process terminated; `None` when it was killed by a signal
    Exit(Option<i32>),
}

/// Identifies one output subscription
pub type SubscriberId = Uuid;

type ExitCallback = Box<dyn FnOnce(Option<i32>) + Send + 'static>;

/// Subscription list plus the terminal exit code, guarded together so a
/// subscriber is either registered before the exit broadcast or refused.
#[derive(Default)]
struct Fanout {
    subscribers: HashMap<SubscriberId, mpsc::UnboundedSender<ProcessEvent>>,
    exited: Option<Option<i32>>,
}

enum ExitHook {
    Pending(Option<ExitCallback>),
    Fired { code: Option<i32>, claimed: bool },
}

struct Shared {
    alive: AtomicBool,
    fanout: Mutex<Fanout>,
    exit_hook: Mutex<ExitHook>,
}

impl Shared {
    fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            fanout: Mutex::new(Fanout::default()),
            exit_hook: Mutex::new(ExitHook::Pending(None)),
        }
    }

    fn broadcast(&self, chunk: String) {
        let mut fanout = lock(&self.fanout);
        fanout
            .subscribers
            .retain(|_, tx| tx.send(ProcessEvent::Output(chunk.clone())).is_ok());
    }

    fn finish(&self, code: Option<i32>) {
        {
            let mut fanout = lock(&self.fanout);
            self.alive.store(false, Ordering::SeqCst);
            fanout.exited = Some(code);
            for (_, tx) in fanout.subscribers.drain() {
                let _ = tx.send(ProcessEvent::Exit(code));
            }
        }

        let callback = {
            let mut hook = lock(&self.exit_hook);
            match &mut *hook {
                ExitHook::Pending(slot) => {
                    let callback = slot.take();
                    *hook = ExitHook::Fired {
                        code,
                        claimed: callback.is_some(),
                    };
                    callback
                }
                ExitHook::Fired { .. } => None,
            }
        };
        if let Some(callback) = callback {
            callback(code);
        }
    }
}

/// Handle to one live (or exited) shell process
pub struct ProcessHandle {
    pid: Option<u32>,
    program: String,
    shared: Arc<Shared>,
    stdin_tx: mpsc::UnboundedSender<Vec<u8>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("program", &self.program)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl ProcessHandle {
    /// Spawn the process described by `spec`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(spec: &SpawnSpec) -> Result<Self> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        // Own process group so control signals reach the shell's children too.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| Error::spawn(&spec.program, e))?;
        let pid = child.id();

        let shared = Arc::new(Shared::new());

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_stream(stdout, chunk_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_stream(stderr, chunk_tx.clone()));
        }
        drop(chunk_tx);

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(write_stdin(stdin, stdin_rx));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(supervise(child, pid, chunk_rx, kill_rx, shared.clone()));

        info!(pid = ?pid, program = %spec.program, "Shell process spawned");

        Ok(Self {
            pid,
            program: spec.program.clone(),
            shared,
            stdin_tx,
            kill_tx: Mutex::new(Some(kill_tx)),
        })
    }

    /// OS process id, if the platform reported one
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Executable this handle was spawned from
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether the process has not yet been observed to exit
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    /// Exit code once the process has terminated
    #[must_use]
    pub fn exit_code(&self) -> Option<Option<i32>> {
        lock(&self.shared.fanout).exited
    }

    /// Queue bytes for the process's standard input.
    ///
    /// Writes after exit are dropped; the exit event already told listeners.
    pub fn write(&self, data: &[u8]) {
        if data.is_empty() || !self.is_alive() {
            return;
        }
        if self.stdin_tx.send(data.to_vec()).is_err() {
            debug!(pid = ?self.pid, "stdin closed, dropping write");
        }
    }

    /// Register an output subscription.
    ///
    /// Returns `None` once the process has exited. The receiver sees every
    /// chunk produced after this call, then a final [`ProcessEvent::Exit`].
    pub fn subscribe(&self, id: SubscriberId) -> Option<mpsc::UnboundedReceiver<ProcessEvent>> {
        let mut fanout = lock(&self.shared.fanout);
        if fanout.exited.is_some() {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        fanout.subscribers.insert(id, tx);
        Some(rx)
    }

    /// Remove an output subscription; returns whether it existed
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        lock(&self.shared.fanout).subscribers.remove(&id).is_some()
    }

    /// Number of live output subscriptions
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared.fanout).subscribers.len()
    }

    /// Register the exit callback.
    ///
    /// The callback runs exactly once with the exit code, immediately if the
    /// process already exited. Only the first registration is accepted;
    /// later calls return `false` and drop their callback.
    pub fn on_exit<F>(&self, callback: F) -> bool
    where
        F: FnOnce(Option<i32>) + Send + 'static,
    {
        let mut hook = lock(&self.shared.exit_hook);
        let code = match &mut *hook {
            ExitHook::Pending(slot) => {
                if slot.is_some() {
                    return false;
                }
                *slot = Some(Box::new(callback));
                return true;
            }
            ExitHook::Fired { claimed: true, .. } => return false,
            ExitHook::Fired { code, claimed } => {
                *claimed = true;
                *code
            }
        };
        drop(hook);
        callback(code);
        true
    }

    /// Deliver a control signal to the process group. No-op after exit.
    pub fn signal(&self, kind: SignalKind) {
        if !self.is_alive() {
            return;
        }
        debug!(pid = ?self.pid, signal = ?kind, "Signalling shell");
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            signal_group(pid, kind.as_signal());
        }
        #[cfg(not(unix))]
        let _ = kind;
    }

    /// Forcibly terminate the process. Idempotent.
    pub fn kill(&self) {
        if let Some(tx) = lock(&self.kill_tx).take() {
            let _ = tx.send(());
        }
    }
}

async fn read_stream<R>(mut reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut decoder = Utf8Decoder::default();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if !text.is_empty() && tx.send(text).is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(error = %e, "Output pipe read failed");
                break;
            }
        }
    }
    let rest = decoder.finish();
    if !rest.is_empty() {
        let _ = tx.send(rest);
    }
}

async fn write_stdin(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(bytes) = rx.recv().await {
        if let Err(e) = stdin.write_all(&bytes).await {
            debug!(error = %e, "stdin write failed");
            break;
        }
        if let Err(e) = stdin.flush().await {
            debug!(error = %e, "stdin flush failed");
            break;
        }
    }
}

async fn supervise(
    mut child: Child,
    pid: Option<u32>,
    mut chunks: mpsc::UnboundedReceiver<String>,
    mut kill_rx: oneshot::Receiver<()>,
    shared: Arc<Shared>,
) {
    let mut kill_requested = false;
    let status = loop {
        tokio::select! {
            Some(chunk) = chunks.recv() => shared.broadcast(chunk),
            status = child.wait() => break status,
            // Also fires when the handle is dropped.
            _ = &mut kill_rx, if !kill_requested => {
                kill_requested = true;
                #[cfg(unix)]
                if let Some(pid) = pid {
                    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
                }
                if let Err(e) = child.start_kill() {
                    debug!(pid = ?pid, error = %e, "start_kill failed");
                }
            }
        }
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(pid = ?pid, error = %e, "Failed to wait for shell process");
            None
        }
    };

    let _ = tokio::time::timeout(OUTPUT_DRAIN_GRACE, async {
        while let Some(chunk) = chunks.recv().await {
            shared.broadcast(chunk);
        }
    })
    .await;

    info!(pid = ?pid, code = ?code, killed = kill_requested, "Shell process exited");
    shared.finish(code);
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::{kill, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "PID exceeds i32::MAX, cannot send signal");
        return;
    };
    let pid = Pid::from_raw(raw);
    if killpg(pid, signal).is_err() {
        if let Err(e) = kill(pid, signal) {
            debug!(pid = raw, signal = ?signal, error = %e, "Signal delivery failed");
        }
    }
}

/// Incremental UTF-8 decoder that holds back a trailing partial character
/// until the next read completes it.
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub(crate) fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    pub(crate) fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
