//! Child-process transport: newline-delimited JSON over stdin/stdout
//!
//! A background reader task owns the child's stdout, reassembles frames with
//! [`LineBuffer`] and hands each response to the [`Correlator`]. Writes are
//! serialized through a mutex so concurrent calls never interleave lines.

use super::{Transport, TransportState};
use crate::config::{ServerCommand, CONFIG_DIR_ENV};
use crate::correlator::Correlator;
use crate::error::{MCPError, Result};
use crate::framing::LineBuffer;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Size of a single read from the child's stdout
const READ_CHUNK_SIZE: usize = 8 * 1024;

type SharedWriter = Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Live connection to a tool server
struct Session {
    writer: SharedWriter,
    /// Cleared by the reader task when the stream ends
    alive: Arc<AtomicBool>,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    child: Option<Child>,
}

enum Link {
    Idle,
    Open(Session),
    Closed,
}

/// Transport that spawns the tool server as a child process
pub struct ProcessTransport {
    command: ServerCommand,
    correlator: Arc<Correlator>,
    link: Mutex<Link>,
}

impl ProcessTransport {
    /// Create a transport for `command`; nothing is spawned until [`Transport::start`]
    #[must_use]
    pub fn new(command: ServerCommand, timeout: Duration) -> Self {
        Self {
            command,
            correlator: Arc::new(Correlator::new(timeout)),
            link: Mutex::new(Link::Idle),
        }
    }

    /// Number of requests waiting for a response
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.correlator.len()
    }

    fn lock(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_child(&self) -> Result<Child> {
        let program = &self.command.program;
        debug!(
            "Spawning tool server: {} {:?} cwd={:?}",
            program, self.command.args, self.command.cwd
        );

        let mut cmd = Command::new(program);
        cmd.args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &self.command.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &self.command.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.command.config_dir {
            cmd.env(CONFIG_DIR_ENV, dir);
        }

        cmd.spawn().map_err(|e| MCPError::Startup {
            reason: format!("Failed to spawn '{program}': {e}"),
        })
    }

    /// Wire up a connected session over the given streams
    fn attach<R, W>(&self, reader: R, writer: W, child: Option<Child>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let alive = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        let reader = tokio::spawn(read_loop(
            reader,
            Arc::clone(&self.correlator),
            Arc::clone(&alive),
            cancel.clone(),
        ));

        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        *self.lock() = Link::Open(Session {
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            alive,
            cancel,
            reader,
            child,
        });
    }

    fn open_writer(&self) -> Option<(SharedWriter, Arc<AtomicBool>)> {
        match &*self.lock() {
            Link::Open(session) => Some((Arc::clone(&session.writer), Arc::clone(&session.alive))),
            Link::Idle | Link::Closed => None,
        }
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn start(&self) -> Result<()> {
        if self.is_connected() {
            debug!("Tool server process already running");
            return Ok(());
        }

        let mut child = self.spawn_child()?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(MCPError::Startup {
                reason: "child process stdio was not captured".into(),
            });
        };

        if let Some(stderr) = child.stderr.take() {
            let program = self.command.program.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %program, "stderr: {}", line);
                }
            });
        }

        let pid = child.id();
        self.attach(stdout, stdin, Some(child));
        info!(
            "Tool server '{}' started (pid {:?})",
            self.command.program, pid
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.lock(), Link::Closed);
        let Link::Open(mut session) = previous else {
            debug!("Process transport already stopped");
            return Ok(());
        };

        session.alive.store(false, Ordering::Release);
        session.cancel.cancel();
        self.correlator.reject_all("Transport stopped");

        if let Some(mut child) = session.child.take() {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill tool server process: {}", e);
            }
        }
        session.reader.abort();

        info!("Tool server '{}' stopped", self.command.program);
        Ok(())
    }

    fn state(&self) -> TransportState {
        match &*self.lock() {
            Link::Idle => TransportState::NotStarted,
            Link::Open(session) if session.alive.load(Ordering::Acquire) => {
                TransportState::Connected
            }
            Link::Open(_) | Link::Closed => TransportState::Stopped,
        }
    }

    async fn send(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let (writer, alive) = self.open_writer().ok_or(MCPError::NotConnected)?;
        if !alive.load(Ordering::Acquire) {
            return Err(MCPError::Transport("tool server process is not running".into()));
        }

        let mut line = serde_json::to_string(request)?;
        line.push('\n');

        let label = request.label();
        let rx = self.correlator.register(request.id, &label)?;
        let _pending = self.correlator.track(request.id);

        // The reader may have died between the check above and registration
        if !alive.load(Ordering::Acquire) {
            return Err(MCPError::Transport("tool server process is not running".into()));
        }

        trace!(id = request.id, "Sending: {}", line.trim_end());
        let written = {
            let mut writer = writer.lock().await;
            match writer.write_all(line.as_bytes()).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            return Err(MCPError::Transport(format!("failed to write request: {e}")));
        }

        self.correlator.wait(request.id, &label, rx).await
    }

    fn kind(&self) -> &'static str {
        "stdio"
    }
}

/// Background reader: owns the read half until the stream ends or is cancelled
async fn read_loop<R>(
    mut reader: R,
    correlator: Arc<Correlator>,
    alive: Arc<AtomicBool>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut frames = LineBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    let reason = loop {
        let read = tokio::select! {
            () = cancel.cancelled() => return,
            read = reader.read(&mut chunk) => read,
        };

        match read {
            Ok(0) => break "tool server closed its output stream".to_string(),
            Ok(n) => {
                for line in frames.push(&chunk[..n]) {
                    dispatch_line(&correlator, &line);
                }
            }
            Err(e) => break format!("failed to read from tool server: {e}"),
        }
    };

    if let Some(fragment) = frames.take_remainder() {
        warn!(
            "Discarding incomplete frame at end of stream ({} bytes)",
            fragment.len()
        );
    }

    alive.store(false, Ordering::Release);
    warn!("Tool server connection lost: {}", reason);
    correlator.reject_all(&reason);
}

/// Route one complete line from the tool server
fn dispatch_line(correlator: &Correlator, line: &str) {
    trace!("Received: {}", line);

    let Ok(value) = serde_json::from_str::<Value>(line) else {
        // Servers log to stdout; anything that is not JSON is not ours
        debug!("Skipping non-JSON output line: {}", line);
        return;
    };

    if value.get("method").is_some() {
        trace!("Ignoring server-initiated message");
        return;
    }

    match serde_json::from_value::<JsonRpcResponse>(value) {
        Ok(response) => {
            correlator.resolve(response);
        }
        Err(e) => warn!("Malformed response from tool server: {}", e),
    }
}
