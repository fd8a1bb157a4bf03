// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The harness supervisor event loop.
//!
//! Single-process, cooperative: one `tokio::select!` dispatcher multiplexes
//! the listening endpoint, the parsed-event channel fed by per-connection
//! pump tasks, the child's termination, the signal handler and the deadline
//! timers. Connection pumps only forward decoded events over the channel;
//! the run tree is owned entirely by the caller's event callback.

use crate::{
    errors::SupervisorError,
    harness::{EventBuffer, HarnessCommand, HarnessEvent},
    helpers::tail_lines,
    signal::{SignalHandler, SignalHandlerKind},
};
use camino::Utf8PathBuf;
use std::{collections::BTreeMap, pin::Pin, process::Stdio, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    process::{Child, Command},
    sync::mpsc::{unbounded_channel, UnboundedSender},
    task::JoinHandle,
    time::{sleep, Sleep},
};
use tracing::{debug, warn};

/// Grace period between the interrupt and kill signals during cancellation.
pub const INT_GRACE: Duration = Duration::from_secs(3);
/// Final wait after the kill signal before the supervisor gives up.
pub const KILL_GRACE: Duration = Duration::from_secs(1);
/// How long open connections may drain after the child exits.
pub const DRAIN_GRACE: Duration = Duration::from_secs(5);

const LOG_TAIL_LINES: usize = 20;

/// Which channel an event arrived on.
///
/// The first connection from the harness is the invocation-level channel;
/// every subsequent connection is a module-level channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChannelKind {
    /// The aggregate, displayed silently.
    Invocation,
    /// Feeds the user-visible reporter.
    Module,
}

/// Identifies where an event came from: which connection, and whether that
/// connection is the invocation-level or a module-level channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EventSource {
    /// The connection index, in accept order.
    pub conn_id: usize,
    /// The channel kind of that connection.
    pub kind: ChannelKind,
}

/// Why the supervisor stopped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StopCause {
    /// The harness exited on its own.
    ChildExited,
    /// The global deadline fired.
    Deadline,
    /// The user interrupted the run.
    Signal,
}

/// The outcome of a supervised run.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    /// The harness's exit code, if it exited normally.
    pub exit_code: Option<i32>,
    /// Why the run stopped.
    pub stop_cause: StopCause,
}

enum ConnMessage {
    Event { conn_id: usize, event: HarnessEvent },
    Closed { conn_id: usize },
}

/// Supervises one harness subprocess.
#[derive(Debug)]
pub struct HarnessSupervisor {
    command: HarnessCommand,
    log_path: Utf8PathBuf,
    listener: std::net::TcpListener,
    port: u16,
    env_overlay: BTreeMap<String, String>,
    deadline: Option<Duration>,
    signal_kind: SignalHandlerKind,
}

impl HarnessSupervisor {
    /// Binds the loopback event endpoint (before any spawn) and prepares the
    /// supervisor.
    pub fn new(command: HarnessCommand, log_path: Utf8PathBuf) -> Result<Self, SupervisorError> {
        let listener =
            std::net::TcpListener::bind(("127.0.0.1", 0)).map_err(SupervisorError::Bind)?;
        listener
            .set_nonblocking(true)
            .map_err(SupervisorError::Bind)?;
        let port = listener
            .local_addr()
            .map_err(SupervisorError::Bind)?
            .port();
        Ok(Self {
            command,
            log_path,
            listener,
            port,
            env_overlay: BTreeMap::new(),
            deadline: None,
            signal_kind: SignalHandlerKind::Standard,
        })
    }

    /// The OS-assigned port the harness will connect back on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Sets a global wall-clock deadline for the run.
    pub fn set_deadline(&mut self, deadline: Option<Duration>) -> &mut Self {
        self.deadline = deadline;
        self
    }

    /// Sets environment variables applied on top of the inherited
    /// environment when the harness is spawned.
    pub fn set_env_overlay(&mut self, env_overlay: BTreeMap<String, String>) -> &mut Self {
        self.env_overlay = env_overlay;
        self
    }

    /// Sets the kind of signal handling for the run.
    pub fn set_signal_handler_kind(&mut self, kind: SignalHandlerKind) -> &mut Self {
        self.signal_kind = kind;
        self
    }

    /// Spawns the harness and drives the event loop to completion, invoking
    /// `on_event` for every decoded event.
    pub fn execute<F>(self, on_event: F) -> Result<RunOutcome, SupervisorError>
    where
        F: FnMut(EventSource, HarnessEvent),
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(SupervisorError::RuntimeCreate)?;
        runtime.block_on(self.run(on_event))
    }

    async fn run<F>(self, mut on_event: F) -> Result<RunOutcome, SupervisorError>
    where
        F: FnMut(EventSource, HarnessEvent),
    {
        let listener = TcpListener::from_std(self.listener).map_err(SupervisorError::Bind)?;
        let mut handler = self.signal_kind.build()?;

        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| SupervisorError::LogCreate {
                path: self.log_path.clone(),
                err,
            })?;
        }
        let log_file =
            std::fs::File::create(&self.log_path).map_err(|err| SupervisorError::LogCreate {
                path: self.log_path.clone(),
                err,
            })?;

        let rendered = self.command.render();
        debug!("spawning harness: {rendered} --subprocess-report-port {}", self.port);

        let mut cmd = Command::new(self.command.program.as_str());
        cmd.args(&self.command.args)
            .arg("--subprocess-report-port")
            .arg(self.port.to_string())
            .envs(&self.env_overlay)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|err| SupervisorError::Spawn {
            command: rendered,
            err,
        })?;
        let child_pid = child.id();

        // The optional stdout pump: the only worker besides the dispatcher.
        // It touches nothing but the log file and the child's pipe.
        let mut pump: Option<JoinHandle<()>> = None;
        if let Some(mut stdout) = child.stdout.take() {
            let mut file = tokio::fs::File::from_std(log_file);
            pump = Some(tokio::spawn(async move {
                let _ = tokio::io::copy(&mut stdout, &mut file).await;
                let _ = file.flush().await;
            }));
        }

        let (tx, mut rx) = unbounded_channel::<ConnMessage>();

        let mut conn_tasks: Vec<JoinHandle<()>> = Vec::new();
        let mut conn_kinds: Vec<ChannelKind> = Vec::new();
        let mut open_conns = 0usize;
        let mut saw_event = false;
        let mut child_status: Option<std::process::ExitStatus> = None;
        let mut stop_cause = StopCause::ChildExited;

        let mut deadline_sleep: Option<Pin<Box<Sleep>>> =
            self.deadline.map(|d| Box::pin(sleep(d)));
        let mut drain_sleep: Option<Pin<Box<Sleep>>> = None;
        let mut int_sleep: Option<Pin<Box<Sleep>>> = None;
        let mut kill_sleep: Option<Pin<Box<Sleep>>> = None;

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let conn_id = conn_kinds.len();
                            let kind = if conn_id == 0 {
                                ChannelKind::Invocation
                            } else {
                                ChannelKind::Module
                            };
                            debug!("connection {conn_id} ({kind:?}) from {addr}");
                            conn_kinds.push(kind);
                            open_conns += 1;
                            conn_tasks.push(spawn_connection(conn_id, stream, tx.clone()));
                        }
                        Err(err) => {
                            warn!("accept on the event endpoint failed: {err}");
                        }
                    }
                }
                message = rx.recv() => {
                    match message {
                        Some(ConnMessage::Event { conn_id, event }) => {
                            saw_event = true;
                            on_event(
                                EventSource {
                                    conn_id,
                                    kind: conn_kinds[conn_id],
                                },
                                event,
                            );
                        }
                        Some(ConnMessage::Closed { conn_id }) => {
                            debug!("connection {conn_id} closed");
                            open_conns -= 1;
                            if child_status.is_some() && open_conns == 0 {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                status = child.wait(), if child_status.is_none() => {
                    let status = status.map_err(SupervisorError::ChildWait)?;
                    debug!("harness exited: {status}");
                    child_status = Some(status);
                    if open_conns == 0 {
                        break;
                    }
                    // Connections may still hold partial events; drain for a
                    // bounded period.
                    drain_sleep = Some(Box::pin(sleep(DRAIN_GRACE)));
                }
                signal = handler.recv(), if child_status.is_none() && int_sleep.is_none() => {
                    if let Some(signal) = signal {
                        debug!("received {signal:?}, interrupting the harness");
                        stop_cause = StopCause::Signal;
                        interrupt_child(child_pid, &mut child);
                        int_sleep = Some(Box::pin(sleep(INT_GRACE)));
                    }
                }
                () = wait_opt(&mut deadline_sleep) => {
                    deadline_sleep = None;
                    if child_status.is_none() && int_sleep.is_none() {
                        warn!("run deadline reached, interrupting the harness");
                        stop_cause = StopCause::Deadline;
                        interrupt_child(child_pid, &mut child);
                        int_sleep = Some(Box::pin(sleep(INT_GRACE)));
                    }
                }
                () = wait_opt(&mut int_sleep) => {
                    int_sleep = None;
                    if child_status.is_none() {
                        warn!("harness ignored the interrupt, killing it");
                        kill_child(child_pid, &mut child);
                        kill_sleep = Some(Box::pin(sleep(KILL_GRACE)));
                    }
                }
                () = wait_opt(&mut kill_sleep) => {
                    kill_sleep = None;
                    if child_status.is_none() {
                        warn!("harness survived the kill grace period, abandoning it");
                        break;
                    }
                }
                () = wait_opt(&mut drain_sleep) => {
                    drain_sleep = None;
                    warn!("{open_conns} connection(s) still open after harness exit, abandoning drain");
                    break;
                }
            }
        }

        for task in &conn_tasks {
            task.abort();
        }
        if let Some(pump) = pump {
            if child_status.is_some() {
                let _ = pump.await;
            } else {
                pump.abort();
            }
        }

        if conn_kinds.is_empty() && !saw_event && stop_cause == StopCause::ChildExited {
            return Err(SupervisorError::ExitedEarly {
                exit_code: child_status.and_then(|status| status.code()),
                log_tail: tail_lines(&self.log_path, LOG_TAIL_LINES),
            });
        }

        Ok(RunOutcome {
            exit_code: child_status.and_then(|status| status.code()),
            stop_cause,
        })
    }
}

async fn wait_opt(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

fn spawn_connection(
    conn_id: usize,
    mut stream: TcpStream,
    tx: UnboundedSender<ConnMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer = EventBuffer::new();
        let mut bytes = [0u8; 4096];
        loop {
            match stream.read(&mut bytes).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    buffer.push(&bytes[..n]);
                    for event in buffer.drain_events() {
                        if tx.send(ConnMessage::Event { conn_id, event }).is_err() {
                            return;
                        }
                    }
                }
            }
        }
        if buffer.has_pending() {
            let _ = tx.send(ConnMessage::Event {
                conn_id,
                event: HarnessEvent::ProtocolWarning {
                    message: "connection closed mid-event".to_owned(),
                },
            });
        }
        let _ = tx.send(ConnMessage::Closed { conn_id });
    })
}

#[cfg(unix)]
fn interrupt_child(pid: Option<u32>, child: &mut Child) {
    use nix::{sys::signal, unistd::Pid};
    match pid {
        Some(pid) => {
            let _ = signal::killpg(Pid::from_raw(pid as i32), signal::Signal::SIGINT);
        }
        None => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn interrupt_child(_pid: Option<u32>, child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(unix)]
fn kill_child(pid: Option<u32>, child: &mut Child) {
    use nix::{sys::signal, unistd::Pid};
    match pid {
        Some(pid) => {
            let _ = signal::killpg(Pid::from_raw(pid as i32), signal::Signal::SIGKILL);
        }
        None => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn kill_child(_pid: Option<u32>, child: &mut Child) {
    let _ = child.start_kill();
}
