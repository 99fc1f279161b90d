//! Channel emulator child process.

use std::process::Stdio;

use sweep_core::emulator::{ChannelType, launch_args};
use sweep_core::sweep::Snr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::event::{EventSender, HostEvent, ProcessEvent};

/// Program and leading arguments; the initial SNR and channel name are
/// appended at launch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmulatorCommand {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug)]
enum ProcessCommand {
    Write(String),
    Kill,
}

#[derive(Debug)]
pub struct ProcessHandle {
    commands: mpsc::UnboundedSender<ProcessCommand>,
}

impl ProcessHandle {
    /// Spawns the emulator. Reports [`ProcessEvent::Spawned`] or
    /// [`ProcessEvent::SpawnFailed`]; `None` in the latter case.
    pub fn spawn(
        id: u64,
        command: &EmulatorCommand,
        snr: Snr,
        channel: ChannelType,
        events: &EventSender,
    ) -> Option<Self> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .args(launch_args(snr, channel))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(program = %command.program, error = %err, "emulator failed to start");
                let _ = events.send(HostEvent::Emulator {
                    id,
                    event: ProcessEvent::SpawnFailed(err.to_string()),
                });
                return None;
            }
        };
        info!(program = %command.program, pid = child.id(), %snr, %channel, "emulator started");
        let _ = events.send(HostEvent::Emulator {
            id,
            event: ProcessEvent::Spawned,
        });

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(target: "emulator", "{line}");
                }
            });
        }

        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(supervise(id, child, rx, events.clone()));
        Some(Self { commands })
    }

    pub fn write(&self, line: String) {
        if self.commands.send(ProcessCommand::Write(line)).is_err() {
            debug!("emulator already exited; write dropped");
        }
    }

    pub fn kill(&self) {
        let _ = self.commands.send(ProcessCommand::Kill);
    }
}

async fn supervise(
    id: u64,
    mut child: Child,
    mut commands: mpsc::UnboundedReceiver<ProcessCommand>,
    events: EventSender,
) {
    let mut stdin: Option<ChildStdin> = child.stdin.take();
    let mut stdout = child.stdout.take().map(|out| BufReader::new(out).lines());
    let mut accepting = true;
    let emit = |event| {
        let _ = events.send(HostEvent::Emulator { id, event });
    };

    loop {
        tokio::select! {
            line = async {
                match stdout.as_mut() {
                    Some(lines) => lines.next_line().await,
                    None => std::future::pending().await,
                }
            } => match line {
                Ok(Some(line)) => {
                    debug!(target: "emulator", "{line}");
                    emit(ProcessEvent::Line(line));
                }
                Ok(None) | Err(_) => stdout = None,
            },
            status = child.wait() => {
                let code = match status {
                    Ok(status) => status.code(),
                    Err(err) => {
                        warn!(error = %err, "waiting on emulator failed");
                        None
                    }
                };
                info!(?code, "emulator exited");
                emit(ProcessEvent::Exited(code));
                return;
            },
            command = commands.recv(), if accepting => match command {
                Some(ProcessCommand::Write(text)) => {
                    let Some(input) = stdin.as_mut() else {
                        warn!("emulator stdin already closed");
                        continue;
                    };
                    let written = async {
                        input.write_all(text.as_bytes()).await?;
                        input.flush().await
                    };
                    if let Err(err) = written.await {
                        warn!(error = %err, "emulator stdin write failed");
                        stdin = None;
                    }
                }
                Some(ProcessCommand::Kill) | None => {
                    accepting = false;
                    if let Err(err) = child.start_kill() {
                        warn!(error = %err, "emulator kill failed");
                    }
                    stdin = None;
                }
            },
        }
    }
}
