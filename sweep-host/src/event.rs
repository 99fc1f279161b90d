//! Messages the I/O tasks send back to the engine loop.

use sweep_core::error::PortErrorKind;
use sweep_core::session::Role;
use tokio::sync::mpsc;

pub type EventSender = mpsc::UnboundedSender<HostEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<HostEvent>;

#[derive(Debug)]
pub enum HostEvent {
    Link { role: Role, event: LinkEvent },
    /// `id` tells apart successive emulator processes.
    Emulator { id: u64, event: ProcessEvent },
    /// One operator line from stdin.
    Console(String),
    ConsoleClosed,
}

#[derive(Debug, PartialEq, Eq)]
pub enum LinkEvent {
    Opened,
    OpenFailed(String),
    Data(Vec<u8>),
    RequestFailed(PortErrorKind),
    Closed,
    Lost,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ProcessEvent {
    Spawned,
    SpawnFailed(String),
    Line(String),
    Exited(Option<i32>),
}

#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
