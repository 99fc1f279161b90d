//! Interactive operator console.

use std::io::{self, Write};

use crossterm::style::Stylize;
use sweep_core::console::{
    CommandParseError, ConsoleCommand, DEFAULT_HISTORY_LEN, StatusFormatter, parse_command,
    write_help, write_history,
};
use sweep_core::record::{ExtractedLine, LineKind};
use sweep_core::session::Role;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::clock::HostInstant;
use crate::event::{EventSender, HostEvent};
use crate::runtime::Engine;

pub const BANNER: &str = "dect-sweep console ready. Type `help` for commands or `quit` to exit.";

/// What the console prints in answer to one line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Nothing,
    Text(String),
    Error(String),
    Quit,
}

/// Forwards stdin lines to the engine loop until end of input.
pub fn spawn_reader(events: EventSender) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if events.send(HostEvent::Console(line)).is_err() {
                        return;
                    }
                }
                Ok(None) | Err(_) => {
                    let _ = events.send(HostEvent::ConsoleClosed);
                    return;
                }
            }
        }
    });
}

pub fn execute(engine: &mut Engine, line: &str, now: HostInstant) -> Reply {
    let command = match parse_command(line) {
        Ok(command) => command,
        Err(CommandParseError::Empty) => return Reply::Nothing,
        Err(err) => return Reply::Error(err.to_string()),
    };

    match command {
        ConsoleCommand::Help { topic } => {
            let mut text = String::new();
            let _ = write_help(&mut text, topic);
            Reply::Text(text)
        }
        ConsoleCommand::Status => {
            let status = engine.status(now);
            let mut text = String::new();
            let _ = StatusFormatter::new(&status).write_all(&mut text);
            Reply::Text(text)
        }
        ConsoleCommand::History { count } => {
            let count = count.map_or(DEFAULT_HISTORY_LEN, usize::from);
            let mut text = String::new();
            let _ = write_history(&mut text, engine.telemetry(), count, now);
            Reply::Text(text)
        }
        ConsoleCommand::Quit => Reply::Quit,
        other => match other.request().map(|request| engine.request(request, now)) {
            Some(Err(err)) => Reply::Error(err.to_string()),
            Some(Ok(())) | None => Reply::Nothing,
        },
    }
}

pub fn render<W: Write>(reply: &Reply, out: &mut W) -> io::Result<()> {
    match reply {
        Reply::Nothing | Reply::Quit => Ok(()),
        Reply::Text(text) => {
            out.write_all(text.as_bytes())?;
            out.flush()
        }
        Reply::Error(message) => {
            writeln!(out, "{} {message}", "error:".red().bold())?;
            out.flush()
        }
    }
}

/// Prints one device line, highlighting measurement records.
pub fn echo_device_line<W: Write>(out: &mut W, role: Role, line: &ExtractedLine) -> io::Result<()> {
    let tag = format!("[{role}]");
    match line.kind {
        LineKind::Record(record) if record.kind.is_error() => {
            writeln!(out, "{} {}", tag.dark_grey(), line.text.as_str().yellow())
        }
        LineKind::Record(_) | LineKind::Summary(_) => {
            writeln!(out, "{} {}", tag.dark_grey(), line.text.as_str().green())
        }
        LineKind::Text => writeln!(out, "{} {}", tag.dark_grey(), line.text),
    }
}
