//! Operator command catalog shared by the parser's help output and the host
//! console's prompt hints.

use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandHelp {
    pub name: &'static str,
    pub usage: &'static str,
    pub summary: &'static str,
}

pub const COMMANDS: [CommandHelp; 9] = [
    CommandHelp {
        name: "server",
        usage: "server start <port> <snr> | server stop",
        summary: "run or stop the receiving radio at a given SNR",
    },
    CommandHelp {
        name: "client",
        usage: "client start <port> <mcs> | client stop",
        summary: "run or stop the transmitting radio at a given MCS (0-4)",
    },
    CommandHelp {
        name: "stop",
        usage: "stop",
        summary: "stop both radios and any running sweep",
    },
    CommandHelp {
        name: "sweep",
        usage: "sweep start | sweep stop",
        summary: "run the configured MCS x SNR sweep",
    },
    CommandHelp {
        name: "reset",
        usage: "reset <server|client>",
        summary: "pulse the board reset again before the next start",
    },
    CommandHelp {
        name: "status",
        usage: "status",
        summary: "show session, watchdog, sweep and emulator state",
    },
    CommandHelp {
        name: "history",
        usage: "history [count]",
        summary: "show the most recent engine events (default 10)",
    },
    CommandHelp {
        name: "help",
        usage: "help [command]",
        summary: "list commands or describe one",
    },
    CommandHelp {
        name: "quit",
        usage: "quit",
        summary: "stop everything and exit",
    },
];

/// Looks up a command by name, ignoring case.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static CommandHelp> {
    COMMANDS
        .iter()
        .find(|command| command.name.eq_ignore_ascii_case(name))
}

/// Writes the help text for `topic`, or the command list when absent.
///
/// # Errors
///
/// Propagates writer failures.
pub fn write_help<W: fmt::Write>(writer: &mut W, topic: Option<&str>) -> fmt::Result {
    match topic {
        None => {
            for command in &COMMANDS {
                writeln!(writer, "  {:<40} {}", command.usage, command.summary)?;
            }
            Ok(())
        }
        Some(name) => match lookup(name) {
            Some(command) => writeln!(writer, "{}\n  {}", command.usage, command.summary),
            None => writeln!(writer, "unknown command `{name}`; try `help`"),
        },
    }
}
