//! Operator console shared by the interactive host front-end and tests.
//!
//! [`grammar`] parses one line into a [`ConsoleCommand`], [`catalog`] holds
//! the help text and [`status`] renders the `status` and `history` reports.

pub mod catalog;
pub mod grammar;
pub mod status;

pub use catalog::{COMMANDS, CommandHelp, lookup, write_help};
pub use grammar::{CommandParseError, ConsoleCommand, parse_command};
pub use status::{DEFAULT_HISTORY_LEN, StatusFormatter, write_history};

use crate::orchestrator::EngineRequest;

impl ConsoleCommand<'_> {
    /// Engine request carried by this command. `None` for commands the
    /// console answers itself (`status`, `history`, `help`, `quit`).
    #[must_use]
    pub fn request(&self) -> Option<EngineRequest> {
        Some(match *self {
            ConsoleCommand::StartServer { port, snr } => EngineRequest::StartServer {
                path: port.into(),
                snr,
            },
            ConsoleCommand::StopServer => EngineRequest::StopServer,
            ConsoleCommand::StartClient { port, mcs } => EngineRequest::StartClient {
                path: port.into(),
                mcs,
            },
            ConsoleCommand::StopClient => EngineRequest::StopClient,
            ConsoleCommand::StopAll => EngineRequest::StopAll,
            ConsoleCommand::StartSweep => EngineRequest::StartSweep,
            ConsoleCommand::StopSweep => EngineRequest::StopSweep,
            ConsoleCommand::Reset(role) => EngineRequest::RearmReset(role),
            ConsoleCommand::Status
            | ConsoleCommand::History { .. }
            | ConsoleCommand::Help { .. }
            | ConsoleCommand::Quit => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;
    use crate::sweep::Snr;

    #[test]
    fn commands_map_to_engine_requests() {
        let command = parse_command("server start /dev/ttyACM0 -1.5").expect("parses");
        assert_eq!(
            command.request(),
            Some(EngineRequest::StartServer {
                path: "/dev/ttyACM0".into(),
                snr: Snr::from_millidb(-1_500),
            })
        );
        assert_eq!(
            parse_command("reset server").expect("parses").request(),
            Some(EngineRequest::RearmReset(Role::Server))
        );
        assert_eq!(
            parse_command("stop").expect("parses").request(),
            Some(EngineRequest::StopAll)
        );
    }

    #[test]
    fn local_commands_have_no_request() {
        for line in ["status", "history 5", "help", "help client", "quit"] {
            assert_eq!(parse_command(line).expect("parses").request(), None, "{line}");
        }
    }

    #[test]
    fn every_parsed_command_has_help() {
        for name in [
            "server", "client", "stop", "sweep", "reset", "status", "history", "help", "quit",
        ] {
            assert!(lookup(name).is_some(), "{name}");
        }
    }
}
