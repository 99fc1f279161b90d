//! Operator command grammar.
//!
//! Keywords are case-insensitive and separated by ASCII whitespace. Ports are
//! taken verbatim up to the next whitespace.

use core::fmt;

use winnow::ascii::{Caseless, digit1, space0, space1};
use winnow::combinator::{alt, cut_err, delimited, eof, opt, peek, preceded, terminated};
use winnow::error::{ContextError, ErrMode, StrContext};
use winnow::prelude::*;
use winnow::token::{any, literal, take_till};

use crate::session::Role;
use crate::sweep::{MAX_MCS, Snr};

/// Parsed operator command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsoleCommand<'a> {
    StartServer { port: &'a str, snr: Snr },
    StopServer,
    StartClient { port: &'a str, mcs: u8 },
    StopClient,
    StopAll,
    StartSweep,
    StopSweep,
    Reset(Role),
    Status,
    /// Newest engine events, `count` of them when given.
    History { count: Option<u16> },
    Help { topic: Option<&'a str> },
    Quit,
}

/// Rejected input line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandParseError {
    Empty,
    Invalid {
        offset: usize,
        expected: Option<&'static str>,
    },
}

impl fmt::Display for CommandParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandParseError::Empty => f.write_str("empty command"),
            CommandParseError::Invalid {
                offset,
                expected: Some(expected),
            } => write!(f, "expected {expected} at column {}", offset + 1),
            CommandParseError::Invalid {
                offset,
                expected: None,
            } => write!(f, "unrecognised input at column {}; try `help`", offset + 1),
        }
    }
}

impl core::error::Error for CommandParseError {}

/// Parses one console line.
///
/// # Errors
///
/// [`CommandParseError::Empty`] for blank input, otherwise the offset of the
/// first character that could not be parsed.
pub fn parse_command(line: &str) -> Result<ConsoleCommand<'_>, CommandParseError> {
    if line.trim().is_empty() {
        return Err(CommandParseError::Empty);
    }
    delimited(space0, command, space0)
        .parse(line)
        .map_err(|err| CommandParseError::Invalid {
            offset: err.offset(),
            expected: err.inner().context().find_map(|context| match context {
                StrContext::Label(label) => Some(*label),
                _ => None,
            }),
        })
}

fn command<'a>(input: &mut &'a str) -> ModalResult<ConsoleCommand<'a>> {
    alt((
        server,
        client,
        sweep,
        reset,
        help,
        history,
        keyword("stop").value(ConsoleCommand::StopAll),
        keyword("status").value(ConsoleCommand::Status),
        alt((keyword("quit"), keyword("exit"))).value(ConsoleCommand::Quit),
    ))
    .context(StrContext::Label("command"))
    .parse_next(input)
}

fn server<'a>(input: &mut &'a str) -> ModalResult<ConsoleCommand<'a>> {
    preceded(
        (keyword("server"), space1),
        cut_err(alt((
            preceded((keyword("start"), space1), (port, preceded(space1, snr)))
                .map(|(port, snr)| ConsoleCommand::StartServer { port, snr }),
            keyword("stop").value(ConsoleCommand::StopServer),
        )))
        .context(StrContext::Label("`start <port> <snr>` or `stop`")),
    )
    .parse_next(input)
}

fn client<'a>(input: &mut &'a str) -> ModalResult<ConsoleCommand<'a>> {
    preceded(
        (keyword("client"), space1),
        cut_err(alt((
            preceded((keyword("start"), space1), (port, preceded(space1, mcs)))
                .map(|(port, mcs)| ConsoleCommand::StartClient { port, mcs }),
            keyword("stop").value(ConsoleCommand::StopClient),
        )))
        .context(StrContext::Label("`start <port> <mcs>` or `stop`")),
    )
    .parse_next(input)
}

fn sweep<'a>(input: &mut &'a str) -> ModalResult<ConsoleCommand<'a>> {
    preceded(
        (keyword("sweep"), space1),
        cut_err(alt((
            keyword("start").value(ConsoleCommand::StartSweep),
            keyword("stop").value(ConsoleCommand::StopSweep),
        )))
        .context(StrContext::Label("`start` or `stop`")),
    )
    .parse_next(input)
}

fn reset<'a>(input: &mut &'a str) -> ModalResult<ConsoleCommand<'a>> {
    preceded(
        (keyword("reset"), space1),
        cut_err(alt((
            keyword("server").value(Role::Server),
            keyword("client").value(Role::Client),
        )))
        .context(StrContext::Label("`server` or `client`")),
    )
    .map(ConsoleCommand::Reset)
    .parse_next(input)
}

fn help<'a>(input: &mut &'a str) -> ModalResult<ConsoleCommand<'a>> {
    preceded(keyword("help"), opt(preceded(space1, word)))
        .map(|topic| ConsoleCommand::Help { topic })
        .parse_next(input)
}

fn history<'a>(input: &mut &'a str) -> ModalResult<ConsoleCommand<'a>> {
    preceded(
        keyword("history"),
        opt(preceded(
            (space1, peek(any)),
            cut_err(
                terminated(digit1, peek(alt((space1, eof))))
                    .try_map(str::parse::<u16>)
                    .verify(|count| *count > 0),
            )
            .context(StrContext::Label("event count")),
        )),
    )
    .map(|count| ConsoleCommand::History { count })
    .parse_next(input)
}

fn port<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    word.context(StrContext::Label("port")).parse_next(input)
}

fn snr(input: &mut &str) -> ModalResult<Snr> {
    cut_err(word.try_map(str::parse::<Snr>))
        .context(StrContext::Label("snr in dB"))
        .parse_next(input)
}

fn mcs(input: &mut &str) -> ModalResult<u8> {
    cut_err(
        terminated(digit1, peek(alt((space1, eof))))
            .try_map(str::parse::<u8>)
            .verify(|mcs| *mcs <= MAX_MCS),
    )
    .context(StrContext::Label("mcs between 0 and 4"))
    .parse_next(input)
}

fn word<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    take_till(1.., |c: char| c.is_ascii_whitespace()).parse_next(input)
}

/// Case-insensitive keyword that must end at whitespace or end of input.
fn keyword<'a>(name: &'static str) -> impl Parser<&'a str, &'a str, ErrMode<ContextError>> {
    terminated(literal(Caseless(name)), peek(alt((space1, eof))))
}
