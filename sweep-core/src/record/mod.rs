//! Measurement record grammar.
//!
//! Radios report one record per line as `kind,value,mcs,snr` where `kind` is
//! one of `pdc`, `pdc_err`, `pcc`, `pcc_err` (any case) and whitespace may
//! surround each field. The client and server also print packet totals at
//! the end of a run, which are parsed into [`PacketSummary`] values.

use core::fmt;

use crate::session::Role;

use winnow::ascii::{Caseless, digit1, space0};
use winnow::combinator::{alt, delimited, opt, preceded};
use winnow::error::{ContextError, ParserError};
use winnow::prelude::*;
use winnow::token::{literal, one_of, take_until};

pub mod extractor;

pub use extractor::{DEFAULT_LINE_CAPACITY, ExtractedLine, LineKind, RecordExtractor};

/// Counter family reported by the firmware.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RecordKind {
    Pdc,
    PdcErr,
    Pcc,
    PccErr,
}

impl RecordKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RecordKind::Pdc => "pdc",
            RecordKind::PdcErr => "pdc_err",
            RecordKind::Pcc => "pcc",
            RecordKind::PccErr => "pcc_err",
        }
    }

    /// Returns `true` for the error counters.
    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(self, RecordKind::PdcErr | RecordKind::PccErr)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed measurement line.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MeasurementRecord {
    pub kind: RecordKind,
    pub value: f64,
    pub mcs: i32,
    pub snr: i32,
}

impl MeasurementRecord {
    /// Parses a complete line, rejecting anything but a single record.
    pub fn parse_line(line: &str) -> Option<Self> {
        record.parse(line).ok()
    }
}

/// Renders the normalized record line, e.g. `pdc,10,0,3`.
impl fmt::Display for MeasurementRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.kind, self.value, self.mcs, self.snr)
    }
}

/// End-of-run packet totals printed by the radios.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PacketSummary {
    /// Client side `sent packets: N`.
    Sent(u64),
    /// Server side `received packets: N`.
    Received(u64),
}

impl PacketSummary {
    /// Radio whose totals are trusted for this count.
    #[must_use]
    pub const fn reporter(self) -> Role {
        match self {
            PacketSummary::Sent(_) => Role::Client,
            PacketSummary::Received(_) => Role::Server,
        }
    }

    /// Finds a packet total anywhere in `line`, ignoring case.
    pub fn find_in(line: &str) -> Option<Self> {
        let lower = LowerAscii(line);
        if let Some(offset) = lower.find("sent packets:") {
            return count_after(&line[offset + "sent packets:".len()..]).map(PacketSummary::Sent);
        }
        if let Some(offset) = lower.find("received packets:") {
            return count_after(&line[offset + "received packets:".len()..])
                .map(PacketSummary::Received);
        }
        None
    }
}

fn record(input: &mut &str) -> ModalResult<MeasurementRecord> {
    let kind = field(record_kind).parse_next(input)?;
    let value = preceded(',', field(number)).parse_next(input)?;
    let mcs = preceded(',', field(integer)).parse_next(input)?;
    let snr = preceded(',', field(integer)).parse_next(input)?;
    Ok(MeasurementRecord {
        kind,
        value,
        mcs,
        snr,
    })
}

fn field<'i, O, E, P>(inner: P) -> impl Parser<&'i str, O, E>
where
    P: Parser<&'i str, O, E>,
    E: ParserError<&'i str>,
{
    delimited(space0, inner, space0)
}

fn record_kind(input: &mut &str) -> ModalResult<RecordKind> {
    // Longer tags first so `pdc_err` is not consumed as `pdc`.
    alt((
        literal(Caseless("pdc_err")).value(RecordKind::PdcErr),
        literal(Caseless("pcc_err")).value(RecordKind::PccErr),
        literal(Caseless("pdc")).value(RecordKind::Pdc),
        literal(Caseless("pcc")).value(RecordKind::Pcc),
    ))
    .parse_next(input)
}

fn number(input: &mut &str) -> ModalResult<f64> {
    (opt(one_of(['+', '-'])), digit1, opt(('.', digit1)))
        .take()
        .try_map(str::parse::<f64>)
        .parse_next(input)
}

fn integer(input: &mut &str) -> ModalResult<i32> {
    (opt(one_of(['+', '-'])), digit1)
        .take()
        .try_map(str::parse::<i32>)
        .parse_next(input)
}

fn count(input: &mut &str) -> ModalResult<u64> {
    preceded(space0, digit1.try_map(str::parse::<u64>)).parse_next(input)
}

fn count_after(rest: &str) -> Option<u64> {
    let mut input = rest;
    count(&mut input).ok()
}

/// Case-insensitive substring search without allocating a lowered copy.
struct LowerAscii<'a>(&'a str);

impl LowerAscii<'_> {
    fn find(&self, needle: &str) -> Option<usize> {
        let haystack = self.0.as_bytes();
        let needle = needle.as_bytes();
        if needle.len() > haystack.len() {
            return None;
        }
        (0..=haystack.len() - needle.len())
            .find(|&start| haystack[start..start + needle.len()].eq_ignore_ascii_case(needle))
    }
}

/// Splits `line` at the first occurrence of `marker`, for callers that only
/// need the text that follows a known prefix.
pub fn text_after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let mut input = line;
    preceded(
        take_until::<_, _, ContextError>(0.., marker),
        marker,
    )
    .parse_next(&mut input)
    .ok()
    .map(|_| input)
}
