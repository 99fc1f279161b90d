//! Text rendering for the `status` and `history` commands.
//!
//! [`StatusFormatter`] turns an [`EngineStatus`] into one line per concern so
//! every front-end prints the same thing. [`write_history`] lists the newest
//! entries of the telemetry ring.

use core::fmt;
use core::time::Duration;

use crate::orchestrator::EngineStatus;
use crate::session::{Role, SessionSnapshot};
use crate::telemetry::TelemetryRecorder;
use crate::time::MonoInstant;

/// Entries shown by `history` without a count.
pub const DEFAULT_HISTORY_LEN: usize = 10;

/// Helper that renders an [`EngineStatus`] into human-readable lines.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    status: &'a EngineStatus,
}

#[allow(clippy::missing_errors_doc)]
impl<'a> StatusFormatter<'a> {
    #[must_use]
    pub const fn new(status: &'a EngineStatus) -> Self {
        Self { status }
    }

    /// Writes every status line, each terminated by a newline. Every writer
    /// here only fails when `writer` does.
    pub fn write_all<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        for role in Role::ALL {
            self.write_session_line(writer, role)?;
            writer.write_char('\n')?;
        }
        self.write_watchdog_line(writer)?;
        writer.write_char('\n')?;
        self.write_sweep_line(writer)?;
        writer.write_char('\n')?;
        self.write_emulator_line(writer)?;
        writer.write_char('\n')
    }

    /// Writes a session line (e.g. `server state=running link=open dtr=high ack=idle reset=done`).
    pub fn write_session_line<W: fmt::Write>(&self, writer: &mut W, role: Role) -> fmt::Result {
        let SessionSnapshot {
            state,
            link,
            dtr,
            ack_pending,
            reset_done,
            last_command,
            ..
        } = self.status.sessions[role.index()];

        write!(writer, "{role} state={state} link={link} dtr=")?;
        writer.write_str(if dtr.is_high() { "high" } else { "low" })?;
        writer.write_str(" ack=")?;
        writer.write_str(if ack_pending { "waiting" } else { "idle" })?;
        writer.write_str(" reset=")?;
        writer.write_str(if reset_done { "done" } else { "pending" })?;
        if let Some(command) = last_command {
            write!(writer, " last=\"{command}\"")?;
        }
        Ok(())
    }

    /// Writes the watchdog line (e.g. `watchdog armed=true silence=+12.0s threshold=+60.0s`).
    pub fn write_watchdog_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let watchdog = &self.status.watchdog;
        writer.write_str("watchdog armed=")?;
        writer.write_str(if watchdog.armed { "true" } else { "false" })?;
        writer.write_str(" silence=")?;
        write_duration(writer, watchdog.silence)?;
        writer.write_str(" threshold=")?;
        write_duration(writer, Some(watchdog.threshold))?;
        if watchdog.breached {
            writer.write_str(" breached")?;
        }
        Ok(())
    }

    /// Writes the sweep line (e.g. `sweep phase=measuring point=mcs 0 / snr 2 dB progress=1/3 records=12`).
    pub fn write_sweep_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let sweep = &self.status.sweep;
        write!(writer, "sweep phase={}", sweep.phase)?;
        if let Some(point) = sweep.point {
            write!(
                writer,
                " point={point} progress={}/{} records={}",
                sweep.completed, sweep.total, sweep.records
            )?;
        }
        Ok(())
    }

    /// Writes the emulator line (e.g. `emulator state=running channel=TDL-A`).
    pub fn write_emulator_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(
            writer,
            "emulator state={} channel={}",
            self.status.emulator, self.status.channel
        )
    }
}

/// Writes the newest `count` telemetry entries, oldest first, with their age
/// at `now` (e.g. `#41 2.5s ago server: running -> stopping`).
///
/// # Errors
///
/// Propagates writer failures.
pub fn write_history<W, TInstant, const CAPACITY: usize>(
    writer: &mut W,
    recorder: &TelemetryRecorder<TInstant, CAPACITY>,
    count: usize,
    now: TInstant,
) -> fmt::Result
where
    W: fmt::Write,
    TInstant: MonoInstant,
{
    if recorder.is_empty() {
        return writer.write_str("no events recorded\n");
    }
    let skip = recorder.len().saturating_sub(count);
    for record in recorder.oldest_first().skip(skip) {
        write!(writer, "#{} ", record.id)?;
        write_span(writer, now.saturating_duration_since(record.timestamp))?;
        writeln!(writer, " ago {}", record.event)?;
    }
    Ok(())
}

fn write_duration<W: fmt::Write>(writer: &mut W, duration: Option<Duration>) -> fmt::Result {
    match duration {
        None => writer.write_str("n/a"),
        Some(value) => {
            writer.write_char('+')?;
            write_span(writer, value)
        }
    }
}

fn write_span<W: fmt::Write>(writer: &mut W, value: Duration) -> fmt::Result {
    if value >= Duration::from_secs(1) {
        let millis = value.as_millis();
        let seconds = millis / 1_000;
        let tenths = (millis % 1_000) / 100;
        write!(writer, "{seconds}.{tenths}s")
    } else if value >= Duration::from_millis(1) {
        write!(writer, "{}ms", value.as_millis())
    } else {
        write!(writer, "{}us", value.as_micros())
    }
}
