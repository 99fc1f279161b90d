#![no_std]

extern crate alloc;

// Sans-IO engine for DECT NR+ perf sweeps.
//
// Everything here is a state machine driven by explicit inputs and a caller
// supplied clock. The host crate owns serial ports, child processes, files
// and the async runtime, and feeds their outcomes back in.

pub mod ack;
pub mod console;
pub mod emulator;
pub mod error;
pub mod link;
pub mod orchestrator;
pub mod record;
pub mod sequences;
pub mod session;
pub mod sweep;
pub mod telemetry;
pub mod time;
pub mod watchdog;
