//! A streaming monitor for mission-time linear temporal logic (MLTL).
//!
//! A `Monitor` is loaded once from a compiled specification blob and then
//! driven one time step at a time: the caller (normally the bundled CLI
//! together with the [`trace`] reader) fills the monitor's signal and atomic
//! buffers, calls [`monitor::Monitor::step`], and receives verdicts through
//! the configured sinks.  For every compiled formula the monitor reports,
//! with the earliest time step at which it became determinable, whether the
//! formula is satisfied or falsified.
//!
//! ## On verdict storage
//!
//! Each formula node owns a fixed-capacity circular queue inside one shared
//! arena (the *DUO queue*, [`duoq`]).  A verdict is a single machine word
//! packing a timestamp in the low bits and a truth bit on top, and runs of
//! consecutive same-truth verdicts are *compacted*: the run is represented
//! by one slot whose timestamp is the end of the run.  This is what lets a
//! monitor with a few dozen words of queue memory follow a trace of
//! unbounded length.  The arena is carved once at load time; the steady
//! state step path performs no allocation.
//!
//! ## On prediction
//!
//! Formulas may carry a verdict deadline.  When a deadline elapses without
//! a verdict, the monitor speculatively extends the trace under a
//! multi-modal probabilistic forecast and emits *predicted* verdicts, then
//! rewinds itself ([`prediction`]).  Predicted queue slots are fenced off
//! from ordinary evaluation by a second write cursor, so speculation can
//! never leak into real-time results.
//!
//! The compiled-blob format, the evaluator, and the queue discipline are
//! documented in their modules; `trace` and the CLI are thin collaborators
//! around the core.

use std::io;

use thiserror::Error;

pub mod bytecode;
pub mod duoq;
pub mod future_time;
pub mod instruction;
pub mod monitor;
pub mod prediction;
pub mod trace;

pub use monitor::{Monitor, MonitorOptions};

/// Timestamp in trace steps.
pub type Time = u32;

/// Packed verdict word: timestamp in the low 31 bits, truth bit on top.
pub type Tnt = u32;

/// Truth bit of a verdict word.
pub const TNT_TRUE: Tnt = 1 << 31;
/// Absent truth bit, for symmetry when composing words.
pub const TNT_FALSE: Tnt = 0;
/// Mask selecting the timestamp of a verdict word.
pub const TNT_TIME: Tnt = !TNT_TRUE;
/// The all-ones word, reserved as the "empty slot" sentinel.  No valid
/// verdict may carry this bit pattern.
pub const TNT_INFINITY: Tnt = Tnt::MAX;

/// Timestamp of a verdict word.
#[inline]
pub fn tnt_time(v: Tnt) -> Time {
    v & TNT_TIME
}

/// Truth of a verdict word.
#[inline]
pub fn tnt_truth(v: Tnt) -> bool {
    v & TNT_TRUE != 0
}

/// Compose a verdict word from a timestamp and a truth value.
#[inline]
pub fn tnt(time: Time, truth: bool) -> Tnt {
    time | if truth { TNT_TRUE } else { TNT_FALSE }
}

/// An unpacked verdict as delivered to output sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub time: Time,
    pub truth: bool,
}

impl Verdict {
    /// Unpack a verdict word.
    pub fn from_tnt(v: Tnt) -> Verdict {
        Verdict {
            time: tnt_time(v),
            truth: tnt_truth(v),
        }
    }
}

/// Non-fatal outcome of dispatching one instruction or reading one trace
/// line.  Evaluator opcodes report their status but never abort the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// The input trace is exhausted.
    EndOfTrace,
    /// An opcode the engine cannot dispatch.
    InvalidInst,
    /// An opcode recognized but not supported in this build.
    Unimpl,
}

/// Fatal errors: a blob the loader must reject, arena exhaustion at
/// configuration time, or I/O on the collaborator surfaces.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("malformed specification binary: {0}")]
    MalformedSpec(String),
    #[error("queue arena exhausted while configuring node {node}: {needed} words requested")]
    ArenaExhausted { node: u32, needed: u32 },
    #[error("queue {node} too small to reserve a {what} block")]
    QueueTooSmall { node: u32, what: &'static str },
    #[error("trace parse error: {0}")]
    Trace(String),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
