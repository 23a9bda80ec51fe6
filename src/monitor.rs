//! The monitor aggregate: owned buffers, the step fixpoint, verdict sinks.
//!
//! A `Monitor` is built once from a compiled specification blob and then
//! stepped.  One step runs the evaluator over the instruction table until a
//! full pass makes no progress; the caller refreshes the signal and atomic
//! buffers between steps (normally through [`crate::trace`]).  All mutable
//! state is owned here — there is no global state, and after loading the
//! only allocations are in the optional prediction path.

use std::io::Write;
use std::mem;

use log::{debug, error, trace};
use tinyvec::TinyVec;

use crate::bytecode::{self, Instruction};
use crate::duoq::DuoqArena;
use crate::future_time;
use crate::{tnt_time, tnt_truth, MonitorError, Status, Time, Tnt, Verdict};

/// Structure for options that affect monitor sizing, and must be constant
/// for the lifetime of the monitor.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Queue arena capacity in verdict words.  Configuration commands
    /// carve this region; loading fails when they ask for more.
    pub arena_words: usize,
    /// Upper bound on forecast branches a specification may configure.
    pub max_modes: usize,
}

impl Default for MonitorOptions {
    fn default() -> MonitorOptions {
        MonitorOptions {
            arena_words: 16 * 1024,
            max_modes: 8,
        }
    }
}

/// Fixpoint state of the in-flight time step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    /// First pass of the step; direct and atomic operands load now.
    FirstLoop,
    /// A re-loop pass with nothing produced so far.
    ReloopNoProgress,
    /// A re-loop pass that produced at least one verdict.
    ReloopWithProgress,
}

/// Callback sink for verdicts: `(formula id, verdict)`.
pub type VerdictCallback = Box<dyn FnMut(u32, Verdict)>;

/// A loaded future-time MLTL monitor.
pub struct Monitor {
    pub(crate) options: MonitorOptions,
    /// Current trace time step.
    pub time_stamp: Time,
    pub(crate) progress: Progress,
    pub(crate) predictive_mode: bool,

    pub(crate) instructions: Vec<Instruction>,
    /// Retained program bytes; foreign-engine payloads point into this.
    pub(crate) program: Vec<u8>,
    pub(crate) spec_note: String,
    /// Table index of the first temporal-logic instruction; node ids are
    /// relative to it.
    pub(crate) tl_base: usize,

    pub arena: DuoqArena,

    /// Parsed signal row, including any forecast segments after `|`.
    pub(crate) signal_row: Vec<f32>,
    /// Current and previous atomic vectors.
    pub(crate) atomics: Vec<bool>,
    pub(crate) prev_atomics: Vec<bool>,
    /// Parsed probability row, including forecast segments.
    pub(crate) atomic_probs: Vec<f32>,
    /// Per-atomic probabilities merged across forecast modes; live while
    /// `use_merged_probs` is set by the speculator.
    pub(crate) merged_probs: Vec<f32>,
    pub(crate) use_merged_probs: bool,
    /// Column offsets of each forecast mode within the signal row.
    pub(crate) k_offsets_signal: TinyVec<[u32; 8]>,
    /// Same for the probability row.
    pub(crate) k_offsets_atomic: TinyVec<[u32; 8]>,

    pub(crate) num_signals: u32,
    pub(crate) num_atomics: u32,

    out_file: Option<Box<dyn Write>>,
    out_func: Option<VerdictCallback>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("time_stamp", &self.time_stamp)
            .field("progress", &self.progress)
            .field("predictive_mode", &self.predictive_mode)
            .field("num_signals", &self.num_signals)
            .field("num_atomics", &self.num_atomics)
            .finish_non_exhaustive()
    }
}

impl Monitor {
    fn empty(options: MonitorOptions) -> Monitor {
        let arena = DuoqArena::new(options.arena_words);
        Monitor {
            options,
            time_stamp: 0,
            progress: Progress::FirstLoop,
            predictive_mode: false,
            instructions: Vec::new(),
            program: Vec::new(),
            spec_note: String::new(),
            tl_base: 0,
            arena,
            signal_row: Vec::new(),
            atomics: Vec::new(),
            prev_atomics: Vec::new(),
            atomic_probs: Vec::new(),
            merged_probs: Vec::new(),
            use_merged_probs: false,
            k_offsets_signal: TinyVec::default(),
            k_offsets_atomic: TinyVec::default(),
            num_signals: 0,
            num_atomics: 0,
            out_file: None,
            out_func: None,
        }
    }

    /// Load a compiled specification blob into a fresh monitor.
    pub fn load(blob: &[u8], options: MonitorOptions) -> Result<Monitor, MonitorError> {
        let mut monitor = Monitor::empty(options);
        bytecode::process_binary(&mut monitor, blob)?;
        let atomics = monitor.num_atomics as usize;
        monitor.ensure_atomics(atomics);
        Ok(monitor)
    }

    /// The human-readable note embedded in the specification blob.
    pub fn spec_note(&self) -> &str {
        &self.spec_note
    }

    /// Signal columns the specification expects; zero means the trace
    /// feeds atomics directly.
    pub fn num_signals(&self) -> u32 {
        self.num_signals
    }

    /// Atomic propositions known to the specification and trace.
    pub fn num_atomics(&self) -> u32 {
        self.num_atomics
    }

    /// Attach a text verdict sink (`formula_id:time,T|F` lines).
    pub fn set_output(&mut self, sink: Box<dyn Write>) {
        self.out_file = Some(sink);
    }

    /// Attach a verdict callback.
    pub fn set_verdict_callback<F>(&mut self, callback: F)
    where
        F: FnMut(u32, Verdict) + 'static,
    {
        self.out_func = Some(Box::new(callback));
    }

    /// Grow the atomic-indexed buffers; called while parsing configuration
    /// and the first trace rows, never from the steady-state step path.
    pub(crate) fn ensure_atomics(&mut self, n: usize) {
        if self.atomics.len() < n {
            self.atomics.resize(n, false);
            self.prev_atomics.resize(n, false);
            self.merged_probs.resize(n, 0.0);
        }
        if self.atomic_probs.len() < n {
            // Negative means "no probability information for this atomic".
            self.atomic_probs.resize(n, -1.0);
        }
    }

    /// Current truth of an atomic; unknown indices read as false.
    pub(crate) fn atomic(&self, index: usize) -> bool {
        self.atomics.get(index).copied().unwrap_or(false)
    }

    /// Probability that an atomic holds, from the merged forecast buffer
    /// during speculation, else from the probability row.
    pub(crate) fn atomic_prob(&self, index: usize) -> f32 {
        let buf = if self.use_merged_probs {
            &self.merged_probs
        } else {
            &self.atomic_probs
        };
        buf.get(index).copied().unwrap_or(-1.0)
    }

    /// Swap the current and previous atomic vectors.  The past-time
    /// contract keeps both; the trace reader flips before each new row.
    pub fn flip_atomics(&mut self) {
        mem::swap(&mut self.atomics, &mut self.prev_atomics);
    }

    pub(crate) fn note_progress(&mut self) {
        if self.progress == Progress::ReloopNoProgress {
            self.progress = Progress::ReloopWithProgress;
        }
    }

    fn dispatch(&mut self, index: usize) -> Status {
        match self.instructions[index] {
            Instruction::Mltl(instr) => future_time::update(self, &instr),
            Instruction::Foreign { tag, offset, len } => {
                let payload = &self.program[offset as usize..offset as usize + len as usize];
                trace!(
                    "skipping engine {} instruction ({} payload bytes, no such engine in this build)",
                    tag,
                    payload.len()
                );
                Status::Unimpl
            }
        }
    }

    /// Run one time step: iterate the instruction table (leaves first) and
    /// re-loop until a full pass produces nothing new, then advance the
    /// time stamp.  Statuses from individual instructions never abort the
    /// step, but the worst one observed is returned so the driver can
    /// report an invalid instruction with a non-zero exit.
    pub fn step(&mut self) -> Status {
        debug!("---------- step {} ----------", self.time_stamp);
        self.progress = Progress::FirstLoop;
        let mut worst = Status::Ok;
        loop {
            for index in 0..self.instructions.len() {
                if self.dispatch(index) == Status::InvalidInst {
                    debug!("instruction {} not dispatchable", index);
                    worst = Status::InvalidInst;
                }
            }
            if self.progress == Progress::ReloopNoProgress {
                break;
            }
            self.progress = Progress::ReloopNoProgress;
        }
        self.time_stamp += 1;
        worst
    }

    /// Push a verdict to the configured sinks.
    pub(crate) fn emit_verdict(&mut self, formula_id: u32, verdict: Tnt, predicted_at: Option<Time>) {
        if let Some(out) = self.out_file.as_mut() {
            let truth = if tnt_truth(verdict) { "T" } else { "F" };
            let result = match predicted_at {
                Some(real) => writeln!(
                    out,
                    "{}:{},{} (Predicted at time stamp {})",
                    formula_id,
                    tnt_time(verdict),
                    truth,
                    real
                ),
                None => writeln!(out, "{}:{},{}", formula_id, tnt_time(verdict), truth),
            };
            if let Err(err) = result {
                error!("verdict sink write failed: {}", err);
            }
        }
        if let Some(callback) = self.out_func.as_mut() {
            callback(formula_id, Verdict::from_tnt(verdict));
        }
    }
}
