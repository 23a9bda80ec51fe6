//! Line-oriented CSV trace reading.
//!
//! One row per time step.  An optional `#`-prefixed header on the first
//! line names the columns.  The literal token `|` is a *mode separator*:
//! it splits the row into the current values and one forecast segment per
//! mode, and its column offsets are recorded for the speculator.  A
//! separate probability trace, one probability per atomic column, may
//! accompany the value trace; its `|` tokens feed the same mode offsets.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use itertools::Itertools;
use log::debug;

use crate::monitor::Monitor;
use crate::{MonitorError, Status};

/// Reads the signal (or atomic) trace and the optional probability trace
/// into a monitor's buffers.
pub struct CsvTrace {
    signals: Box<dyn BufRead>,
    probabilities: Option<Box<dyn BufRead>>,
    /// Rows carry boolean atomics rather than numeric signals.
    as_atomics: bool,
    line: String,
}

impl CsvTrace {
    /// Wrap a reader producing value rows.  `as_atomics` selects whether
    /// columns land in the atomic vector or the signal row; specs that
    /// load no signals take their atomics straight from the trace.
    pub fn new<R>(signals: R, as_atomics: bool) -> CsvTrace
    where
        R: BufRead + 'static,
    {
        CsvTrace {
            signals: Box::new(signals),
            probabilities: None,
            as_atomics,
            line: String::new(),
        }
    }

    /// Attach a probability trace.
    pub fn with_probabilities<P>(mut self, probabilities: P) -> CsvTrace
    where
        P: BufRead + 'static,
    {
        self.probabilities = Some(Box::new(probabilities));
        self
    }

    /// Open trace files from disk.
    pub fn open<P>(trace: P, probabilities: Option<P>, as_atomics: bool) -> Result<CsvTrace, MonitorError>
    where
        P: AsRef<Path>,
    {
        let mut reader = CsvTrace::new(BufReader::new(File::open(trace)?), as_atomics);
        if let Some(path) = probabilities {
            reader = reader.with_probabilities(BufReader::new(File::open(path)?));
        }
        Ok(reader)
    }

    fn next_line(reader: &mut dyn BufRead, line: &mut String) -> Result<bool, MonitorError> {
        line.clear();
        Ok(reader.read_line(line)? > 0)
    }

    /// Read the next row into the monitor's buffers.  Returns
    /// `Status::EndOfTrace` once either input runs out.
    pub fn load_next(&mut self, monitor: &mut Monitor) -> Result<Status, MonitorError> {
        if !Self::next_line(&mut self.signals, &mut self.line)? {
            return Ok(Status::EndOfTrace);
        }
        // Header row, only looked for on the first line.
        if monitor.time_stamp == 0 && self.line.starts_with('#') {
            let names = self.line[1..].split(',').map(str::trim).join(", ");
            debug!("trace columns: {}", names);
            if !Self::next_line(&mut self.signals, &mut self.line)? {
                return Ok(Status::EndOfTrace);
            }
        }

        let max_modes = monitor.options.max_modes;
        if self.as_atomics {
            monitor.flip_atomics();
            monitor.k_offsets_atomic.clear();
            let mut column = 0u32;
            let mut mode = 0usize;
            for token in self.line.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                if token == "|" {
                    // Everything before the first separator is the live
                    // row; the rest is forecast.
                    if mode == 0 {
                        monitor.num_atomics = column;
                    }
                    if mode < max_modes {
                        monitor.k_offsets_atomic.push(column);
                    }
                    mode += 1;
                    continue;
                }
                let value: i64 = token.parse().map_err(|_| {
                    MonitorError::Trace(format!("bad atomic value {:?}", token))
                })?;
                monitor.ensure_atomics(column as usize + 1);
                monitor.atomics[column as usize] = value != 0;
                column += 1;
            }
        } else {
            monitor.k_offsets_signal.clear();
            monitor.signal_row.clear();
            let mut column = 0u32;
            let mut mode = 0usize;
            for token in self.line.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                if token == "|" {
                    if mode < max_modes {
                        monitor.k_offsets_signal.push(column);
                    }
                    mode += 1;
                    continue;
                }
                let value: f32 = token.parse().map_err(|_| {
                    MonitorError::Trace(format!("bad signal value {:?}", token))
                })?;
                monitor.signal_row.push(value);
                column += 1;
            }
        }

        if let Some(probabilities) = self.probabilities.as_mut() {
            if !Self::next_line(probabilities, &mut self.line)? {
                return Ok(Status::EndOfTrace);
            }
            if monitor.time_stamp == 0 && self.line.starts_with('#') {
                if !Self::next_line(probabilities, &mut self.line)? {
                    return Ok(Status::EndOfTrace);
                }
            }
            // The probability row's separators are authoritative for the
            // atomic mode offsets.
            monitor.k_offsets_atomic.clear();
            monitor.atomic_probs.clear();
            let mut column = 0u32;
            let mut mode = 0usize;
            for token in self.line.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                if token == "|" {
                    if mode < max_modes {
                        monitor.k_offsets_atomic.push(column);
                    }
                    mode += 1;
                    continue;
                }
                let value: f32 = token.parse().map_err(|_| {
                    MonitorError::Trace(format!("bad probability {:?}", token))
                })?;
                monitor.atomic_probs.push(value);
                column += 1;
            }
            // Atomics beyond the row keep the "no information" sentinel.
            if monitor.atomic_probs.len() < monitor.num_atomics as usize {
                monitor.atomic_probs.resize(monitor.num_atomics as usize, -1.0);
            }
        }

        Ok(Status::Ok)
    }
}
