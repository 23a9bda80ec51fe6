//! The future-time MLTL evaluator.
//!
//! One call to [`update`] dispatches a single instruction against the
//! queue arena.  Operators are small state machines: they pull operand
//! verdicts through [`crate::duoq::DuoqArena::check`] (or straight from
//! the signal/atomic buffers on the first pass of a step), decide, and
//! push zero or more verdicts into their own queue.  Temporal operators
//! keep their interval bounds and edge state in the temporal side block.
//!
//! A node classified probabilistic replaces the boolean combinators with
//! arithmetic over `{time, probability}` pairs: AND becomes a product,
//! NOT becomes `1 - p`, GLOBALLY a running product over its window and
//! UNTIL the iterated `1 - (1 - op1)(1 - running)` form.

use std::cmp::{max, min};

use log::debug;

use crate::duoq::{Probability, TemporalBlock};
use crate::instruction::{MltlInstruction, Opcode, OperandKind};
use crate::monitor::{Monitor, Progress};
use crate::prediction;
use crate::{tnt, tnt_time, tnt_truth, MonitorError, Status, Tnt, TNT_TIME, TNT_TRUE};

/// Resolve operand `op_num` to a verdict, advancing the reader's cursor
/// for subformula operands.  Direct and atomic operands only exist on the
/// first pass of a time step.
pub(crate) fn check_operand(
    monitor: &mut Monitor,
    instr: &MltlInstruction,
    op_num: usize,
) -> Option<Tnt> {
    let operand = instr.operand(op_num);
    match operand.kind {
        OperandKind::Direct => (monitor.progress == Progress::FirstLoop)
            .then(|| tnt(monitor.time_stamp, operand.value != 0)),
        OperandKind::Atomic => (monitor.progress == Progress::FirstLoop)
            .then(|| tnt(monitor.time_stamp, monitor.atomic(operand.value as usize))),
        OperandKind::Subformula => monitor.arena.check(
            operand.value,
            instr.memory_reference,
            op_num,
            monitor.predictive_mode,
        ),
        OperandKind::NotSet => None,
    }
}

/// Probability-slot variant of [`check_operand`].  For atomics, a negative
/// probability row entry means "no information": the probability collapses
/// to the observed truth.
fn check_operand_probability(
    monitor: &mut Monitor,
    instr: &MltlInstruction,
    op_num: usize,
) -> Option<Probability> {
    let operand = instr.operand(op_num);
    match operand.kind {
        OperandKind::Direct => (monitor.progress == Progress::FirstLoop).then(|| Probability {
            time: monitor.time_stamp,
            prob: operand.value as f32,
        }),
        OperandKind::Atomic => (monitor.progress == Progress::FirstLoop).then(|| Probability {
            time: monitor.time_stamp,
            prob: atomic_probability(monitor, operand.value as usize),
        }),
        OperandKind::Subformula => monitor.arena.check_probability(
            operand.value,
            instr.memory_reference,
            op_num,
            monitor.predictive_mode,
        ),
        OperandKind::NotSet => None,
    }
}

fn atomic_probability(monitor: &Monitor, index: usize) -> f32 {
    let p = monitor.atomic_prob(index);
    let truth = monitor.atomic(index);
    if p < 0.0 {
        if truth {
            1.0
        } else {
            0.0
        }
    } else if truth {
        p
    } else {
        1.0 - p
    }
}

/// Read an operand's probability slot at a raw queue index, without moving
/// any cursor.  The probabilistic temporal operators use this to walk
/// their window backward.
fn child_probability_at(
    monitor: &Monitor,
    instr: &MltlInstruction,
    op_num: usize,
    slot: u32,
) -> Probability {
    let operand = instr.operand(op_num);
    match operand.kind {
        OperandKind::Direct => Probability {
            time: monitor.time_stamp,
            prob: operand.value as f32,
        },
        OperandKind::Atomic => Probability {
            time: monitor.time_stamp,
            prob: atomic_probability(monitor, operand.value as usize),
        },
        OperandKind::Subformula => monitor.arena.probability_at(operand.value, slot),
        OperandKind::NotSet => Probability::default(),
    }
}

/// Queue length of a subformula operand, for backward window wrap-around.
fn child_length(monitor: &Monitor, instr: &MltlInstruction, op_num: usize) -> u32 {
    let operand = instr.operand(op_num);
    if operand.kind == OperandKind::Subformula {
        monitor.arena.block(operand.value).length
    } else {
        1
    }
}

/// Push a verdict into the instruction's own queue, advance the node's
/// `next_time`, and flag fixpoint progress.
pub(crate) fn push_result(monitor: &mut Monitor, instr: &MltlInstruction, result: Tnt) {
    monitor
        .arena
        .write(instr.memory_reference, result, monitor.predictive_mode);
    debug!(
        "\t({},{})",
        tnt_time(result),
        if tnt_truth(result) { "T" } else { "F" }
    );
    monitor.arena.block_mut(instr.memory_reference).next_time = tnt_time(result) + 1;
    monitor.note_progress();
}

fn push_result_probability(monitor: &mut Monitor, instr: &MltlInstruction, result: Probability) {
    monitor
        .arena
        .write_probability(instr.memory_reference, result, monitor.predictive_mode);
    debug!("\t({},{})", result.time, result.prob);
    monitor.arena.block_mut(instr.memory_reference).next_time = result.time + 1;
    monitor.note_progress();
}

/// Apply a load-time configuration command: queue assignment (atomic
/// operand), temporal bounds (subformula operand), or prediction
/// parameters (direct operand).  Failures here are fatal for the blob.
pub(crate) fn configure(
    monitor: &mut Monitor,
    instr: &MltlInstruction,
) -> Result<(), MonitorError> {
    debug!("\tFT CONFIGURE");
    let node = instr.memory_reference;
    match instr.op1.kind {
        OperandKind::Atomic => monitor.arena.config(node, instr.op1.value, instr.op2.value),
        OperandKind::Subformula => {
            monitor.arena.reserve_temporal(node)?;
            monitor.arena.set_temporal(
                node,
                TemporalBlock {
                    lower_bound: instr.op1.value,
                    upper_bound: instr.op2.value,
                    edge: 0,
                    previous: 0,
                },
            );
            Ok(())
        }
        OperandKind::Direct => {
            if instr.op2.value as usize > monitor.options.max_modes {
                return Err(MonitorError::MalformedSpec(format!(
                    "node {} asks for {} forecast modes, limit is {}",
                    node, instr.op2.value, monitor.options.max_modes
                )));
            }
            monitor.arena.reserve_predict(node)?;
            monitor.arena.set_predict(
                node,
                crate::duoq::PredictBlock {
                    deadline: instr.op1.value,
                    k_modes: instr.op2.value,
                },
            );
            Ok(())
        }
        OperandKind::NotSet => {
            debug!("bad operand type in configuration command");
            Ok(())
        }
    }
}

/// Dispatch one temporal-logic instruction.
pub(crate) fn update(monitor: &mut Monitor, instr: &MltlInstruction) -> Status {
    let node = instr.memory_reference;
    if instr.opcode != Opcode::Nop
        && instr.opcode != Opcode::Configure
        && !monitor.arena.is_configured(node)
    {
        debug!("node {} has no configured queue", node);
        return Status::InvalidInst;
    }

    match instr.opcode {
        Opcode::Nop => {
            debug!("\tFT NOP");
            Status::Ok
        }

        Opcode::Configure => {
            // Configuration normally runs at load time; a stray table
            // entry is applied best-effort.
            if let Err(err) = configure(monitor, instr) {
                debug!("configuration failed: {}", err);
                return Status::InvalidInst;
            }
            Status::Ok
        }

        Opcode::Load => {
            debug!("\tFT LOAD");
            if monitor.arena.block(node).class.is_probabilistic() {
                if let Some(op0) = check_operand_probability(monitor, instr, 0) {
                    push_result_probability(monitor, instr, op0);
                }
                return Status::Ok;
            }
            if let Some(op0) = check_operand(monitor, instr, 0) {
                push_result(monitor, instr, op0);
            }
            Status::Ok
        }

        Opcode::Return => {
            debug!("\tFT RETURN");
            if let Some(op0) = check_operand(monitor, instr, 0) {
                push_result(monitor, instr, op0);
                monitor.emit_verdict(instr.op2.value, op0, None);
            }
            if !monitor.predictive_mode
                && monitor.progress == Progress::ReloopNoProgress
                && monitor.arena.predict(node).is_some()
            {
                return prediction::consider(monitor, instr);
            }
            Status::Ok
        }

        Opcode::Globally => {
            debug!("\tFT GLOBALLY");
            if monitor.arena.block(node).class.is_probabilistic() {
                return globally_probability(monitor, instr);
            }
            let Some(op0) = check_operand(monitor, instr, 0) else {
                return Status::Ok;
            };
            debug!("\tgot data");
            let Some(mut temp) = monitor.arena.temporal(node) else {
                debug!("temporal operator without temporal block on node {}", node);
                return Status::InvalidInst;
            };

            // Compaction-aware rising edge detection.  A fresh operator
            // has seen no verdict yet, so the first true verdict raises
            // the edge at the truth-bit sentinel rather than at a
            // fabricated timestamp.
            if tnt_truth(op0) && !tnt_truth(temp.previous) {
                if monitor.arena.block(node).next_time != 0 {
                    temp.edge = (temp.previous | TNT_TRUE) + 1;
                } else {
                    temp.edge = TNT_TRUE;
                }
                debug!("\trising edge at t={}", tnt_time(temp.edge));
            }

            if tnt_truth(op0)
                && temp.edge >= TNT_TRUE
                && tnt_time(op0) >= temp.upper_bound - temp.lower_bound + tnt_time(temp.edge)
                && tnt_time(op0) >= temp.upper_bound
            {
                debug!("\tpassed");
                push_result(monitor, instr, tnt(tnt_time(op0) - temp.upper_bound, true));
            } else if !tnt_truth(op0) && tnt_time(op0) >= temp.lower_bound {
                debug!("\tfailed");
                push_result(monitor, instr, tnt(tnt_time(op0) - temp.lower_bound, false));
            } else {
                debug!("\twaiting...");
            }

            // Each input timestep is consumed exactly once, whatever the
            // outcome.
            monitor.arena.block_mut(node).next_time = tnt_time(op0) + 1;
            temp.previous = op0;
            monitor.arena.set_temporal(node, temp);
            Status::Ok
        }

        Opcode::Until => {
            debug!("\tFT UNTIL");
            if monitor.arena.block(node).class.is_probabilistic() {
                return until_probability(monitor, instr);
            }
            let Some(op0) = check_operand(monitor, instr, 0) else {
                return Status::Ok;
            };
            let Some(op1) = check_operand(monitor, instr, 1) else {
                return Status::Ok;
            };
            let Some(mut temp) = monitor.arena.temporal(node) else {
                debug!("temporal operator without temporal block on node {}", node);
                return Status::InvalidInst;
            };

            // Every timestep is consumed as an (op0, op1) pair.
            let tau = min(tnt_time(op0), tnt_time(op1));
            monitor.arena.block_mut(node).next_time = tau + 1;

            if tnt_truth(op1) {
                temp.edge = tnt_time(op1);
            }
            debug!(
                "\ttime since right operand high: {}",
                tau.wrapping_sub(temp.edge)
            );

            let result = if tnt_truth(op1) && tau >= tnt_time(temp.previous) + temp.lower_bound {
                debug!("\tright op true");
                tnt(tau - temp.lower_bound, true)
            } else if !tnt_truth(op0) && tau >= tnt_time(temp.previous) + temp.lower_bound {
                debug!("\tleft op false");
                tnt(tau - temp.lower_bound, false)
            } else if tau >= temp.upper_bound - temp.lower_bound + temp.edge
                && tau >= tnt_time(temp.previous) + temp.upper_bound
            {
                debug!("\ttime elapsed");
                tnt(tau - temp.upper_bound, false)
            } else {
                debug!("\twaiting...");
                monitor.arena.set_temporal(node, temp);
                return Status::Ok;
            };

            // Push only new timestamps.  The truth bit of `previous` flags
            // that an output has ever been produced, which distinguishes
            // "no output yet" from "pushed false at t=0" when the block
            // starts zeroed.
            if tnt_time(result) > tnt_time(temp.previous)
                || (tnt_time(result) == 0 && !tnt_truth(temp.previous))
            {
                push_result(monitor, instr, result);
                monitor.arena.block_mut(node).next_time = tau + 1;
                temp.previous = TNT_TRUE | result;
            }
            monitor.arena.set_temporal(node, temp);
            Status::Ok
        }

        Opcode::Not => {
            debug!("\tFT NOT");
            if monitor.arena.block(node).class.is_probabilistic() {
                if let Some(mut op0) = check_operand_probability(monitor, instr, 0) {
                    op0.prob = 1.0 - op0.prob;
                    push_result_probability(monitor, instr, op0);
                }
                return Status::Ok;
            }
            if let Some(op0) = check_operand(monitor, instr, 0) {
                push_result(monitor, instr, op0 ^ TNT_TRUE);
            }
            Status::Ok
        }

        Opcode::And => {
            debug!("\tFT AND");
            if monitor.arena.block(node).class.is_probabilistic() {
                let op0 = check_operand_probability(monitor, instr, 0);
                let op1 = check_operand_probability(monitor, instr, 1);
                if let (Some(a), Some(b)) = (op0, op1) {
                    push_result_probability(
                        monitor,
                        instr,
                        Probability {
                            time: a.time,
                            prob: a.prob * b.prob,
                        },
                    );
                }
                return Status::Ok;
            }

            let op0 = check_operand(monitor, instr, 0);
            let op1 = check_operand(monitor, instr, 1);
            debug!("\tdata ready: {} {}", op0.is_some(), op1.is_some());

            match (op0, op1) {
                (Some(a), Some(b)) => {
                    let result = if tnt_truth(a) && tnt_truth(b) {
                        tnt(min(tnt_time(a), tnt_time(b)), true)
                    } else if !tnt_truth(a) && !tnt_truth(b) {
                        tnt(max(tnt_time(a), tnt_time(b)), false)
                    } else if tnt_truth(a) {
                        tnt(tnt_time(b), false)
                    } else {
                        tnt(tnt_time(a), false)
                    };
                    push_result(monitor, instr, result);
                }
                (Some(a), None) if !tnt_truth(a) => {
                    push_result(monitor, instr, tnt(tnt_time(a), false));
                }
                (None, Some(b)) if !tnt_truth(b) => {
                    push_result(monitor, instr, tnt(tnt_time(b), false));
                }
                _ => {}
            }
            Status::Ok
        }

        Opcode::Prob => {
            debug!("\tFT PROB");
            let threshold = monitor.arena.block(node).class.threshold();
            if let Some(op0) = check_operand_probability(monitor, instr, 0) {
                debug!("\tprobability for i = {} is {}", op0.time, op0.prob);
                push_result(
                    monitor,
                    instr,
                    tnt(op0.time & TNT_TIME, op0.prob >= threshold),
                );
            }
            Status::Ok
        }

        Opcode::Eventually
        | Opcode::Release
        | Opcode::Or
        | Opcode::Implies
        | Opcode::Nor
        | Opcode::Xor
        | Opcode::Equivalent => {
            debug!("\tFT {:?}: unimplemented", instr.opcode);
            Status::Unimpl
        }
    }
}

/// GLOBALLY over probability slots: running product over the window,
/// walking the operand queue backward from the read cursor.  During
/// speculation a mismatched timestamp means the walk has left the
/// predicted region and must jump across the real half of the queue.
fn globally_probability(monitor: &mut Monitor, instr: &MltlInstruction) -> Status {
    let node = instr.memory_reference;
    let Some(op0) = check_operand_probability(monitor, instr, 0) else {
        return Status::Ok;
    };
    debug!("\tgot data");
    let Some(temp) = monitor.arena.temporal(node) else {
        debug!("temporal operator without temporal block on node {}", node);
        return Status::InvalidInst;
    };

    if op0.time >= temp.upper_bound {
        let mut p = op0.prob;
        let read1 = monitor.arena.block(node).read1;
        let len = child_length(monitor, instr, 0);
        for t in 1..=(temp.upper_bound - temp.lower_bound) {
            let back = t % len;
            let mut slot = if read1 >= back { read1 - back } else { len + read1 - back };
            if monitor.predictive_mode
                && child_probability_at(monitor, instr, 0, slot).time != op0.time - t
            {
                // Leaving the predicted region; jump over the real half.
                slot = (slot + (len - 1) / 2 + 1) % len;
            }
            p *= child_probability_at(monitor, instr, 0, slot).prob;
            debug!("\t\trunning product = {}", p);
        }
        push_result_probability(
            monitor,
            instr,
            Probability {
                time: op0.time - temp.upper_bound,
                prob: p,
            },
        );
    } else {
        debug!("\twaiting...");
    }
    monitor.arena.block_mut(node).next_time = op0.time + 1;
    Status::Ok
}

/// UNTIL over probability slots: both operand streams advance in lockstep
/// and the window folds `1 - (1 - op1)(1 - running)` backward.
fn until_probability(monitor: &mut Monitor, instr: &MltlInstruction) -> Status {
    let node = instr.memory_reference;
    let Some(op0) = check_operand_probability(monitor, instr, 0) else {
        debug!("\twaiting...");
        return Status::Ok;
    };
    let Some(op1) = check_operand_probability(monitor, instr, 1) else {
        debug!("\twaiting...");
        return Status::Ok;
    };
    let Some(temp) = monitor.arena.temporal(node) else {
        debug!("temporal operator without temporal block on node {}", node);
        return Status::InvalidInst;
    };
    debug_assert_eq!(op0.time, op1.time);

    let tau = min(op0.time, op1.time);
    if tau >= temp.upper_bound {
        let mut p = op1.prob;
        let read1 = monitor.arena.block(node).read1;
        let read2 = monitor.arena.block(node).read2;
        let len1 = child_length(monitor, instr, 0);
        let len2 = child_length(monitor, instr, 1);
        for t in 1..=(temp.upper_bound - temp.lower_bound) {
            let back1 = t % len1;
            let mut slot1 = if read1 >= back1 { read1 - back1 } else { len1 + read1 - back1 };
            if monitor.predictive_mode
                && child_probability_at(monitor, instr, 0, slot1).time != op0.time - t
            {
                slot1 = (slot1 + (len1 - 1) / 2 + 1) % len1;
            }
            let back2 = t % len2;
            let mut slot2 = if read2 >= back2 { read2 - back2 } else { len2 + read2 - back2 };
            if monitor.predictive_mode
                && child_probability_at(monitor, instr, 1, slot2).time != op1.time - t
            {
                slot2 = (slot2 + (len2 - 1) / 2 + 1) % len2;
            }
            p *= child_probability_at(monitor, instr, 0, slot1).prob;
            p = 1.0 - (1.0 - child_probability_at(monitor, instr, 1, slot2).prob) * (1.0 - p);
            debug!("\t\trunning fold = {}", p);
        }
        push_result_probability(
            monitor,
            instr,
            Probability {
                time: op0.time - temp.upper_bound,
                prob: p,
            },
        );
    }
    monitor.arena.block_mut(node).next_time = tau + 1;
    Status::Ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::SpecBuilder;
    use crate::{MonitorOptions, Verdict};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Build a monitor and a shared verdict log from assembled records.
    fn harness(builder: &SpecBuilder) -> (Monitor, Rc<RefCell<Vec<(u32, Verdict)>>>) {
        let mut monitor = Monitor::load(&builder.finish(), MonitorOptions::default()).unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        monitor.set_verdict_callback(move |id, v| sink.borrow_mut().push((id, v)));
        (monitor, log)
    }

    fn verdict(time: u32, truth: bool) -> Verdict {
        Verdict { time, truth }
    }

    /// `G[0,2] a0` over 1,1,1,0,1: satisfied once three trues are seen,
    /// falsified through t=3 as soon as the false arrives.
    #[test]
    fn globally_window() {
        let mut b = SpecBuilder::new("G[0,2] a0");
        b.config(MltlInstruction::configure_queue(0, 8, 0))
            .config(MltlInstruction::configure_queue(1, 12, 0))
            .config(MltlInstruction::configure_temporal(1, 0, 2))
            .config(MltlInstruction::configure_queue(2, 8, 0))
            .instruction(MltlInstruction::load(0, 0))
            .instruction(MltlInstruction::unary(Opcode::Globally, 0, 1))
            .instruction(MltlInstruction::ret(1, 0, 2));
        let (mut m, log) = harness(&b);

        for &a0 in &[true, true, true, false, true] {
            m.atomics[0] = a0;
            m.step();
        }
        assert_eq!(
            *log.borrow(),
            vec![(0, verdict(0, true)), (0, verdict(3, false))]
        );
    }

    /// `G[0,0] a0` is the identity on the operand stream.
    #[test]
    fn globally_zero_window_is_identity() {
        let mut b = SpecBuilder::new("G[0,0] a0");
        b.config(MltlInstruction::configure_queue(0, 8, 0))
            .config(MltlInstruction::configure_queue(1, 12, 0))
            .config(MltlInstruction::configure_temporal(1, 0, 0))
            .config(MltlInstruction::configure_queue(2, 8, 0))
            .instruction(MltlInstruction::load(0, 0))
            .instruction(MltlInstruction::unary(Opcode::Globally, 0, 1))
            .instruction(MltlInstruction::ret(1, 0, 2));
        let (mut m, log) = harness(&b);

        let inputs = [true, false, true];
        for &a0 in &inputs {
            m.atomics[0] = a0;
            m.step();
        }
        let got: Vec<(u32, bool)> = log.borrow().iter().map(|(_, v)| (v.time, v.truth)).collect();
        assert_eq!(got, vec![(0, true), (1, false), (2, true)]);
    }

    /// `G[1,1] a0` emits `a0(t-1)` once `a0(t)` is known.
    #[test]
    fn globally_singleton_window_shifts() {
        let mut b = SpecBuilder::new("G[1,1] a0");
        b.config(MltlInstruction::configure_queue(0, 8, 0))
            .config(MltlInstruction::configure_queue(1, 12, 0))
            .config(MltlInstruction::configure_temporal(1, 1, 1))
            .config(MltlInstruction::configure_queue(2, 8, 0))
            .instruction(MltlInstruction::load(0, 0))
            .instruction(MltlInstruction::unary(Opcode::Globally, 0, 1))
            .instruction(MltlInstruction::ret(1, 0, 2));
        let (mut m, log) = harness(&b);

        for &a0 in &[true, false, true, true] {
            m.atomics[0] = a0;
            m.step();
        }
        // Verdict i mirrors a0(i+1).
        assert_eq!(
            *log.borrow(),
            vec![
                (0, verdict(0, false)),
                (0, verdict(1, true)),
                (0, verdict(2, true)),
            ]
        );
    }

    /// `a0 U[0,3] a1` over (1,0),(1,0),(1,1),(0,0): satisfied at 2 when
    /// the right operand arrives, falsified at 3.
    #[test]
    fn until_satisfaction_and_failure() {
        let mut b = SpecBuilder::new("a0 U[0,3] a1");
        b.config(MltlInstruction::configure_queue(0, 8, 0))
            .config(MltlInstruction::configure_queue(1, 8, 0))
            .config(MltlInstruction::configure_queue(2, 12, 0))
            .config(MltlInstruction::configure_temporal(2, 0, 3))
            .config(MltlInstruction::configure_queue(3, 8, 0))
            .instruction(MltlInstruction::load(0, 0))
            .instruction(MltlInstruction::load(1, 1))
            .instruction(MltlInstruction::binary(Opcode::Until, 0, 1, 2))
            .instruction(MltlInstruction::ret(2, 0, 3));
        let (mut m, log) = harness(&b);

        for &(a0, a1) in &[(true, false), (true, false), (true, true), (false, false)] {
            m.atomics[0] = a0;
            m.atomics[1] = a1;
            m.step();
        }
        assert_eq!(
            *log.borrow(),
            vec![(0, verdict(2, true)), (0, verdict(3, false))]
        );
    }

    /// Until's bounded wait: with the right operand never true, the window
    /// elapsing falsifies the formula.
    #[test]
    fn until_times_out() {
        let mut b = SpecBuilder::new("a0 U[0,2] a1");
        b.config(MltlInstruction::configure_queue(0, 8, 0))
            .config(MltlInstruction::configure_queue(1, 8, 0))
            .config(MltlInstruction::configure_queue(2, 12, 0))
            .config(MltlInstruction::configure_temporal(2, 0, 2))
            .config(MltlInstruction::configure_queue(3, 8, 0))
            .instruction(MltlInstruction::load(0, 0))
            .instruction(MltlInstruction::load(1, 1))
            .instruction(MltlInstruction::binary(Opcode::Until, 0, 1, 2))
            .instruction(MltlInstruction::ret(2, 0, 3));
        let (mut m, log) = harness(&b);

        for _ in 0..3 {
            m.atomics[0] = true;
            m.atomics[1] = false;
            m.step();
        }
        assert_eq!(*log.borrow(), vec![(0, verdict(0, false))]);
    }

    /// `!a0` over 0,1,0.
    #[test]
    fn negation() {
        let mut b = SpecBuilder::new("!a0");
        b.config(MltlInstruction::configure_queue(0, 8, 0))
            .config(MltlInstruction::configure_queue(1, 8, 0))
            .config(MltlInstruction::configure_queue(2, 8, 0))
            .instruction(MltlInstruction::load(0, 0))
            .instruction(MltlInstruction::unary(Opcode::Not, 0, 1))
            .instruction(MltlInstruction::ret(1, 0, 2));
        let (mut m, log) = harness(&b);

        for &a0 in &[false, true, false] {
            m.atomics[0] = a0;
            m.step();
        }
        assert_eq!(
            *log.borrow(),
            vec![
                (0, verdict(0, true)),
                (0, verdict(1, false)),
                (0, verdict(2, true)),
            ]
        );
    }

    /// Double negation restores the operand stream at every timestamp.
    #[test]
    fn negation_round_trips() {
        let mut b = SpecBuilder::new("!!a0");
        b.config(MltlInstruction::configure_queue(0, 8, 0))
            .config(MltlInstruction::configure_queue(1, 8, 0))
            .config(MltlInstruction::configure_queue(2, 8, 0))
            .config(MltlInstruction::configure_queue(3, 8, 0))
            .instruction(MltlInstruction::load(0, 0))
            .instruction(MltlInstruction::unary(Opcode::Not, 0, 1))
            .instruction(MltlInstruction::unary(Opcode::Not, 1, 2))
            .instruction(MltlInstruction::ret(2, 0, 3));
        let (mut m, log) = harness(&b);

        let inputs = [true, false, false, true, false];
        for &a0 in &inputs {
            m.atomics[0] = a0;
            m.step();
        }
        let got: Vec<(u32, bool)> = log.borrow().iter().map(|(_, v)| (v.time, v.truth)).collect();
        let want: Vec<(u32, bool)> = inputs
            .iter()
            .enumerate()
            .map(|(t, &a)| (t as u32, a))
            .collect();
        assert_eq!(got, want);
    }

    /// `a0 & G[0,1] a1` over (1,1),(1,1),(1,0): true at 0 once the lagged
    /// side catches up, false through 2 when a1 drops.
    #[test]
    fn and_with_lagged_operand() {
        let mut b = SpecBuilder::new("a0 & G[0,1] a1");
        b.config(MltlInstruction::configure_queue(0, 8, 0))
            .config(MltlInstruction::configure_queue(1, 8, 0))
            .config(MltlInstruction::configure_queue(2, 12, 0))
            .config(MltlInstruction::configure_temporal(2, 0, 1))
            .config(MltlInstruction::configure_queue(3, 8, 0))
            .config(MltlInstruction::configure_queue(4, 8, 0))
            .instruction(MltlInstruction::load(0, 0))
            .instruction(MltlInstruction::load(1, 1))
            .instruction(MltlInstruction::unary(Opcode::Globally, 1, 2))
            .instruction(MltlInstruction::binary(Opcode::And, 0, 2, 3))
            .instruction(MltlInstruction::ret(3, 0, 4));
        let (mut m, log) = harness(&b);

        for &(a0, a1) in &[(true, true), (true, true), (true, false)] {
            m.atomics[0] = a0;
            m.atomics[1] = a1;
            m.step();
        }
        assert_eq!(
            *log.borrow(),
            vec![(0, verdict(0, true)), (0, verdict(2, false))]
        );
    }

    /// A lone false operand decides AND without waiting for the other side.
    #[test]
    fn and_short_circuits_on_false() {
        let mut b = SpecBuilder::new("a0 & G[0,1] a1");
        b.config(MltlInstruction::configure_queue(0, 8, 0))
            .config(MltlInstruction::configure_queue(1, 8, 0))
            .config(MltlInstruction::configure_queue(2, 12, 0))
            .config(MltlInstruction::configure_temporal(2, 0, 1))
            .config(MltlInstruction::configure_queue(3, 8, 0))
            .config(MltlInstruction::configure_queue(4, 8, 0))
            .instruction(MltlInstruction::load(0, 0))
            .instruction(MltlInstruction::load(1, 1))
            .instruction(MltlInstruction::unary(Opcode::Globally, 1, 2))
            .instruction(MltlInstruction::binary(Opcode::And, 0, 2, 3))
            .instruction(MltlInstruction::ret(3, 0, 4));
        let (mut m, log) = harness(&b);

        // a0 false at t=0 while the G side still waits on its window.
        m.atomics[0] = false;
        m.atomics[1] = true;
        m.step();
        assert_eq!(*log.borrow(), vec![(0, verdict(0, false))]);
    }

    /// PROB thresholds a probabilistic operand into boolean verdicts.
    #[test]
    fn prob_thresholds_its_operand() {
        let mut b = SpecBuilder::new("Pr(a0) >= 0.5");
        b.config(MltlInstruction::configure_queue(0, 16, 2_000_000))
            .config(MltlInstruction::configure_queue(1, 8, 500_000))
            .config(MltlInstruction::configure_queue(2, 8, 0))
            .instruction(MltlInstruction::load(0, 0))
            .instruction(MltlInstruction::unary(Opcode::Prob, 0, 1))
            .instruction(MltlInstruction::ret(1, 0, 2));
        let (mut m, log) = harness(&b);

        for &(truth, p) in &[(true, 0.9f32), (true, 0.2), (false, 0.3)] {
            m.atomics[0] = truth;
            m.atomic_probs[0] = p;
            m.step();
        }
        // P(a0): 0.9, 0.2, then 1-0.3=0.7 for the false observation.
        assert_eq!(
            *log.borrow(),
            vec![
                (0, verdict(0, true)),
                (0, verdict(1, false)),
                (0, verdict(2, true)),
            ]
        );
    }

    /// Probabilistic AND multiplies operand probabilities.
    #[test]
    fn probabilistic_and_is_a_product() {
        let mut b = SpecBuilder::new("Pr(a0 & a1) >= 0.5");
        b.config(MltlInstruction::configure_queue(0, 16, 2_000_000))
            .config(MltlInstruction::configure_queue(1, 16, 2_000_000))
            .config(MltlInstruction::configure_queue(2, 16, 2_000_000))
            .config(MltlInstruction::configure_queue(3, 8, 500_000))
            .config(MltlInstruction::configure_queue(4, 8, 0))
            .instruction(MltlInstruction::load(0, 0))
            .instruction(MltlInstruction::load(1, 1))
            .instruction(MltlInstruction::binary(Opcode::And, 0, 1, 2))
            .instruction(MltlInstruction::unary(Opcode::Prob, 2, 3))
            .instruction(MltlInstruction::ret(3, 0, 4));
        let (mut m, log) = harness(&b);

        m.atomics[0] = true;
        m.atomics[1] = true;
        m.atomic_probs[0] = 0.9;
        m.atomic_probs[1] = 0.8;
        m.step();
        // 0.72 clears the 0.5 threshold.
        assert_eq!(*log.borrow(), vec![(0, verdict(0, true))]);

        m.atomic_probs[1] = 0.5;
        m.step();
        // 0.45 does not.
        assert_eq!(log.borrow().last(), Some(&(0, verdict(1, false))));
    }

    /// Probabilistic NOT complements its operand's probability.
    #[test]
    fn probabilistic_not_complements() {
        let mut b = SpecBuilder::new("Pr(!a0) >= 0.5");
        b.config(MltlInstruction::configure_queue(0, 16, 2_000_000))
            .config(MltlInstruction::configure_queue(1, 16, 2_000_000))
            .config(MltlInstruction::configure_queue(2, 8, 500_000))
            .config(MltlInstruction::configure_queue(3, 8, 0))
            .instruction(MltlInstruction::load(0, 0))
            .instruction(MltlInstruction::unary(Opcode::Not, 0, 1))
            .instruction(MltlInstruction::unary(Opcode::Prob, 1, 2))
            .instruction(MltlInstruction::ret(2, 0, 3));
        let (mut m, log) = harness(&b);

        m.atomics[0] = true;
        m.atomic_probs[0] = 0.2;
        m.step();
        // P(a0) = 0.2, so P(!a0) = 0.8.
        assert_eq!(*log.borrow(), vec![(0, verdict(0, true))]);
    }

    /// Probabilistic GLOBALLY folds a running product over its window.
    #[test]
    fn probabilistic_globally_folds_its_window() {
        let mut b = SpecBuilder::new("Pr(G[0,1] a0) >= 0.5");
        b.config(MltlInstruction::configure_queue(0, 16, 2_000_000))
            .config(MltlInstruction::configure_queue(1, 20, 3_000_000))
            .config(MltlInstruction::configure_temporal(1, 0, 1))
            .config(MltlInstruction::configure_queue(2, 8, 500_000))
            .config(MltlInstruction::configure_queue(3, 8, 0))
            .instruction(MltlInstruction::load(0, 0))
            .instruction(MltlInstruction::unary(Opcode::Globally, 0, 1))
            .instruction(MltlInstruction::unary(Opcode::Prob, 1, 2))
            .instruction(MltlInstruction::ret(2, 0, 3));
        let (mut m, log) = harness(&b);

        for &p in &[0.9f32, 0.8, 0.5] {
            m.atomics[0] = true;
            m.atomic_probs[0] = p;
            m.step();
        }
        // Window products: 0.9*0.8 = 0.72, then 0.8*0.5 = 0.4.
        assert_eq!(
            *log.borrow(),
            vec![(0, verdict(0, true)), (0, verdict(1, false))]
        );
    }

    /// Probabilistic UNTIL folds `1 - (1 - right)(1 - running)` over both
    /// operand streams.
    #[test]
    fn probabilistic_until_folds_both_operands() {
        let mut b = SpecBuilder::new("Pr(a0 U[0,1] a1) >= 0.5");
        b.config(MltlInstruction::configure_queue(0, 16, 2_000_000))
            .config(MltlInstruction::configure_queue(1, 16, 2_000_000))
            .config(MltlInstruction::configure_queue(2, 20, 3_000_000))
            .config(MltlInstruction::configure_temporal(2, 0, 1))
            .config(MltlInstruction::configure_queue(3, 8, 500_000))
            .config(MltlInstruction::configure_queue(4, 8, 0))
            .instruction(MltlInstruction::load(0, 0))
            .instruction(MltlInstruction::load(1, 1))
            .instruction(MltlInstruction::binary(Opcode::Until, 0, 1, 2))
            .instruction(MltlInstruction::unary(Opcode::Prob, 2, 3))
            .instruction(MltlInstruction::ret(3, 0, 4));
        let (mut m, log) = harness(&b);

        m.atomics[0] = true;
        m.atomics[1] = true;
        for &(p0, p1) in &[(0.9f32, 0.2f32), (0.9, 0.8)] {
            m.atomic_probs[0] = p0;
            m.atomic_probs[1] = p1;
            m.step();
        }
        // 1 - (1 - 0.2) * (1 - 0.8*0.9) = 0.776 clears the threshold.
        assert_eq!(*log.borrow(), vec![(0, verdict(0, true))]);
    }

    /// Direct operands only materialize on the first pass of a step.
    #[test]
    fn direct_operand_loads_once_per_step() {
        let mut b = SpecBuilder::new("true");
        b.config(MltlInstruction::configure_queue(0, 8, 0))
            .config(MltlInstruction::configure_queue(1, 8, 0))
            .instruction(MltlInstruction {
                opcode: Opcode::Load,
                op1: crate::instruction::Operand::direct(1),
                op2: crate::instruction::Operand::not_set(),
                memory_reference: 0,
            })
            .instruction(MltlInstruction::ret(0, 7, 1));
        let (mut m, log) = harness(&b);

        m.step();
        m.step();
        assert_eq!(
            *log.borrow(),
            vec![(7, verdict(0, true)), (7, verdict(1, true))]
        );
    }

    /// An instruction against an unconfigured queue is skipped, but the
    /// step reports it so drivers can exit non-zero.
    #[test]
    fn invalid_instruction_surfaces_in_the_step_status() {
        let mut b = SpecBuilder::new("unconfigured");
        b.instruction(MltlInstruction::load(0, 0))
            .instruction(MltlInstruction::ret(0, 0, 1));
        let (mut m, log) = harness(&b);

        assert_eq!(m.step(), Status::InvalidInst);
        assert!(log.borrow().is_empty());
        // The step still completed and the clock advanced.
        assert_eq!(m.time_stamp, 1);
    }

    /// Unimplemented connectives report their status without deadlocking
    /// the fixpoint.
    #[test]
    fn unimplemented_opcode_is_skipped() {
        let mut b = SpecBuilder::new("a0 | a1");
        b.config(MltlInstruction::configure_queue(0, 8, 0))
            .config(MltlInstruction::configure_queue(1, 8, 0))
            .config(MltlInstruction::configure_queue(2, 8, 0))
            .config(MltlInstruction::configure_queue(3, 8, 0))
            .instruction(MltlInstruction::load(0, 0))
            .instruction(MltlInstruction::load(1, 1))
            .instruction(MltlInstruction::binary(Opcode::Or, 0, 1, 2))
            .instruction(MltlInstruction::ret(2, 0, 3));
        let (mut m, log) = harness(&b);

        m.atomics[0] = true;
        m.atomics[1] = false;
        assert_eq!(m.step(), Status::Ok);
        assert!(log.borrow().is_empty());
    }
}
