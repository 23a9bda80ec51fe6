//! Multimodal model predictive runtime verification (MMPRV).
//!
//! When a formula carries a predict block and its deadline elapses without
//! a verdict, the RETURN instruction hands control here.  The speculator
//! walks the dependency DAG below the RETURN, snapshots the cursor state
//! of every relevant node, and then advances time *speculatively*: each
//! iteration merges the per-mode forecast probabilities for the relevant
//! atomics, re-runs the evaluator fixpoint over just the relevant
//! instructions, and pushes any verdict through the predicted-write path,
//! clamped to the deadline index and tagged with the real time stamp.
//! Afterwards every snapshotted field, the buffers, and the clock are
//! restored unconditionally, so an aborted round can never corrupt real
//! state.  Predicted queue slots survive until real data overwrites them,
//! fenced from ordinary readers by the predicted write cursor.

use std::cmp::min;

use fnv::FnvHashSet;
use log::{debug, warn};

use crate::bytecode::Instruction;
use crate::duoq::PredictBlock;
use crate::future_time;
use crate::instruction::{MltlInstruction, Opcode, OperandKind};
use crate::monitor::{Monitor, Progress};
use crate::{tnt_time, Status, Time, Tnt, TNT_TRUE};

/// Saved cursor state of one queue for a speculation round: both read
/// cursors, the demanded timestamp, and the temporal edge state when the
/// node has a temporal block.
#[derive(Debug, Clone, Copy, Default)]
struct ScqState {
    read1: u32,
    read2: u32,
    next_time: Time,
    temporal: Option<(Tnt, Tnt)>,
}

/// Decide whether the RETURN's deadline forces a prediction round, and if
/// so run one.  Called with the step fixpoint about to settle.
pub(crate) fn consider(monitor: &mut Monitor, instr: &MltlInstruction) -> Status {
    let node = instr.memory_reference;
    let Some(predict) = monitor.arena.predict(node) else {
        return Status::Ok;
    };
    // A verdict for `index = now - deadline` is due; anything newer can
    // still arrive on time.
    let Some(index) = monitor.time_stamp.checked_sub(predict.deadline) else {
        return Status::Ok;
    };
    if monitor.arena.block(node).next_time > index {
        return Status::Ok;
    }
    debug!(
        "prediction required for formula {} at t={} (deadline {})",
        instr.op2.value, monitor.time_stamp, predict.deadline
    );
    run(monitor, instr, &predict, index)
}

fn run(
    monitor: &mut Monitor,
    instr: &MltlInstruction,
    predict: &PredictBlock,
    index: Time,
) -> Status {
    monitor.predictive_mode = true;

    let mut mltl = Vec::new();
    let mut loads = Vec::new();
    let mut seen = FnvHashSet::default();
    let walk = find_child_instructions(monitor, instr, &mut mltl, &mut loads, &mut seen);
    if walk != Status::Ok {
        warn!("prediction dependency walk left incomplete ({:?})", walk);
    }

    let states = prep_prediction(monitor, &mltl, instr);
    let saved_atomics = monitor.atomics.clone();
    let saved_time = monitor.time_stamp;

    let mut latest: Option<Tnt> = None;
    let mut error = Status::Ok;
    let mut iteration: u32 = 0;
    let mut cursors = cursor_snapshot(monitor, &mltl, instr);

    while latest.map_or(true, |v| tnt_time(v) < index) {
        monitor.progress = Progress::FirstLoop;
        monitor.time_stamp += 1;

        match merge_forecast(monitor, &loads, predict, iteration) {
            Status::Ok => {}
            status => {
                error = status;
                break;
            }
        }

        fixpoint(monitor, &mltl, instr, index, saved_time, &mut latest);

        // A speculative step that moved no cursor will never converge on
        // the deadline; bail out rather than spin.  The iteration ceiling
        // backstops pathological forecasts that churn cursors without
        // advancing the verdict.
        let now = cursor_snapshot(monitor, &mltl, instr);
        if now == cursors && latest.map_or(true, |v| tnt_time(v) < index) {
            warn!("speculation stalled before covering t={}", index);
            error = Status::InvalidInst;
            break;
        }
        cursors = now;
        iteration += 1;
        if iteration > index.saturating_add(monitor.options.arena_words as u32) {
            warn!("speculation ran past the queue horizon without covering t={}", index);
            error = Status::InvalidInst;
            break;
        }
    }

    // The restore phase runs unconditionally.
    monitor.atomics = saved_atomics;
    monitor.use_merged_probs = false;
    monitor.time_stamp = saved_time;
    monitor.predictive_mode = false;
    restore_scq(monitor, &mltl, instr, &states);
    // The interrupted real pass settles whatever happened here; an
    // aborted round must not send it back around.
    monitor.progress = Progress::ReloopNoProgress;
    error
}

/// One speculative evaluator fixpoint over the relevant instructions,
/// leaves (high index) first, with the specialized RETURN that clamps to
/// the deadline index and emits tagged verdicts.
fn fixpoint(
    monitor: &mut Monitor,
    mltl: &[MltlInstruction],
    ret: &MltlInstruction,
    index: Time,
    real_time: Time,
    latest: &mut Option<Tnt>,
) {
    loop {
        for i in (0..mltl.len()).rev() {
            future_time::update(monitor, &mltl[i]);
        }

        debug!("\tFT RETURN (speculative)");
        if let Some(op0) = future_time::check_operand(monitor, ret, 0) {
            // Store nothing beyond the index: later steps may still get a
            // real verdict in time.
            let clamped = min(index, tnt_time(op0)) | (op0 & TNT_TRUE);
            future_time::push_result(monitor, ret, clamped);
            monitor.emit_verdict(ret.op2.value, clamped, Some(real_time));
            *latest = Some(op0);
            if min(index, tnt_time(op0)) == index {
                monitor.progress = Progress::ReloopNoProgress;
                break;
            }
        }
        if monitor.progress == Progress::ReloopNoProgress {
            break;
        }
        monitor.progress = Progress::ReloopNoProgress;
    }
}

/// Merge the forecast probabilities of every relevant atomic across the
/// `k` modes for this speculative step.  Each atomic keeps its last real
/// truth (there is no per-mode booleanization to disagree), so the merged
/// probability is the sum of the mode-weighted forecasts.  The monitor
/// reads the merged buffer for the rest of the round.
fn merge_forecast(
    monitor: &mut Monitor,
    loads: &[MltlInstruction],
    predict: &PredictBlock,
    iteration: u32,
) -> Status {
    if monitor.tl_base > 0 {
        // The load prefix belongs to arithmetic engines this build does
        // not carry.
        debug!("arithmetic-engine loads unavailable during speculation");
        return Status::InvalidInst;
    }
    if loads.is_empty() || predict.k_modes == 0 {
        return Status::Ok;
    }

    for load in loads {
        let atomic = load.op1.value as usize;
        monitor.ensure_atomics(atomic + 1);
        let mut sum = 0.0f32;
        for mode in 0..predict.k_modes as usize {
            let Some(&base) = monitor.k_offsets_atomic.get(mode) else {
                debug!("forecast mode {} missing from probability row", mode);
                return Status::InvalidInst;
            };
            let pos = base as usize + iteration as usize * monitor.num_atomics as usize + atomic;
            let Some(&p) = monitor.atomic_probs.get(pos) else {
                debug!("forecast for mode {} exhausted at column {}", mode, pos);
                return Status::InvalidInst;
            };
            sum += p;
        }
        debug!("merged forecast for atomic {}: {}", atomic, sum);
        monitor.merged_probs[atomic] = sum;
    }
    monitor.use_merged_probs = true;
    Status::Ok
}

/// Walk the dependency DAG below `instr`, collecting every contributing
/// temporal-logic instruction and, when the specification loads atomics
/// directly, the deduplicated list of those loads.  Nodes are deduplicated
/// by their queue reference.
fn find_child_instructions(
    monitor: &Monitor,
    instr: &MltlInstruction,
    mltl: &mut Vec<MltlInstruction>,
    loads: &mut Vec<MltlInstruction>,
    seen: &mut FnvHashSet<u32>,
) -> Status {
    match instr.opcode {
        Opcode::Load => {
            if monitor.tl_base == 0 && loads.iter().all(|l| l.op1.value != instr.op1.value) {
                loads.push(*instr);
            }
            Status::Ok
        }
        Opcode::Return | Opcode::Globally | Opcode::Not | Opcode::Prob => {
            descend(monitor, instr, 0, mltl, loads, seen)
        }
        Opcode::Until | Opcode::And => {
            let status = descend(monitor, instr, 0, mltl, loads, seen);
            if status != Status::Ok {
                return status;
            }
            descend(monitor, instr, 1, mltl, loads, seen)
        }
        Opcode::Nop => Status::Ok,
        Opcode::Eventually
        | Opcode::Release
        | Opcode::Or
        | Opcode::Implies
        | Opcode::Nor
        | Opcode::Xor
        | Opcode::Equivalent => Status::Unimpl,
        Opcode::Configure => Status::InvalidInst,
    }
}

fn descend(
    monitor: &Monitor,
    instr: &MltlInstruction,
    op_num: usize,
    mltl: &mut Vec<MltlInstruction>,
    loads: &mut Vec<MltlInstruction>,
    seen: &mut FnvHashSet<u32>,
) -> Status {
    let operand = instr.operand(op_num);
    if operand.kind != OperandKind::Subformula {
        // Direct and atomic operands refresh from the buffers each step.
        return Status::Ok;
    }
    let table_index = monitor.tl_base + operand.value as usize;
    let Some(Instruction::Mltl(child)) = monitor.instructions.get(table_index).copied() else {
        debug!(
            "operand {} does not name a temporal-logic instruction",
            operand.value
        );
        return Status::InvalidInst;
    };
    if !seen.insert(child.memory_reference) {
        return Status::Ok;
    }
    mltl.push(child);
    find_child_instructions(monitor, &child, mltl, loads, seen)
}

/// Record `{read1, read2, next_time, edge, previous}` for every relevant
/// node plus the RETURN's read cursor, and open the predicted write window
/// on each queue.
fn prep_prediction(
    monitor: &mut Monitor,
    instructions: &[MltlInstruction],
    ret: &MltlInstruction,
) -> Vec<ScqState> {
    debug!(
        "----- starting prediction round (time stamp {}) -----",
        monitor.time_stamp
    );
    let mut states = Vec::with_capacity(instructions.len() + 1);
    for instr in instructions {
        let id = instr.memory_reference;
        let blk = monitor.arena.block(id);
        states.push(ScqState {
            read1: blk.read1,
            read2: blk.read2,
            next_time: blk.next_time,
            temporal: monitor.arena.temporal(id).map(|t| (t.edge, t.previous)),
        });
        let write = monitor.arena.block(id).write;
        monitor.arena.block_mut(id).pred_write = write;
    }

    let ret_block = monitor.arena.block(ret.memory_reference);
    states.push(ScqState {
        read1: ret_block.read1,
        ..ScqState::default()
    });
    let write = monitor.arena.block(ret.memory_reference).write;
    monitor.arena.block_mut(ret.memory_reference).pred_write = write;
    states
}

/// Put every snapshotted field back.  The RETURN keeps its `next_time`:
/// predicted indices are final for deadline purposes and must not retrigger
/// or re-emit.
fn restore_scq(
    monitor: &mut Monitor,
    instructions: &[MltlInstruction],
    ret: &MltlInstruction,
    states: &[ScqState],
) {
    for (instr, state) in instructions.iter().zip(states) {
        let id = instr.memory_reference;
        {
            let blk = monitor.arena.block_mut(id);
            blk.read1 = state.read1;
            blk.read2 = state.read2;
            blk.next_time = state.next_time;
        }
        if let Some((edge, previous)) = state.temporal {
            if let Some(mut t) = monitor.arena.temporal(id) {
                t.edge = edge;
                t.previous = previous;
                monitor.arena.set_temporal(id, t);
            }
        }
    }
    monitor.arena.block_mut(ret.memory_reference).read1 = states[instructions.len()].read1;
    debug!(
        "----- ending prediction round (time stamp {}) -----",
        monitor.time_stamp
    );
}

fn cursor_snapshot(
    monitor: &Monitor,
    mltl: &[MltlInstruction],
    ret: &MltlInstruction,
) -> Vec<(u32, u32)> {
    mltl.iter()
        .chain(std::iter::once(ret))
        .map(|i| {
            let b = monitor.arena.block(i.memory_reference);
            (b.write, b.pred_write)
        })
        .collect()
}
