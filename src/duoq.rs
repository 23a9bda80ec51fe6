//! The DUO queue arena: fixed-capacity circular verdict storage.
//!
//! Every formula node owns one circular queue carved out of a single arena
//! vector that is allocated once at load time.  Control blocks live in a
//! side table and carry only indices, never pointers, which keeps the
//! speculative snapshot/restore of [`crate::prediction`] trivial.  Queues
//! are carved from the top of the arena downward: queue 0 occupies the
//! topmost words and each subsequent queue sits immediately below its
//! predecessor.
//!
//! The same storage serves two disciplines, hence the name:
//!
//! * a future-time verdict history with *compaction* — a run of verdicts
//!   with the same truth value is held as one slot whose timestamp is the
//!   end of the run — and an optional second write cursor for predicted
//!   data, and
//! * a past-time FIFO of `(start, end)` interval pairs, two words per
//!   element, for the sibling past-time engine.
//!
//! Temporal bounds, prediction deadlines, and past-time effective ids are
//! *side blocks*: they steal words from the tail of the owning queue and
//! shrink the usable length, so the sum of all queue requests is exactly
//! the arena footprint.

use log::{debug, trace};

use crate::{tnt_time, MonitorError, Status, Time, Tnt, TNT_INFINITY, TNT_TIME, TNT_TRUE};

/// Words consumed by a temporal side block.
pub const TEMPORAL_WORDS: u32 = 4;
/// Words consumed by a predict side block.
pub const PREDICT_WORDS: u32 = 2;
/// Words per probability slot.
pub const PROB_WORDS: u32 = 2;

/// How a node's queue slots are interpreted.
///
/// The compiled blob encodes this as a fixed-point integer (value / 1e6);
/// the reserved values 2.0 and 3.0 select the probabilistic slot layouts
/// and anything else in (0, 2.0) is a probability threshold for PROB nodes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum NodeClass {
    /// Packed boolean verdicts, one word per slot.
    #[default]
    Boolean,
    /// Boolean verdicts; the node thresholds a probabilistic operand.
    Threshold(f32),
    /// `{time, probability}` slots, propositional operator.
    ProbPropositional,
    /// `{time, probability}` slots, temporal operator (a temporal side
    /// block will be reserved on top).
    ProbTemporal,
}

impl NodeClass {
    /// Decode the fixed-point classifier from a configuration command.
    pub fn from_raw(raw: u32) -> NodeClass {
        match raw {
            0 => NodeClass::Boolean,
            2_000_000 => NodeClass::ProbPropositional,
            3_000_000 => NodeClass::ProbTemporal,
            t => NodeClass::Threshold(t as f32 / 1e6),
        }
    }

    /// True for the two-word `{time, probability}` slot layouts.
    pub fn is_probabilistic(self) -> bool {
        matches!(self, NodeClass::ProbPropositional | NodeClass::ProbTemporal)
    }

    /// Threshold carried by a PROB node; zero otherwise.
    pub fn threshold(self) -> f32 {
        match self {
            NodeClass::Threshold(t) => t,
            _ => 0.0,
        }
    }
}

/// A `{time, probability}` pair as stored in probabilistic queue slots.
///
/// Occupies two queue words; the time word reuses [`TNT_INFINITY`] as the
/// empty-slot sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Probability {
    pub time: Time,
    pub prob: f32,
}

/// Temporal operator state, stored in a side block after the queue slots.
///
/// `edge` and `previous` overload the truth bit as "an edge has ever been
/// recorded" / "a verdict has ever been produced", so a zeroed block means
/// a fresh operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TemporalBlock {
    pub lower_bound: u32,
    pub upper_bound: u32,
    pub edge: Tnt,
    pub previous: Tnt,
}

/// Prediction parameters, stored in a side block after the queue slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictBlock {
    /// Latest acceptable lag, in steps, between the current time stamp and
    /// a produced verdict.
    pub deadline: u32,
    /// Number of forecast branches.
    pub k_modes: u32,
}

/// A past-time `(start, end)` interval element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtInterval {
    pub start: Tnt,
    pub end: Tnt,
}

impl PtInterval {
    /// Sentinel returned on underflow.
    fn empty() -> PtInterval {
        PtInterval {
            start: TNT_TRUE,
            end: TNT_TRUE,
        }
    }
}

/// Per-node queue bookkeeping.  All cursors are slot indices relative to
/// the node's queue base.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlBlock {
    /// Arena word index of the queue base.
    queue: u32,
    /// Physical words carved for this node.
    extent: u32,
    /// Words stolen from the tail for side blocks.
    reserved: u32,
    /// Usable slot count after reservations.
    pub length: u32,
    /// This node's read cursor into its first operand's queue.
    pub read1: u32,
    /// Read cursor into the second operand's queue.
    pub read2: u32,
    /// Real write cursor.
    pub write: u32,
    /// Predicted write cursor; [`TNT_INFINITY`] when no prediction is live.
    pub pred_write: u32,
    /// Earliest timestamp this node still needs from its inputs.
    pub next_time: Time,
    /// Slot layout / threshold classifier.
    pub class: NodeClass,
    temporal_base: Option<u32>,
    predict_base: Option<u32>,
    effective_base: Option<u32>,
    configured: bool,
}

/// The arena: one owned word region plus the control-block table.
#[derive(Debug, Default)]
pub struct DuoqArena {
    blocks: Vec<ControlBlock>,
    queues: Vec<Tnt>,
}

impl DuoqArena {
    /// Allocate an arena of `words` queue words.  This is the only
    /// allocation the queue subsystem ever performs; the region starts
    /// zeroed, which reads as "fresh" everywhere below.
    pub fn new(words: usize) -> DuoqArena {
        DuoqArena {
            blocks: Vec::new(),
            queues: vec![0; words],
        }
    }

    /// Number of configured control blocks.
    pub fn node_count(&self) -> usize {
        self.blocks.len()
    }

    /// Borrow a control block.  Panics on an unknown node; callers decode
    /// node ids from the same blob that configured the arena.
    pub fn block(&self, id: u32) -> &ControlBlock {
        &self.blocks[id as usize]
    }

    /// Mutably borrow a control block.
    pub fn block_mut(&mut self, id: u32) -> &mut ControlBlock {
        &mut self.blocks[id as usize]
    }

    /// True once `config` has run for this node.
    pub fn is_configured(&self, id: u32) -> bool {
        self.blocks
            .get(id as usize)
            .map_or(false, |b| b.configured)
    }

    #[inline]
    fn word(&self, widx: u32) -> Tnt {
        self.queues[widx as usize]
    }

    #[inline]
    fn set_word(&mut self, widx: u32, v: Tnt) {
        self.queues[widx as usize] = v;
    }

    /// Assign a queue region to `id`, classify the node, and initialize
    /// slot 0 to the empty sentinel.
    ///
    /// `queue_length` is the physical word request; for probabilistic
    /// layouts the usable slot count is derived from it so that a later
    /// temporal reservation lands on exactly the requested footprint.
    pub fn config(
        &mut self,
        id: u32,
        queue_length: u32,
        raw_class: u32,
    ) -> Result<(), MonitorError> {
        if self.blocks.len() <= id as usize {
            self.blocks
                .resize(id as usize + 1, ControlBlock::default());
        }

        let class = NodeClass::from_raw(raw_class);
        let length = match class {
            NodeClass::ProbTemporal => {
                if queue_length <= TEMPORAL_WORDS {
                    return Err(MonitorError::QueueTooSmall {
                        node: id,
                        what: "probabilistic temporal",
                    });
                }
                (queue_length - TEMPORAL_WORDS) / PROB_WORDS + TEMPORAL_WORDS
            }
            NodeClass::ProbPropositional => queue_length / PROB_WORDS,
            _ => queue_length,
        };
        if length == 0 {
            return Err(MonitorError::QueueTooSmall {
                node: id,
                what: "queue",
            });
        }

        // The first queue counts back from the end of the arena; all
        // subsequent queues count back from their predecessor's base.
        let base = if id == 0 {
            (self.queues.len() as u32).checked_sub(queue_length)
        } else {
            self.blocks[id as usize - 1].queue.checked_sub(queue_length)
        }
        .ok_or(MonitorError::ArenaExhausted {
            node: id,
            needed: queue_length,
        })?;

        self.blocks[id as usize] = ControlBlock {
            queue: base,
            extent: queue_length,
            length,
            class,
            pred_write: TNT_INFINITY,
            configured: true,
            ..ControlBlock::default()
        };
        self.set_word(base, TNT_INFINITY);

        debug!("cfg duoq {}: len = {}", id, length);
        Ok(())
    }

    /// Steal `words` from the tail of `id`'s queue, returning the word
    /// offset of the carved block within the queue region.
    fn reserve(&mut self, id: u32, words: u32, what: &'static str) -> Result<u32, MonitorError> {
        let blk = self
            .blocks
            .get_mut(id as usize)
            .filter(|b| b.configured)
            .ok_or(MonitorError::QueueTooSmall { node: id, what })?;
        if blk.length <= words {
            return Err(MonitorError::QueueTooSmall { node: id, what });
        }
        blk.length -= words;
        blk.reserved += words;
        Ok(blk.extent - blk.reserved)
    }

    /// Reserve a temporal side block (bounds and edge state) on `id`.
    pub fn reserve_temporal(&mut self, id: u32) -> Result<(), MonitorError> {
        let base = self.reserve(id, TEMPORAL_WORDS, "temporal")?;
        self.blocks[id as usize].temporal_base = Some(base);
        debug!(
            "cfg duoq {}: temporal reserved, len = {}",
            id, self.blocks[id as usize].length
        );
        Ok(())
    }

    /// Reserve a predict side block (deadline and mode count) on `id`.
    pub fn reserve_predict(&mut self, id: u32) -> Result<(), MonitorError> {
        let base = self.reserve(id, PREDICT_WORDS, "predict")?;
        self.blocks[id as usize].predict_base = Some(base);
        debug!(
            "cfg duoq {}: predict reserved, len = {}",
            id, self.blocks[id as usize].length
        );
        Ok(())
    }

    /// Read the temporal side block, if one was reserved.
    pub fn temporal(&self, id: u32) -> Option<TemporalBlock> {
        let b = self.blocks.get(id as usize)?;
        let w = b.queue + b.temporal_base?;
        Some(TemporalBlock {
            lower_bound: self.word(w),
            upper_bound: self.word(w + 1),
            edge: self.word(w + 2),
            previous: self.word(w + 3),
        })
    }

    /// Store the temporal side block.  A node without one logs and drops
    /// the write.
    pub fn set_temporal(&mut self, id: u32, t: TemporalBlock) {
        let Some(base) = self.blocks.get(id as usize).and_then(|b| b.temporal_base) else {
            debug!("no temporal block on node {}", id);
            return;
        };
        let w = self.blocks[id as usize].queue + base;
        self.set_word(w, t.lower_bound);
        self.set_word(w + 1, t.upper_bound);
        self.set_word(w + 2, t.edge);
        self.set_word(w + 3, t.previous);
    }

    /// Read the predict side block, if one was reserved.
    pub fn predict(&self, id: u32) -> Option<PredictBlock> {
        let b = self.blocks.get(id as usize)?;
        let w = b.queue + b.predict_base?;
        Some(PredictBlock {
            deadline: self.word(w),
            k_modes: self.word(w + 1),
        })
    }

    /// Store the predict side block.
    pub fn set_predict(&mut self, id: u32, p: PredictBlock) {
        let Some(base) = self.blocks.get(id as usize).and_then(|b| b.predict_base) else {
            debug!("no predict block on node {}", id);
            return;
        };
        let w = self.blocks[id as usize].queue + base;
        self.set_word(w, p.deadline);
        self.set_word(w + 1, p.k_modes);
    }

    /// Write one verdict with compaction.
    ///
    /// Compaction fires when the previous slot carries the same truth
    /// (checked as `prev ^ value <= TNT_TIME`), the queue is not fresh,
    /// and the slot under the cursor is not the empty sentinel; the
    /// previous slot is then overwritten so its timestamp becomes the new
    /// end of the run.  With `predicting` set the predicted cursor is used
    /// instead, compaction is suppressed while it still coincides with the
    /// real cursor, and the advance is clamped so predicted data never
    /// crosses into the half of the queue owned by real data.
    pub fn write(&mut self, id: u32, value: Tnt, predicting: bool) -> Status {
        let Some(b) = self.blocks.get(id as usize).filter(|b| b.configured).copied() else {
            debug!("write to unconfigured queue {}", id);
            return Status::InvalidInst;
        };

        let mut w = if predicting { b.pred_write } else { b.write };
        if w == TNT_INFINITY {
            // Predicted write without a live prediction window.
            debug!("predicted write to queue {} without snapshot", id);
            return Status::InvalidInst;
        }

        let prev = if w == 0 { b.length - 1 } else { w - 1 };
        let prev_val = self.word(b.queue + prev);
        let cur_val = self.word(b.queue + w);
        if (prev_val ^ value) <= TNT_TIME && prev_val != cur_val && cur_val != TNT_INFINITY {
            // Don't compact onto real data from the predicted cursor.
            if b.write != b.pred_write {
                trace!("compacting write on queue {}", id);
                w = prev;
            }
        }

        self.set_word(b.queue + w, value);

        let blk = &mut self.blocks[id as usize];
        if predicting {
            let next = (w + 1) % b.length;
            let fence = (b.write + (b.length - 1) / 2 + 1) % b.length;
            blk.pred_write = if next == fence { b.write } else { next };
        } else {
            blk.write = (w + 1) % b.length;
            // Real data has caught up with the prediction; retire it.
            if blk.write == blk.pred_write {
                blk.pred_write = TNT_INFINITY;
            }
        }
        trace!(
            "queue {} cursors: write={} pred_write={}",
            id,
            self.blocks[id as usize].write,
            self.blocks[id as usize].pred_write
        );
        Status::Ok
    }

    /// Write one `{time, probability}` slot.  No compaction: equality on
    /// real-valued probabilities is meaningless.
    pub fn write_probability(&mut self, id: u32, value: Probability, predicting: bool) -> Status {
        let Some(b) = self.blocks.get(id as usize).filter(|b| b.configured).copied() else {
            debug!("probability write to unconfigured queue {}", id);
            return Status::InvalidInst;
        };

        let w = if predicting { b.pred_write } else { b.write };
        if w == TNT_INFINITY {
            debug!("predicted write to queue {} without snapshot", id);
            return Status::InvalidInst;
        }

        let base = b.queue + w * PROB_WORDS;
        self.set_word(base, value.time);
        self.set_word(base + 1, value.prob.to_bits());

        let blk = &mut self.blocks[id as usize];
        if predicting {
            let next = (w + 1) % b.length;
            let fence = (b.write + (b.length - 1) / 2 + 1) % b.length;
            blk.pred_write = if next == fence { b.write } else { next };
        } else {
            blk.write = (w + 1) % b.length;
            if blk.write == blk.pred_write {
                blk.pred_write = TNT_INFINITY;
            }
        }
        Status::Ok
    }

    fn scan(
        queues: &[Tnt],
        child: &ControlBlock,
        read: &mut u32,
        next_time: Time,
        predicting: bool,
    ) -> Option<Tnt> {
        // A reader outside predictive mode must never consume speculative
        // slots.
        if !predicting && *read == child.pred_write {
            trace!("read cursor fenced at predicted write cursor {}", *read);
            return None;
        }

        let mut write = if predicting { child.pred_write } else { child.write };
        if write == TNT_INFINITY {
            write = child.write;
        }

        if queues[(child.queue + *read) as usize] == TNT_INFINITY {
            trace!("empty queue");
            return None;
        }

        for _ in 0..child.length {
            let slot = queues[(child.queue + *read) as usize];
            if slot & TNT_TIME >= next_time {
                trace!("new data found after scanning, t={}", tnt_time(slot));
                return Some(slot);
            }
            // Slot too old; step forward.
            *read = (*read + 1) % child.length;
            if *read == write {
                break;
            }
        }

        // Hit the write cursor while scanning forwards: take one step back
        // so a compacted write extending the current run stays visible.
        *read = if *read == 0 { child.length - 1 } else { *read - 1 };
        None
    }

    fn scan_probability(
        queues: &[Tnt],
        child: &ControlBlock,
        read: &mut u32,
        next_time: Time,
        predicting: bool,
    ) -> Option<Probability> {
        if !predicting && *read == child.pred_write {
            trace!("read cursor fenced at predicted write cursor {}", *read);
            return None;
        }

        let mut write = if predicting { child.pred_write } else { child.write };
        if write == TNT_INFINITY {
            write = child.write;
        }

        let at = |slot: u32| -> Probability {
            let w = (child.queue + slot * PROB_WORDS) as usize;
            Probability {
                time: queues[w],
                prob: f32::from_bits(queues[w + 1]),
            }
        };

        if at(*read).time == TNT_INFINITY {
            trace!("empty queue");
            return None;
        }

        for _ in 0..child.length {
            let slot = at(*read);
            if slot.time >= next_time {
                trace!("new data found after scanning, t={}", slot.time);
                return Some(slot);
            }
            *read = (*read + 1) % child.length;
            if *read == write {
                break;
            }
        }

        *read = if *read == 0 { child.length - 1 } else { *read - 1 };
        None
    }

    /// Scan `queue_id` for the oldest verdict whose timestamp reaches the
    /// reader's `next_time`, advancing the reader's cursor (`read1` when
    /// `op_num` is 0, else `read2`).  Returns `None` when no such verdict
    /// exists yet; the cursor is then left one slot before the write
    /// cursor so a subsequent compacted write becomes visible.
    pub fn check(
        &mut self,
        queue_id: u32,
        reader_id: u32,
        op_num: usize,
        predicting: bool,
    ) -> Option<Tnt> {
        if queue_id as usize >= self.blocks.len() || reader_id as usize >= self.blocks.len() {
            debug!("check on unknown queue {} (reader {})", queue_id, reader_id);
            return None;
        }
        let next_time = self.blocks[reader_id as usize].next_time;
        let child = self.blocks[queue_id as usize];
        let mut read = if op_num == 0 {
            self.blocks[reader_id as usize].read1
        } else {
            self.blocks[reader_id as usize].read2
        };

        let found = Self::scan(&self.queues, &child, &mut read, next_time, predicting);

        let rb = &mut self.blocks[reader_id as usize];
        if op_num == 0 {
            rb.read1 = read;
        } else {
            rb.read2 = read;
        }
        found
    }

    /// Probability-slot variant of [`DuoqArena::check`].
    pub fn check_probability(
        &mut self,
        queue_id: u32,
        reader_id: u32,
        op_num: usize,
        predicting: bool,
    ) -> Option<Probability> {
        if queue_id as usize >= self.blocks.len() || reader_id as usize >= self.blocks.len() {
            debug!("check on unknown queue {} (reader {})", queue_id, reader_id);
            return None;
        }
        let next_time = self.blocks[reader_id as usize].next_time;
        let child = self.blocks[queue_id as usize];
        let mut read = if op_num == 0 {
            self.blocks[reader_id as usize].read1
        } else {
            self.blocks[reader_id as usize].read2
        };

        let found =
            Self::scan_probability(&self.queues, &child, &mut read, next_time, predicting);

        let rb = &mut self.blocks[reader_id as usize];
        if op_num == 0 {
            rb.read1 = read;
        } else {
            rb.read2 = read;
        }
        found
    }

    /// Raw probability slot access, used by the probabilistic temporal
    /// operators to walk their window backward from a read cursor.
    pub fn probability_at(&self, id: u32, slot: u32) -> Probability {
        let b = &self.blocks[id as usize];
        let w = b.queue + (slot % b.length) * PROB_WORDS;
        Probability {
            time: self.word(w),
            prob: f32::from_bits(self.word(w + 1)),
        }
    }

    /// Raw verdict slot access, test and diagnostic use.
    pub fn slot(&self, id: u32, slot: u32) -> Tnt {
        let b = &self.blocks[id as usize];
        self.word(b.queue + (slot % b.length))
    }

    // --- Past-time interval FIFO -------------------------------------
    //
    // The past-time engine stores `(start, end)` pairs in the same arena,
    // two words per element, stepping cursors by two with a wrap at
    // `length - 2`.  `read1` is the tail, `write` the head; the head
    // always points at invalid data.

    /// Reserve one word on `id` and record the engine-visible effective id.
    pub fn pt_effective_id_set(&mut self, id: u32, effective_id: u32) -> Result<(), MonitorError> {
        let base = self.reserve(id, 1, "effective id")?;
        self.blocks[id as usize].effective_base = Some(base);
        let w = self.blocks[id as usize].queue + base;
        self.set_word(w, effective_id);
        debug!(
            "cfg duoq {}: effective id {} set, len = {}",
            id, effective_id, self.blocks[id as usize].length
        );
        Ok(())
    }

    /// Read back the recorded effective id.
    pub fn pt_effective_id(&self, id: u32) -> Option<u32> {
        let b = self.blocks.get(id as usize)?;
        Some(self.word(b.queue + b.effective_base?))
    }

    /// True when the interval FIFO holds no elements.
    pub fn pt_is_empty(&self, id: u32) -> bool {
        let b = &self.blocks[id as usize];
        b.read1 == b.write
    }

    /// True when one more push would collide with the tail.
    pub fn pt_is_full(&self, id: u32) -> bool {
        let b = &self.blocks[id as usize];
        let next = if b.write == b.length - 2 { 0 } else { b.write + 2 };
        next == b.read1
    }

    /// Push an interval at the head.
    pub fn pt_push(&mut self, id: u32, value: PtInterval) -> Status {
        if self.pt_is_full(id) {
            debug!("pt queue {} overflow", id);
        }
        let b = self.blocks[id as usize];
        self.set_word(b.queue + b.write, value.start);
        self.set_word(b.queue + b.write + 1, value.end);
        let blk = &mut self.blocks[id as usize];
        blk.write = if b.write == b.length - 2 { 0 } else { b.write + 2 };
        Status::Ok
    }

    /// Read the tail element without removing it.
    pub fn pt_peek(&self, id: u32) -> PtInterval {
        if self.pt_is_empty(id) {
            return PtInterval::empty();
        }
        let b = &self.blocks[id as usize];
        PtInterval {
            start: self.word(b.queue + b.read1),
            end: self.word(b.queue + b.read1 + 1),
        }
    }

    /// Remove and return the newest element.
    pub fn pt_head_pop(&mut self, id: u32) -> PtInterval {
        if self.pt_is_empty(id) {
            debug!("pt queue {} head underflow", id);
            return PtInterval::empty();
        }
        let b = self.blocks[id as usize];
        // The head points at invalid data, so step back before reading.
        let w = if b.write == 0 { b.length - 2 } else { b.write - 2 };
        self.blocks[id as usize].write = w;
        PtInterval {
            start: self.word(b.queue + w),
            end: self.word(b.queue + w + 1),
        }
    }

    /// Remove and return the oldest element.
    pub fn pt_tail_pop(&mut self, id: u32) -> PtInterval {
        if self.pt_is_empty(id) {
            debug!("pt queue {} tail underflow", id);
            return PtInterval::empty();
        }
        let b = self.blocks[id as usize];
        let r = b.read1;
        self.blocks[id as usize].read1 = if r == b.length - 2 { 0 } else { r + 2 };
        PtInterval {
            start: self.word(b.queue + r),
            end: self.word(b.queue + r + 1),
        }
    }
}
