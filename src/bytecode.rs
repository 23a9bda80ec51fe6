//! Compiled-specification blob loading.
//!
//! Blob layout: byte 0 holds the offset of the first record; bytes 1..offset
//! carry a NUL-terminated human-readable note about the specification; then
//! a sequence of length-prefixed records terminated by a zero length byte.
//! A record is `u8 length, u8 engine_tag, payload[length-2]`.
//!
//! Temporal-logic configuration commands (a CONFIG record wrapping a
//! TEMPORAL_LOGIC payload) run immediately at load time and carve the queue
//! arena; every other record lands in the instruction table in blob order,
//! which is reverse dependency order (leaves first).  While scanning, the
//! loader tallies how many signal and atomic columns the trace reader must
//! parse.

use log::debug;

use crate::future_time;
use crate::instruction::{MltlInstruction, Opcode, OperandKind};
use crate::monitor::Monitor;
use crate::MonitorError;

/// Engine tag of configuration records.
pub const ENG_CONFIG: u8 = 2;
/// Engine tag of the (external) atomic-checker engine.
pub const ENG_ATOMIC_CHECKER: u8 = 3;
/// Engine tag of the temporal-logic engine.
pub const ENG_TEMPORAL_LOGIC: u8 = 4;
/// Engine tag of the (external) booleanizer arithmetic engine.
pub const ENG_BOOLEANIZER: u8 = 5;

/// Booleanizer integer signal load.
pub const BZ_OP_ILOAD: u8 = 1;
/// Booleanizer float signal load.
pub const BZ_OP_FLOAD: u8 = 2;

/// One instruction-table entry.
///
/// Temporal-logic payloads are decoded once at load; payloads for engines
/// this build does not carry stay as byte ranges into the retained program.
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Mltl(MltlInstruction),
    Foreign { tag: u8, offset: u32, len: u8 },
}

/// Walk a blob, dispatch its configuration commands, and fill the
/// instruction table.  Errors here are fatal for the blob.
pub fn process_binary(monitor: &mut Monitor, blob: &[u8]) -> Result<(), MonitorError> {
    if blob.len() < 2 {
        return Err(MonitorError::MalformedSpec(
            "blob shorter than its header".into(),
        ));
    }
    let first = blob[0] as usize;
    if first == 0 || first > blob.len() {
        return Err(MonitorError::MalformedSpec(format!(
            "first-record offset {} outside blob of {} bytes",
            first,
            blob.len()
        )));
    }

    let note_bytes = &blob[1..first];
    let note_end = note_bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(note_bytes.len());
    monitor.spec_note = String::from_utf8_lossy(&note_bytes[..note_end]).into_owned();
    debug!("spec info: {}", monitor.spec_note);

    monitor.program = blob.to_vec();

    let mut tl_seen = false;
    let mut offset = first;
    loop {
        if offset >= blob.len() {
            return Err(MonitorError::MalformedSpec(
                "record stream missing its terminator".into(),
            ));
        }
        let length = blob[offset] as usize;
        if length == 0 {
            break;
        }
        if length < 2 || offset + length > blob.len() {
            return Err(MonitorError::MalformedSpec(format!(
                "record at byte {} overruns the blob",
                offset
            )));
        }
        let tag = blob[offset + 1];
        let payload = &blob[offset + 2..offset + length];

        if tag == ENG_CONFIG && payload.first() == Some(&ENG_TEMPORAL_LOGIC) {
            let instr = MltlInstruction::decode(&payload[1..])?;
            if instr.opcode != Opcode::Configure {
                return Err(MonitorError::MalformedSpec(format!(
                    "configuration record at byte {} carries opcode {:?}",
                    offset, instr.opcode
                )));
            }
            future_time::configure(monitor, &instr)?;
        } else {
            match tag {
                ENG_TEMPORAL_LOGIC => {
                    let instr = MltlInstruction::decode(payload)?;
                    if !tl_seen {
                        tl_seen = true;
                        monitor.tl_base = monitor.instructions.len();
                    }
                    let node = (monitor.instructions.len() - monitor.tl_base) as u32;
                    if instr.memory_reference != node {
                        debug!(
                            "node {} encoded out of order (table slot {})",
                            instr.memory_reference, node
                        );
                    }
                    if instr.opcode == Opcode::Load && instr.op1.kind == OperandKind::Atomic {
                        monitor.num_atomics = monitor.num_atomics.max(instr.op1.value + 1);
                    }
                    monitor.instructions.push(Instruction::Mltl(instr));
                }
                ENG_BOOLEANIZER => {
                    tally_booleanizer_load(monitor, payload, offset)?;
                    monitor.instructions.push(Instruction::Foreign {
                        tag,
                        offset: (offset + 2) as u32,
                        len: (length - 2) as u8,
                    });
                }
                _ => {
                    monitor.instructions.push(Instruction::Foreign {
                        tag,
                        offset: (offset + 2) as u32,
                        len: (length - 2) as u8,
                    });
                }
            }
        }
        offset += length;
    }

    debug!(
        "loaded {} instructions ({} signals, {} atomics)",
        monitor.instructions.len(),
        monitor.num_signals,
        monitor.num_atomics
    );
    Ok(())
}

/// Booleanizer payloads are opaque here except for the column tallies:
/// `u8 opcode, u8 store, u8 at_addr, u8 pad, u32le param1, u32le param2`.
fn tally_booleanizer_load(
    monitor: &mut Monitor,
    payload: &[u8],
    offset: usize,
) -> Result<(), MonitorError> {
    if payload.len() < 8 {
        return Err(MonitorError::MalformedSpec(format!(
            "booleanizer record at byte {} too short",
            offset
        )));
    }
    let opcode = payload[0];
    let store = payload[1];
    let at_addr = payload[2] as u32;
    let param1 = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
    if opcode == BZ_OP_ILOAD || opcode == BZ_OP_FLOAD {
        monitor.num_signals = monitor.num_signals.max(param1 + 1);
    }
    if store != 0 {
        monitor.num_atomics = monitor.num_atomics.max(at_addr + 1);
    }
    Ok(())
}

/// Assembles conforming blobs; stands in for the external specification
/// compiler in tests and embedding scenarios.
#[derive(Debug, Default)]
pub struct SpecBuilder {
    note: String,
    records: Vec<Vec<u8>>,
}

impl SpecBuilder {
    pub fn new(note: &str) -> SpecBuilder {
        SpecBuilder {
            note: note.into(),
            records: Vec::new(),
        }
    }

    /// Append a temporal-logic configuration command.
    pub fn config(&mut self, instr: MltlInstruction) -> &mut Self {
        let mut record = vec![0u8, ENG_CONFIG, ENG_TEMPORAL_LOGIC];
        record.extend_from_slice(&instr.encode());
        record[0] = record.len() as u8;
        self.records.push(record);
        self
    }

    /// Append a temporal-logic instruction.
    pub fn instruction(&mut self, instr: MltlInstruction) -> &mut Self {
        let mut record = vec![0u8, ENG_TEMPORAL_LOGIC];
        record.extend_from_slice(&instr.encode());
        record[0] = record.len() as u8;
        self.records.push(record);
        self
    }

    /// Append a record for another engine verbatim.
    pub fn foreign(&mut self, tag: u8, payload: &[u8]) -> &mut Self {
        let mut record = vec![0u8, tag];
        record.extend_from_slice(payload);
        record[0] = record.len() as u8;
        self.records.push(record);
        self
    }

    /// Serialize the blob: header, note, records, terminator.
    pub fn finish(&self) -> Vec<u8> {
        let mut note = self.note.as_bytes().to_vec();
        note.truncate(200);
        let offset = 1 + note.len() + 1;
        let mut blob = Vec::with_capacity(offset + 1);
        blob.push(offset as u8);
        blob.extend_from_slice(&note);
        blob.push(0);
        for record in &self.records {
            blob.extend_from_slice(record);
        }
        blob.push(0);
        blob
    }
}
