//! Temporal-logic instruction model and its 16-byte wire encoding.
//!
//! A compiled specification carries one record per formula node.  Operand
//! values are overloaded by the operand type: an immediate for `Direct`,
//! an atomic index for `Atomic`, and a node id (equivalently, the node's
//! position within the temporal-logic section of the instruction table)
//! for `Subformula`.

use crate::MonitorError;

/// Encoded instruction size on the wire.
pub const MLTL_INSTRUCTION_LEN: usize = 16;

/// Future-time MLTL opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    Configure = 1,
    Load = 2,
    Return = 3,
    Prob = 4,
    Not = 5,
    And = 6,
    Or = 7,
    Implies = 8,
    Nor = 9,
    Xor = 10,
    Equivalent = 11,
    Globally = 12,
    Eventually = 13,
    Until = 14,
    Release = 15,
}

impl Opcode {
    pub fn from_u8(v: u8) -> Option<Opcode> {
        Some(match v {
            0 => Opcode::Nop,
            1 => Opcode::Configure,
            2 => Opcode::Load,
            3 => Opcode::Return,
            4 => Opcode::Prob,
            5 => Opcode::Not,
            6 => Opcode::And,
            7 => Opcode::Or,
            8 => Opcode::Implies,
            9 => Opcode::Nor,
            10 => Opcode::Xor,
            11 => Opcode::Equivalent,
            12 => Opcode::Globally,
            13 => Opcode::Eventually,
            14 => Opcode::Until,
            15 => Opcode::Release,
            _ => return None,
        })
    }
}

/// What an operand value refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperandKind {
    /// Immediate truth value, materialized at the current time stamp.
    Direct = 0,
    /// Index into the atomic vector.
    Atomic = 1,
    /// Node id of another instruction's result queue.
    Subformula = 2,
    /// The slot is unused (unary operators).
    NotSet = 3,
}

impl OperandKind {
    pub fn from_u8(v: u8) -> Option<OperandKind> {
        Some(match v {
            0 => OperandKind::Direct,
            1 => OperandKind::Atomic,
            2 => OperandKind::Subformula,
            3 => OperandKind::NotSet,
            _ => return None,
        })
    }
}

/// One operand slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub kind: OperandKind,
    pub value: u32,
}

impl Operand {
    pub fn direct(value: u32) -> Operand {
        Operand {
            kind: OperandKind::Direct,
            value,
        }
    }

    pub fn atomic(index: u32) -> Operand {
        Operand {
            kind: OperandKind::Atomic,
            value: index,
        }
    }

    pub fn subformula(node: u32) -> Operand {
        Operand {
            kind: OperandKind::Subformula,
            value: node,
        }
    }

    pub fn not_set() -> Operand {
        Operand {
            kind: OperandKind::NotSet,
            value: 0,
        }
    }
}

/// A decoded temporal-logic instruction.
///
/// `memory_reference` names the node's result queue; for `Configure` it
/// names the queue being configured instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MltlInstruction {
    pub opcode: Opcode,
    pub op1: Operand,
    pub op2: Operand,
    pub memory_reference: u32,
}

impl MltlInstruction {
    /// Decode from the wire layout: `u8 opcode, u8 op1_type, u8 op2_type,
    /// u8 pad, u32le op1_value, u32le op2_value, u32le memory_reference`.
    pub fn decode(bytes: &[u8]) -> Result<MltlInstruction, MonitorError> {
        if bytes.len() < MLTL_INSTRUCTION_LEN {
            return Err(MonitorError::MalformedSpec(format!(
                "temporal-logic payload truncated at {} bytes",
                bytes.len()
            )));
        }
        let opcode = Opcode::from_u8(bytes[0]).ok_or_else(|| {
            MonitorError::MalformedSpec(format!("unknown temporal-logic opcode {}", bytes[0]))
        })?;
        let op1_kind = OperandKind::from_u8(bytes[1]).ok_or_else(|| {
            MonitorError::MalformedSpec(format!("unknown operand type {}", bytes[1]))
        })?;
        let op2_kind = OperandKind::from_u8(bytes[2]).ok_or_else(|| {
            MonitorError::MalformedSpec(format!("unknown operand type {}", bytes[2]))
        })?;
        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        Ok(MltlInstruction {
            opcode,
            op1: Operand {
                kind: op1_kind,
                value: word(4),
            },
            op2: Operand {
                kind: op2_kind,
                value: word(8),
            },
            memory_reference: word(12),
        })
    }

    /// Encode into the wire layout.
    pub fn encode(&self) -> [u8; MLTL_INSTRUCTION_LEN] {
        let mut out = [0u8; MLTL_INSTRUCTION_LEN];
        out[0] = self.opcode as u8;
        out[1] = self.op1.kind as u8;
        out[2] = self.op2.kind as u8;
        out[4..8].copy_from_slice(&self.op1.value.to_le_bytes());
        out[8..12].copy_from_slice(&self.op2.value.to_le_bytes());
        out[12..16].copy_from_slice(&self.memory_reference.to_le_bytes());
        out
    }

    /// Fetch the operand for slot 0 or 1.
    pub fn operand(&self, op_num: usize) -> Operand {
        if op_num == 0 {
            self.op1
        } else {
            self.op2
        }
    }

    // Assembler conveniences, used by tests and embedders building blobs
    // without the external compiler.

    pub fn load(atomic: u32, node: u32) -> MltlInstruction {
        MltlInstruction {
            opcode: Opcode::Load,
            op1: Operand::atomic(atomic),
            op2: Operand::not_set(),
            memory_reference: node,
        }
    }

    pub fn unary(opcode: Opcode, child: u32, node: u32) -> MltlInstruction {
        MltlInstruction {
            opcode,
            op1: Operand::subformula(child),
            op2: Operand::not_set(),
            memory_reference: node,
        }
    }

    pub fn binary(opcode: Opcode, left: u32, right: u32, node: u32) -> MltlInstruction {
        MltlInstruction {
            opcode,
            op1: Operand::subformula(left),
            op2: Operand::subformula(right),
            memory_reference: node,
        }
    }

    /// Formula end: copy `child`'s verdicts to the sinks under `formula_id`.
    pub fn ret(child: u32, formula_id: u32, node: u32) -> MltlInstruction {
        MltlInstruction {
            opcode: Opcode::Return,
            op1: Operand::subformula(child),
            op2: Operand::direct(formula_id),
            memory_reference: node,
        }
    }

    /// Queue configuration: assign `length` arena words to `node` with the
    /// raw fixed-point class/threshold field.
    pub fn configure_queue(node: u32, length: u32, raw_class: u32) -> MltlInstruction {
        MltlInstruction {
            opcode: Opcode::Configure,
            op1: Operand::atomic(length),
            op2: Operand {
                kind: OperandKind::NotSet,
                value: raw_class,
            },
            memory_reference: node,
        }
    }

    /// Temporal bounds configuration for `node`.
    pub fn configure_temporal(node: u32, lower: u32, upper: u32) -> MltlInstruction {
        MltlInstruction {
            opcode: Opcode::Configure,
            op1: Operand::subformula(lower),
            op2: Operand {
                kind: OperandKind::NotSet,
                value: upper,
            },
            memory_reference: node,
        }
    }

    /// Prediction configuration for `node`: verdict `deadline` and the
    /// forecast branch count.
    pub fn configure_predict(node: u32, deadline: u32, k_modes: u32) -> MltlInstruction {
        MltlInstruction {
            opcode: Opcode::Configure,
            op1: Operand::direct(deadline),
            op2: Operand {
                kind: OperandKind::NotSet,
                value: k_modes,
            },
            memory_reference: node,
        }
    }
}
