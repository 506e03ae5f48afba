//! The `Instruction` record (§3) and the stream that carries it.

use crate::relocation::{JitAttribute, RelocationKind};
use crate::segment::Segment;

/// One entry in the instruction stream: either a 4-byte code/data word or a
/// zero-byte label definition.
///
/// Invariant: a pure label definition (`is_label_definition` true,
/// `assembly_text` empty, `is_data_value` false) carries no encoding and
/// consumes no bytes; every other record occupies exactly 4 bytes.
#[derive(Debug, Clone)]
pub struct Instruction {
    /// Which output segment this instruction belongs to.
    pub segment: Segment,
    /// The 32-bit instruction or data word. Meaningless (left at `0`) until
    /// relocations are applied for entries that carry one.
    pub encoding: u32,
    /// Disassembly text for listings and debugging; empty for data words
    /// that carry no mnemonic and for pure label definitions.
    pub assembly_text: String,
    /// True if this entry defines a label at its address rather than (or
    /// in addition to) emitting a code/data word.
    pub is_label_definition: bool,
    /// True if this entry is a data word (as opposed to an instruction).
    pub is_data_value: bool,
    /// The label this instruction's relocation resolves against, if any.
    pub target_label: Option<String>,
    /// How (if at all) the linker should patch `encoding` once the target
    /// label's address is known.
    pub relocation: RelocationKind,
    /// The address assigned to this entry by linker pass 1. `None` before
    /// linking.
    pub address: Option<u64>,
    /// The address the relocation was ultimately resolved against —
    /// distinct from a runtime symbol or label's own address when a veneer
    /// was interposed.
    pub resolved_target_address: Option<u64>,
    /// The symbol name the relocation was resolved against (for listings).
    pub resolved_symbol_name: Option<String>,
    /// Inspection tag for post-link tooling.
    pub jit_attribute: JitAttribute,
}

impl Instruction {
    /// A plain 4-byte code instruction with no relocation.
    pub fn code(encoding: u32, assembly_text: impl Into<String>) -> Instruction {
        Instruction {
            segment: Segment::Code,
            encoding,
            assembly_text: assembly_text.into(),
            is_label_definition: false,
            is_data_value: false,
            target_label: None,
            relocation: RelocationKind::None,
            address: None,
            resolved_target_address: None,
            resolved_symbol_name: None,
            jit_attribute: JitAttribute::None,
        }
    }

    /// A 4-byte code instruction whose encoding the linker must patch once
    /// `target_label`'s address is known.
    pub fn code_with_relocation(
        encoding: u32,
        assembly_text: impl Into<String>,
        target_label: impl Into<String>,
        relocation: RelocationKind,
    ) -> Instruction {
        Instruction {
            target_label: Some(target_label.into()),
            relocation,
            ..Instruction::code(encoding, assembly_text)
        }
    }

    /// A pure label definition: zero bytes, no encoding. Used to mark a
    /// jump target or the start of a function/data item without emitting
    /// anything itself.
    pub fn as_label(target_label: impl Into<String>) -> Instruction {
        Instruction {
            segment: Segment::Code,
            encoding: 0,
            assembly_text: String::new(),
            is_label_definition: true,
            is_data_value: false,
            target_label: Some(target_label.into()),
            relocation: RelocationKind::None,
            address: None,
            resolved_target_address: None,
            resolved_symbol_name: None,
            jit_attribute: JitAttribute::None,
        }
    }

    /// A 4-byte data word in `segment` (normally [`Segment::Rodata`] or
    /// [`Segment::Data`]), optionally also defining `label` at its address.
    pub fn data_word(segment: Segment, encoding: u32, label: Option<String>) -> Instruction {
        Instruction {
            segment,
            encoding,
            assembly_text: String::new(),
            is_label_definition: label.is_some(),
            is_data_value: true,
            target_label: label,
            relocation: RelocationKind::None,
            address: None,
            resolved_target_address: None,
            resolved_symbol_name: None,
            jit_attribute: JitAttribute::None,
        }
    }

    /// Whether this entry advances a segment cursor (every entry except a
    /// pure label definition).
    pub fn emits_data_or_code(&self) -> bool {
        !self.assembly_text.is_empty() || self.is_data_value
    }
}

/// An ordered sequence of [`Instruction`]s produced by the code generator,
/// not yet assigned addresses.
#[derive(Debug, Clone, Default)]
pub struct InstructionStream {
    instructions: Vec<Instruction>,
}

impl InstructionStream {
    /// An empty stream.
    pub fn new() -> InstructionStream {
        InstructionStream::default()
    }

    /// Append one instruction.
    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Append every instruction from `other`, consuming it.
    pub fn extend(&mut self, other: InstructionStream) {
        self.instructions.extend(other.instructions);
    }

    /// The instructions in emission order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Consume the stream, yielding its instructions in emission order.
    pub fn into_instructions(self) -> Vec<Instruction> {
        self.instructions
    }

    /// Number of instructions (including pure label definitions).
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// True if the stream carries no instructions.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}
