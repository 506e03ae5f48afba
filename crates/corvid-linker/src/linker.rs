//! The two-pass linker (§4.H "Linker — the hard core").

use corvid_bytecode::{Instruction, RelocationKind, Segment};

use crate::error::LinkerError;
use crate::label::LabelManager;
use crate::patch;
use crate::runtime_symbols::RuntimeSymbolTable;
use crate::veneer::VeneerBuilder;

/// Fixed reserve between the end of the code segment and the start of
/// `.rodata`, so a short relative jump never straddles the two.
const RODATA_GAP_BYTES: u64 = 16 * 1024;
const PAGE_SIZE: u64 = 4 * 1024;

/// Segment base addresses the driver configures before linking. `rodata`
/// is recomputed from `code` and the linked code size, so only `code` and
/// `data` are taken as input.
#[derive(Debug, Clone, Copy)]
pub struct LinkConfig {
    /// Base address of the CODE segment.
    pub code_base_address: u64,
    /// Base address of the DATA segment (the runtime symbol table lives at
    /// `data_base_address + RUNTIME_SYMBOL_TABLE_BASE_OFFSET`).
    pub data_base_address: u64,
}

/// Everything the driver needs after a successful link: the finalized
/// instruction stream (original instructions plus any synthesized
/// veneers), in address order within each segment, and the label/runtime
/// tables as they stood at the end of linking.
#[derive(Debug)]
pub struct LinkedModule {
    /// Every instruction, original and veneer, each carrying its final
    /// assigned address and (if relocated) patched encoding.
    pub instructions: Vec<Instruction>,
    /// The base address `.rodata` was assigned, computed from the code
    /// segment's size.
    pub rodata_base_address: u64,
}

/// Drives the two linker passes over an instruction stream.
pub struct Linker<'a> {
    config: LinkConfig,
    labels: &'a mut LabelManager,
    runtime_symbols: &'a RuntimeSymbolTable,
}

impl<'a> Linker<'a> {
    /// Build a linker that will resolve local labels through `labels` and
    /// runtime call targets through `runtime_symbols`.
    pub fn new(
        config: LinkConfig,
        labels: &'a mut LabelManager,
        runtime_symbols: &'a RuntimeSymbolTable,
    ) -> Linker<'a> {
        Linker {
            config,
            labels,
            runtime_symbols,
        }
    }

    /// Run both passes over `instructions`, consuming the input stream and
    /// returning the finalized, relocated module.
    pub fn link(&mut self, instructions: Vec<Instruction>) -> Result<LinkedModule, LinkerError> {
        let mut instructions = instructions;
        let rodata_base_address = self.assign_addresses(&mut instructions)?;
        let veneers = self.apply_relocations(&mut instructions)?;
        instructions.extend(veneers);
        Ok(LinkedModule {
            instructions,
            rodata_base_address,
        })
    }

    /// Pass 1: compute code-segment size, derive the rodata base, then walk
    /// the stream again assigning an address to every label and
    /// byte-emitting entry.
    fn assign_addresses(&mut self, instructions: &mut [Instruction]) -> Result<u64, LinkerError> {
        let code_segment_size: u64 = instructions
            .iter()
            .filter(|instr| instr.segment == Segment::Code && instr.emits_data_or_code())
            .map(|_| 4u64)
            .sum();

        let rodata_base_address = page_align(
            self.config.code_base_address + code_segment_size + RODATA_GAP_BYTES,
        );

        let mut code_cursor = self.config.code_base_address;
        let mut rodata_cursor = rodata_base_address;
        let mut data_cursor = self.config.data_base_address;

        for instr in instructions.iter_mut() {
            let cursor = match instr.segment {
                Segment::Code => &mut code_cursor,
                Segment::Rodata => &mut rodata_cursor,
                Segment::Data => &mut data_cursor,
            };

            if instr.is_label_definition {
                if let Some(name) = &instr.target_label {
                    self.labels.define(name, *cursor)?;
                }
            }

            if instr.emits_data_or_code() {
                instr.address = Some(*cursor);
                *cursor += 4;
            }
        }

        Ok(rodata_base_address)
    }

    /// Pass 2: resolve and patch every relocated instruction, synthesizing
    /// veneers for out-of-range branches as needed. Returns the veneer
    /// instructions to append to the stream.
    fn apply_relocations(
        &mut self,
        instructions: &mut [Instruction],
    ) -> Result<Vec<Instruction>, LinkerError> {
        let max_code_address = instructions
            .iter()
            .filter(|instr| instr.segment == Segment::Code)
            .filter_map(|instr| instr.address)
            .max()
            .unwrap_or(self.config.code_base_address);

        let mut veneer_builder = VeneerBuilder::new();

        for instr in instructions.iter_mut() {
            if instr.relocation == RelocationKind::None {
                continue;
            }

            let Some(instruction_address) = instr.address else {
                continue;
            };

            let Some(target_name) = instr.target_label.clone() else {
                return Err(LinkerError::UnsupportedRelocation(String::new()));
            };

            let mut resolved_address = self.resolve_target(&target_name)?;
            let mut resolved_name = target_name.clone();

            if instr.relocation.is_range_checked_branch()
                && !patch::is_branch_in_range(instruction_address, resolved_address, instr.relocation)
            {
                resolved_address = veneer_builder.get_or_create(
                    &target_name,
                    resolved_address,
                    max_code_address,
                    self.labels,
                );
                resolved_name = format!("__veneer_{target_name}");
            }

            instr.encoding = patch_encoding(instr, instruction_address, resolved_address)?;
            instr.resolved_target_address = Some(resolved_address);
            instr.resolved_symbol_name = Some(resolved_name);
        }

        Ok(veneer_builder.into_instructions())
    }

    fn resolve_target(&self, name: &str) -> Result<u64, LinkerError> {
        if self.runtime_symbols.is_registered(name) {
            return self.runtime_symbols.get_address(name);
        }
        self.labels.lookup(name)
    }
}

fn patch_encoding(
    instr: &Instruction,
    instruction_address: u64,
    target_address: u64,
) -> Result<u32, LinkerError> {
    match instr.relocation {
        RelocationKind::None => Ok(instr.encoding),
        RelocationKind::PcRelative26BitOffset
        | RelocationKind::PcRelative19BitOffset
        | RelocationKind::Page21BitPcRelative
        | RelocationKind::Add12BitUnsignedOffset => Ok(patch::apply_pc_relative(
            instr.encoding,
            instruction_address,
            target_address,
            instr.relocation,
        )),
        RelocationKind::MovzMovkImm0
        | RelocationKind::MovzMovkImm16
        | RelocationKind::MovzMovkImm32
        | RelocationKind::MovzMovkImm48 => Ok(patch::apply_movz_movk(
            instr.encoding,
            target_address,
            instr.relocation,
        )),
        RelocationKind::AbsoluteAddressLo32 | RelocationKind::AbsoluteAddressHi32 => {
            Ok(patch::apply_absolute(target_address, instr.relocation))
        }
    }
}

fn page_align(address: u64) -> u64 {
    (address + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}
