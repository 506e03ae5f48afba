//! Veneer synthesis (§4.H "Veneer synthesis").
//!
//! A veneer is a five-instruction trampoline: `MOVZ`+`MOVK`×3 load the
//! absolute target address into `x16`, then `BR x16` transfers control.
//! Per Design Note (i), the tail uses `BR` rather than `BLR` — the
//! original `BL` at the call site already set `LR`, so a `BLR` here would
//! clobber it.

use corvid_bytecode::{Instruction, JitAttribute, Segment};
use rustc_hash::FxHashMap;

use crate::label::LabelManager;

const MOVZ_X16: u32 = 0xD280_0010;
const MOVK_X16_LSL16: u32 = 0xF2A0_0010;
const MOVK_X16_LSL32: u32 = 0xF2C0_0010;
const MOVK_X16_LSL48: u32 = 0xF2E0_0010;
const BR_X16: u32 = 0xD61F_0200;

/// Bytes occupied by one veneer (five 4-byte instructions).
pub const VENEER_SIZE_BYTES: u64 = 20;

/// Builds veneers lazily, deduplicating by target name, and remembers
/// their addresses so repeat out-of-range callers reuse the same veneer
/// (P6).
#[derive(Debug, Default)]
pub struct VeneerBuilder {
    veneer_map: FxHashMap<String, u64>,
    veneers: Vec<Instruction>,
    next_veneer_address: Option<u64>,
}

impl VeneerBuilder {
    /// A builder with no veneers yet.
    pub fn new() -> VeneerBuilder {
        VeneerBuilder::default()
    }

    /// Return the address of the veneer for `target_name`, creating it (and
    /// defining its `__veneer_<name>` label) if this is the first request.
    /// `max_code_address` is the highest address any CODE-segment
    /// instruction was assigned in pass 1; the first veneer is placed just
    /// past it, 16-byte aligned.
    pub fn get_or_create(
        &mut self,
        target_name: &str,
        target_address: u64,
        max_code_address: u64,
        labels: &mut LabelManager,
    ) -> u64 {
        if let Some(&existing) = self.veneer_map.get(target_name) {
            return existing;
        }

        let veneer_address = match self.next_veneer_address {
            Some(addr) => addr,
            None => {
                let start = max_code_address + 4;
                (start + 15) & !15
            }
        };

        for instr in build_veneer_instructions(veneer_address, target_address) {
            self.veneers.push(instr);
        }

        self.next_veneer_address = Some(veneer_address + VENEER_SIZE_BYTES);
        self.veneer_map.insert(target_name.to_string(), veneer_address);

        let veneer_label = format!("__veneer_{target_name}");
        // A veneer is created at most once per target name, so this can
        // only collide if `target_name` itself collided with a prior
        // ordinary label — a link-time bug the caller surfaces separately.
        let _ = labels.define(&veneer_label, veneer_address);

        veneer_address
    }

    /// Consume the builder, returning every veneer instruction synthesized
    /// during this link, in emission order.
    pub fn into_instructions(self) -> Vec<Instruction> {
        self.veneers
    }

    /// Number of distinct veneers created so far.
    pub fn count(&self) -> usize {
        self.veneer_map.len()
    }
}

fn build_veneer_instructions(address: u64, target_address: u64) -> [Instruction; 5] {
    let imm0 = (target_address & 0xFFFF) as u32;
    let imm16 = ((target_address >> 16) & 0xFFFF) as u32;
    let imm32 = ((target_address >> 32) & 0xFFFF) as u32;
    let imm48 = ((target_address >> 48) & 0xFFFF) as u32;

    let mut movz = Instruction::code(MOVZ_X16 | (imm0 << 5), format!("movz x16, #{imm0}"));
    movz.segment = Segment::Code;
    movz.address = Some(address);

    let mut movk1 = Instruction::code(
        MOVK_X16_LSL16 | (imm16 << 5),
        format!("movk x16, #{imm16}, lsl #16"),
    );
    movk1.segment = Segment::Code;
    movk1.address = Some(address + 4);

    let mut movk2 = Instruction::code(
        MOVK_X16_LSL32 | (imm32 << 5),
        format!("movk x16, #{imm32}, lsl #32"),
    );
    movk2.segment = Segment::Code;
    movk2.address = Some(address + 8);

    let mut movk3 = Instruction::code(
        MOVK_X16_LSL48 | (imm48 << 5),
        format!("movk x16, #{imm48}, lsl #48"),
    );
    movk3.segment = Segment::Code;
    movk3.address = Some(address + 12);

    let mut br = Instruction::code(BR_X16, "br x16");
    br.segment = Segment::Code;
    br.address = Some(address + 16);
    br.jit_attribute = JitAttribute::IndirectCallSite;

    [movz, movk1, movk2, movk3, br]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_places_veneer_past_max_code_address_aligned() {
        let mut builder = VeneerBuilder::new();
        let mut labels = LabelManager::new();
        let addr = builder.get_or_create("target", 0xdead_beef, 0x1000, &mut labels);
        assert_eq!(addr % 16, 0);
        assert!(addr > 0x1000);
        assert!(labels.is_defined("__veneer_target"));
    }

    #[test]
    fn repeat_request_for_same_target_reuses_veneer() {
        let mut builder = VeneerBuilder::new();
        let mut labels = LabelManager::new();
        let first = builder.get_or_create("target", 0xdead_beef, 0x1000, &mut labels);
        let second = builder.get_or_create("target", 0xdead_beef, 0x1000, &mut labels);
        assert_eq!(first, second);
        assert_eq!(builder.count(), 1);
        assert_eq!(builder.into_instructions().len(), 5);
    }

    #[test]
    fn distinct_targets_get_distinct_veneers() {
        let mut builder = VeneerBuilder::new();
        let mut labels = LabelManager::new();
        let a = builder.get_or_create("a", 0x1, 0x1000, &mut labels);
        let b = builder.get_or_create("b", 0x2, 0x1000, &mut labels);
        assert_ne!(a, b);
        assert_eq!(b - a, VENEER_SIZE_BYTES);
    }

    #[test]
    fn veneer_movz_movk_sequence_splits_target_address() {
        let mut builder = VeneerBuilder::new();
        let mut labels = LabelManager::new();
        let target: u64 = 0x1122_3344_5566_7788;
        builder.get_or_create("target", target, 0x1000, &mut labels);
        let instructions = builder.into_instructions();
        assert_eq!(instructions.len(), 5);
        assert_eq!((instructions[0].encoding >> 5) & 0xFFFF, 0x7788);
        assert_eq!((instructions[1].encoding >> 5) & 0xFFFF, 0x5566);
        assert_eq!((instructions[2].encoding >> 5) & 0xFFFF, 0x3344);
        assert_eq!((instructions[3].encoding >> 5) & 0xFFFF, 0x1122);
        assert_eq!(instructions[4].encoding, BR_X16);
    }
}
