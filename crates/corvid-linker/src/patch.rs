//! Bit-field patching for each relocation kind (§4.H "Pass 2: relocation").

use corvid_bytecode::RelocationKind;

/// 128 MiB: the `B`/`BL` 26-bit PC-relative branch range.
const BRANCH_26_BIT_RANGE: i64 = 128 * 1024 * 1024;
/// 1 MiB: the `B.cond`/`CBZ` 19-bit PC-relative branch range.
const BRANCH_19_BIT_RANGE: i64 = 1024 * 1024;

/// Whether a PC-relative branch from `instruction_address` to
/// `target_address` fits in `kind`'s immediate field. Non-branch kinds
/// (`ADRP`, `ADD`, `MOVZ`/`MOVK`, absolute words) are never range-limited
/// here — `ADRP`'s ±4 GiB page range and the immediate-load kinds cover the
/// full address space by construction.
pub fn is_branch_in_range(instruction_address: u64, target_address: u64, kind: RelocationKind) -> bool {
    let offset = target_address as i64 - instruction_address as i64;
    match kind {
        RelocationKind::PcRelative26BitOffset => offset.abs() <= BRANCH_26_BIT_RANGE,
        RelocationKind::PcRelative19BitOffset => offset.abs() <= BRANCH_19_BIT_RANGE,
        _ => true,
    }
}

/// Patch `encoding` for a PC-relative relocation (`B`/`BL`, `B.cond`,
/// `ADRP`, or the `ADD` half of an `ADRP`/`ADD` address pair).
pub fn apply_pc_relative(
    encoding: u32,
    instruction_address: u64,
    target_address: u64,
    kind: RelocationKind,
) -> u32 {
    let offset = target_address as i64 - instruction_address as i64;
    match kind {
        RelocationKind::PcRelative26BitOffset => {
            let imm26 = ((offset / 4) as u32) & 0x03FF_FFFF;
            (encoding & !0x03FF_FFFF) | imm26
        }
        RelocationKind::PcRelative19BitOffset => {
            let imm19 = ((offset / 4) as u32) & 0x0007_FFFF;
            (encoding & !(0x0007_FFFF << 5)) | (imm19 << 5)
        }
        RelocationKind::Page21BitPcRelative => {
            let pc_page = instruction_address & !0xFFF;
            let target_page = target_address & !0xFFF;
            let page_offset = target_page as i64 - pc_page as i64;
            let imm21 = ((page_offset >> 12) as u32) & 0x1F_FFFF;
            let immlo = imm21 & 0x3;
            let immhi = imm21 >> 2;
            let encoding = (encoding & !(0x3 << 29)) | (immlo << 29);
            (encoding & !(0x7_FFFF << 5)) | (immhi << 5)
        }
        RelocationKind::Add12BitUnsignedOffset => {
            let lo12 = (target_address as u32) & 0xFFF;
            (encoding & !(0xFFF << 10)) | (lo12 << 10)
        }
        _ => encoding,
    }
}

/// Patch `encoding` for a `MOVZ`/`MOVK` immediate-loading relocation,
/// extracting the 16-bit slice of `target_address` that `kind` names.
pub fn apply_movz_movk(encoding: u32, target_address: u64, kind: RelocationKind) -> u32 {
    let shift = match kind {
        RelocationKind::MovzMovkImm0 => 0,
        RelocationKind::MovzMovkImm16 => 16,
        RelocationKind::MovzMovkImm32 => 32,
        RelocationKind::MovzMovkImm48 => 48,
        _ => return encoding,
    };
    let imm16 = ((target_address >> shift) & 0xFFFF) as u32;
    (encoding & !(0xFFFF << 5)) | (imm16 << 5)
}

/// Patch `encoding` for one of the two whole-word absolute-address
/// relocations. The entire 32-bit word is replaced.
pub fn apply_absolute(target_address: u64, kind: RelocationKind) -> u32 {
    match kind {
        RelocationKind::AbsoluteAddressLo32 => (target_address & 0xFFFF_FFFF) as u32,
        RelocationKind::AbsoluteAddressHi32 => (target_address >> 32) as u32,
        _ => 0,
    }
}
