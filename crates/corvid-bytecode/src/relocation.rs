//! Relocation kinds the linker (`corvid-linker`) knows how to patch (§4.H).
//!
//! Each variant names both the AArch64 instruction family it targets and
//! the bit field the linker writes into the instruction's 32-bit encoding.

/// A relocation kind recorded on an [`crate::Instruction`]. `None` marks an
/// instruction whose encoding is already final at emission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocationKind {
    /// No relocation; the encoding does not depend on any address.
    None,
    /// 26-bit signed word offset, used by `B`/`BL`. Range ±128 MiB.
    PcRelative26BitOffset,
    /// 19-bit signed word offset, used by `B.cond`/`CBZ`/`CBNZ`. Range ±1 MiB.
    PcRelative19BitOffset,
    /// 21-bit signed page offset, used by `ADRP`.
    Page21BitPcRelative,
    /// 12-bit unsigned byte offset, used by `ADD` (the low-12 half of an
    /// `ADRP`/`ADD` address-materialization pair).
    Add12BitUnsignedOffset,
    /// Bits `[15:0]` of the target address, for a `MOVZ` at `LSL #0`.
    MovzMovkImm0,
    /// Bits `[31:16]` of the target address, for a `MOVK` at `LSL #16`.
    MovzMovkImm16,
    /// Bits `[47:32]` of the target address, for a `MOVK` at `LSL #32`.
    MovzMovkImm32,
    /// Bits `[63:48]` of the target address, for a `MOVK` at `LSL #48`.
    MovzMovkImm48,
    /// The low 32 bits of a 64-bit absolute address, written verbatim as
    /// the instruction's encoding (used for `.data` pointer slots).
    AbsoluteAddressLo32,
    /// The high 32 bits of a 64-bit absolute address, written verbatim as
    /// the instruction's encoding.
    AbsoluteAddressHi32,
}

impl RelocationKind {
    /// Whether this relocation is one of the two PC-relative branch kinds
    /// subject to range checking and veneer synthesis (§4.H). `ADRP`/`ADD`
    /// relocations are also PC-relative but have effectively unlimited
    /// range (±2 GiB page granularity) so they are never veneered.
    pub fn is_range_checked_branch(self) -> bool {
        matches!(
            self,
            RelocationKind::PcRelative26BitOffset | RelocationKind::PcRelative19BitOffset
        )
    }

    /// True for the four `MOVZ`/`MOVK` immediate-loading relocations.
    pub fn is_movz_movk(self) -> bool {
        matches!(
            self,
            RelocationKind::MovzMovkImm0
                | RelocationKind::MovzMovkImm16
                | RelocationKind::MovzMovkImm32
                | RelocationKind::MovzMovkImm48
        )
    }
}

/// The post-link inspection tag carried alongside each instruction (§3),
/// distinguishing call sites and data-table loads from ordinary code for
/// tools that walk the finalized stream (disassembly listings, profilers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JitAttribute {
    /// No special meaning.
    #[default]
    None,
    /// This instruction is (part of) an indirect call through a
    /// runtime-symbol or veneer address.
    IndirectCallSite,
    /// This instruction loads from a `.rodata`/`.data` table entry.
    DataTableLoad,
}
