//! Assembly-listing dump (§6 "on-disk artifacts").
//!
//! Formats a finalized (post-link) instruction stream the way a debugger or
//! a `--dump-listing` flag would want to see it: one line per instruction,
//! address, raw encoding, and mnemonic.

use std::fmt::Write as _;

use crate::instruction::Instruction;

/// Render `instructions` as a human-readable listing, one line per entry.
/// Pure label definitions are rendered as a bare `label:` line; everything
/// else gets its resolved address (if assigned), raw encoding, and
/// assembly text.
pub fn format_listing(instructions: &[Instruction]) -> String {
    let mut out = String::new();
    for instr in instructions {
        if instr.is_label_definition && !instr.emits_data_or_code() {
            if let Some(label) = &instr.target_label {
                let _ = writeln!(out, "{label}:");
            }
            continue;
        }

        let address = instr
            .address
            .map(|a| format!("{a:#010x}"))
            .unwrap_or_else(|| "<unresolved>".to_string());
        let text = if instr.assembly_text.is_empty() {
            format!(".word {:#010x}", instr.encoding)
        } else {
            instr.assembly_text.clone()
        };
        let reloc_suffix = match (&instr.resolved_symbol_name, instr.resolved_target_address) {
            (Some(symbol), Some(target)) => {
                format!("   ; reloc={:?} -> {symbol}@{target:#x}", instr.relocation)
            }
            _ => String::new(),
        };
        let _ = writeln!(
            out,
            "  {address}:  {:#010x}    {text}{reloc_suffix}",
            instr.encoding
        );
    }
    out
}

/// Render `instructions` with a `//LINE <n> "<path>"`-style prefix table,
/// one numbered entry per line, for tooling that wants stable line
/// references into the listing rather than addresses.
pub fn format_numbered_listing(instructions: &[Instruction], source_path: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "//LINE 1 \"{source_path}\"");
    for (line, instr) in instructions.iter().enumerate() {
        if instr.is_label_definition && !instr.emits_data_or_code() {
            if let Some(label) = &instr.target_label {
                let _ = writeln!(out, "{:>6}  {label}:", line + 1);
            }
            continue;
        }
        let text = if instr.assembly_text.is_empty() {
            format!(".word {:#010x}", instr.encoding)
        } else {
            instr.assembly_text.clone()
        };
        let _ = writeln!(out, "{:>6}  {text}", line + 1);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relocation::RelocationKind;
    use crate::segment::Segment;

    #[test]
    fn listing_renders_label_and_instruction_lines() {
        let mut label = Instruction::as_label("start");
        label.address = Some(0x1000);
        let mut instr = Instruction::code(0xD65F03C0, "ret");
        instr.address = Some(0x1000);

        let listing = format_listing(&[label, instr]);
        assert!(listing.contains("start:"));
        assert!(listing.contains("ret"));
        assert!(listing.contains("0x00001000"));
    }

    #[test]
    fn listing_falls_back_to_word_directive_for_data() {
        let mut data = Instruction::data_word(Segment::Rodata, 0xdead_beef, None);
        data.address = Some(0x2000);
        let listing = format_listing(&[data]);
        assert!(listing.contains(".word 0xdeadbeef"));
    }

    #[test]
    fn numbered_listing_has_line_header() {
        let instr = Instruction::code_with_relocation(
            0,
            "bl callee",
            "callee",
            RelocationKind::PcRelative26BitOffset,
        );
        let listing = format_numbered_listing(&[instr], "main.algol");
        assert!(listing.starts_with("//LINE 1 \"main.algol\""));
        assert!(listing.contains("bl callee"));
    }
}
