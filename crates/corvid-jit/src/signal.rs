//! Post-mortem crash handler (§4.K).
//!
//! Installs handlers for the signals an emitted-code bug or a genuine host
//! fault can raise while the mutator is running on a [`JitExecutor`]'s
//! private stack. The handler body only uses async-signal-safe primitives:
//! raw `write(2)` through [`corvid_sdk::sig_safe`], volatile reads, and
//! lock-free atomics. No heap allocation, no mutex, no formatted I/O.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use corvid_heap::TrackedHeap;

use crate::executor::JitExecutor;

static ACTIVE_HEAP: AtomicPtr<TrackedHeap> = AtomicPtr::new(ptr::null_mut());

const CRASH_FD: i32 = libc::STDERR_FILENO;

/// Publish `heap` as the heap the crash handler dumps shadow-table entries
/// from. Leaks the `Arc`'s strong count for the lifetime of the process;
/// callers are expected to register once at startup, matching the
/// single-process, single-runtime-instance shape this crate targets.
pub fn register_heap(heap: &Arc<TrackedHeap>) {
    let raw = Arc::as_ptr(heap) as *mut TrackedHeap;
    ACTIVE_HEAP.store(raw, Ordering::Release);
}

/// Signals a compiled Corvid program (or a genuine host fault) can raise
/// that this handler intercepts (§4.K).
const HANDLED_SIGNALS: &[i32] = &[
    libc::SIGSEGV,
    libc::SIGBUS,
    libc::SIGILL,
    libc::SIGFPE,
    libc::SIGABRT,
    libc::SIGTRAP,
];

/// Install the post-mortem handler for every signal in [`HANDLED_SIGNALS`].
///
/// # Safety
/// Must be called before any JIT code runs, and only once per process —
/// `sigaction` is not itself async-signal-safe and racing two installers
/// is undefined.
pub unsafe fn install() {
    let mut action: libc::sigaction = std::mem::zeroed();
    action.sa_sigaction = handle_crash as usize;
    action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
    libc::sigemptyset(&mut action.sa_mask);
    for &signum in HANDLED_SIGNALS {
        libc::sigaction(signum, &action, ptr::null_mut());
    }
}

fn signal_name(signum: i32) -> &'static [u8] {
    match signum {
        libc::SIGSEGV => b"SIGSEGV\n",
        libc::SIGBUS => b"SIGBUS\n",
        libc::SIGILL => b"SIGILL\n",
        libc::SIGFPE => b"SIGFPE\n",
        libc::SIGABRT => b"SIGABRT\n",
        libc::SIGTRAP => b"SIGTRAP\n",
        _ => b"<unknown signal>\n",
    }
}

/// Pull `(sp, pc)` out of the platform `ucontext_t`. AArch64/Linux layout;
/// the fields this reads are part of the stable `mcontext_t` ABI.
#[cfg(all(target_arch = "aarch64", target_os = "linux"))]
unsafe fn sp_and_pc(ucontext: *mut libc::c_void) -> (usize, usize) {
    let ctx = &*(ucontext as *const libc::ucontext_t);
    let sp = ctx.uc_mcontext.sp as usize;
    let pc = ctx.uc_mcontext.pc as usize;
    (sp, pc)
}

#[cfg(not(all(target_arch = "aarch64", target_os = "linux")))]
unsafe fn sp_and_pc(_ucontext: *mut libc::c_void) -> (usize, usize) {
    (0, 0)
}

/// Dump CPSR and its N/Z/C/V condition flags (§4.K step 2). `pstate` packs
/// them into bits [31:28], in the same positions the architecture's own
/// `CPSR`/`PSTATE` register uses.
#[cfg(all(target_arch = "aarch64", target_os = "linux"))]
unsafe fn dump_cpsr(ucontext: *mut libc::c_void, fd: i32) {
    let ctx = &*(ucontext as *const libc::ucontext_t);
    let pstate = ctx.uc_mcontext.pstate;
    corvid_sdk::sig_safe::write_labeled_hex(fd, b"cpsr=", pstate);
    corvid_sdk::sig_safe::write_raw(fd, b"flags: ");
    corvid_sdk::sig_safe::write_raw(fd, if pstate & (1 << 31) != 0 { b"N" } else { b"-" });
    corvid_sdk::sig_safe::write_raw(fd, if pstate & (1 << 30) != 0 { b"Z" } else { b"-" });
    corvid_sdk::sig_safe::write_raw(fd, if pstate & (1 << 29) != 0 { b"C" } else { b"-" });
    corvid_sdk::sig_safe::write_raw(fd, if pstate & (1 << 28) != 0 { b"V" } else { b"-" });
    corvid_sdk::sig_safe::write_raw(fd, b"\n");
}

#[cfg(not(all(target_arch = "aarch64", target_os = "linux")))]
unsafe fn dump_cpsr(_ucontext: *mut libc::c_void, _fd: i32) {}

/// Kernel `struct _aarch64_ctx` header every `uc_mcontext.__reserved`
/// extension record starts with (magic + total size, including the
/// header), per the Linux AArch64 `sigcontext.h` ABI.
#[cfg(all(target_arch = "aarch64", target_os = "linux"))]
#[repr(C)]
struct Aarch64CtxHeader {
    magic: u32,
    size: u32,
}

/// Magic tag identifying an `fpsimd_context` record in `__reserved`.
#[cfg(all(target_arch = "aarch64", target_os = "linux"))]
const FPSIMD_MAGIC: u32 = 0x4650_5001;

/// Dump the low 64 bits of NEON registers V0–V12 (§4.K step 2). The FP/SIMD
/// state lives in the first extension record of `uc_mcontext.__reserved`,
/// tagged with [`FPSIMD_MAGIC`]; each 128-bit V register follows a
/// `fpsr`/`fpcr` pair. If the magic tag doesn't match (kernel didn't save
/// FP/SIMD state, or the ABI changed), this is skipped rather than guessed.
#[cfg(all(target_arch = "aarch64", target_os = "linux"))]
unsafe fn dump_neon_registers(ucontext: *mut libc::c_void, fd: i32) {
    let ctx = &*(ucontext as *const libc::ucontext_t);
    let reserved = ctx.uc_mcontext.__reserved.as_ptr();
    let header = &*(reserved as *const Aarch64CtxHeader);
    if header.magic != FPSIMD_MAGIC {
        return;
    }
    // Layout after the 8-byte header: u32 fpsr, u32 fpcr, then 32 × u128
    // vregs. We only need the low 64 bits of each of V0..=V12.
    let vregs_base = reserved.add(8 + 8);
    corvid_sdk::sig_safe::write_raw(fd, b"-- NEON V0-V12 (low 64 bits) --\n");
    for i in 0..=12usize {
        let vreg_ptr = vregs_base.add(i * 16) as *const u64;
        let low64 = vreg_ptr.read_unaligned();
        let mut label = [0u8; 6];
        label[0] = b'v';
        let (d0, d1) = (i / 10, i % 10);
        let mut pos = 1;
        if d0 != 0 {
            label[pos] = b'0' + d0 as u8;
            pos += 1;
        }
        label[pos] = b'0' + d1 as u8;
        pos += 1;
        label[pos] = b'=';
        pos += 1;
        corvid_sdk::sig_safe::write_labeled_hex(fd, &label[..pos], low64);
    }
}

#[cfg(not(all(target_arch = "aarch64", target_os = "linux")))]
unsafe fn dump_neon_registers(_ucontext: *mut libc::c_void, _fd: i32) {}

/// Dump the AArch64 general-purpose registers carried in the `ucontext_t`,
/// if this build knows their layout.
#[cfg(all(target_arch = "aarch64", target_os = "linux"))]
unsafe fn dump_gp_registers(ucontext: *mut libc::c_void, fd: i32) {
    let ctx = &*(ucontext as *const libc::ucontext_t);
    let regs = &ctx.uc_mcontext.regs;
    for (i, value) in regs.iter().enumerate() {
        let mut label = [0u8; 8];
        label[0] = b'x';
        let (d0, d1) = (i / 10, i % 10);
        let mut pos = 1;
        if d0 != 0 {
            label[pos] = b'0' + d0 as u8;
            pos += 1;
        }
        label[pos] = b'0' + d1 as u8;
        pos += 1;
        label[pos] = b'=';
        pos += 1;
        corvid_sdk::sig_safe::write_labeled_hex(fd, &label[..pos], *value as u64);
    }
}

#[cfg(not(all(target_arch = "aarch64", target_os = "linux")))]
unsafe fn dump_gp_registers(_ucontext: *mut libc::c_void, _fd: i32) {}

/// Upper bound on the number of frames `backtrace(3)` writes into the
/// fixed on-stack buffer below; no heap allocation involved.
const MAX_BACKTRACE_FRAMES: usize = 64;

/// Step 6 of §4.K: "Print a backtrace". Uses `backtrace(3)` plus the `_fd`
/// variant of `backtrace_symbols` (writes directly with `write(2)` instead
/// of building a `malloc`'d array of strings), matching the original's use
/// of `backtrace()`/`backtrace_symbols` without calling into the
/// allocator from signal context.
#[cfg(any(target_os = "linux", target_os = "macos"))]
unsafe fn dump_backtrace(fd: i32) {
    corvid_sdk::sig_safe::write_raw(fd, b"-- backtrace --\n");
    let mut frames: [*mut libc::c_void; MAX_BACKTRACE_FRAMES] = [ptr::null_mut(); MAX_BACKTRACE_FRAMES];
    let count = libc::backtrace(frames.as_mut_ptr(), MAX_BACKTRACE_FRAMES as libc::c_int);
    if count > 0 {
        libc::backtrace_symbols_fd(frames.as_ptr(), count, fd);
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
unsafe fn dump_backtrace(_fd: i32) {}

extern "C" fn handle_crash(signum: i32, _info: *mut libc::siginfo_t, ucontext: *mut libc::c_void) {
    unsafe {
        let fd = CRASH_FD;
        corvid_sdk::sig_safe::write_raw(fd, b"corvid: fatal signal ");
        corvid_sdk::sig_safe::write_raw(fd, signal_name(signum));

        let (sp, pc) = sp_and_pc(ucontext);
        corvid_sdk::sig_safe::write_labeled_hex(fd, b"pc=", pc as u64);
        corvid_sdk::sig_safe::write_labeled_hex(fd, b"sp=", sp as u64);
        dump_gp_registers(ucontext, fd);
        dump_cpsr(ucontext, fd);
        dump_neon_registers(ucontext, fd);

        let executor_ptr = JitExecutor::active_stack_range_signal_safe();
        if let Some((base, end)) = executor_ptr {
            corvid_sdk::sig_safe::write_raw(fd, b"-- JIT stack window --\n");
            if sp >= base && sp < end {
                // Re-derive through the executor so bounds + dump logic stays
                // in one place; this relies on the active executor outliving
                // the fault, per its own safety contract.
                dump_stack_window(sp, base, end, fd);
            } else {
                corvid_sdk::sig_safe::write_raw(fd, b"SP outside JIT stack\n");
            }
        }

        let heap_ptr = ACTIVE_HEAP.load(Ordering::Acquire);
        if !heap_ptr.is_null() {
            corvid_sdk::sig_safe::write_raw(fd, b"-- shadow heap table --\n");
            (*heap_ptr).dump_shadow_signal_safe(fd);
        }

        corvid_sdk::sig_safe::write_raw(fd, b"-- recent errors --\n");
        corvid_sdk::for_each_recent_error_signal_safe(|record| {
            corvid_sdk::sig_safe::write_labeled_hex(fd, b"code=", record.code as u64);
        });

        dump_backtrace(fd);

        libc::_exit(1);
    }
}

/// Dump `±32` words around `sp`, duplicating
/// [`JitExecutor::dump_stack_from_signal`]'s window logic against a raw
/// `(base, end)` pair since the handler only has the registered range, not
/// a `&JitExecutor`.
unsafe fn dump_stack_window(sp: usize, base: usize, end: usize, fd: i32) {
    const WINDOW_WORDS: usize = 32;
    let window_bytes = WINDOW_WORDS * 8;
    let start = sp.saturating_sub(window_bytes).max(base);
    let stop = (sp + window_bytes).min(end - 8);
    let mut addr = start & !0x7;
    while addr <= stop {
        let value = (addr as *const u64).read_volatile();
        corvid_sdk::sig_safe::write_labeled_hex(fd, b"sp_word@", addr as u64);
        corvid_sdk::sig_safe::write_labeled_hex(fd, b"  =", value);
        addr += 8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_does_not_panic() {
        unsafe {
            install();
        }
    }

    #[test]
    fn register_heap_publishes_a_non_null_pointer() {
        let freelist = Arc::new(corvid_heap::Freelist::new(corvid_heap::FreelistConfig::default()));
        let pool = Arc::new(corvid_heap::StringPool::new(corvid_heap::StringPoolConfig::default()));
        let heap = Arc::new(TrackedHeap::new(corvid_heap::HeapConfig::default(), freelist, pool));
        register_heap(&heap);
        assert!(!ACTIVE_HEAP.load(Ordering::Acquire).is_null());
    }
}
