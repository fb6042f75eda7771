// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Architecture-specific context capture and switching.
//!
//! `CpuContext` holds the callee-saved register set; `context_switch`
//! spills the running set into one context and reloads from another.
//! A fresh context is staged so the first switch into it lands in a
//! small trampoline with the task cell pointer waiting in a
//! callee-saved register, which the trampoline forwards to
//! `scheduler::task_entry` as its first argument.

use std::arch::naked_asm;

use crate::stack::StackSlab;

#[cfg(not(any(
    all(target_arch = "x86_64", not(windows)),
    target_arch = "aarch64"
)))]
compile_error!("strand-rt supports x86_64 (System V ABI) and aarch64 only");

// ---------------------------------------------------------------------------
// x86_64 (System V)
// ---------------------------------------------------------------------------

/// Callee-saved register state, x86_64 System V ABI.
///
/// Field order is load-bearing: the offsets in `context_switch` index
/// straight into this struct.
#[cfg(target_arch = "x86_64")]
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub(crate) struct CpuContext {
    rsp: u64,
    rbp: u64,
    rbx: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
}

/// Switch execution from one context to another.
///
/// Saves the callee-saved registers into `save` and restores them from
/// `restore`. The call returns only when some later switch restores
/// `save` — the caller resumes right after this call with all of its
/// locals intact.
///
/// # Safety
/// Both pointers must reference live `CpuContext` values, and `restore`
/// must have been initialized either by a previous switch or by
/// [`prepare`].
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
pub(crate) extern "C" fn context_switch(_save: *mut CpuContext, _restore: *const CpuContext) {
    naked_asm!(
        // Spill callee-saved registers into the outgoing context (rdi).
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        // Reload from the incoming context (rsi).
        "mov rsp, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
        // Fresh context: pops the trampoline address planted by
        // `prepare`. Suspended context: returns to just after its own
        // `context_switch` call.
        "ret",
    );
}

/// First instructions ever executed on a fresh stack.
///
/// `prepare` parks the task cell pointer in r12; the entry shim takes
/// it as its argument and never returns.
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
extern "C" fn task_trampoline() -> ! {
    naked_asm!(
        "mov rdi, r12",
        "call {entry}",
        "ud2",
        entry = sym crate::scheduler::task_entry,
    );
}

/// Stage a not-yet-entered context on `slab`.
///
/// Plants the trampoline address where the first `ret` will find it,
/// leaving the stack with the alignment the ABI demands at function
/// entry (rsp ≡ 8 mod 16 after the trampoline's `call`).
#[cfg(target_arch = "x86_64")]
pub(crate) fn prepare(slab: &mut StackSlab, arg: usize) -> CpuContext {
    let rsp = slab.top() - 8;
    // SAFETY: rsp is inside the slab's usable region, 8-byte aligned,
    // and the slab outlives the context.
    unsafe { *(rsp as *mut u64) = task_trampoline as *const () as usize as u64 };
    CpuContext {
        rsp: rsp as u64,
        r12: arg as u64,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// aarch64 (AAPCS64)
// ---------------------------------------------------------------------------

/// Callee-saved register state, AAPCS64: x19-x28, fp, lr, sp, plus the
/// low halves of v8-v15.
///
/// Field order is load-bearing: the offsets in `context_switch` index
/// straight into this struct.
#[cfg(target_arch = "aarch64")]
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub(crate) struct CpuContext {
    x19: u64,
    x20: u64,
    x21: u64,
    x22: u64,
    x23: u64,
    x24: u64,
    x25: u64,
    x26: u64,
    x27: u64,
    x28: u64,
    fp: u64,
    lr: u64,
    sp: u64,
    d: [u64; 8],
}

/// Switch execution from one context to another.
///
/// Saves the callee-saved registers into `save` and restores them from
/// `restore`. The call returns only when some later switch restores
/// `save` — the caller resumes right after this call with all of its
/// locals intact.
///
/// # Safety
/// Both pointers must reference live `CpuContext` values, and `restore`
/// must have been initialized either by a previous switch or by
/// [`prepare`].
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
pub(crate) extern "C" fn context_switch(_save: *mut CpuContext, _restore: *const CpuContext) {
    naked_asm!(
        // Spill callee-saved registers into the outgoing context (x0).
        "stp x19, x20, [x0, #0x00]",
        "stp x21, x22, [x0, #0x10]",
        "stp x23, x24, [x0, #0x20]",
        "stp x25, x26, [x0, #0x30]",
        "stp x27, x28, [x0, #0x40]",
        "stp x29, x30, [x0, #0x50]",
        "mov x9, sp",
        "str x9, [x0, #0x60]",
        "stp d8, d9, [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        // Reload from the incoming context (x1).
        "ldp x19, x20, [x1, #0x00]",
        "ldp x21, x22, [x1, #0x10]",
        "ldp x23, x24, [x1, #0x20]",
        "ldp x25, x26, [x1, #0x30]",
        "ldp x27, x28, [x1, #0x40]",
        "ldp x29, x30, [x1, #0x50]",
        "ldr x9, [x1, #0x60]",
        "mov sp, x9",
        "ldp d8, d9, [x1, #0x68]",
        "ldp d10, d11, [x1, #0x78]",
        "ldp d12, d13, [x1, #0x88]",
        "ldp d14, d15, [x1, #0x98]",
        // Fresh context: lr was pointed at the trampoline by `prepare`.
        // Suspended context: lr is the saved return address.
        "ret",
    );
}

/// First instructions ever executed on a fresh stack.
///
/// `prepare` parks the task cell pointer in x19; the entry shim takes
/// it as its argument and never returns.
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
extern "C" fn task_trampoline() -> ! {
    naked_asm!(
        "mov x0, x19",
        "bl {entry}",
        "brk #0x1",
        entry = sym crate::scheduler::task_entry,
    );
}

/// Stage a not-yet-entered context on `slab`. The stack top is already
/// 16-byte aligned; entry happens through lr, so nothing is pushed.
#[cfg(target_arch = "aarch64")]
pub(crate) fn prepare(slab: &mut StackSlab, arg: usize) -> CpuContext {
    CpuContext {
        x19: arg as u64,
        lr: task_trampoline as *const () as usize as u64,
        sp: slab.top() as u64,
        ..Default::default()
    }
}
