//! The scheduler and the OS startup path
use core::sync::atomic::Ordering;

use crate::{
    klock::{self, CpuLockTokenRefMut},
    port::StackPtr,
    procmap, KernelTraits,
};

/// Re-evaluate the ready set and transfer control to the most urgent ready
/// process, if that is not the caller.
///
/// No-op when called inside an interrupt handler: handlers mutate the ready
/// set through the `_isr` service variants, and the outermost
/// [`IsrGuard`](crate::IsrGuard) reschedules on exit.
pub(crate) fn scheduler<System: KernelTraits>(lock: CpuLockTokenRefMut<'_, System>) {
    if System::state().isr_nest_count.load(Ordering::Relaxed) != 0 {
        return;
    }
    sched(lock);
}

/// Switch inline, from the caller's own frame. When the caller is scheduled
/// again, `context_switch` returns and the caller proceeds with the CPU lock
/// still held.
#[cfg(not(feature = "deferred-scheme"))]
fn sched<System: KernelTraits>(mut lock: CpuLockTokenRefMut<'_, System>) {
    let state = System::state();
    let next = procmap::highest_priority::<System>(state.ready_map.get(&*lock));
    let prev = state.cur_priority.get(&*lock);
    if next == prev {
        return;
    }

    System::context_switch_user_hook(prev, next);

    let table = System::process_table();
    let save_slot = table[prev].get(&*lock).unwrap().stack_ptr.as_ptr();
    // Safety: CPU lock held; the process at `next` is not executing, so its
    // saved top-of-stack is valid
    let next_sp = unsafe { *table[next].get(&*lock).unwrap().stack_ptr.as_ptr() };

    state.cur_priority.replace(&mut *lock, next);

    // Safety: CPU lock held, `save_slot` is the (former) current process's
    // slot and `next_sp` is a valid saved context
    unsafe { System::context_switch(save_slot, next_sp) };
}

/// Request the pended context-switch trap and wait for it to be taken.
///
/// The release loop below looks redundant but is load-bearing: a plain
/// unmask/nop/mask sequence lets a hardware interrupt arrive first, and the
/// CPU may then execute one more instruction of this path before taking the
/// pended trap. If that instruction masks interrupts, the trap is lost and
/// the switch silently skipped. Nothing may proceed past this loop until
/// `cur_priority` shows the trap has actually run.
#[cfg(feature = "deferred-scheme")]
fn sched<System: KernelTraits>(mut lock: CpuLockTokenRefMut<'_, System>) {
    let state = System::state();
    let next = procmap::highest_priority::<System>(state.ready_map.get(&*lock));
    if next == state.cur_priority.get(&*lock) {
        return;
    }

    state.sched_priority.replace(&mut *lock, next);
    // Safety: CPU lock held
    unsafe { System::raise_context_switch() };

    loop {
        // Safety: open a one-instruction window in which pended interrupts
        // (including the switch trap) are taken, then close it again. The
        // token is not used inside the window.
        unsafe {
            System::leave_cpu_lock();
            System::dummy_instr();
            System::enter_cpu_lock();
        }

        if state.cur_priority.get(&*lock) == state.sched_priority.get(&*lock) {
            break;
        }
    }
}

/// The interrupt-side scheduler: never switches inline, only pends the trap
/// so the switch happens once the outermost handler returns.
pub(crate) fn sched_isr<System: KernelTraits>(mut lock: CpuLockTokenRefMut<'_, System>) {
    let state = System::state();
    let next = procmap::highest_priority::<System>(state.ready_map.get(&*lock));
    if next != state.cur_priority.get(&*lock) {
        state.sched_priority.replace(&mut *lock, next);
        // Safety: CPU lock held
        unsafe { System::raise_context_switch() };
    }
}

/// Called by the port's context-switch trap handler before it commits to
/// saving the interrupted process's state: (re)elect the most urgent ready
/// process as the switch target. Returns `false` if the interrupted process
/// is already the right one, in which case the trap should be dismissed:
/// interrupts or inline switches may have overtaken a pended request.
///
/// # Safety
///
/// Only a port may call this, with interrupts masked, from outside any
/// kernel service.
pub unsafe fn choose_running_process<System: KernelTraits>() -> bool {
    // Safety: forwarded from the caller
    let mut lock = unsafe { klock::assume_cpu_lock::<System>() };
    let state = System::state();
    let next = procmap::highest_priority::<System>(state.ready_map.get(&*lock));
    if next == state.cur_priority.get(&*lock) {
        false
    } else {
        state.sched_priority.replace(&mut *lock, next);
        true
    }
}

/// Called by the port's context-switch trap handler after it has saved the
/// interrupted process's state, with `cur_sp` being the resulting
/// top-of-stack. Commits the pending priority change and returns the saved
/// top-of-stack to restore.
///
/// Making the priority update and the stack-pointer swap one indivisible
/// action here keeps any later scheduler call consistent.
///
/// # Safety
///
/// Only the port's trap handler may call this, with interrupts masked.
pub unsafe fn context_switch_hook<System: KernelTraits>(cur_sp: StackPtr) -> StackPtr {
    // Safety: interrupts are masked; any preempted token holder is off-CPU
    // until this trap returns and cannot observe the aliasing
    let mut lock = unsafe { klock::assume_cpu_lock::<System>() };
    let state = System::state();
    let table = System::process_table();

    let prev = state.cur_priority.get(&*lock);
    // Safety: CPU lock held, the preempted process is no longer executing
    unsafe { *table[prev].get(&*lock).unwrap().stack_ptr.as_ptr() = cur_sp };

    let next = state.sched_priority.get(&*lock);
    System::context_switch_user_hook(prev, next);
    state.cur_priority.replace(&mut *lock, next);

    // Safety: the process at `next` is not executing
    unsafe { *table[next].get(&*lock).unwrap().stack_ptr.as_ptr() }
}

/// Start the OS: transfer control to the process at priority 0, which must
/// be registered and ready. Never returns.
///
/// All processes must have been registered at this point; the kernel-owned
/// idle process is registered here.
pub fn run<System: KernelTraits>() -> ! {
    System::register_idle_process();

    let lock = klock::lock_cpu::<System>();
    let table = System::process_table();
    debug_assert_eq!(table.len(), System::PROCESS_COUNT);
    #[cfg(debug_assertions)]
    for (priority, slot) in table.iter().enumerate() {
        debug_assert!(
            slot.get(&*lock).is_some(),
            "no process registered at priority {priority}"
        );
    }
    debug_assert_ne!(
        System::state().ready_map.get(&*lock) & procmap::prio_tag::<System>(0),
        0,
        "the priority-0 process must not start suspended"
    );

    let first = table[0].get(&*lock).unwrap();
    // Safety: the process never ran, so the slot holds its initial frame
    let sp = unsafe { *first.stack_ptr.as_ptr() };

    // Interrupts stay masked until the first process's synthetic frame
    // restores the unmasked state.
    core::mem::forget(lock);

    // Safety: `sp` was produced by `init_stack_frame` and interrupts are
    // masked
    unsafe { System::start_first_process(sp) }
}
