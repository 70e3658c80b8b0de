//! The system timer handler and interrupt-context bookkeeping
use core::marker::PhantomData;
use core::sync::atomic::Ordering;

use crate::{klock, procmap, sched, KernelTraits};

/// The system timer handler. The port's timer interrupt handler calls this
/// once per period, inside an [`IsrGuard`].
///
/// Walks every non-idle process in priority order, counts down finite
/// deadlines, and readies those that expire. Rescheduling is left to the
/// outermost `IsrGuard`'s exit.
pub fn system_tick<System: KernelTraits>() {
    let mut lock = klock::lock_cpu::<System>();

    #[cfg(feature = "system-ticks")]
    System::state()
        .tick_count
        .replace_with(&mut *lock, |t| t.wrapping_add(1));

    System::systimer_hook();

    let table = System::process_table();
    let mut expired: procmap::ProcessMap = 0;
    for slot in &table[..table.len() - 1] {
        if let Some(cb) = slot.get(&*lock) {
            let t = cb.timeout.get(&*lock);
            if t > 0 {
                cb.timeout.replace(&mut *lock, t - 1);
                if t == 1 {
                    expired |= procmap::prio_tag::<System>(cb.priority);
                }
            }
        }
    }

    if expired != 0 {
        System::state()
            .ready_map
            .replace_with(&mut *lock, |m| *m | expired);
    }
}

/// Scoped marker for an interrupt handler's extent.
///
/// Construct on entry, drop on exit. When the outermost guard is dropped
/// and the handlers changed the ready set, the pended context-switch trap
/// performs the preemption right after the hardware's own interrupt return.
pub struct IsrGuard<System: KernelTraits> {
    _not_send: PhantomData<*mut System>,
}

impl<System: KernelTraits> IsrGuard<System> {
    pub fn new() -> Self {
        System::state().isr_nest_count.fetch_add(1, Ordering::Relaxed);
        Self {
            _not_send: PhantomData,
        }
    }
}

impl<System: KernelTraits> Default for IsrGuard<System> {
    fn default() -> Self {
        Self::new()
    }
}

impl<System: KernelTraits> Drop for IsrGuard<System> {
    fn drop(&mut self) {
        let mut lock = klock::lock_cpu::<System>();
        if System::state().isr_nest_count.fetch_sub(1, Ordering::Relaxed) == 1 {
            sched::sched_isr(lock.borrow_mut());
        }
    }
}

/// Whether the caller is executing in interrupt context.
pub fn is_in_isr<System: KernelTraits>() -> bool {
    System::state().isr_nest_count.load(Ordering::Relaxed) != 0
}

/// Number of timer periods elapsed since startup.
#[cfg(feature = "system-ticks")]
pub fn get_tick_count<System: KernelTraits>() -> u32 {
    let lock = klock::lock_cpu::<System>();
    System::state().tick_count.get(&*lock)
}

/// Mask the system timer interrupt. Pair with [`unlock_system_timer`].
pub fn lock_system_timer<System: KernelTraits>() {
    // Safety: paired with `unlock_system_timer` by the caller
    unsafe { System::lock_system_timer() };
}

/// Undo [`lock_system_timer`].
pub fn unlock_system_timer<System: KernelTraits>() {
    // Safety: paired with `lock_system_timer` by the caller
    unsafe { System::unlock_system_timer() };
}
