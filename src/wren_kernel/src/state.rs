//! Kernel-wide mutable state
use core::sync::atomic::AtomicUsize;

use crate::{
    klock::CpuLockCell,
    procmap::{Priority, ProcessMap},
    utils::Init,
    PortThreading,
};

/// The kernel's global state, one instance per program, emitted by
/// [`configure_kernel!`](crate::configure_kernel).
///
/// Every field except `isr_nest_count` is read and written only while
/// holding the CPU lock.
pub struct State<System: PortThreading> {
    /// One bit per process eligible to run. The idle process's bit is set at
    /// registration and never cleared.
    pub(crate) ready_map: CpuLockCell<System, ProcessMap>,

    /// The priority of the process whose code is currently executing.
    /// Outside the switcher this always names the most urgent ready process.
    pub(crate) cur_priority: CpuLockCell<System, Priority>,

    /// The priority the pended context-switch trap will switch to.
    pub(crate) sched_priority: CpuLockCell<System, Priority>,

    /// Zero at main-program level, positive inside interrupt handlers.
    /// Mutated by [`IsrGuard`](crate::IsrGuard) before the CPU lock is
    /// necessarily held, hence atomic.
    pub(crate) isr_nest_count: AtomicUsize,

    /// Number of system timer periods elapsed since startup.
    #[cfg(feature = "system-ticks")]
    pub(crate) tick_count: CpuLockCell<System, u32>,
}

impl<System: PortThreading> Init for State<System> {
    const INIT: Self = Self {
        ready_map: Init::INIT,
        cur_priority: Init::INIT,
        sched_priority: Init::INIT,
        isr_nest_count: Init::INIT,
        #[cfg(feature = "system-ticks")]
        tick_count: Init::INIT,
    };
}
