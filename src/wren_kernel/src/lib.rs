//! A preemptive, priority-based real-time kernel core for statically
//! configured single-chip systems.
//!
//! A fixed set of processes, each with a unique priority and its own stack,
//! shares one CPU. Readiness and waiting are tracked in per-priority
//! bitmaps, so electing the next process is a single bit-scan. Control is
//! transferred either inline from the scheduler call site or, with the
//! `deferred-scheme` feature, through a pended software trap.
//!
//! The kernel is written against the [`PortThreading`] trait; a port
//! supplies context save/restore, stack-frame initialization and the
//! interrupt mask. The application picks a system type, implements
//! [`KernelHooks`] on it, and instantiates the kernel's static state with
//! [`configure_kernel!`]:
//!
//! ```ignore
//! use_port!(struct SystemTraits); // from the port crate
//! impl wren_kernel::KernelHooks for SystemTraits {}
//! wren_kernel::configure_kernel! {
//!     system = SystemTraits,
//!     process_count = 4,
//!     idle_stack_words = 512,
//! }
//!
//! static UART_TASK: wren_kernel::Process<SystemTraits, 512> =
//!     wren_kernel::Process::new(0, uart_task);
//!
//! fn main() -> ! {
//!     UART_TASK.register();
//!     // ... register the rest ...
//!     wren_kernel::run::<SystemTraits>()
//! }
//! ```
#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

mod agent;
mod cfg;
mod channel;
mod event_flag;
mod klock;
mod message;
mod mutex;
mod port;
mod proc;
mod procmap;
mod profiler;
mod sched;
mod state;
mod tick;
pub mod utils;

pub use crate::{
    agent::WaiterMap,
    cfg::{idle_entry, KernelCfg, KernelHooks, KernelTraits},
    channel::Channel,
    event_flag::EventFlag,
    klock::CpuLockCell,
    message::Message,
    mutex::Mutex,
    port::{PortThreading, StackPtr, StackRegion},
    proc::{sleep, Process, ProcessCb, ProcessSlot, Timeout},
    procmap::{Priority, ProcessMap, MAX_PROCESS_COUNT},
    profiler::Profiler,
    sched::{choose_running_process, context_switch_hook, run},
    state::State,
    tick::{is_in_isr, lock_system_timer, system_tick, unlock_system_timer, IsrGuard},
};

#[cfg(feature = "system-ticks")]
pub use crate::tick::get_tick_count;

use core::marker::PhantomData;

/// Scoped interrupt masking for application code.
///
/// Saves the mask state on construction and restores it on drop, so guards
/// nest freely. Kernel services acquire the mask on their own; this type is
/// for application-level atomicity around multiple observations.
pub struct CriticalSection<System: PortThreading> {
    was_active: bool,
    _not_send: PhantomData<*mut System>,
}

impl<System: PortThreading> CriticalSection<System> {
    pub fn new() -> Self {
        let was_active = System::is_cpu_lock_active();
        if !was_active {
            // Safety: paired with `leave_cpu_lock` in `drop`
            unsafe { System::enter_cpu_lock() };
        }
        Self {
            was_active,
            _not_send: PhantomData,
        }
    }
}

impl<System: PortThreading> Default for CriticalSection<System> {
    fn default() -> Self {
        Self::new()
    }
}

impl<System: PortThreading> Drop for CriticalSection<System> {
    fn drop(&mut self) {
        if !self.was_active {
            // Safety: the mask was entered in `new`
            unsafe { System::leave_cpu_lock() };
        }
    }
}

/// Look up a process by priority. `None` if no process is registered there.
pub fn get_proc<System: KernelTraits>(priority: Priority) -> Option<&'static ProcessCb<System>> {
    let lock = klock::lock_cpu::<System>();
    System::process_table().get(priority)?.get(&*lock)
}

/// The priority of the currently executing process.
pub fn cur_proc_priority<System: KernelTraits>() -> Priority {
    let lock = klock::lock_cpu::<System>();
    System::state().cur_priority.get(&*lock)
}
