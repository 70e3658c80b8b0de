//! Build-time kernel configuration
use crate::{
    proc::ProcessSlot,
    procmap::Priority,
    state::State,
    PortThreading,
};

/// Optional application callbacks. Implement this on the system type next to
/// [`configure_kernel!`]; every method has an empty default body.
///
/// [`configure_kernel!`]: crate::configure_kernel
pub trait KernelHooks {
    /// Called on every pass of the idle process's loop.
    fn idle_hook() {}

    /// Called from the system timer handler, inside the critical section,
    /// before timeouts are decremented.
    fn systimer_hook() {}

    /// Called immediately before control is transferred from the process at
    /// priority `from` to the process at priority `to`.
    ///
    /// Runs with interrupts masked; must not invoke kernel services.
    fn context_switch_user_hook(_from: Priority, _to: Priority) {}

    /// A free-running counter sampled by [`Profiler`](crate::Profiler).
    fn profiler_timestamp() -> u32 {
        0
    }
}

/// Static kernel configuration, implemented on the system type by
/// [`configure_kernel!`](crate::configure_kernel).
///
/// # Safety
///
/// Only meant to be implemented by `configure_kernel!`. The statics it
/// returns must be unique for the program.
pub unsafe trait KernelCfg: PortThreading + KernelHooks {
    /// The number of processes, including the idle process. `2..=32`.
    /// Priorities must be unique and cover `0..PROCESS_COUNT` exactly.
    const PROCESS_COUNT: usize;

    /// Flip the bitmap orientation so that priority 0 occupies the most
    /// significant bit of the occupied range.
    const PRIORITY_ORDER_REVERSED: bool = false;

    fn state() -> &'static State<Self>;

    /// The process table, indexed by priority. `len() == PROCESS_COUNT`.
    fn process_table() -> &'static [ProcessSlot<Self>];

    /// Register the kernel-owned idle process. Called once by
    /// [`run`](crate::run).
    fn register_idle_process();
}

/// The complete bound required of a system type.
pub trait KernelTraits: PortThreading + KernelHooks + KernelCfg {}
impl<T: PortThreading + KernelHooks + KernelCfg> KernelTraits for T {}

/// The idle process's entry function. Spins forever at the lowest priority;
/// its ready bit is never cleared, so the scheduler always has somewhere to
/// go.
pub fn idle_entry<System: KernelTraits>() -> ! {
    loop {
        System::idle_hook();
        System::wait_for_interrupt();
    }
}

/// Emit the kernel's static state and implement [`KernelCfg`] on the given
/// system type.
///
/// ```ignore
/// struct SystemTraits; // `PortThreading` comes from the port's `use_port!`
/// impl wren_kernel::KernelHooks for SystemTraits {}
/// wren_kernel::configure_kernel! {
///     system = SystemTraits,
///     process_count = 4,
///     idle_stack_words = 128,
/// }
/// ```
#[macro_export]
macro_rules! configure_kernel {
    (
        system = $Sys:ty,
        process_count = $count:expr,
        idle_stack_words = $idle_words:expr
        $(, priority_order_reversed = $rev:expr)?
        $(,)?
    ) => {
        const _: () = {
            static KERNEL_STATE: $crate::State<$Sys> = $crate::utils::Init::INIT;

            static PROCESS_TABLE: [$crate::ProcessSlot<$Sys>; $count] = {
                const SLOT: $crate::ProcessSlot<$Sys> = $crate::utils::Init::INIT;
                [SLOT; $count]
            };

            static IDLE_PROCESS: $crate::Process<$Sys, { $idle_words }> =
                $crate::Process::new(($count) - 1, $crate::idle_entry::<$Sys>);

            // Safety: the statics above exist once per program
            unsafe impl $crate::KernelCfg for $Sys {
                const PROCESS_COUNT: usize = $count;
                $( const PRIORITY_ORDER_REVERSED: bool = $rev; )?

                fn state() -> &'static $crate::State<Self> {
                    &KERNEL_STATE
                }

                fn process_table() -> &'static [$crate::ProcessSlot<Self>] {
                    &PROCESS_TABLE
                }

                fn register_idle_process() {
                    IDLE_PROCESS.register();
                }
            }
        };
    };
}
