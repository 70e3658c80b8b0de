//! The interface between the kernel core and a target-specific port
use core::fmt;

use crate::utils::Init;

/// A saved top-of-stack value.
///
/// Opaque to the kernel: the port stores whatever it needs to resume the
/// process here. On a bare-metal port this is the stack pointer left by the
/// context save sequence. Valid iff the owning process is not currently
/// executing.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct StackPtr(pub *mut usize);

// Safety: the kernel only moves the value around; dereferencing is the
// port's business and happens on the single CPU under its own rules.
unsafe impl Send for StackPtr {}
unsafe impl Sync for StackPtr {}

impl StackPtr {
    pub const fn null() -> Self {
        Self(core::ptr::null_mut())
    }
}

impl Init for StackPtr {
    const INIT: Self = Self::null();
}

impl fmt::Debug for StackPtr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("StackPtr").field(&self.0).finish()
    }
}

/// A contiguous stack RAM area exclusively owned by one process.
#[derive(Clone, Copy, Debug)]
pub struct StackRegion {
    /// The lowest address of the area.
    pub base: *mut usize,
    /// The area's size in machine words.
    pub words: usize,
}

// Safety: same as `StackPtr`
unsafe impl Send for StackRegion {}
unsafe impl Sync for StackRegion {}

impl StackRegion {
    /// The address one past the highest word. Stacks grow downwards from
    /// here on every supported target.
    pub fn top(&self) -> *mut usize {
        self.base.wrapping_add(self.words)
    }
}

/// Implemented by a port to provide the platform primitives the kernel core
/// requires.
///
/// # Safety
///
/// The implementation must uphold each method's contract; the kernel builds
/// its memory-safety argument on them.
pub unsafe trait PortThreading: Sized + 'static {
    /// Restore the initial frame of the process whose saved top-of-stack is
    /// `sp` and transfer control to it. Never returns.
    ///
    /// # Safety
    ///
    /// `sp` must have been produced by [`Self::init_stack_frame`] and
    /// interrupts must be masked.
    unsafe fn start_first_process(sp: StackPtr) -> !;

    /// Save the calling process's callee-preserved state on its stack, store
    /// the resulting top-of-stack in `*save_slot`, then restore the state
    /// saved at `next_sp` and return into the switched-in process.
    ///
    /// # Safety
    ///
    /// Must be called with interrupts masked. `save_slot` must point at the
    /// calling process's saved-stack slot and `next_sp` at a valid saved
    /// context.
    unsafe fn context_switch(save_slot: *mut StackPtr, next_sp: StackPtr);

    /// Write a synthetic interrupt frame into `stack` such that the first
    /// restore from the returned value lands in `entry` with interrupts
    /// enabled.
    ///
    /// # Safety
    ///
    /// `stack` must be an unused region exclusively owned by the process
    /// being initialized.
    unsafe fn init_stack_frame(stack: StackRegion, entry: fn() -> !) -> StackPtr;

    /// Pend the context-switch trap. The trap handler must eventually run
    /// (once interrupts are enabled), calling
    /// [`context_switch_hook`](crate::context_switch_hook) to learn which
    /// saved context to restore.
    ///
    /// # Safety
    ///
    /// Must be called with interrupts masked.
    unsafe fn raise_context_switch();

    /// One architectural no-op, so that interrupts pended while masked are
    /// actually taken between an unmask/mask pair.
    fn dummy_instr() {}

    /// Mask all maskable interrupts.
    ///
    /// # Safety
    ///
    /// Only the kernel may call this, paired with [`Self::leave_cpu_lock`].
    unsafe fn enter_cpu_lock();

    /// Undo [`Self::enter_cpu_lock`].
    ///
    /// # Safety
    ///
    /// Only the kernel may call this.
    unsafe fn leave_cpu_lock();

    /// Whether interrupts are currently masked by `enter_cpu_lock`.
    fn is_cpu_lock_active() -> bool;

    /// Pause until an interrupt is plausible. Called in the idle loop;
    /// a bare-metal port typically issues a wait-for-interrupt instruction.
    fn wait_for_interrupt() {}

    /// Mask the system timer interrupt only.
    ///
    /// # Safety
    ///
    /// Pair with [`Self::unlock_system_timer`].
    unsafe fn lock_system_timer() {}

    /// Undo [`Self::lock_system_timer`].
    ///
    /// # Safety
    ///
    /// Pair with [`Self::lock_system_timer`].
    unsafe fn unlock_system_timer() {}
}
