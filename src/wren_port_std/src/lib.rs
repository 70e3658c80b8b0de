//! Simulation environment for running the wren kernel on a hosted target.
//!
//! Each process is backed by an OS thread, but the scheduling model stays
//! the kernel's own: a single "CPU" mutex stands in for the global
//! interrupt mask, and exactly one backing thread at a time is allowed past
//! the dispatch gate. Context switching parks the switched-out thread on a
//! condition variable and releases the one named by the kernel.
//!
//! Interrupts are simulated by [`with_interrupt`], which acquires the CPU
//! mutex (blocking while the "interrupts" are masked), runs the handler
//! inside an [`IsrGuard`], and leaves the pended context switch to be taken
//! at the running process's next poll point: `dummy_instr`, a CPU-lock
//! release, or the idle loop's `wait_for_interrupt`.
//!
//! There is deliberately no asynchronous preemption of straight-line user
//! code: a process that never touches the kernel is never preempted. The
//! kernel's own test scenarios interact with it constantly, so every
//! observable switch point is exercised anyway.
#![deny(unsafe_op_in_unsafe_fn)]
use std::{
    cell::{Cell, RefCell},
    mem,
    sync::{Condvar, Mutex, MutexGuard},
    thread,
    time::{Duration, Instant},
};

use wren_kernel::{KernelTraits, StackPtr, StackRegion};

/// Implemented on a system type by [`use_port!`].
///
/// # Safety
///
/// Only meant to be implemented by [`use_port!`].
pub unsafe trait PortInstance: KernelTraits {
    fn port_state() -> &'static State;
}

/// The port's record of one process, carved out of the process's stack
/// region. The kernel's saved top-of-stack values point at this.
#[repr(C)]
struct PortFrame {
    entry: fn() -> !,
    /// Bumped on every frame (re)initialization; a backing thread whose
    /// generation fell behind belongs to a terminated incarnation and must
    /// never resume.
    gen: u32,
    spawned: bool,
}

/// The internal state of the port.
#[doc(hidden)]
pub struct State {
    /// Holding this stands in for "interrupts masked".
    inner: Mutex<Inner>,
    dispatch_cvar: Condvar,
}

struct Inner {
    /// Address of the running process's `PortFrame`; `0` before the first
    /// dispatch.
    running: usize,
    /// A context-switch trap has been pended and not yet taken.
    switch_pending: bool,
    /// Frame-address → generation, surviving frame rewrites.
    frame_gens: Vec<(usize, u32)>,
    /// The simulated timer peripheral's interrupt mask and its one-deep
    /// pending latch.
    timer_masked: bool,
    timer_latched: bool,
}

impl State {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                running: 0,
                switch_pending: false,
                frame_gens: Vec::new(),
                timer_masked: false,
                timer_latched: false,
            }),
            dispatch_cvar: Condvar::new(),
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    /// The held "interrupt mask", stashed so an unlock from arbitrary call
    /// depth can release it.
    static CPU_GUARD: RefCell<Option<MutexGuard<'static, Inner>>> = const { RefCell::new(None) };
    /// The `PortFrame` address of the process this thread backs; `0` on
    /// harness threads.
    static CURRENT_FRAME: Cell<usize> = const { Cell::new(0) };
    /// The frame generation this thread was spawned for.
    static CURRENT_GEN: Cell<u32> = const { Cell::new(0) };
}

fn stash_cpu_guard(guard: MutexGuard<'static, Inner>) {
    CPU_GUARD.with(|g| {
        let prev = g.borrow_mut().replace(guard);
        debug_assert!(prev.is_none(), "CPU lock acquired twice");
    });
}

fn take_cpu_guard() -> MutexGuard<'static, Inner> {
    CPU_GUARD.with(|g| g.borrow_mut().take())
        .expect("CPU lock is not held by this thread")
}

#[doc(hidden)]
pub fn enter_cpu_lock<System: PortInstance>() {
    stash_cpu_guard(System::port_state().inner.lock().unwrap());
}

#[doc(hidden)]
pub fn leave_cpu_lock<System: PortInstance>() {
    drop(take_cpu_guard());
    // A trap pended while we were masked fires as soon as interrupts are
    // re-enabled.
    poll_pending_switch::<System>();
}

#[doc(hidden)]
pub fn is_cpu_lock_active() -> bool {
    CPU_GUARD.with(|g| g.borrow().is_some())
}

#[doc(hidden)]
pub fn raise_context_switch() {
    CPU_GUARD.with(|g| {
        g.borrow_mut()
            .as_mut()
            .expect("context switch raised without the CPU lock")
            .switch_pending = true;
    });
}

/// One "instruction" in which pended interrupts are taken.
#[doc(hidden)]
pub fn dummy_instr<System: PortInstance>() {
    poll_pending_switch::<System>();
}

/// If a context switch is pended against the process this thread backs,
/// take the trap here: commit the switch in the kernel, hand the CPU to the
/// chosen thread and park until dispatched again.
fn poll_pending_switch<System: PortInstance>() {
    let me = CURRENT_FRAME.with(Cell::get);
    if me == 0 {
        return;
    }
    let state = System::port_state();
    let mut inner = state.inner.lock().unwrap();
    loop {
        let (guard, taken) = try_take_pending::<System>(state, inner, me);
        inner = guard;
        if !taken {
            break;
        }
    }
    drop(inner);
}

/// The body of the simulated context-switch trap. Caller holds the CPU
/// mutex and backs the frame at `me`.
fn try_take_pending<System: PortInstance>(
    state: &'static State,
    mut inner: MutexGuard<'static, Inner>,
    me: usize,
) -> (MutexGuard<'static, Inner>, bool) {
    if inner.switch_pending && inner.running == me {
        inner.switch_pending = false;
        // A pended request may have been overtaken by inline switches since
        // it was raised; let the kernel re-elect before committing.
        // Safety: interrupts are "masked" (we hold the CPU mutex) and the
        // poll points sit outside any kernel service
        if !unsafe { wren_kernel::choose_running_process::<System>() } {
            return (inner, false);
        }
        // Safety: as above
        let next_sp =
            unsafe { wren_kernel::context_switch_hook::<System>(StackPtr(me as *mut usize)) };
        log::trace!("trap: {me:#x} -> {:#x}", next_sp.0 as usize);
        inner = dispatch::<System>(state, inner, next_sp.0 as usize, me);
        (inner, true)
    } else {
        (inner, false)
    }
}

/// Hand the CPU to the process whose frame sits at `next`, then park until
/// this thread's own process is dispatched again.
fn dispatch<System: PortInstance>(
    state: &'static State,
    mut inner: MutexGuard<'static, Inner>,
    next: usize,
    me: usize,
) -> MutexGuard<'static, Inner> {
    // Safety: `next` was produced by `init_stack_frame`
    unsafe { spawn_backing_thread::<System>(&mut inner, next) };
    inner.running = next;
    state.dispatch_cvar.notify_all();

    let my_gen = CURRENT_GEN.with(Cell::get);
    loop {
        if inner.running == me {
            if frame_gen(&inner, me) == my_gen {
                break;
            }
            // This incarnation was terminated while parked; the frame now
            // belongs to a newer backing thread. Never resume.
            log::trace!("parking a stale backing thread for {me:#x}");
        }
        inner = state.dispatch_cvar.wait(inner).unwrap();
    }
    inner
}

fn frame_gen(inner: &Inner, frame: usize) -> u32 {
    inner
        .frame_gens
        .iter()
        .find(|(addr, _)| *addr == frame)
        .map(|(_, gen)| *gen)
        .unwrap_or(0)
}

/// Start the frame's backing thread on its first dispatch.
///
/// # Safety
///
/// `frame_addr` must point at a live `PortFrame`.
unsafe fn spawn_backing_thread<System: PortInstance>(inner: &mut Inner, frame_addr: usize) {
    // Safety: upheld by the caller; all frame accesses happen under the CPU
    // mutex
    let frame = unsafe { &mut *(frame_addr as *mut PortFrame) };
    if frame.spawned {
        return;
    }
    frame.spawned = true;
    let gen = frame.gen;
    let entry = frame.entry;
    log::trace!("spawning a backing thread for {frame_addr:#x} (gen {gen})");
    thread::Builder::new()
        .name(format!("process@{frame_addr:#x}"))
        .spawn(move || backing_thread_body::<System>(frame_addr, gen, entry))
        .unwrap();
}

fn backing_thread_body<System: PortInstance>(frame_addr: usize, gen: u32, entry: fn() -> !) {
    CURRENT_FRAME.with(|c| c.set(frame_addr));
    CURRENT_GEN.with(|c| c.set(gen));

    let state = System::port_state();
    let mut inner = state.inner.lock().unwrap();
    loop {
        if inner.running == frame_addr {
            if frame_gen(&inner, frame_addr) != gen {
                // Superseded before ever running.
                return;
            }
            break;
        }
        inner = state.dispatch_cvar.wait(inner).unwrap();
    }
    // The synthetic first frame starts with interrupts enabled.
    drop(inner);
    log::trace!("entering {frame_addr:#x}");
    entry();
}

#[doc(hidden)]
pub unsafe fn context_switch<System: PortInstance>(save_slot: *mut StackPtr, next_sp: StackPtr) {
    // The saved top-of-stack never moves on this port; the "context" is the
    // backing thread itself, so there is nothing to write back through
    // `save_slot` beyond what is already there.
    // Safety: `save_slot` points at the switched-out process's slot
    let me = unsafe { (*save_slot).0 as usize };
    let state = System::port_state();
    let inner = take_cpu_guard();
    let inner = dispatch::<System>(state, inner, next_sp.0 as usize, me);
    stash_cpu_guard(inner);
}

#[doc(hidden)]
pub unsafe fn init_stack_frame<System: PortInstance>(
    stack: StackRegion,
    entry: fn() -> !,
) -> StackPtr {
    assert!(
        stack.words * mem::size_of::<usize>() >= mem::size_of::<PortFrame>() + mem::align_of::<PortFrame>(),
        "stack region too small for the simulation frame"
    );
    let align = mem::align_of::<PortFrame>();
    let addr = (stack.base as usize + align - 1) & !(align - 1);

    // Registration and restart both run with the CPU lock held.
    let gen = CPU_GUARD.with(|g| {
        let mut g = g.borrow_mut();
        let inner = g.as_mut().expect("init_stack_frame without the CPU lock");
        match inner.frame_gens.iter_mut().find(|(a, _)| *a == addr) {
            Some((_, gen)) => {
                *gen += 1;
                *gen
            }
            None => {
                inner.frame_gens.push((addr, 0));
                0
            }
        }
    });

    // Safety: the region is exclusively owned and unused per this
    // function's contract
    unsafe {
        (addr as *mut PortFrame).write(PortFrame {
            entry,
            gen,
            spawned: false,
        });
    }
    StackPtr(addr as *mut usize)
}

#[doc(hidden)]
pub fn start_first_process<System: PortInstance>(sp: StackPtr) -> ! {
    let state = System::port_state();
    let mut inner = take_cpu_guard();
    let first = sp.0 as usize;
    // Safety: `sp` was produced by `init_stack_frame`
    unsafe { spawn_backing_thread::<System>(&mut inner, first) };
    inner.running = first;
    state.dispatch_cvar.notify_all();
    drop(inner);

    log::trace!("start_first_process: boot thread retiring");
    loop {
        thread::park();
    }
}

/// Idle-loop pause: take a pended trap if one is aimed at us, otherwise
/// doze briefly so simulated interrupts get a chance to fire.
#[doc(hidden)]
pub fn wait_for_interrupt<System: PortInstance>() {
    let me = CURRENT_FRAME.with(Cell::get);
    let state = System::port_state();
    let inner = state.inner.lock().unwrap();
    let (inner, taken) = if me != 0 {
        try_take_pending::<System>(state, inner, me)
    } else {
        (inner, false)
    };
    if !taken {
        let (inner, _) = state
            .dispatch_cvar
            .wait_timeout(inner, Duration::from_micros(100))
            .unwrap();
        drop(inner);
    } else {
        drop(inner);
    }
}

/// Run `f` as the body of a simulated interrupt handler.
///
/// Blocks while the "interrupts" are masked, exactly like a hardware
/// interrupt stays pending across a critical section. Any rescheduling the
/// handler causes is pended by the [`IsrGuard`] exit and taken at the
/// running process's next poll point.
///
/// [`IsrGuard`]: wren_kernel::IsrGuard
pub fn with_interrupt<System: PortInstance>(f: impl FnOnce()) {
    enter_cpu_lock::<System>();
    let guard = wren_kernel::IsrGuard::<System>::new();
    f();
    drop(guard);
    leave_cpu_lock::<System>();
}

/// Deliver one system timer period. While the timer is masked, one period
/// stays latched (a hardware timer's pending bit is one deep) and fires at
/// unmask; further periods are lost.
pub fn tick<System: PortInstance>() {
    let masked = with_inner::<System, _>(|inner| {
        if inner.timer_masked {
            inner.timer_latched = true;
        }
        inner.timer_masked
    });
    if masked {
        return;
    }
    with_interrupt::<System>(|| wren_kernel::system_tick::<System>());
}

/// Run `f` on the port state, borrowing a critical section the caller
/// already holds when there is one.
fn with_inner<System: PortInstance, R>(f: impl FnOnce(&mut Inner) -> R) -> R {
    CPU_GUARD.with(|g| {
        let mut g = g.borrow_mut();
        match g.as_mut() {
            Some(inner) => f(inner),
            None => f(&mut System::port_state().inner.lock().unwrap()),
        }
    })
}

#[doc(hidden)]
pub fn lock_system_timer<System: PortInstance>() {
    with_inner::<System, _>(|inner| inner.timer_masked = true);
}

#[doc(hidden)]
pub fn unlock_system_timer<System: PortInstance>() {
    let latched = with_inner::<System, _>(|inner| {
        inner.timer_masked = false;
        mem::take(&mut inner.timer_latched)
    });
    // Deliver the latched period like an interrupt taken right at unmask.
    // With the mask lifted inside a critical section, the period stays
    // latched until the next timer edge instead.
    if latched && !is_cpu_lock_active() {
        with_interrupt::<System>(|| wren_kernel::system_tick::<System>());
    }
}

/// Spawn the boot thread: run `setup` (process registration) and then the
/// kernel, which never returns. The calling thread keeps control and can
/// drive the system with [`tick`] and [`with_interrupt`].
pub fn boot<System: PortInstance>(setup: fn()) {
    let _ = env_logger::builder().is_test(true).try_init();
    thread::Builder::new()
        .name("boot".into())
        .spawn(move || {
            setup();
            wren_kernel::run::<System>()
        })
        .unwrap();
}

/// Spin (politely) until `pred` holds, panicking after a generous deadline.
/// The test harness's substitute for joining processes that never exit.
pub fn poll_until(mut pred: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !pred() {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for the system to settle"
        );
        thread::sleep(Duration::from_millis(1));
    }
}

/// Define a system type and implement the kernel's port interface on it,
/// backed by this simulator.
#[macro_export]
macro_rules! use_port {
    ($vis:vis struct $Sys:ident) => {
        $vis struct $Sys;

        const _: () = {
            static PORT_STATE: $crate::State = $crate::State::new();

            // Safety: `PORT_STATE` exists once per program
            unsafe impl $crate::PortInstance for $Sys {
                fn port_state() -> &'static $crate::State {
                    &PORT_STATE
                }
            }

            // Safety: the simulator upholds the documented contracts
            unsafe impl $crate::wren_kernel::PortThreading for $Sys {
                unsafe fn start_first_process(sp: $crate::wren_kernel::StackPtr) -> ! {
                    $crate::start_first_process::<Self>(sp)
                }

                unsafe fn context_switch(
                    save_slot: *mut $crate::wren_kernel::StackPtr,
                    next_sp: $crate::wren_kernel::StackPtr,
                ) {
                    // Safety: forwarded contract
                    unsafe { $crate::context_switch::<Self>(save_slot, next_sp) }
                }

                unsafe fn init_stack_frame(
                    stack: $crate::wren_kernel::StackRegion,
                    entry: fn() -> !,
                ) -> $crate::wren_kernel::StackPtr {
                    // Safety: forwarded contract
                    unsafe { $crate::init_stack_frame::<Self>(stack, entry) }
                }

                unsafe fn raise_context_switch() {
                    $crate::raise_context_switch()
                }

                fn dummy_instr() {
                    $crate::dummy_instr::<Self>()
                }

                unsafe fn enter_cpu_lock() {
                    $crate::enter_cpu_lock::<Self>()
                }

                unsafe fn leave_cpu_lock() {
                    $crate::leave_cpu_lock::<Self>()
                }

                fn is_cpu_lock_active() -> bool {
                    $crate::is_cpu_lock_active()
                }

                unsafe fn lock_system_timer() {
                    $crate::lock_system_timer::<Self>()
                }

                unsafe fn unlock_system_timer() {
                    $crate::unlock_system_timer::<Self>()
                }

                fn wait_for_interrupt() {
                    $crate::wait_for_interrupt::<Self>()
                }
            }
        };
    };
}

/// Used by `use_port!`
#[doc(hidden)]
pub extern crate wren_kernel;
