//! Event flags
use crate::{
    agent::{self, WaiterMap},
    klock::{self, CpuLockCell},
    proc::Timeout,
    utils::Init,
    KernelTraits, PortThreading,
};

/// A broadcast binary event.
///
/// [`signal`](Self::signal) resumes *every* process currently blocked in
/// [`wait`](Self::wait); with nobody waiting the event latches instead, and
/// the single pending flag is consumed by exactly one later `wait`.
pub struct EventFlag<System: PortThreading> {
    value: CpuLockCell<System, bool>,
    waiters: WaiterMap<System>,
}

impl<System: PortThreading> EventFlag<System> {
    pub const fn new() -> Self {
        Self {
            value: CpuLockCell::new(false),
            waiters: WaiterMap::new(),
        }
    }
}

impl<System: PortThreading> Init for EventFlag<System> {
    const INIT: Self = Self::new();
}

impl<System: PortThreading> Default for EventFlag<System> {
    fn default() -> Self {
        Self::new()
    }
}

impl<System: KernelTraits> EventFlag<System> {
    /// Consume a pending event, or block until one arrives. A non-zero
    /// `timeout` bounds the wait in timer periods; `0` waits indefinitely.
    ///
    /// Returns `false` iff the wait expired without an event.
    pub fn wait(&'static self, timeout: Timeout) -> bool {
        let mut lock = klock::lock_cpu::<System>();

        if self.value.get(&*lock) {
            self.value.replace(&mut *lock, false);
            return true;
        }

        agent::set_cur_timeout::<System>(lock.borrow_mut(), timeout);
        self.waiters.suspend(lock.borrow_mut());

        if self.waiters.timed_out(lock.borrow_mut()) {
            false
        } else {
            agent::clear_cur_timeout::<System>(lock.borrow_mut());
            true
        }
    }

    /// Raise the event: resume all waiters, or latch the flag if there are
    /// none.
    pub fn signal(&'static self) {
        let mut lock = klock::lock_cpu::<System>();
        if !self.waiters.resume_all(lock.borrow_mut()) {
            self.value.replace(&mut *lock, true);
        }
    }

    /// [`signal`](Self::signal) for interrupt handlers.
    pub fn signal_isr(&'static self) {
        let mut lock = klock::lock_cpu::<System>();
        if !self.waiters.resume_all_isr(lock.borrow_mut()) {
            self.value.replace(&mut *lock, true);
        }
    }

    /// Drop a pending event, if any.
    pub fn clear(&self) {
        let mut lock = klock::lock_cpu::<System>();
        self.value.replace(&mut *lock, false);
    }

    /// Whether an event is pending.
    pub fn is_signaled(&self) -> bool {
        let lock = klock::lock_cpu::<System>();
        self.value.get(&*lock)
    }
}
