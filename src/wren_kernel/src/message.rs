//! Typed messages
use crate::{
    agent::{self, WaiterMap},
    klock::{self, CpuLockCell},
    proc::Timeout,
    utils::Init,
    KernelTraits, PortThreading,
};

/// A broadcast event carrying a single `T` payload.
///
/// The payload slot and the event are decoupled: [`assign`](Self::assign)
/// stores a value without announcing it, [`send`](Self::send) announces
/// whatever the slot holds. The slot retains its last value between sends,
/// so every resumed waiter (and any later reader) sees the same payload.
pub struct Message<System: PortThreading, T: 'static> {
    non_empty: CpuLockCell<System, bool>,
    waiters: WaiterMap<System>,
    payload: CpuLockCell<System, T>,
}

impl<System: PortThreading, T> Message<System, T> {
    pub const fn new(initial: T) -> Self {
        Self {
            non_empty: CpuLockCell::new(false),
            waiters: WaiterMap::new(),
            payload: CpuLockCell::new(initial),
        }
    }
}

impl<System: PortThreading, T: Init> Init for Message<System, T> {
    const INIT: Self = Self::new(T::INIT);
}

impl<System: KernelTraits, T: 'static> Message<System, T> {
    /// Store `msg` in the slot. Does not announce it; pair with
    /// [`send`](Self::send).
    pub fn assign(&self, msg: T) {
        let mut lock = klock::lock_cpu::<System>();
        self.payload.replace(&mut *lock, msg);
    }

    /// Announce the slot's contents: resume all waiters, or mark the
    /// message pending if there are none.
    pub fn send(&'static self) {
        let mut lock = klock::lock_cpu::<System>();
        if !self.waiters.resume_all(lock.borrow_mut()) {
            self.non_empty.replace(&mut *lock, true);
        }
    }

    /// [`send`](Self::send) for interrupt handlers.
    pub fn send_isr(&'static self) {
        let mut lock = klock::lock_cpu::<System>();
        if !self.waiters.resume_all_isr(lock.borrow_mut()) {
            self.non_empty.replace(&mut *lock, true);
        }
    }

    /// Consume a pending message announcement, or block until one arrives.
    /// `timeout` as in [`EventFlag::wait`](crate::EventFlag::wait).
    ///
    /// Returns `false` iff the wait expired. Read the payload with
    /// [`out`](Self::out) afterwards.
    pub fn wait(&'static self, timeout: Timeout) -> bool {
        let mut lock = klock::lock_cpu::<System>();

        if self.non_empty.get(&*lock) {
            self.non_empty.replace(&mut *lock, false);
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

    /// Drop a pending announcement, if any.
    pub fn reset(&self) {
        let mut lock = klock::lock_cpu::<System>();
        self.non_empty.replace(&mut *lock, false);
    }

    /// Whether an announcement is pending.
    pub fn is_non_empty(&self) -> bool {
        let lock = klock::lock_cpu::<System>();
        self.non_empty.get(&*lock)
    }
}

impl<System: KernelTraits, T: Clone + 'static> Message<System, T> {
    /// Copy the slot's contents out.
    pub fn out(&self) -> T {
        let lock = klock::lock_cpu::<System>();
        self.payload.read(&*lock).clone()
    }
}
