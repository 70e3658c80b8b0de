//! Mutexes
use crate::{
    agent::{self, WaiterMap},
    klock::{self, CpuLockCell},
    proc::Timeout,
    procmap::ProcessMap,
    utils::Init,
    KernelTraits, PortThreading,
};

/// An ownership-tagged binary lock.
///
/// Unlocking hands the mutex directly to the most urgent waiter: its tag
/// becomes the owner tag before anything else runs, so a later `lock` by a
/// third process cannot slip in between. No priority inheritance; deadlock
/// avoidance is the caller's responsibility.
pub struct Mutex<System: PortThreading> {
    /// The owning process's tag; `0` while unlocked. At most one process's
    /// tag equals this at any instant.
    owner_tag: CpuLockCell<System, ProcessMap>,
    waiters: WaiterMap<System>,
}

impl<System: PortThreading> Mutex<System> {
    pub const fn new() -> Self {
        Self {
            owner_tag: CpuLockCell::new(0),
            waiters: WaiterMap::new(),
        }
    }
}

impl<System: PortThreading> Init for Mutex<System> {
    const INIT: Self = Self::new();
}

impl<System: PortThreading> Default for Mutex<System> {
    fn default() -> Self {
        Self::new()
    }
}

impl<System: KernelTraits> Mutex<System> {
    /// Acquire the mutex, blocking for as long as it takes.
    ///
    /// On return the calling process owns the mutex, even after a forced
    /// wake, because this call cannot tell a forced wake from a handover.
    /// That is one of the ways `force_wake_up` breaks service invariants.
    pub fn lock(&'static self) {
        let mut lock = klock::lock_cpu::<System>();
        let tag = agent::cur_proc_prio_tag::<System>(lock.borrow_mut());

        if self.owner_tag.get(&*lock) == 0 {
            self.owner_tag.replace(&mut *lock, tag);
            return;
        }

        self.waiters.suspend(lock.borrow_mut());

        // Normally the unlocker already wrote our tag; writing it again is
        // harmless and also covers the forced-wake case.
        let _ = self.waiters.timed_out(lock.borrow_mut());
        self.owner_tag.replace(&mut *lock, tag);
    }

    /// Acquire the mutex only if it is free right now.
    pub fn try_lock(&'static self) -> bool {
        let mut lock = klock::lock_cpu::<System>();
        if self.owner_tag.get(&*lock) == 0 {
            let tag = agent::cur_proc_prio_tag::<System>(lock.borrow_mut());
            self.owner_tag.replace(&mut *lock, tag);
            true
        } else {
            false
        }
    }

    /// Acquire the mutex, giving up after `timeout` timer periods (`0` =
    /// wait indefinitely). Returns whether the mutex is now owned by the
    /// caller; after `false` the caller must not unlock.
    pub fn try_lock_timeout(&'static self, timeout: Timeout) -> bool {
        let mut lock = klock::lock_cpu::<System>();
        let tag = agent::cur_proc_prio_tag::<System>(lock.borrow_mut());

        if self.owner_tag.get(&*lock) == 0 {
            self.owner_tag.replace(&mut *lock, tag);
            return true;
        }

        agent::set_cur_timeout::<System>(lock.borrow_mut(), timeout);
        self.waiters.suspend(lock.borrow_mut());

        if self.waiters.timed_out(lock.borrow_mut()) {
            // No unlocker chose us; the mutex belongs to someone else.
            false
        } else {
            agent::clear_cur_timeout::<System>(lock.borrow_mut());
            self.owner_tag.replace(&mut *lock, tag);
            true
        }
    }

    /// Release the mutex. Only the owner may call this.
    ///
    /// If anyone is waiting, ownership passes to the most urgent waiter
    /// before the scheduler runs.
    pub fn unlock(&'static self) {
        let mut lock = klock::lock_cpu::<System>();
        debug_assert_eq!(
            self.owner_tag.get(&*lock),
            agent::cur_proc_prio_tag::<System>(lock.borrow_mut()),
            "unlock by a process that does not own the mutex"
        );

        match self.waiters.pop_highest(lock.borrow_mut()) {
            Some(tag) => {
                self.owner_tag.replace(&mut *lock, tag);
                agent::resume::<System>(tag, lock.borrow_mut());
            }
            None => {
                self.owner_tag.replace(&mut *lock, 0);
            }
        }
    }

    /// [`unlock`](Self::unlock) for interrupt handlers.
    pub fn unlock_isr(&'static self) {
        let mut lock = klock::lock_cpu::<System>();

        match self.waiters.pop_highest(lock.borrow_mut()) {
            Some(tag) => {
                self.owner_tag.replace(&mut *lock, tag);
                agent::resume_isr::<System>(tag, lock.borrow_mut());
            }
            None => {
                self.owner_tag.replace(&mut *lock, 0);
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        let lock = klock::lock_cpu::<System>();
        self.owner_tag.get(&*lock) != 0
    }
}
