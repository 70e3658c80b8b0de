//! The kernel agent: the narrow gateway through which IPC services touch
//! scheduler state.
//!
//! Everything a service may do to a process (suspend the caller on a
//! waiter set, detect that a wait ended by expiry rather than by a grant,
//! resume one or all waiters) lives here and nowhere else. Services hold a
//! [`WaiterMap`] per waiter set and call these operations with the CPU-lock
//! token they already own; none of them reach into `State` directly.
use crate::{
    klock::{CpuLockCell, CpuLockTokenRefMut},
    proc::{self, ProcessCb},
    procmap::{self, ProcessMap},
    utils::Init,
    KernelTraits, PortThreading,
};

/// The control block of the currently executing process.
pub(crate) fn cur_proc<System: KernelTraits>(
    lock: CpuLockTokenRefMut<'_, System>,
) -> &'static ProcessCb<System> {
    let cur = System::state().cur_priority.get(&*lock);
    System::process_table()[cur].get(&*lock).unwrap()
}

/// The tag of the currently executing process.
pub(crate) fn cur_proc_prio_tag<System: KernelTraits>(
    lock: CpuLockTokenRefMut<'_, System>,
) -> ProcessMap {
    procmap::prio_tag::<System>(System::state().cur_priority.get(&*lock))
}

/// Make the process identified by `tag` ready and reschedule.
pub(crate) fn resume<System: KernelTraits>(
    tag: ProcessMap,
    mut lock: CpuLockTokenRefMut<'_, System>,
) {
    System::state()
        .ready_map
        .replace_with(&mut *lock, |m| *m | tag);
    crate::sched::scheduler(lock.borrow_mut());
}

/// Like [`resume`], without the scheduler call: inside an interrupt handler
/// the [`IsrGuard`](crate::IsrGuard) exit reschedules instead.
pub(crate) fn resume_isr<System: KernelTraits>(
    tag: ProcessMap,
    mut lock: CpuLockTokenRefMut<'_, System>,
) {
    System::state()
        .ready_map
        .replace_with(&mut *lock, |m| *m | tag);
}

/// A set of processes blocked on one aspect of one service.
///
/// A process's tag is in at most one waiter map at any time.
pub struct WaiterMap<System: PortThreading> {
    map: CpuLockCell<System, ProcessMap>,
}

impl<System: PortThreading> WaiterMap<System> {
    pub(crate) const fn new() -> Self {
        Self {
            map: CpuLockCell::new(0),
        }
    }
}

impl<System: PortThreading> Init for WaiterMap<System> {
    const INIT: Self = Self::new();
}

impl<System: KernelTraits> WaiterMap<System> {
    /// Move the calling process from the ready set into this waiter set and
    /// reschedule. Returns when the process has been resumed by some means:
    /// a service resuming it (which also withdraws its tag), its timeout
    /// expiring, or a forced wake (both of which leave the tag in place,
    /// see [`timed_out`](Self::timed_out)).
    pub(crate) fn suspend(&'static self, mut lock: CpuLockTokenRefMut<'_, System>) {
        let state = System::state();
        let cur = state.cur_priority.get(&*lock);
        let tag = procmap::prio_tag::<System>(cur);

        self.map.replace_with(&mut *lock, |m| *m | tag);
        state.ready_map.replace_with(&mut *lock, |m| *m & !tag);

        let cb = System::process_table()[cur].get(&*lock).unwrap();
        cb.waiting_map.replace(&mut *lock, Some(self));

        crate::sched::scheduler(lock.borrow_mut());

        // Resumed; the caller decides next what kind of resumption this was.
        cb.waiting_map.replace(&mut *lock, None);
    }

    /// After a [`suspend`](Self::suspend) returned: whether the resumption
    /// was *not* performed by a service. If so, the caller's tag is
    /// withdrawn here, exactly once, before this returns true.
    pub(crate) fn timed_out(&self, mut lock: CpuLockTokenRefMut<'_, System>) -> bool {
        let tag = cur_proc_prio_tag::<System>(lock.borrow_mut());
        let m = self.map.get(&*lock);
        if m & tag != 0 {
            self.map.replace(&mut *lock, m & !tag);
            true
        } else {
            false
        }
    }

    /// Withdraw the most urgent waiter's tag without resuming it.
    pub(crate) fn pop_highest(
        &self,
        mut lock: CpuLockTokenRefMut<'_, System>,
    ) -> Option<ProcessMap> {
        let m = self.map.get(&*lock);
        if m == 0 {
            None
        } else {
            let tag = procmap::highest_prio_tag::<System>(m);
            self.map.replace(&mut *lock, m & !tag);
            Some(tag)
        }
    }

    /// Withdraw a specific tag, e.g. when its process is being restarted.
    #[cfg(feature = "process-restart")]
    pub(crate) fn withdraw(&self, mut lock: CpuLockTokenRefMut<'_, System>, tag: ProcessMap) {
        self.map.replace_with(&mut *lock, |m| *m & !tag);
    }

    /// Resume every waiter and reschedule. Returns whether there was any.
    pub(crate) fn resume_all(&self, mut lock: CpuLockTokenRefMut<'_, System>) -> bool {
        let m = self.map.replace(&mut *lock, 0);
        if m == 0 {
            return false;
        }
        resume::<System>(m, lock.borrow_mut());
        true
    }

    /// Resume only the most urgent waiter and reschedule. Returns whether
    /// there was one.
    pub(crate) fn resume_next_ready(&self, mut lock: CpuLockTokenRefMut<'_, System>) -> bool {
        if let Some(tag) = self.pop_highest(lock.borrow_mut()) {
            resume::<System>(tag, lock.borrow_mut());
            true
        } else {
            false
        }
    }

    /// [`resume_all`](Self::resume_all) for interrupt handlers: no
    /// scheduler call.
    pub(crate) fn resume_all_isr(&self, mut lock: CpuLockTokenRefMut<'_, System>) -> bool {
        let m = self.map.replace(&mut *lock, 0);
        if m == 0 {
            return false;
        }
        resume_isr::<System>(m, lock.borrow_mut());
        true
    }

}

/// Set the calling process's deadline. Belongs with [`WaiterMap::suspend`]
/// in every timed wait.
pub(crate) fn set_cur_timeout<System: KernelTraits>(
    mut lock: CpuLockTokenRefMut<'_, System>,
    timeout: proc::Timeout,
) {
    let cb = cur_proc::<System>(lock.borrow_mut());
    cb.timeout.replace(&mut *lock, timeout);
}

/// Clear the calling process's deadline after a granted timed wait, so a
/// stale expiry cannot ready the process spuriously later.
pub(crate) fn clear_cur_timeout<System: KernelTraits>(mut lock: CpuLockTokenRefMut<'_, System>) {
    let cb = cur_proc::<System>(lock.borrow_mut());
    cb.timeout.replace(&mut *lock, 0);
}
