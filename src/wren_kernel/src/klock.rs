//! Kernel state locking mechanism
use core::{fmt, ops};
use tokenlock::UnsyncTokenLock;

use crate::{utils::Init, PortThreading};

pub struct CpuLockTag<System>(System);

/// The key that "unlocks" [`CpuLockCell`].
pub(super) type CpuLockToken<System> = tokenlock::UnsyncSingletonToken<CpuLockTag<System>>;

/// The keyhole type for [`UnsyncTokenLock`] that can be "unlocked" by
/// [`CpuLockToken`].
pub type CpuLockKeyhole<System> = tokenlock::SingletonTokenId<CpuLockTag<System>>;

/// Cell type that can be accessed by [`CpuLockToken`] (which can be obtained
/// by [`lock_cpu`]).
pub struct CpuLockCell<System, T: ?Sized>(UnsyncTokenLock<T, CpuLockKeyhole<System>>);

impl<System, T> CpuLockCell<System, T> {
    pub(super) const fn new(x: T) -> Self {
        Self(UnsyncTokenLock::new(CpuLockKeyhole::INIT, x))
    }
}

impl<System, T: Init> Init for CpuLockCell<System, T> {
    const INIT: Self = Self(Init::INIT);
}

impl<System, T: fmt::Debug> fmt::Debug for CpuLockCell<System, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("CpuLockCell(< locked >)")
    }
}

impl<System, T> ops::Deref for CpuLockCell<System, T> {
    type Target = UnsyncTokenLock<T, CpuLockKeyhole<System>>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<System, T> ops::DerefMut for CpuLockCell<System, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Enter a CPU Lock state (if not already in one) and get an RAII guard.
///
/// The guard restores the previous interrupt-mask state on drop, so nesting
/// with a user-owned [`CriticalSection`](crate::CriticalSection) is fine.
///
/// The caller must not already hold a `CpuLockGuard` in the same context:
/// every kernel entry point acquires the guard exactly once and passes a
/// borrowed token down to the code that needs it.
pub(super) fn lock_cpu<System: PortThreading>() -> CpuLockGuard<System> {
    let unlock_on_drop = if System::is_cpu_lock_active() {
        false
    } else {
        // Safety: paired with `leave_cpu_lock` in `drop`
        unsafe { System::enter_cpu_lock() };
        true
    };

    // Safety: interrupts are masked and no other token is in active use in
    // this context (see above)
    CpuLockGuard {
        token: unsafe { CpuLockToken::new_unchecked() },
        unlock_on_drop,
    }
}

/// Assume a CPU Lock state and get `CpuLockGuard`. The guard does not
/// relinquish the lock on drop.
///
/// # Safety
///
/// Interrupts must be really masked. There must be no usable instances of
/// `CpuLockGuard` existing at the point of the call.
pub(super) unsafe fn assume_cpu_lock<System: PortThreading>() -> CpuLockGuard<System> {
    CpuLockGuard {
        // Safety: upheld by the caller
        token: unsafe { CpuLockToken::new_unchecked() },
        unlock_on_drop: false,
    }
}

/// RAII guard for a CPU Lock state.
///
/// [`CpuLockToken`] can be borrowed from this type.
pub(super) struct CpuLockGuard<System: PortThreading> {
    token: CpuLockToken<System>,
    unlock_on_drop: bool,
}

impl<System: PortThreading> CpuLockGuard<System> {
    /// Construct a [`CpuLockTokenRefMut`] by borrowing `self`.
    pub(super) fn borrow_mut(&mut self) -> CpuLockTokenRefMut<'_, System> {
        self.token.borrow_mut()
    }
}

impl<System: PortThreading> Drop for CpuLockGuard<System> {
    fn drop(&mut self) {
        if self.unlock_on_drop {
            // Safety: the lock was entered by `lock_cpu`
            unsafe { System::leave_cpu_lock() };
        }
    }
}

impl<System: PortThreading> ops::Deref for CpuLockGuard<System> {
    type Target = CpuLockToken<System>;
    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

impl<System: PortThreading> ops::DerefMut for CpuLockGuard<System> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.token
    }
}

/// Borrowed version of [`CpuLockGuard`]. This is equivalent to
/// `&'a mut CpuLockGuard` but does not consume memory.
///
///  - Always prefer this over `&mut CpuLockGuard` in function parameters.
///  - When you pass `&'a mut _` to a function, the compiler automatically
///    reborrows it as `&'b mut _` so that the original `&'a mut _` remains
///    accessible after the function call. This does not happen with
///    `CpuLockTokenRefMut`. You have to call [`borrow_mut`] manually.
///
/// [`borrow_mut`]: tokenlock::UnsyncSingletonTokenRefMut::borrow_mut
pub(super) type CpuLockTokenRefMut<'a, System> =
    tokenlock::UnsyncSingletonTokenRefMut<'a, CpuLockTag<System>>;
