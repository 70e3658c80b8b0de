//! CPU-share profiling
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::{procmap::Priority, KernelTraits};

/// Scale of the normalized results: shares sum to roughly this value.
const SHARE_SCALE: u32 = 1000;

/// Accumulates CPU time per priority, measured with the port's free-running
/// counter ([`KernelHooks::profiler_timestamp`]).
///
/// Wire [`advance`](Self::advance) into
/// [`KernelHooks::context_switch_user_hook`]; call
/// [`process_data`](Self::process_data) from a housekeeping process to turn
/// the raw accumulators into per-mille shares.
///
/// The fields are plain atomics rather than lock-guarded cells because
/// `advance` runs inside the switcher, where the CPU-lock token is already
/// spoken for.
///
/// [`KernelHooks::profiler_timestamp`]: crate::KernelHooks::profiler_timestamp
/// [`KernelHooks::context_switch_user_hook`]: crate::KernelHooks::context_switch_user_hook
pub struct Profiler<System: KernelTraits, const N: usize> {
    counters: [AtomicU32; N],
    last_stamp: AtomicU32,
    shares: [AtomicU32; N],
    _marker: PhantomData<System>,
}

impl<System: KernelTraits, const N: usize> Profiler<System, N> {
    pub const fn new() -> Self {
        const ZERO: AtomicU32 = AtomicU32::new(0);
        Self {
            counters: [ZERO; N],
            last_stamp: AtomicU32::new(0),
            shares: [ZERO; N],
            _marker: PhantomData,
        }
    }

    /// Charge the time elapsed since the previous switch to the process
    /// being switched out. Call from the context-switch user hook with the
    /// outgoing priority.
    pub fn advance(&self, from: Priority) {
        let now = System::profiler_timestamp();
        let last = self.last_stamp.swap(now, Ordering::Relaxed);
        self.counters[from].fetch_add(now.wrapping_sub(last), Ordering::Relaxed);
    }

    /// Fold the accumulators into per-mille shares and restart the
    /// measurement window.
    pub fn process_data(&self) {
        let mut counts = [0u32; N];
        let mut total = 0u64;
        for (count, counter) in counts.iter_mut().zip(&self.counters) {
            *count = counter.swap(0, Ordering::Relaxed);
            total += *count as u64;
        }
        if total == 0 {
            return;
        }
        for (count, share) in counts.iter().zip(&self.shares) {
            share.store(
                ((*count as u64 * SHARE_SCALE as u64) / total) as u32,
                Ordering::Relaxed,
            );
        }
    }

    /// The given priority's share of the previous measurement window, in
    /// per-mille.
    pub fn proc_share(&self, priority: Priority) -> u32 {
        self.shares[priority].load(Ordering::Relaxed)
    }
}

impl<System: KernelTraits, const N: usize> Default for Profiler<System, N> {
    fn default() -> Self {
        Self::new()
    }
}
