//! The profiler charges elapsed counter time to the outgoing process and
//! normalizes the accumulators to per-mille shares.
use std::sync::atomic::{AtomicU32, Ordering};

use wren_kernel::{Priority, Process, Profiler};
use wren_port_std::poll_until;

mod common;
use common::SeqTracker;

wren_port_std::use_port!(struct SystemTraits);

const PROCESS_COUNT: usize = 3;

/// A fake free-running clock: every sample advances it, so each context
/// switch charges a deterministic, non-zero interval.
static CLOCK: AtomicU32 = AtomicU32::new(0);
static PROFILER: Profiler<SystemTraits, PROCESS_COUNT> = Profiler::new();

impl wren_kernel::KernelHooks for SystemTraits {
    fn context_switch_user_hook(from: Priority, _to: Priority) {
        PROFILER.advance(from);
    }

    fn profiler_timestamp() -> u32 {
        CLOCK.fetch_add(7, Ordering::SeqCst) + 7
    }
}

wren_kernel::configure_kernel! {
    system = SystemTraits,
    process_count = PROCESS_COUNT,
    idle_stack_words = 256,
}

static SEQ: SeqTracker = SeqTracker::new();

static WORKER_A: Process<SystemTraits, 256> = Process::new(0, worker_a_body);
static WORKER_B: Process<SystemTraits, 256> = Process::new(1, worker_b_body);

fn sleep_forever() -> ! {
    loop {
        wren_kernel::sleep::<SystemTraits>(0);
    }
}

fn worker_a_body() -> ! {
    SEQ.expect_and_replace(0, 1);
    sleep_forever()
}

fn worker_b_body() -> ! {
    SEQ.expect_and_replace(1, 2);
    sleep_forever()
}

#[test]
fn shares_sum_to_scale() {
    wren_port_std::boot::<SystemTraits>(|| {
        WORKER_A.register();
        WORKER_B.register();
    });

    poll_until(|| SEQ.get() == 2);
    // Let the last switch (into the idle process) land so the counters go
    // quiet.
    poll_until(|| wren_kernel::cur_proc_priority::<SystemTraits>() == PROCESS_COUNT - 1);

    // Two processes suspended themselves: at least two switches were
    // charged by now.
    PROFILER.process_data();
    let shares: Vec<u32> = (0..PROCESS_COUNT).map(|p| PROFILER.proc_share(p)).collect();
    let total: u32 = shares.iter().sum();
    assert!(total > 0 && total <= 1000, "implausible shares: {shares:?}");

    // A fresh window with no switches leaves the previous result standing.
    let before: Vec<u32> = (0..PROCESS_COUNT).map(|p| PROFILER.proc_share(p)).collect();
    PROFILER.process_data();
    let after: Vec<u32> = (0..PROCESS_COUNT).map(|p| PROFILER.proc_share(p)).collect();
    assert_eq!(before, after);
}
