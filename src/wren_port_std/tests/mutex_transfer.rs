//! Unlocking hands the mutex to the most urgent waiter; a lower-priority
//! waiter stays blocked until its own turn comes.
use wren_kernel::{EventFlag, Mutex, Process};
use wren_port_std::poll_until;

mod common;
use common::SeqTracker;

wren_port_std::use_port!(struct SystemTraits);
impl wren_kernel::KernelHooks for SystemTraits {}
wren_kernel::configure_kernel! {
    system = SystemTraits,
    process_count = 4,
    idle_stack_words = 256,
}

static SEQ: SeqTracker = SeqTracker::new();
static MUTEX: Mutex<SystemTraits> = Mutex::new();
static GATE_HIGH: EventFlag<SystemTraits> = EventFlag::new();
static GATE_MID: EventFlag<SystemTraits> = EventFlag::new();

static HIGH: Process<SystemTraits, 256> = Process::new(0, high_body);
static MID: Process<SystemTraits, 256> = Process::new(1, mid_body);
static LOW: Process<SystemTraits, 256> = Process::new(2, low_body);

fn sleep_forever() -> ! {
    loop {
        wren_kernel::sleep::<SystemTraits>(0);
    }
}

fn high_body() -> ! {
    SEQ.expect_and_replace(0, 1);
    assert!(GATE_HIGH.wait(0));

    SEQ.expect_and_replace(3, 4);
    MUTEX.lock(); // `low` owns it; blocks

    // `low`'s unlock chose us over `mid`.
    SEQ.expect_and_replace(7, 8);
    assert!(MUTEX.is_locked());
    assert!(wren_kernel::get_proc::<SystemTraits>(1)
        .unwrap()
        .is_suspended()); // `mid` is still queued on the mutex

    // `unlock` asserts ownership internally; passing it on proves the
    // transfer reached us.
    MUTEX.unlock(); // `mid` becomes the owner but cannot preempt us
    SEQ.expect_and_replace(8, 9);
    sleep_forever()
}

fn mid_body() -> ! {
    SEQ.expect_and_replace(1, 2);
    assert!(GATE_MID.wait(0));

    SEQ.expect_and_replace(5, 6);
    MUTEX.lock(); // blocks behind `high`

    SEQ.expect_and_replace(9, 10);
    MUTEX.unlock();
    sleep_forever()
}

fn low_body() -> ! {
    SEQ.expect_and_replace(2, 3);
    assert!(MUTEX.try_lock()); // uncontended
    assert!(!MUTEX.try_lock()); // already taken (by us)

    GATE_HIGH.signal(); // `high` runs until it blocks on the mutex
    SEQ.expect_and_replace(4, 5);

    GATE_MID.signal(); // `mid` runs until it blocks behind `high`
    SEQ.expect_and_replace(6, 7);

    MUTEX.unlock(); // ownership passes straight to `high`

    SEQ.expect_and_replace(10, 11);
    sleep_forever()
}

#[test]
fn ownership_transfer() {
    wren_port_std::boot::<SystemTraits>(|| {
        HIGH.register();
        MID.register();
        LOW.register();
    });

    poll_until(|| SEQ.get() == 11);
    assert!(!MUTEX.is_locked());
}
