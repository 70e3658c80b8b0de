//! One signal resumes every waiter at once, in priority order; with nobody
//! waiting the event latches and is consumed by exactly one later wait.
use wren_kernel::{EventFlag, Process};
use wren_port_std::poll_until;

mod common;
use common::SeqTracker;

wren_port_std::use_port!(struct SystemTraits);
impl wren_kernel::KernelHooks for SystemTraits {}
wren_kernel::configure_kernel! {
    system = SystemTraits,
    process_count = 5,
    idle_stack_words = 256,
}

static SEQ: SeqTracker = SeqTracker::new();
static FLAG: EventFlag<SystemTraits> = EventFlag::new();

static WAITER_A: Process<SystemTraits, 256> = Process::new(0, waiter_a_body);
static WAITER_B: Process<SystemTraits, 256> = Process::new(1, waiter_b_body);
static WAITER_C: Process<SystemTraits, 256> = Process::new(2, waiter_c_body);
static SIGNALER: Process<SystemTraits, 256> = Process::new(3, signaler_body);

fn sleep_forever() -> ! {
    loop {
        wren_kernel::sleep::<SystemTraits>(0);
    }
}

fn waiter_a_body() -> ! {
    SEQ.expect_and_replace(0, 1);
    assert!(FLAG.wait(0));
    // All three waiters resume off one signal, most urgent first.
    SEQ.expect_and_replace(4, 5);
    sleep_forever()
}

fn waiter_b_body() -> ! {
    SEQ.expect_and_replace(1, 2);
    assert!(FLAG.wait(0));
    SEQ.expect_and_replace(5, 6);
    sleep_forever()
}

fn waiter_c_body() -> ! {
    SEQ.expect_and_replace(2, 3);
    assert!(FLAG.wait(0));
    SEQ.expect_and_replace(6, 7);
    sleep_forever()
}

fn signaler_body() -> ! {
    SEQ.expect_and_replace(3, 4);
    assert!(!FLAG.is_signaled());

    FLAG.signal(); // wakes a, b and c; they all run before us

    SEQ.expect_and_replace(7, 8);
    // Consumed by the broadcast: nothing latched.
    assert!(!FLAG.is_signaled());

    // Nobody is waiting now, so this one latches ...
    FLAG.signal();
    assert!(FLAG.is_signaled());

    // ... and `clear` drops it again.
    FLAG.clear();
    assert!(!FLAG.is_signaled());

    FLAG.signal();
    SEQ.expect_and_replace(8, 9);
    sleep_forever()
}

#[test]
fn broadcast_and_latch() {
    wren_port_std::boot::<SystemTraits>(|| {
        WAITER_A.register();
        WAITER_B.register();
        WAITER_C.register();
        SIGNALER.register();
    });

    poll_until(|| SEQ.get() == 9);
    // The latched event is still pending; one wait would consume it.
    assert!(FLAG.is_signaled());
}
