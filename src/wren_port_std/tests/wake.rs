//! `wake_up` cuts a finite sleep short but ignores processes that did not
//! opt into one; `force_wake_up` yanks a service waiter out regardless, and
//! the interrupted call reports a timeout.
use wren_kernel::{EventFlag, Process};
use wren_port_std::poll_until;

mod common;
use common::SeqTracker;

wren_port_std::use_port!(struct SystemTraits);
impl wren_kernel::KernelHooks for SystemTraits {}
wren_kernel::configure_kernel! {
    system = SystemTraits,
    process_count = 3,
    idle_stack_words = 256,
}

static SEQ: SeqTracker = SeqTracker::new();
static EVENT: EventFlag<SystemTraits> = EventFlag::new();

static WAITER: Process<SystemTraits, 256> = Process::new(0, waiter_body);
static POKER: Process<SystemTraits, 256> = Process::new(1, poker_body);

fn sleep_forever() -> ! {
    loop {
        wren_kernel::sleep::<SystemTraits>(0);
    }
}

fn waiter_body() -> ! {
    SEQ.expect_and_replace(0, 1);
    wren_kernel::sleep::<SystemTraits>(10_000); // cut short by `wake_up`

    SEQ.expect_and_replace(2, 3);
    assert!(!WAITER.is_sleeping());

    // An unbounded service wait, interrupted by force_wake_up, comes back
    // as a timeout.
    assert!(!EVENT.wait(0));
    SEQ.expect_and_replace(4, 5);

    // The event was not consumed by the forced wake.
    assert!(!EVENT.is_signaled());
    EVENT.signal();
    assert!(EVENT.wait(0)); // latched, returns immediately

    SEQ.expect_and_replace(5, 6);
    sleep_forever()
}

fn poker_body() -> ! {
    SEQ.expect_and_replace(1, 2);

    WAITER.wake_up(); // preempts us: the waiter is more urgent

    SEQ.expect_and_replace(3, 4);

    // `wake_up` on a process with no deadline pending is a no-op.
    WAITER.wake_up();
    assert_eq!(SEQ.get(), 4);

    WAITER.force_wake_up(); // preempts us again

    SEQ.expect_and_replace(6, 7);
    sleep_forever()
}

#[test]
fn wake_and_force_wake() {
    wren_port_std::boot::<SystemTraits>(|| {
        WAITER.register();
        POKER.register();
    });

    poll_until(|| SEQ.get() == 7);
}
