//! A consumer's bounded wait on an empty channel expires after the given
//! number of timer periods, leaving the channel untouched.
use wren_kernel::{Channel, Process};
use wren_port_std::{poll_until, tick};

mod common;
use common::SeqTracker;

wren_port_std::use_port!(struct SystemTraits);
impl wren_kernel::KernelHooks for SystemTraits {}
wren_kernel::configure_kernel! {
    system = SystemTraits,
    process_count = 2,
    idle_stack_words = 256,
}

static SEQ: SeqTracker = SeqTracker::new();
static CHANNEL: Channel<SystemTraits, i32, 4> = Channel::new();

static CONSUMER: Process<SystemTraits, 256> = Process::new(0, consumer_body);

fn consumer_body() -> ! {
    assert_eq!(CHANNEL.pop(3), None);

    SEQ.expect_and_replace(0, 1);
    assert_eq!(CHANNEL.get_count(), 0);

    loop {
        wren_kernel::sleep::<SystemTraits>(0);
    }
}

#[test]
fn pop_times_out() {
    wren_port_std::boot::<SystemTraits>(|| {
        CONSUMER.register();
    });

    poll_until(|| CONSUMER.is_sleeping());

    for _ in 0..2 {
        tick::<SystemTraits>();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert_eq!(SEQ.get(), 0);
    }

    tick::<SystemTraits>();
    poll_until(|| SEQ.get() == 1);
}
