//! A producer blocks on a full channel and resumes the moment one slot
//! frees up; items come out in the order they went in.
use std::sync::atomic::{AtomicUsize, Ordering};

use wren_kernel::{Channel, Process};
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
static CHANNEL: Channel<SystemTraits, i32, 2> = Channel::new();
static POPPED: [AtomicUsize; 3] = [
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
];

static PRODUCER: Process<SystemTraits, 256> = Process::new(0, producer_body);
static CONSUMER: Process<SystemTraits, 256> = Process::new(1, consumer_body);

fn sleep_forever() -> ! {
    loop {
        wren_kernel::sleep::<SystemTraits>(0);
    }
}

fn producer_body() -> ! {
    SEQ.expect_and_replace(0, 1);
    CHANNEL.push(1);
    CHANNEL.push(2);

    SEQ.expect_and_replace(1, 2);
    CHANNEL.push(3); // full: blocks until the consumer takes one

    SEQ.expect_and_replace(3, 4);
    sleep_forever()
}

fn consumer_body() -> ! {
    SEQ.expect_and_replace(2, 3);

    // This pop readies the producer, which preempts us and completes its
    // third push before we continue.
    let first = CHANNEL.pop(0).unwrap();
    POPPED[0].store(first as usize, Ordering::SeqCst);

    SEQ.expect_and_replace(4, 5);
    assert_eq!(CHANNEL.get_count(), 2);

    POPPED[1].store(CHANNEL.pop(0).unwrap() as usize, Ordering::SeqCst);
    POPPED[2].store(CHANNEL.pop(0).unwrap() as usize, Ordering::SeqCst);

    SEQ.expect_and_replace(5, 6);
    assert_eq!(CHANNEL.get_count(), 0);
    assert_eq!(CHANNEL.get_free_size(), 2);
    sleep_forever()
}

#[test]
fn blocking_producer() {
    wren_port_std::boot::<SystemTraits>(|| {
        PRODUCER.register();
        CONSUMER.register();
    });

    poll_until(|| SEQ.get() == 6);
    assert_eq!(POPPED[0].load(Ordering::SeqCst), 1);
    assert_eq!(POPPED[1].load(Ordering::SeqCst), 2);
    assert_eq!(POPPED[2].load(Ordering::SeqCst), 3);
}
