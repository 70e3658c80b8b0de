//! Message passing: the payload travels with the announcement, and an
//! announcement made with no waiter is picked up by the next wait.
use wren_kernel::{Message, Process};
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

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Reading {
    channel: u8,
    value: i32,
}

static SEQ: SeqTracker = SeqTracker::new();
static MESSAGE: Message<SystemTraits, Reading> = Message::new(Reading {
    channel: 0,
    value: 0,
});

static RECEIVER: Process<SystemTraits, 256> = Process::new(0, receiver_body);
static SENDER: Process<SystemTraits, 256> = Process::new(1, sender_body);

fn sleep_forever() -> ! {
    loop {
        wren_kernel::sleep::<SystemTraits>(0);
    }
}

fn receiver_body() -> ! {
    SEQ.expect_and_replace(0, 1);

    assert!(MESSAGE.wait(0)); // blocks; sender runs
    assert_eq!(
        MESSAGE.out(),
        Reading {
            channel: 7,
            value: -40
        }
    );
    SEQ.expect_and_replace(2, 3);
    sleep_forever()
}

fn sender_body() -> ! {
    SEQ.expect_and_replace(1, 2);

    MESSAGE.assign(Reading {
        channel: 7,
        value: -40,
    });
    assert!(!MESSAGE.is_non_empty());
    MESSAGE.send(); // receiver preempts and reads

    SEQ.expect_and_replace(3, 4);

    // Send with nobody waiting: the announcement is latched ...
    MESSAGE.assign(Reading {
        channel: 9,
        value: 85,
    });
    MESSAGE.send();
    assert!(MESSAGE.is_non_empty());
    SEQ.expect_and_replace(4, 5);
    sleep_forever()
}

#[test]
fn payload_follows_announcement() {
    wren_port_std::boot::<SystemTraits>(|| {
        RECEIVER.register();
        SENDER.register();
    });

    poll_until(|| SEQ.get() == 5);

    // ... and remains observable afterwards.
    assert!(MESSAGE.is_non_empty());
    assert_eq!(
        MESSAGE.out(),
        Reading {
            channel: 9,
            value: 85
        }
    );
}
