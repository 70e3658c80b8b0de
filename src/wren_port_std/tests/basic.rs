//! Checks the startup path and the simplest kernel services.
use wren_kernel::Process;
use wren_port_std::{poll_until, tick};

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

static TASK_A: Process<SystemTraits, 256> = Process::new(0, task_a);
static TASK_B: Process<SystemTraits, 256> = Process::new(1, task_b).start_suspended();

fn sleep_forever() -> ! {
    loop {
        wren_kernel::sleep::<SystemTraits>(0);
    }
}

fn task_a() -> ! {
    SEQ.expect_and_replace(0, 1);
    assert_eq!(wren_kernel::cur_proc_priority::<SystemTraits>(), 0);
    assert!(!wren_kernel::is_in_isr::<SystemTraits>());

    // B was registered suspended and must not have run yet.
    assert!(wren_kernel::get_proc::<SystemTraits>(1).unwrap().is_suspended());
    TASK_B.start();

    // B is lower-priority, so it still has not run.
    SEQ.expect_and_replace(1, 2);

    {
        let _cs = wren_kernel::CriticalSection::<SystemTraits>::new();
        // Kernel calls nest under a user-held critical section.
        assert_eq!(wren_kernel::get_tick_count::<SystemTraits>(), 0);
    }

    sleep_forever()
}

fn task_b() -> ! {
    SEQ.expect_and_replace(2, 3);
    assert_eq!(wren_kernel::cur_proc_priority::<SystemTraits>(), 1);
    sleep_forever()
}

#[test]
fn boots_and_schedules() {
    wren_port_std::boot::<SystemTraits>(|| {
        TASK_A.register();
        TASK_B.register();
    });

    poll_until(|| SEQ.get() == 3);

    // With everyone suspended, only the idle process is runnable.
    poll_until(|| wren_kernel::cur_proc_priority::<SystemTraits>() == 2);

    let before = wren_kernel::get_tick_count::<SystemTraits>();
    tick::<SystemTraits>();
    tick::<SystemTraits>();
    assert_eq!(wren_kernel::get_tick_count::<SystemTraits>() - before, 2);

    // Timer periods with nothing expiring wake nobody.
    assert_eq!(SEQ.get(), 3);

    // While the timer is masked, periods latch (one deep) instead of
    // being delivered; the latched one fires at unmask.
    wren_kernel::lock_system_timer::<SystemTraits>();
    tick::<SystemTraits>();
    tick::<SystemTraits>();
    tick::<SystemTraits>();
    assert_eq!(wren_kernel::get_tick_count::<SystemTraits>() - before, 2);
    wren_kernel::unlock_system_timer::<SystemTraits>();
    assert_eq!(wren_kernel::get_tick_count::<SystemTraits>() - before, 3);
}
