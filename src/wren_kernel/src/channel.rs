//! Typed bounded channels
use heapless::Deque;

use crate::{
    agent::{self, WaiterMap},
    klock::{self, CpuLockCell},
    proc::Timeout,
    utils::Init,
    KernelTraits, PortThreading,
};

/// A bounded FIFO of `N` items with blocking producers and consumers.
///
/// Producers block while the queue is full, consumers while it is empty;
/// each side maintains its own waiter set. Every blocking operation
/// re-checks its predicate after a wake-up: being resumed only means the
/// queue *was* in the right state, another waiter may have raced in first.
pub struct Channel<System: PortThreading, T: 'static, const N: usize> {
    fifo: CpuLockCell<System, Deque<T, N>>,
    producer_waiters: WaiterMap<System>,
    consumer_waiters: WaiterMap<System>,
}

impl<System: PortThreading, T, const N: usize> Channel<System, T, N> {
    pub const fn new() -> Self {
        Self {
            fifo: CpuLockCell::new(Deque::new()),
            producer_waiters: WaiterMap::new(),
            consumer_waiters: WaiterMap::new(),
        }
    }
}

impl<System: PortThreading, T, const N: usize> Init for Channel<System, T, N> {
    const INIT: Self = Self::new();
}

impl<System: PortThreading, T, const N: usize> Default for Channel<System, T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<System: KernelTraits, T: 'static, const N: usize> Channel<System, T, N> {
    /// Append `item` at the tail, blocking while the queue is full.
    pub fn push(&'static self, item: T) {
        let mut lock = klock::lock_cpu::<System>();
        while self.fifo.read(&*lock).is_full() {
            self.producer_waiters.suspend(lock.borrow_mut());
            let _ = self.producer_waiters.timed_out(lock.borrow_mut());
        }
        if self.fifo.write(&mut *lock).push_back(item).is_err() {
            unreachable!();
        }
        self.consumer_waiters.resume_next_ready(lock.borrow_mut());
    }

    /// Insert `item` at the head, ahead of everything queued, blocking
    /// while the queue is full.
    pub fn push_front(&'static self, item: T) {
        let mut lock = klock::lock_cpu::<System>();
        while self.fifo.read(&*lock).is_full() {
            self.producer_waiters.suspend(lock.borrow_mut());
            let _ = self.producer_waiters.timed_out(lock.borrow_mut());
        }
        if self.fifo.write(&mut *lock).push_front(item).is_err() {
            unreachable!();
        }
        self.consumer_waiters.resume_next_ready(lock.borrow_mut());
    }

    /// Remove the head item, blocking while the queue is empty. `timeout`
    /// as in [`EventFlag::wait`](crate::EventFlag::wait); `None` iff the
    /// wait expired.
    pub fn pop(&'static self, timeout: Timeout) -> Option<T> {
        self.pop_inner(timeout, |fifo| fifo.pop_front())
    }

    /// Remove the *tail* item, blocking while the queue is empty.
    pub fn pop_back(&'static self, timeout: Timeout) -> Option<T> {
        self.pop_inner(timeout, |fifo| fifo.pop_back())
    }

    fn pop_inner(
        &'static self,
        timeout: Timeout,
        take: impl Fn(&mut Deque<T, N>) -> Option<T>,
    ) -> Option<T> {
        let mut lock = klock::lock_cpu::<System>();
        loop {
            if let Some(item) = take(self.fifo.write(&mut *lock)) {
                self.producer_waiters.resume_next_ready(lock.borrow_mut());
                return Some(item);
            }

            agent::set_cur_timeout::<System>(lock.borrow_mut(), timeout);
            self.consumer_waiters.suspend(lock.borrow_mut());

            if self.consumer_waiters.timed_out(lock.borrow_mut()) {
                return None;
            }
            agent::clear_cur_timeout::<System>(lock.borrow_mut());
        }
    }

    /// Number of queued items.
    pub fn get_count(&self) -> usize {
        let lock = klock::lock_cpu::<System>();
        self.fifo.read(&*lock).len()
    }

    /// Number of free slots.
    pub fn get_free_size(&self) -> usize {
        let lock = klock::lock_cpu::<System>();
        N - self.fifo.read(&*lock).len()
    }

    /// Discard everything queued, releasing any blocked producers.
    pub fn flush(&'static self) {
        let mut lock = klock::lock_cpu::<System>();
        let fifo = self.fifo.write(&mut *lock);
        let emptied = !fifo.is_empty();
        while fifo.pop_front().is_some() {}
        if emptied {
            self.producer_waiters.resume_all(lock.borrow_mut());
        }
    }
}

impl<System: KernelTraits, T: Clone + 'static, const N: usize> Channel<System, T, N> {
    /// Append all of `data` at the tail, in order, blocking until the queue
    /// has room for the whole of it at once.
    pub fn write(&'static self, data: &[T]) {
        debug_assert!(data.len() <= N);
        let mut lock = klock::lock_cpu::<System>();
        while N - self.fifo.read(&*lock).len() < data.len() {
            self.producer_waiters.suspend(lock.borrow_mut());
            let _ = self.producer_waiters.timed_out(lock.borrow_mut());
        }
        let fifo = self.fifo.write(&mut *lock);
        for item in data {
            if fifo.push_back(item.clone()).is_err() {
                unreachable!();
            }
        }
        self.consumer_waiters.resume_all(lock.borrow_mut());
    }

    /// Remove `out.len()` items from the head, blocking until the queue
    /// holds that many at once. Returns `false` iff the wait expired; `out`
    /// is then untouched.
    pub fn read(&'static self, out: &mut [T], timeout: Timeout) -> bool {
        debug_assert!(out.len() <= N);
        let mut lock = klock::lock_cpu::<System>();
        loop {
            if self.fifo.read(&*lock).len() >= out.len() {
                break;
            }

            agent::set_cur_timeout::<System>(lock.borrow_mut(), timeout);
            self.consumer_waiters.suspend(lock.borrow_mut());

            if self.consumer_waiters.timed_out(lock.borrow_mut()) {
                return false;
            }
            agent::clear_cur_timeout::<System>(lock.borrow_mut());
        }
        {
            let fifo = self.fifo.write(&mut *lock);
            for slot in out.iter_mut() {
                match fifo.pop_front() {
                    Some(item) => *slot = item,
                    None => unreachable!(),
                }
            }
        }
        self.producer_waiters.resume_all(lock.borrow_mut());
        true
    }

    /// Append at most `data.len()` items without blocking; returns how many
    /// fit. For interrupt handlers.
    pub fn write_isr(&'static self, data: &[T]) -> usize {
        let mut lock = klock::lock_cpu::<System>();
        let mut written = 0;
        {
            let fifo = self.fifo.write(&mut *lock);
            for item in data {
                if fifo.push_back(item.clone()).is_err() {
                    break;
                }
                written += 1;
            }
        }
        if written > 0 {
            self.consumer_waiters.resume_all_isr(lock.borrow_mut());
        }
        written
    }

    /// Remove at most `out.len()` items without blocking; returns how many
    /// were available. For interrupt handlers.
    pub fn read_isr(&'static self, out: &mut [T]) -> usize {
        let mut lock = klock::lock_cpu::<System>();
        let mut read = 0;
        {
            let fifo = self.fifo.write(&mut *lock);
            for slot in out.iter_mut() {
                match fifo.pop_front() {
                    Some(item) => {
                        *slot = item;
                        read += 1;
                    }
                    None => break,
                }
            }
        }
        if read > 0 {
            self.producer_waiters.resume_all_isr(lock.borrow_mut());
        }
        read
    }
}

#[cfg(test)]
mod tests {
    use heapless::Deque;
    use quickcheck_macros::quickcheck;
    use std::collections::VecDeque;

    /// The queue discipline the channel builds on: interleaved head/tail
    /// operations agree with the standard library's deque.
    #[quickcheck]
    fn fifo_order_matches_reference(ops: Vec<(u8, u8)>) {
        let mut subject: Deque<u8, 4> = Deque::new();
        let mut reference: VecDeque<u8> = VecDeque::new();

        for (op, value) in ops {
            match op % 4 {
                0 => {
                    if reference.len() < 4 {
                        reference.push_back(value);
                        assert!(subject.push_back(value).is_ok());
                    } else {
                        assert!(subject.push_back(value).is_err());
                    }
                }
                1 => {
                    if reference.len() < 4 {
                        reference.push_front(value);
                        assert!(subject.push_front(value).is_ok());
                    } else {
                        assert!(subject.push_front(value).is_err());
                    }
                }
                2 => assert_eq!(subject.pop_front(), reference.pop_front()),
                _ => assert_eq!(subject.pop_back(), reference.pop_back()),
            }
            assert_eq!(subject.len(), reference.len());
        }
    }
}
