//! Processes
use core::mem::MaybeUninit;

use crate::{
    agent::WaiterMap,
    klock::{self, CpuLockCell, CpuLockTokenRefMut},
    port::{StackPtr, StackRegion},
    procmap::{self, Priority},
    sched,
    utils::RawCell,
    KernelTraits, PortThreading,
};

/// Timeout argument of the blocking operations, in system timer periods.
/// `0` requests an unbounded wait.
pub type Timeout = u32;

/// One entry of the process table. Empty until a process of the matching
/// priority registers itself.
pub type ProcessSlot<System> = CpuLockCell<System, Option<&'static ProcessCb<System>>>;

/// The word written over a stack region at registration so that
/// [`ProcessCb::stack_slack`] can detect untouched cells.
#[cfg(feature = "debug-info")]
const STACK_FILL: usize = 0x5a5a_5a5a;

/// *Process control block* - the state data of a process.
pub struct ProcessCb<System: PortThreading> {
    /// The saved top-of-stack. Written by the port during context switches,
    /// read by the scheduler. Valid iff the process is not currently
    /// executing.
    pub(crate) stack_ptr: RawCell<StackPtr>,

    /// The stack area owned by this process. Assigned at registration.
    pub(crate) stack: CpuLockCell<System, Option<StackRegion>>,

    /// The process's entry function. Entered on the first dispatch and again
    /// after a restart. Must never return.
    pub(crate) entry: fn() -> !,

    /// Immutable after construction; also the process's table index.
    pub(crate) priority: Priority,

    /// Non-zero while the process is blocked with a finite deadline. Counted
    /// down by the system timer; reaching zero makes the process ready.
    pub(crate) timeout: CpuLockCell<System, Timeout>,

    /// The waiter map this process is currently blocked on, if any, so that
    /// a forced wake-up or a restart can withdraw its tag.
    pub(crate) waiting_map: CpuLockCell<System, Option<&'static WaiterMap<System>>>,

    /// Set by a process terminating itself; tells [`ProcessCb::start`] to
    /// rebuild the initial stack frame before making the process ready.
    #[cfg(feature = "process-restart")]
    pub(crate) restart_pending: CpuLockCell<System, bool>,

    start_suspended: bool,

    #[cfg(feature = "debug-info")]
    name: Option<&'static str>,
}

/// A process together with its owned stack storage. Instances are expected
/// to be `static`; the stack size is fixed per instance by the type.
pub struct Process<System: PortThreading, const STACK_WORDS: usize> {
    cb: ProcessCb<System>,
    stack: RawCell<[MaybeUninit<usize>; STACK_WORDS]>,
}

impl<System: PortThreading, const STACK_WORDS: usize> Process<System, STACK_WORDS> {
    /// Construct a process with the given unique priority. The process
    /// becomes known to the kernel only once [`register`](Self::register)
    /// is called.
    pub const fn new(priority: Priority, entry: fn() -> !) -> Self {
        Self {
            cb: ProcessCb {
                stack_ptr: RawCell::new(StackPtr::null()),
                stack: CpuLockCell::new(None),
                entry,
                priority,
                timeout: CpuLockCell::new(0),
                waiting_map: CpuLockCell::new(None),
                #[cfg(feature = "process-restart")]
                restart_pending: CpuLockCell::new(false),
                start_suspended: false,
                #[cfg(feature = "debug-info")]
                name: None,
            },
            stack: RawCell::new([MaybeUninit::uninit(); STACK_WORDS]),
        }
    }

    /// Leave the process out of the ready set at registration. Launch it
    /// later with [`ProcessCb::start`].
    pub const fn start_suspended(mut self) -> Self {
        self.cb.start_suspended = true;
        self
    }

    /// Attach a name for diagnostics.
    #[cfg(feature = "debug-info")]
    pub const fn named(mut self, name: &'static str) -> Self {
        self.cb.name = Some(name);
        self
    }
}

impl<System: KernelTraits, const STACK_WORDS: usize> Process<System, STACK_WORDS> {
    /// Enter the process into the process table and prepare its stack so
    /// that the first dispatch lands in the entry function.
    ///
    /// Call once per process, before [`run`](crate::run).
    pub fn register(&'static self) {
        let mut lock = klock::lock_cpu::<System>();
        let cb = &self.cb;
        debug_assert!(cb.priority < System::PROCESS_COUNT);

        let slot = &System::process_table()[cb.priority];
        debug_assert!(
            slot.get(&*lock).is_none(),
            "two processes registered with the same priority"
        );

        let region = StackRegion {
            base: self.stack.as_ptr() as *mut usize,
            words: STACK_WORDS,
        };
        #[cfg(feature = "debug-info")]
        fill_stack(region);

        // Safety: the region is this process's own, unused storage
        let sp = unsafe { System::init_stack_frame(region, cb.entry) };
        // Safety: CPU lock held, the process is not running yet
        unsafe { *cb.stack_ptr.as_ptr() = sp };

        cb.stack.replace(&mut *lock, Some(region));
        slot.replace(&mut *lock, Some(cb));

        if !cb.start_suspended {
            let tag = procmap::prio_tag::<System>(cb.priority);
            System::state()
                .ready_map
                .replace_with(&mut *lock, |m| *m | tag);
        }
    }
}

impl<System: PortThreading, const STACK_WORDS: usize> core::ops::Deref
    for Process<System, STACK_WORDS>
{
    type Target = ProcessCb<System>;
    fn deref(&self) -> &Self::Target {
        &self.cb
    }
}

impl<System: KernelTraits> ProcessCb<System> {
    pub fn priority(&self) -> Priority {
        self.priority
    }

    #[cfg(feature = "debug-info")]
    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    /// If the process is blocked with a finite deadline, cut the wait short:
    /// clear the timeout, make the process ready and reschedule. No effect
    /// on a process that did not opt into a finite wait, so a plain wake
    /// cannot be mistaken for the event it was waiting for.
    pub fn wake_up(&'static self) {
        let mut lock = klock::lock_cpu::<System>();
        if self.timeout.get(&*lock) > 0 {
            self.timeout.replace(&mut *lock, 0);
            make_ready(self.priority, lock.borrow_mut());
            sched::scheduler(lock.borrow_mut());
        }
    }

    /// Make the process ready no matter what it is doing.
    ///
    /// This bypasses the blocked-on service's bookkeeping: the service call
    /// the victim was suspended in resumes, finds its own tag still in the
    /// waiter map, withdraws it and reports a timeout regardless of the
    /// timeout argument it was given. Some services cannot distinguish this
    /// from a genuine grant (see [`Mutex::lock`](crate::Mutex::lock)), so
    /// this is an escape hatch and a launcher for suspended processes, not a
    /// routine signal.
    pub fn force_wake_up(&'static self) {
        let mut lock = klock::lock_cpu::<System>();
        force_wake(self, lock.borrow_mut());
        sched::scheduler(lock.borrow_mut());
    }

    /// Launch a process that was registered with
    /// [`start_suspended`](Process::start_suspended) or wound back with
    /// [`terminate`](Self::terminate).
    pub fn start(&'static self) {
        let mut lock = klock::lock_cpu::<System>();

        #[cfg(feature = "process-restart")]
        if self.restart_pending.replace(&mut *lock, false) {
            reinit_stack(self, lock.borrow_mut());
        }

        force_wake(self, lock.borrow_mut());
        sched::scheduler(lock.borrow_mut());
    }

    /// Whether the process is blocked with a finite deadline.
    pub fn is_sleeping(&self) -> bool {
        let lock = klock::lock_cpu::<System>();
        self.timeout.get(&*lock) > 0
    }

    /// Whether the process is out of the ready set with no deadline pending,
    /// i.e. it can only resume via [`start`](Self::start) or
    /// [`force_wake_up`](Self::force_wake_up).
    pub fn is_suspended(&self) -> bool {
        let lock = klock::lock_cpu::<System>();
        let tag = procmap::prio_tag::<System>(self.priority);
        System::state().ready_map.get(&*lock) & tag == 0 && self.timeout.get(&*lock) == 0
    }

    /// Wind the process back so that [`start`](Self::start) re-enters its
    /// entry function from scratch: withdraw it from any waiter map, clear
    /// its timeout and ready bit, and rebuild the initial stack frame.
    ///
    /// A process may terminate itself; the frame rebuild is then deferred to
    /// `start`, since the caller is still running on the stack in question.
    #[cfg(feature = "process-restart")]
    pub fn terminate(&'static self) {
        let mut lock = klock::lock_cpu::<System>();
        let tag = procmap::prio_tag::<System>(self.priority);

        if let Some(map) = self.waiting_map.replace(&mut *lock, None) {
            map.withdraw(lock.borrow_mut(), tag);
        }
        self.timeout.replace(&mut *lock, 0);
        System::state()
            .ready_map
            .replace_with(&mut *lock, |m| *m & !tag);

        if System::state().cur_priority.get(&*lock) == self.priority {
            self.restart_pending.replace(&mut *lock, true);
            // Switches away for good; a later `start` re-enters the entry
            // function on a fresh frame.
            sched::scheduler(lock.borrow_mut());
            unreachable!();
        } else {
            self.restart_pending.replace(&mut *lock, false);
            reinit_stack(self, lock.borrow_mut());
        }
    }

    /// The service waiter map the process is currently blocked on.
    #[cfg(feature = "debug-info")]
    pub fn waiting_for(&self) -> Option<&'static WaiterMap<System>> {
        let lock = klock::lock_cpu::<System>();
        self.waiting_map.get(&*lock)
    }

    /// Count the stack words never touched since registration, scanning
    /// from the far end of the region. A low value warns of impending
    /// overflow.
    #[cfg(feature = "debug-info")]
    pub fn stack_slack(&self) -> usize {
        let lock = klock::lock_cpu::<System>();
        let Some(region) = self.stack.get(&*lock) else {
            return 0;
        };
        let mut n = 0;
        while n < region.words {
            // Safety: the region stays allocated for the program's lifetime
            let word = unsafe { region.base.add(n).read_volatile() };
            if word != STACK_FILL {
                break;
            }
            n += 1;
        }
        n
    }
}

/// Block the calling process for `timeout` timer periods (forever if `0`).
/// On return the timeout cell is zero again.
pub fn sleep<System: KernelTraits>(timeout: Timeout) {
    let mut lock = klock::lock_cpu::<System>();
    let state = System::state();
    let cur = state.cur_priority.get(&*lock);
    let cb = System::process_table()[cur].get(&*lock).unwrap();
    cb.timeout.replace(&mut *lock, timeout);
    let tag = procmap::prio_tag::<System>(cur);
    state.ready_map.replace_with(&mut *lock, |m| *m & !tag);
    sched::scheduler(lock.borrow_mut());
}

fn make_ready<System: KernelTraits>(
    priority: Priority,
    mut lock: CpuLockTokenRefMut<'_, System>,
) {
    let tag = procmap::prio_tag::<System>(priority);
    System::state()
        .ready_map
        .replace_with(&mut *lock, |m| *m | tag);
}

fn force_wake<System: KernelTraits>(
    cb: &'static ProcessCb<System>,
    mut lock: CpuLockTokenRefMut<'_, System>,
) {
    // The victim's tag deliberately stays in any waiter map it sits in: the
    // resumed service call uses it to tell a forced wake from a grant, then
    // withdraws it itself. Only `terminate` pulls the tag out from under a
    // process, because its victim never resumes.
    cb.timeout.replace(&mut *lock, 0);
    make_ready(cb.priority, lock.borrow_mut());
}

#[cfg(feature = "process-restart")]
fn reinit_stack<System: KernelTraits>(
    cb: &'static ProcessCb<System>,
    mut lock: CpuLockTokenRefMut<'_, System>,
) {
    if let Some(region) = cb.stack.get(&*lock) {
        #[cfg(feature = "debug-info")]
        fill_stack(region);
        // Safety: the owning process is not running and will not run until
        // `start`
        let sp = unsafe { System::init_stack_frame(region, cb.entry) };
        // Safety: CPU lock held
        unsafe { *cb.stack_ptr.as_ptr() = sp };
    }
}

#[cfg(feature = "debug-info")]
fn fill_stack(region: StackRegion) {
    for i in 0..region.words {
        // Safety: the region is exclusively owned and not executing
        unsafe { region.base.add(i).write_volatile(STACK_FILL) };
    }
}
