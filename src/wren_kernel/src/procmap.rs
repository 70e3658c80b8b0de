//! Priority bitmap operations
//!
//! A [`ProcessMap`] holds one bit per registered process, at a position
//! derived from the process's priority. The same encoding is used for the
//! ready set and for every service's waiter sets, so moving a process
//! between them is a pair of mask operations.
use crate::{
    utils::{highest_set_bit32, trailing_zeros32},
    KernelCfg,
};

/// A bitmap with one bit per process.
///
/// Under the default order, bit `i` belongs to the process with priority
/// `i`; under the reversed order, to the process with priority
/// `PROCESS_COUNT - 1 - i`.
pub type ProcessMap = u32;

/// A process's scheduling priority and its index in the process table.
/// `0` is the most urgent under the default order.
pub type Priority = usize;

/// The width of [`ProcessMap`] bounds the number of processes.
pub const MAX_PROCESS_COUNT: usize = ProcessMap::BITS as usize;

#[inline]
fn tag_in(priority: Priority, reversed: bool, count: usize) -> ProcessMap {
    debug_assert!(priority < count && count <= MAX_PROCESS_COUNT);
    if reversed {
        1 << (count - 1 - priority)
    } else {
        1 << priority
    }
}

#[inline]
fn highest_priority_in(map: ProcessMap, reversed: bool, count: usize) -> Priority {
    debug_assert!(map != 0);
    if reversed {
        count - 1 - highest_set_bit32(map) as Priority
    } else {
        trailing_zeros32(map) as Priority
    }
}

#[inline]
fn highest_prio_tag_in(map: ProcessMap, reversed: bool) -> ProcessMap {
    debug_assert!(map != 0);
    if reversed {
        // The most urgent process occupies the most significant set bit.
        1 << highest_set_bit32(map)
    } else {
        // Isolate the least significant set bit.
        map & map.wrapping_neg()
    }
}

/// The map with exactly the given process's bit set.
#[inline]
pub(crate) fn prio_tag<System: KernelCfg>(priority: Priority) -> ProcessMap {
    tag_in(
        priority,
        System::PRIORITY_ORDER_REVERSED,
        System::PROCESS_COUNT,
    )
}

/// The priority of the most urgent process in `map`.
///
/// `map` must be non-empty. The idle process's ready bit is always set, so
/// the scheduler never calls this with an empty map.
#[inline]
pub(crate) fn highest_priority<System: KernelCfg>(map: ProcessMap) -> Priority {
    highest_priority_in(
        map,
        System::PRIORITY_ORDER_REVERSED,
        System::PROCESS_COUNT,
    )
}

/// The tag of the most urgent process in `map`. `map` must be non-empty.
#[inline]
pub(crate) fn highest_prio_tag<System: KernelCfg>(map: ProcessMap) -> ProcessMap {
    highest_prio_tag_in(map, System::PRIORITY_ORDER_REVERSED)
}
