//! The event record: the unit of registration.
//!
//! An `EventRecord` lives in the reactor's `Slab` arena (`crate::slab`); the
//! caller holds only the opaque `EventId` returned by
//! `Reactor::event_set`. See `SPEC_FULL.md` §3 for why ownership is
//! expressed this way in safe Rust.

use crate::interest::{Interest, Membership};
use crate::reactor::Reactor;
use std::time::Instant;

/// A callback invoked when its event fires.
///
/// Takes the owning reactor (so the callback can re-arm itself or other
/// events — the safe-Rust reading of mio's own deprecated `Handler::ready(&mut
/// self, event_loop: &mut EventLoop<Self>, ..)`), the firing descriptor, the
/// result mask describing why it fired, and a mutable reference to the
/// remaining delivery count for this iteration (always 1, except for
/// coalesced signal deliveries). Setting it to 0 stops further deliveries to
/// this event within the current dispatch iteration — the safe-Rust reading
/// of the C API's externally-owned `pncalls` pointer.
pub type Callback = Box<dyn FnMut(&mut Reactor, i32, Interest, &mut u32)>;

/// Opaque handle to an `EventRecord` held in the reactor's arena.
///
/// Cheap to copy; callers pass it back to `event_add`/`event_del`/
/// `event_active`/`event_free`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct EventId(pub(crate) usize);

/// The key an `EventRecord` is stored under in the timer set, carried on the
/// record itself so removal is a direct O(log n) `BTreeMap::remove` rather
/// than a scan.
pub type TimerKey = (Instant, u64);

pub struct EventRecord {
    /// File descriptor, or -1 for a pure-timer event; interpreted as a
    /// signal number when `SIGNAL` is set in `interest`.
    pub fd: i32,
    /// Registration intent.
    pub interest: Interest,
    /// Present iff this record is in the timer set.
    pub deadline: Option<TimerKey>,
    pub callback: Callback,
    /// Bitset delivered to the callback describing which conditions caused
    /// this firing. OR-accumulated across `event_active` calls in the same
    /// iteration.
    pub result_mask: Interest,
    /// Pending delivery count; only > 1 for coalesced signal events.
    pub ncalls: u32,
    pub membership: Membership,
}

impl EventRecord {
    pub(crate) fn new(fd: i32, interest: Interest, callback: Callback) -> EventRecord {
        debug_assert!(
            !(interest.is_signal() && interest.is_io()),
            "an event cannot mix SIGNAL with READ/WRITE interest"
        );

        EventRecord {
            fd,
            interest,
            deadline: None,
            callback,
            result_mask: Interest::NONE,
            ncalls: 0,
            membership: Membership::INITIALIZED,
        }
    }
}

impl std::fmt::Debug for EventRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRecord")
            .field("fd", &self.fd)
            .field("interest", &self.interest)
            .field("has_deadline", &self.deadline.is_some())
            .field("result_mask", &self.result_mask)
            .field("ncalls", &self.ncalls)
            .finish()
    }
}
